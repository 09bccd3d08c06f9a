//! # 环境变量读取
//!
//! 通过 `ReadEnv` 抽象读取环境变量，测试中可以注入内存实现而不修改进程环境

use std::collections::HashMap;
use std::env;

/// 环境变量来源
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;

    /// 读取非空值（去除首尾空白），缺失或为空时返回 `None`
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// 进程环境
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

impl ReadEnv for HashMap<String, String> {
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        self.get(key).cloned().ok_or(env::VarError::NotPresent)
    }
}

impl<E: ReadEnv + ?Sized> ReadEnv for &E {
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        (**self).var(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_env_delegation() {
        let std_result = std::env::var("PATH");
        assert_eq!(std_result.is_ok(), SystemEnv.var("PATH").is_ok());
    }

    #[test]
    fn test_map_env_non_empty() {
        let env: HashMap<String, String> = [
            ("PORT".to_string(), " 8080 ".to_string()),
            ("TARGET".to_string(), "   ".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(env.non_empty("PORT").as_deref(), Some("8080"));
        assert_eq!(env.non_empty("TARGET"), None);
        assert_eq!(env.non_empty("MISSING"), None);
        assert!(matches!(env.var("MISSING"), Err(env::VarError::NotPresent)));
    }
}
