//! # 错误处理宏

/// 按变体名快速构造 `ProxyError`
///
/// ```ignore
/// error!(Network, "connection reset")
/// error!(ServerStart, "bind failed", io_err)
/// ```
#[macro_export]
macro_rules! error {
    (Network, $msg:expr) => {
        $crate::error::ProxyError::network($msg)
    };
    (ServerStart, $msg:expr, $source:expr) => {
        $crate::error::ProxyError::server_start_with_source($msg, $source)
    };
    (Internal, $msg:expr, $source:expr) => {
        $crate::error::ProxyError::internal_with_source($msg, $source)
    };
}

/// 条件不成立时提前返回给定错误
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err.into());
        }
    };
}
