//! # 请求体解析与重新序列化
//!
//! 请求体在转发前先按 `Content-Type` 解析为结构化形式（供诊断使用），
//! 出站时再按出站 `Content-Type` 重新编码，并显式设置新的 `Content-Length`。
//!
//! - JSON 与 form-urlencoded 会被重新编码
//! - 空请求体（0 字节、`{}`、`[]`、没有字段的表单）保持原样
//! - 其他类型或解析失败的请求体原样透传

use axum::http::HeaderValue;
use bytes::Bytes;
use serde_json::Value;
use url::form_urlencoded;

/// 请求体编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Form,
    Other,
}

impl BodyEncoding {
    /// 根据 `Content-Type` 判断编码，忽略参数与大小写
    #[must_use]
    pub fn from_content_type(value: Option<&HeaderValue>) -> Self {
        let Some(media_type) = value
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
        else {
            return Self::Other;
        };

        if media_type == "application/json"
            || (media_type.starts_with("application/") && media_type.ends_with("+json"))
        {
            Self::Json
        } else if media_type == "application/x-www-form-urlencoded" {
            Self::Form
        } else {
            Self::Other
        }
    }
}

/// 解析后的请求体
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// 0 字节
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    /// 类型不支持或解析失败
    Unparsed,
}

impl ParsedBody {
    /// 按编码解析原始字节，失败时返回 `Unparsed`
    #[must_use]
    pub fn parse(raw: &[u8], encoding: BodyEncoding) -> Self {
        if raw.is_empty() {
            return Self::Empty;
        }
        match encoding {
            BodyEncoding::Json => {
                serde_json::from_slice(raw).map_or(Self::Unparsed, Self::Json)
            }
            BodyEncoding::Form => {
                if std::str::from_utf8(raw).is_err() {
                    return Self::Unparsed;
                }
                Self::Form(
                    form_urlencoded::parse(raw)
                        .map(|(k, v)| (k.into_owned(), v.into_owned()))
                        .collect(),
                )
            }
            BodyEncoding::Other => Self::Unparsed,
        }
    }

    /// 没有任何字段
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Json(Value::Object(map)) => map.is_empty(),
            Self::Json(Value::Array(items)) => items.is_empty(),
            Self::Json(_) | Self::Unparsed => false,
            Self::Form(pairs) => pairs.is_empty(),
        }
    }

    /// JSON 对象请求体的顶层字段
    #[must_use]
    pub fn json_field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Json(Value::Object(map)) => map.get(name),
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Json(_) => "json",
            Self::Form(_) => "form",
            Self::Unparsed => "unparsed",
        }
    }
}

fn encode_form(pairs: &[(String, String)]) -> Bytes {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    Bytes::from(serializer.finish())
}

/// 按出站编码重新序列化已解析的请求体
///
/// 无法用目标编码表示时返回 `None`，调用方应透传原始字节。
#[must_use]
pub fn reserialize(parsed: &ParsedBody, encoding: BodyEncoding) -> Option<Bytes> {
    match (parsed, encoding) {
        (ParsedBody::Json(value), BodyEncoding::Json) => {
            serde_json::to_vec(value).ok().map(Bytes::from)
        }
        (ParsedBody::Form(pairs), BodyEncoding::Form) => Some(encode_form(pairs)),
        _ => None,
    }
}

/// 出站请求体
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedBody {
    /// 不写请求体
    None,
    /// 原始字节
    Passthrough(Bytes),
    /// 重新编码后的字节
    Reencoded(Bytes),
}

impl PreparedBody {
    /// 根据解析结果决定出站请求体
    #[must_use]
    pub fn prepare(parsed: &ParsedBody, raw: Bytes, encoding: BodyEncoding) -> Self {
        if raw.is_empty() {
            return Self::None;
        }
        if parsed.is_empty() {
            return Self::Passthrough(raw);
        }
        reserialize(parsed, encoding).map_or(Self::Passthrough(raw), Self::Reencoded)
    }

    /// 需要设置的 `Content-Length`
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Passthrough(bytes) | Self::Reencoded(bytes) => Some(bytes.len()),
        }
    }

    #[must_use]
    pub const fn is_reencoded(&self) -> bool {
        matches!(self, Self::Reencoded(_))
    }

    #[must_use]
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Self::None => None,
            Self::Passthrough(bytes) | Self::Reencoded(bytes) => Some(bytes),
        }
    }
}

/// 截断的可读预览，用于诊断日志
///
/// 只解码前 `max_chars * 4` 字节，大请求体不会被整体复制。
#[must_use]
pub fn preview(raw: &[u8], max_chars: usize) -> String {
    let mut head = &raw[..raw.len().min(max_chars.saturating_mul(4))];
    if let Err(e) = std::str::from_utf8(head) {
        // 截断点落在多字节字符中间
        if e.error_len().is_none() {
            head = &head[..e.valid_up_to()];
        }
    }

    let text = String::from_utf8_lossy(head);
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None if head.len() < raw.len() => format!("{text}…"),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Some("application/json"), BodyEncoding::Json)]
    #[case(Some("Application/JSON; charset=utf-8"), BodyEncoding::Json)]
    #[case(Some("application/merge-patch+json"), BodyEncoding::Json)]
    #[case(Some("application/x-www-form-urlencoded"), BodyEncoding::Form)]
    #[case(Some("multipart/form-data; boundary=x"), BodyEncoding::Other)]
    #[case(Some("audio/mpeg"), BodyEncoding::Other)]
    #[case(None, BodyEncoding::Other)]
    fn test_encoding_detection(#[case] content_type: Option<&str>, #[case] expected: BodyEncoding) {
        let value = content_type.map(|v| HeaderValue::from_str(v).unwrap());
        assert_eq!(BodyEncoding::from_content_type(value.as_ref()), expected);
    }

    #[test]
    fn test_json_is_reencoded_with_new_length() {
        let raw = Bytes::from_static(b"{ \"model\" : \"gpt-4o\",\n \"stream\": true }");
        let parsed = ParsedBody::parse(&raw, BodyEncoding::Json);
        let prepared = PreparedBody::prepare(&parsed, raw.clone(), BodyEncoding::Json);

        assert!(prepared.is_reencoded());
        let bytes = prepared.clone().into_bytes().unwrap();
        assert_eq!(&bytes[..], br#"{"model":"gpt-4o","stream":true}"#);
        assert_eq!(prepared.content_length(), Some(bytes.len()));
        assert!(bytes.len() < raw.len());
    }

    #[test]
    fn test_form_is_reencoded() {
        let raw = Bytes::from_static(b"text=hello+world&voice=alloy&tag=a&tag=b");
        let parsed = ParsedBody::parse(&raw, BodyEncoding::Form);
        assert_eq!(
            parsed,
            ParsedBody::Form(vec![
                ("text".into(), "hello world".into()),
                ("voice".into(), "alloy".into()),
                ("tag".into(), "a".into()),
                ("tag".into(), "b".into()),
            ])
        );

        let prepared = PreparedBody::prepare(&parsed, raw, BodyEncoding::Form);
        assert_eq!(
            prepared.into_bytes().unwrap(),
            Bytes::from_static(b"text=hello+world&voice=alloy&tag=a&tag=b")
        );
    }

    #[rstest]
    #[case(b"" as &[u8], BodyEncoding::Json)]
    #[case(b"", BodyEncoding::Other)]
    fn test_zero_bytes_writes_no_body(#[case] raw: &[u8], #[case] encoding: BodyEncoding) {
        let parsed = ParsedBody::parse(raw, encoding);
        let prepared = PreparedBody::prepare(&parsed, Bytes::copy_from_slice(raw), encoding);
        assert_eq!(prepared, PreparedBody::None);
        assert_eq!(prepared.content_length(), None);
    }

    #[rstest]
    #[case(b"{}" as &[u8], BodyEncoding::Json)]
    #[case(b"[ ]", BodyEncoding::Json)]
    #[case(b"&&", BodyEncoding::Form)]
    fn test_empty_structure_keeps_original_bytes(#[case] raw: &[u8], #[case] encoding: BodyEncoding) {
        let parsed = ParsedBody::parse(raw, encoding);
        assert!(parsed.is_empty());
        let prepared = PreparedBody::prepare(&parsed, Bytes::copy_from_slice(raw), encoding);
        assert_eq!(prepared, PreparedBody::Passthrough(Bytes::copy_from_slice(raw)));
    }

    #[test]
    fn test_malformed_json_passes_through() {
        let raw = Bytes::from_static(b"{\"model\": ");
        let parsed = ParsedBody::parse(&raw, BodyEncoding::Json);
        assert_eq!(parsed, ParsedBody::Unparsed);
        assert_eq!(
            PreparedBody::prepare(&parsed, raw.clone(), BodyEncoding::Json),
            PreparedBody::Passthrough(raw)
        );
    }

    #[test]
    fn test_binary_body_passes_through() {
        let raw = Bytes::from_static(&[0xff, 0xfe, 0x00, 0x01]);
        let parsed = ParsedBody::parse(&raw, BodyEncoding::Other);
        assert_eq!(
            PreparedBody::prepare(&parsed, raw.clone(), BodyEncoding::Other),
            PreparedBody::Passthrough(raw)
        );
        assert_eq!(ParsedBody::parse(&[0xff, 0xfe], BodyEncoding::Form), ParsedBody::Unparsed);
    }

    #[test]
    fn test_mismatched_encoding_passes_through() {
        let json = ParsedBody::Json(json!({"text": "hi there"}));
        assert!(reserialize(&json, BodyEncoding::Form).is_none());

        let form = ParsedBody::Form(vec![("a".into(), "1".into())]);
        assert!(reserialize(&form, BodyEncoding::Json).is_none());
        assert!(reserialize(&form, BodyEncoding::Other).is_none());

        let raw = Bytes::from_static(b"a=1");
        assert_eq!(
            PreparedBody::prepare(&form, raw.clone(), BodyEncoding::Json),
            PreparedBody::Passthrough(raw)
        );
    }

    #[test]
    fn test_model_field_lookup() {
        let parsed = ParsedBody::parse(br#"{"model":"gpt-4o-mini"}"#, BodyEncoding::Json);
        assert_eq!(parsed.json_field("model"), Some(&json!("gpt-4o-mini")));
        assert_eq!(ParsedBody::Empty.json_field("model"), None);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo wörld".as_bytes(), 4), "héll…");
        assert_eq!(preview(b"short", 10), "short");
    }

    #[test]
    fn test_preview_only_decodes_head_of_large_body() {
        let large = vec![b'a'; 4 * 1024 * 1024];
        assert_eq!(preview(&large, 5), "aaaaa…");

        let emoji = "😀".repeat(10);
        assert_eq!(preview(emoji.as_bytes(), 3), "😀😀😀…");

        // 4 字节上限切在多字节字符中间
        let mixed = format!("a{}", "😀".repeat(4));
        assert_eq!(preview(mixed.as_bytes(), 2), "a😀…");
    }
}
