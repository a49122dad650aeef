use uuid::Uuid;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Fresh identifier for a synthesized message or tool call.
#[inline]
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Message id for providers that do not supply one.
#[inline]
pub(crate) fn new_message_id() -> String {
    format!("msg-{}", new_id())
}

/// Append `value` as a JSON string literal, byte-identical to `serde_json`.
#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

/// Split a `data:` URL into its media type and base64 payload.
///
/// Returns `None` when the URL has no `,` separator.
pub(crate) fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let (header, payload) = url.split_once(',')?;
    let media_type = header
        .strip_prefix("data:")
        .map(|rest| rest.split(';').next().unwrap_or(""))
        .unwrap_or("");
    Some((media_type, payload))
}

/// Serde adapter storing raw bytes as standard base64 text.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
