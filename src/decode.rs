/// Built-in stdout decoders.
///
/// A decoder turns the concatenated stdout bytes of a finished process into a
/// domain value. Decoders run at most once per execution, and only when the
/// process exited on its own (never after a signal kill).
use serde::de::DeserializeOwned;

/// Errors produced while decoding captured stdout.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Stdout was not valid JSON or did not match the requested shape.
    #[error("invalid JSON in stdout: {0}")]
    Json(#[from] serde_json::Error),
    /// Stdout was not valid UTF-8 where UTF-8 was required.
    #[error("stdout is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// Failure reported by a caller-supplied decoder.
    #[error("{0}")]
    Custom(String),
}

impl DecodeError {
    /// Build a decoder failure from any message.
    pub fn custom(msg: impl Into<String>) -> Self {
        DecodeError::Custom(msg.into())
    }

    /// Whether the input itself was malformed (as opposed to well-formed
    /// input that failed to map onto the target type).
    pub fn is_malformed_input(&self) -> bool {
        match self {
            DecodeError::Json(e) => matches!(
                e.classify(),
                serde_json::error::Category::Syntax | serde_json::error::Category::Eof
            ),
            DecodeError::Utf8(_) => true,
            DecodeError::Custom(_) => false,
        }
    }
}

/// Decode stdout as text. Invalid UTF-8 sequences are replaced, so this never fails.
pub fn plain_text(bytes: &[u8]) -> Result<String, DecodeError> {
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Decode stdout as a JSON document.
pub fn json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Keep stdout as raw bytes.
pub fn raw(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_plain_text_keeps_trailing_newline() {
        assert_eq!(plain_text(b"hello\n").unwrap(), "hello\n");
    }

    #[test]
    fn test_plain_text_replaces_invalid_utf8() {
        let text = plain_text(&[b'a', 0xff, b'b']).unwrap();
        assert_eq!(text, "a\u{fffd}b");
    }

    #[test]
    fn test_json_decodes_value() {
        let value: serde_json::Value = json(br#"{"ok": true, "n": 3}"#).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["n"], 3);
    }

    #[test]
    fn test_json_decodes_typed_struct() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Report {
            name: String,
            count: u32,
        }
        let report: Report = json(br#"{"name":"disk","count":2}"#).unwrap();
        assert_eq!(
            report,
            Report {
                name: "disk".to_string(),
                count: 2
            }
        );
    }

    #[test]
    fn test_json_syntax_error_is_malformed() {
        let err = json::<serde_json::Value>(b"{not json").unwrap_err();
        assert!(err.is_malformed_input());
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_json_empty_input_is_malformed() {
        let err = json::<serde_json::Value>(b"").unwrap_err();
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_json_type_mismatch_is_not_malformed() {
        let err = json::<Vec<u32>>(br#"{"a": 1}"#).unwrap_err();
        assert!(!err.is_malformed_input());
    }

    #[test]
    fn test_custom_error_is_not_malformed() {
        let err = DecodeError::custom("unexpected banner");
        assert!(!err.is_malformed_input());
        assert_eq!(err.to_string(), "unexpected banner");
    }

    #[test]
    fn test_raw_returns_bytes_unchanged() {
        assert_eq!(raw(&[0, 1, 2, 255]).unwrap(), vec![0, 1, 2, 255]);
    }
}
