//! Opaque cursor tokens
//!
//! A token is the URL-safe, unpadded base64 encoding of the cursor JSON
//! `{id, value, timestamp, sortField, direction}`. With a signing key the
//! token becomes `payload.mac`, where `mac` is a keyed BLAKE3 hash of the
//! payload; a token whose MAC is missing or wrong is rejected as malformed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use super::{CursorData, CursorValue};
use crate::config::PaginationConfig;
use crate::query::SortOrder;
use crate::repository::{RepositoryError, RepositoryOperation, RepositoryResult};

const SIGNING_CONTEXT: &str = "repokit 2024-06 cursor signing";

/// JSON shape of a cursor on the wire
///
/// `direction` stays a plain string here so a well-formed token with an
/// unknown direction is reported as a validation failure, not a decode error.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCursor {
    id: String,
    value: CursorValue,
    timestamp: i64,
    sort_field: String,
    direction: String,
}

/// Encodes and decodes pagination cursors
///
/// # Example
///
/// ```rust
/// use repokit::cursor::{CursorCodec, CursorData};
/// use repokit::query::SortOrder;
///
/// let codec = CursorCodec::new();
/// let cursor = CursorData::new("p_1", 10_i64, "votes", SortOrder::Desc);
///
/// let token = codec.encode(Some(&cursor)).unwrap();
/// assert_eq!(codec.decode(&token).unwrap(), Some(cursor));
///
/// assert_eq!(codec.encode(None).unwrap(), "");
/// assert_eq!(codec.decode("").unwrap(), None);
/// ```
#[derive(Clone, Default)]
pub struct CursorCodec {
    signing_key: Option<[u8; 32]>,
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec")
            .field("signed", &self.signing_key.is_some())
            .finish()
    }
}

impl CursorCodec {
    /// Codec producing unsigned tokens
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec producing and requiring signed tokens
    ///
    /// The MAC key is derived from `secret`, so any length of secret works.
    pub fn with_signing_key(secret: impl AsRef<[u8]>) -> Self {
        Self {
            signing_key: Some(blake3::derive_key(SIGNING_CONTEXT, secret.as_ref())),
        }
    }

    /// Codec configured from the pagination section
    pub fn from_config(config: &PaginationConfig) -> Self {
        match config.cursor_signing_key.as_deref() {
            Some(secret) if !secret.is_empty() => Self::with_signing_key(secret),
            _ => Self::new(),
        }
    }

    /// Whether tokens carry a MAC
    pub fn is_signed(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Serialize a cursor into an opaque token; `None` encodes to `""`
    pub fn encode(&self, cursor: Option<&CursorData>) -> RepositoryResult<String> {
        let Some(cursor) = cursor else {
            return Ok(String::new());
        };
        cursor
            .validate()
            .map_err(|e| e.with_operation(RepositoryOperation::EncodeCursor))?;

        let wire = WireCursor {
            id: cursor.id.clone(),
            value: cursor.value.clone(),
            timestamp: cursor.timestamp,
            sort_field: cursor.sort_field.clone(),
            direction: cursor.direction.to_string(),
        };
        let json = serde_json::to_vec(&wire).map_err(|e| {
            RepositoryError::serialization_error(RepositoryOperation::EncodeCursor, e.to_string())
        })?;

        let payload = URL_SAFE_NO_PAD.encode(json);
        Ok(match self.signing_key {
            Some(ref key) => {
                let mac = blake3::keyed_hash(key, payload.as_bytes());
                format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(mac.as_bytes()))
            }
            None => payload,
        })
    }

    /// Parse a token back into a cursor; `""` decodes to `None`
    ///
    /// Undecodable tokens fail with `MalformedCursor`; tokens that decode but
    /// describe an unusable cursor fail with `ValidationFailed`.
    pub fn decode(&self, token: &str) -> RepositoryResult<Option<CursorData>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }

        let payload = match self.signing_key {
            Some(ref key) => {
                let (payload, mac) = token
                    .split_once('.')
                    .ok_or_else(|| RepositoryError::malformed_cursor("cursor signature missing"))?;
                verify_mac(key, payload, mac)?;
                payload
            }
            None => token,
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| RepositoryError::malformed_cursor(format!("invalid cursor encoding: {}", e)))?;
        let wire: WireCursor = serde_json::from_slice(&bytes)
            .map_err(|e| RepositoryError::malformed_cursor(format!("invalid cursor payload: {}", e)))?;

        let direction = SortOrder::parse(&wire.direction).ok_or_else(|| {
            RepositoryError::validation_failed(format!(
                "cursor direction '{}' must be asc or desc",
                wire.direction
            ))
            .with_operation(RepositoryOperation::DecodeCursor)
        })?;

        let cursor = CursorData {
            id: wire.id,
            value: wire.value,
            timestamp: wire.timestamp,
            sort_field: wire.sort_field,
            direction,
        };
        cursor
            .validate()
            .map_err(|e| e.with_operation(RepositoryOperation::DecodeCursor))?;
        Ok(Some(cursor))
    }
}

fn verify_mac(key: &[u8; 32], payload: &str, mac: &str) -> RepositoryResult<()> {
    let provided = URL_SAFE_NO_PAD
        .decode(mac.trim_end_matches('='))
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
        .map(blake3::Hash::from)
        .ok_or_else(|| RepositoryError::malformed_cursor("cursor signature is not valid"))?;

    // blake3::Hash equality is constant-time
    if blake3::keyed_hash(key, payload.as_bytes()) == provided {
        Ok(())
    } else {
        Err(RepositoryError::malformed_cursor("cursor signature does not match"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    fn raw_token(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    fn sample() -> CursorData {
        CursorData {
            id: "p_42".to_string(),
            value: CursorValue::Integer(17),
            timestamp: 1_718_000_000_000,
            sort_field: "votes".to_string(),
            direction: SortOrder::Desc,
        }
    }

    #[test]
    fn test_round_trip_each_value_type() {
        let codec = CursorCodec::new();
        for value in [
            CursorValue::Integer(-3),
            CursorValue::Float(2.75),
            CursorValue::String("hello world/?&".to_string()),
        ] {
            let cursor = CursorData {
                value,
                ..sample()
            };
            let token = codec.encode(Some(&cursor)).unwrap();
            assert_eq!(codec.decode(&token).unwrap(), Some(cursor));
        }
    }

    #[test]
    fn test_token_is_url_safe() {
        let cursor = CursorData {
            value: CursorValue::String("??>>~~".repeat(10)),
            ..sample()
        };
        let token = CursorCodec::new().encode(Some(&cursor)).unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_wire_format_field_names() {
        let token = CursorCodec::new().encode(Some(&sample())).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(token).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["sortField"], "votes");
        assert_eq!(json["direction"], "desc");
        assert_eq!(json["id"], "p_42");
        assert_eq!(json["timestamp"], 1_718_000_000_000_i64);
        assert_eq!(json["value"]["type"], "int");
    }

    #[test]
    fn test_empty_identity() {
        let codec = CursorCodec::new();
        assert_eq!(codec.encode(None).unwrap(), "");
        assert_eq!(codec.decode("").unwrap(), None);
        assert_eq!(codec.decode("   ").unwrap(), None);
    }

    #[test]
    fn test_padded_input_accepted() {
        let codec = CursorCodec::new();
        let token = codec.encode(Some(&sample())).unwrap();
        let padding = (4 - token.len() % 4) % 4;
        let padded = format!("{}{}", token, "=".repeat(padding));
        assert_eq!(codec.decode(&padded).unwrap(), Some(sample()));
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = CursorCodec::new();
        let tokens = [
            "not base64!!".to_string(),
            "%%%".to_string(),
            raw_token("not json"),
            raw_token("{\"id\":1}"),
        ];
        for token in &tokens {
            let err = codec.decode(token).unwrap_err();
            assert_eq!(err.kind, RepositoryErrorKind::MalformedCursor, "{token}");
            assert_eq!(err.operation, RepositoryOperation::DecodeCursor);
        }
    }

    #[test]
    fn test_invariant_violations_are_validation_failures() {
        let codec = CursorCodec::new();
        let cases = [
            r#"{"id":"","value":{"type":"int","value":1},"timestamp":0,"sortField":"votes","direction":"asc"}"#,
            r#"{"id":"p","value":{"type":"int","value":1},"timestamp":0,"sortField":"","direction":"asc"}"#,
            r#"{"id":"p","value":{"type":"int","value":1},"timestamp":0,"sortField":"votes","direction":"sideways"}"#,
        ];
        for json in cases {
            let err = codec.decode(&raw_token(json)).unwrap_err();
            assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed, "{json}");
            assert_eq!(err.operation, RepositoryOperation::DecodeCursor);
        }
    }

    #[test]
    fn test_encode_rejects_invalid_cursor() {
        let codec = CursorCodec::new();
        let mut cursor = sample();
        cursor.id.clear();
        let err = codec.encode(Some(&cursor)).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert_eq!(err.operation, RepositoryOperation::EncodeCursor);

        let cursor = CursorData {
            value: CursorValue::Float(f64::NAN),
            ..sample()
        };
        assert!(codec.encode(Some(&cursor)).is_err());
    }

    #[test]
    fn test_signed_round_trip() {
        let codec = CursorCodec::with_signing_key("s3cret");
        assert!(codec.is_signed());
        let token = codec.encode(Some(&sample())).unwrap();
        assert!(token.contains('.'));
        assert_eq!(codec.decode(&token).unwrap(), Some(sample()));
    }

    #[test]
    fn test_signed_rejects_tampering() {
        let codec = CursorCodec::with_signing_key("s3cret");
        let token = codec.encode(Some(&sample())).unwrap();
        let (_, mac) = token.split_once('.').unwrap();

        let forged_cursor = CursorData {
            id: "p_1".to_string(),
            ..sample()
        };
        let forged_payload = CursorCodec::new().encode(Some(&forged_cursor)).unwrap();
        let forged = format!("{}.{}", forged_payload, mac);
        let err = codec.decode(&forged).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::MalformedCursor);

        // Unsigned token presented to a signing codec
        let err = codec.decode(&forged_payload).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::MalformedCursor);

        // Token signed with another key
        let other = CursorCodec::with_signing_key("other").encode(Some(&sample())).unwrap();
        let err = codec.decode(&other).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::MalformedCursor);

        let err = codec.decode(&format!("{}.short", forged_payload)).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::MalformedCursor);
    }

    #[test]
    fn test_from_config() {
        let mut config = PaginationConfig::default();
        assert!(!CursorCodec::from_config(&config).is_signed());

        config.cursor_signing_key = Some(String::new());
        assert!(!CursorCodec::from_config(&config).is_signed());

        config.cursor_signing_key = Some("key".to_string());
        assert!(CursorCodec::from_config(&config).is_signed());
    }

    #[test]
    fn test_debug_hides_key() {
        let codec = CursorCodec::with_signing_key("s3cret");
        let debug = format!("{:?}", codec);
        assert!(debug.contains("signed: true"));
        assert!(!debug.contains("s3cret"));
    }
}
