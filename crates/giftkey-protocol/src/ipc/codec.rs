use thiserror::Error;

use crate::{MsgFromObserver, MsgToObserver};

/// Errors from encoding/decoding observer messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The frame was not valid JSON for any known message.
    #[error("invalid observer message: {0}")]
    Decode(#[source] serde_json::Error),
    /// Serialization via serde_json failed.
    #[error(transparent)]
    Encode(serde_json::Error),
}

/// Encode an outbound message as a JSON text frame.
pub fn encode(msg: &MsgToObserver) -> Result<String, Error> {
    serde_json::to_string(msg).map_err(Error::Encode)
}

/// Decode an inbound JSON text frame.
///
/// # Errors
/// Returns [`Error::Decode`] if the frame is not JSON or names an unknown
/// message `type`.
pub fn decode(text: &str) -> Result<MsgFromObserver, Error> {
    serde_json::from_str(text).map_err(Error::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GiftActionSpec, MappingSpec};

    #[test]
    fn mapping_update_decodes() {
        let text = r#"{"type":"update-mapping","mapping":{"rose":{"key":"a","durationSec":2}}}"#;
        let MsgFromObserver::UpdateMapping { mapping } = decode(text).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(mapping["rose"].key.as_deref(), Some("a"));
        assert_eq!(mapping["rose"].duration_sec, Some(2.0));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let err = decode(r#"{"type":"launch-rockets"}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(decode("not json").is_err());
    }

    #[test]
    fn encode_skips_absent_fields() {
        let mut mapping = MappingSpec::new();
        mapping.insert(
            "rose".into(),
            GiftActionSpec {
                key: Some("a".into()),
                ..Default::default()
            },
        );
        let text = encode(&MsgToObserver::MappingUpdated { mapping }).unwrap();
        assert_eq!(
            text,
            r#"{"type":"mapping-updated","mapping":{"rose":{"key":"a"}}}"#
        );
    }

    #[test]
    fn unit_variants_round_trip_by_tag() {
        let msg = decode(r#"{"type":"disconnect-tiktok"}"#).unwrap();
        assert_eq!(msg, MsgFromObserver::DisconnectTiktok);
        let msg = decode(r#"{"type":"get-gift-catalog","extra":1}"#).unwrap();
        assert_eq!(msg, MsgFromObserver::GetGiftCatalog);
    }
}
