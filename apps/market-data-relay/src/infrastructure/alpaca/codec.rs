//! Stream Codec Module
//!
//! Decodes text frames from Alpaca's stock stream into [`AlpacaMessage`]s
//! and encodes outbound requests.
//!
//! Alpaca batches messages into JSON arrays; a few control messages arrive
//! as bare objects. Dispatch happens on the `T` field. Envelope types the
//! relay does not forward (`s`, `c`, `x`, `l`, ...) decode to
//! [`AlpacaMessage::Ignored`]; only structurally invalid JSON is an error.

use crate::infrastructure::alpaca::messages::{
    AlpacaMessage, ErrorMessage, StockBarMessage, StockQuoteMessage, StockTradeMessage,
    SubscriptionMessage, SuccessMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message object without a `T` discriminator.
    #[error("message missing type field")]
    MissingType,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for SIP/IEX stock streams.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a JSON text frame into messages.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON parsing fails or a known message type has
    /// the wrong shape.
    pub fn decode(&self, text: &str) -> Result<Vec<AlpacaMessage>, CodecError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            let raw_array: Vec<serde_json::Value> = serde_json::from_str(trimmed)?;
            raw_array.into_iter().map(Self::decode_value).collect()
        } else if trimmed.starts_with('{') {
            let value: serde_json::Value = serde_json::from_str(trimmed)?;
            Ok(vec![Self::decode_value(value)?])
        } else {
            let preview: String = trimmed.chars().take(50).collect();
            Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )))
        }
    }

    fn decode_value(value: serde_json::Value) -> Result<AlpacaMessage, CodecError> {
        let msg_type = value
            .get("T")
            .and_then(|v| v.as_str())
            .ok_or(CodecError::MissingType)?
            .to_string();

        let message = match msg_type.as_str() {
            "success" => AlpacaMessage::Success(serde_json::from_value::<SuccessMessage>(value)?),
            "error" => AlpacaMessage::Error(serde_json::from_value::<ErrorMessage>(value)?),
            "subscription" => {
                AlpacaMessage::Subscription(serde_json::from_value::<SubscriptionMessage>(value)?)
            }
            "q" => AlpacaMessage::StockQuote(serde_json::from_value::<StockQuoteMessage>(value)?),
            "t" => AlpacaMessage::StockTrade(serde_json::from_value::<StockTradeMessage>(value)?),
            "b" | "d" | "u" => {
                AlpacaMessage::StockBar(serde_json::from_value::<StockBarMessage>(value)?)
            }
            _ => AlpacaMessage::Ignored(msg_type),
        };

        Ok(message)
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::alpaca::messages::{SubscriptionRequest, SuccessKind};

    #[test]
    fn json_codec_decode_success_array() {
        let codec = JsonCodec::new();
        let json = r#"[{"T":"success","msg":"connected"}]"#;

        let messages = codec.decode(json).unwrap();
        assert_eq!(messages.len(), 1);

        match &messages[0] {
            AlpacaMessage::Success(msg) => {
                assert_eq!(msg.msg, SuccessKind::Connected);
            }
            _ => panic!("expected Success message"),
        }
    }

    #[test]
    fn json_codec_decode_multiple_messages() {
        let codec = JsonCodec::new();
        let json = r#"[
            {"T":"q","S":"AAPL","bx":"Q","bp":150.00,"bs":1,"ax":"P","ap":150.01,"as":2,"t":"2024-01-15T10:00:00Z","z":"C"},
            {"T":"t","i":123,"S":"AAPL","x":"Q","p":150.005,"s":100,"t":"2024-01-15T10:00:01Z","z":"C"},
            {"T":"d","S":"AAPL","o":1,"h":2,"l":0.5,"c":1.5,"v":10,"t":"2024-01-15T00:00:00Z"}
        ]"#;

        let messages = codec.decode(json).unwrap();
        assert_eq!(messages.len(), 3);

        assert!(matches!(&messages[0], AlpacaMessage::StockQuote(_)));
        assert!(matches!(&messages[1], AlpacaMessage::StockTrade(_)));
        assert!(matches!(&messages[2], AlpacaMessage::StockBar(_)));
    }

    #[test]
    fn json_codec_decode_single_object() {
        let codec = JsonCodec::new();
        let json = r#"{"T":"error","code":401,"msg":"not authenticated"}"#;

        let messages = codec.decode(json).unwrap();
        assert_eq!(messages.len(), 1);

        match &messages[0] {
            AlpacaMessage::Error(msg) => {
                assert_eq!(msg.code, 401);
            }
            _ => panic!("expected Error message"),
        }
    }

    #[test]
    fn json_codec_decode_empty_array() {
        let codec = JsonCodec::new();
        let messages = codec.decode("[]").unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn json_codec_ignores_unforwarded_types() {
        let codec = JsonCodec::new();
        let json = r#"[{"T":"s","S":"AAPL","sc":"H","sm":"Trading Halt"}]"#;

        let messages = codec.decode(json).unwrap();
        assert_eq!(messages, vec![AlpacaMessage::Ignored("s".to_string())]);
    }

    #[test]
    fn json_codec_rejects_garbage() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("not json"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode("[{"), Err(CodecError::Json(_))));
    }

    #[test]
    fn json_codec_rejects_missing_type() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"[{"S":"AAPL"}]"#),
            Err(CodecError::MissingType)
        ));
    }

    #[test]
    fn json_codec_rejects_malformed_known_type() {
        let codec = JsonCodec::new();
        let json = r#"[{"T":"t","S":"AAPL","p":"not-a-price"}]"#;
        assert!(matches!(codec.decode(json), Err(CodecError::Json(_))));
    }

    #[test]
    fn json_codec_encode() {
        let codec = JsonCodec::new();
        let json = codec
            .encode(&SubscriptionRequest::unsubscribe(vec!["AAPL".to_string()]))
            .unwrap();
        assert!(json.contains(r#""action":"unsubscribe""#));
    }
}
