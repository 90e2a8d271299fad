//! Inbound message model
//!
//! The service answers each frame with a JSON object:
//!
//! ```text
//! { "type": "result", "timestamp": 1700000000.25,
//!   "payload": { "objects": [ { "x": .5, "y": .5, "width": .2, "height": .1,
//!                               "confidence": .93, "label": "cup" } ] },
//!   "latency": { "total": 40 }, "frameId": 1700000000123 }
//! ```
//!
//! Any other `type` is ignored by the pipeline.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message without a type tag")]
    MissingType,
    #[error("result message without payload")]
    MissingPayload { frame_id: Option<u64> },
    #[error("unreadable result: {source}")]
    InvalidResult {
        frame_id: Option<u64>,
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Whether the message was tagged as a result, i.e. it still answers a frame
    pub fn is_result(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingPayload { .. } | ProtocolError::InvalidResult { .. }
        )
    }

    /// Frame id echoed by an unreadable result, if it could be recovered
    pub fn frame_id(&self) -> Option<u64> {
        match self {
            ProtocolError::MissingPayload { frame_id }
            | ProtocolError::InvalidResult { frame_id, .. } => *frame_id,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectedObject {
    /// Box centre, normalized to the frame width
    #[serde(default)]
    pub x: f64,
    /// Box centre, normalized to the frame height
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub label: String,
    /// Service specific attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DetectedObject {
    /// pH reading attached by some detectors
    pub fn ph_value(&self) -> Option<&Value> {
        self.extra.get("ph_value").filter(|v| !v.is_null())
    }
}

/// A decoded detection result
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub objects: Vec<DetectedObject>,
    /// Objects that could not be decoded and were left out
    pub skipped_objects: usize,
    /// Service clock when the result was produced, in seconds
    pub server_timestamp: Option<f64>,
    /// Processing time reported by the service
    pub server_latency_ms: Option<f64>,
    /// Id of the frame this result answers, when the service echoes it
    pub frame_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Result(DetectionResult),
    /// A message of another type, carrying its `type` tag
    Other(String),
}

#[derive(Deserialize)]
struct RawResult {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    payload: Option<RawPayload>,
    #[serde(default)]
    latency: Option<RawLatency>,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    objects: Vec<Value>,
}

#[derive(Deserialize)]
struct RawLatency {
    #[serde(default)]
    total: Option<f64>,
}

/// Frame ids are JS numbers on the wire, so `123.0` and `"123"` are accepted
/// as long as they name a whole, non-negative id.
fn frame_id_from(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn parse_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if kind != "result" {
        return Ok(Inbound::Other(kind.to_owned()));
    }

    let frame_id = value.get("frameId").and_then(frame_id_from);
    let raw: RawResult = serde_json::from_value(value)
        .map_err(|source| ProtocolError::InvalidResult { frame_id, source })?;
    let payload = raw
        .payload
        .ok_or(ProtocolError::MissingPayload { frame_id })?;

    let total = payload.objects.len();
    let objects: Vec<DetectedObject> = payload
        .objects
        .into_iter()
        .filter_map(|object| serde_json::from_value(object).ok())
        .collect();

    Ok(Inbound::Result(DetectionResult {
        skipped_objects: total - objects.len(),
        objects,
        server_timestamp: raw.timestamp,
        server_latency_ms: raw.latency.and_then(|l| l.total),
        frame_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result() {
        let text = r#"{
            "type": "result",
            "timestamp": 1700000000.5,
            "payload": { "objects": [
                { "x": 0.5, "y": 0.4, "width": 0.2, "height": 0.1,
                  "confidence": 0.91, "label": "strip", "ph_value": 6.5 }
            ] },
            "latency": { "total": 40, "inference": 31 },
            "frameId": 1700000000123
        }"#;

        let Inbound::Result(result) = parse_inbound(text).unwrap() else {
            panic!("expected a result");
        };
        assert_eq!(result.frame_id, Some(1_700_000_000_123));
        assert_eq!(result.server_latency_ms, Some(40.0));
        assert_eq!(result.server_timestamp, Some(1_700_000_000.5));
        assert_eq!(result.objects.len(), 1);
        assert_eq!(result.objects[0].label, "strip");
        assert_eq!(result.objects[0].ph_value(), Some(&Value::from(6.5)));
    }

    #[test]
    fn test_optional_fields() {
        let text = r#"{ "type": "result", "payload": { "objects": [] } }"#;
        let Inbound::Result(result) = parse_inbound(text).unwrap() else {
            panic!("expected a result");
        };
        assert!(result.objects.is_empty());
        assert_eq!(result.frame_id, None);
        assert_eq!(result.server_latency_ms, None);
    }

    #[test]
    fn test_other_types_pass_through() {
        let parsed = parse_inbound(r#"{ "type": "status", "queue": 3 }"#).unwrap();
        assert_eq!(parsed, Inbound::Other("status".into()));
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(
            parse_inbound("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            parse_inbound(r#"{ "payload": {} }"#),
            Err(ProtocolError::MissingType)
        ));
        let err = parse_inbound(r#"{ "type": "result", "frameId": 9 }"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingPayload { .. }));
        assert!(err.is_result());
        assert_eq!(err.frame_id(), Some(9));
        assert!(!ProtocolError::MissingType.is_result());
    }

    #[test]
    fn test_float_and_string_frame_ids() {
        for (raw, expected) in [
            ("1700000000123.0", Some(1_700_000_000_123)),
            ("\"42\"", Some(42)),
            ("12.5", None),
            ("-3", None),
            ("null", None),
        ] {
            let text = format!(
                r#"{{ "type": "result", "payload": {{ "objects": [] }}, "frameId": {} }}"#,
                raw
            );
            let Inbound::Result(result) = parse_inbound(&text).unwrap() else {
                panic!("expected a result");
            };
            assert_eq!(result.frame_id, expected, "frameId {}", raw);
        }
    }

    #[test]
    fn test_incomplete_objects_tolerated() {
        let text = r#"{ "type": "result", "payload": { "objects": [
            { "x": 0.5, "y": 0.5, "width": 0.1, "label": "cup" },
            { "x": "left", "y": 0.5 },
            { "x": 0.2, "y": 0.3, "width": 0.1, "height": 0.1 }
        ] } }"#;

        let Inbound::Result(result) = parse_inbound(text).unwrap() else {
            panic!("expected a result");
        };
        assert_eq!(result.objects.len(), 2);
        assert_eq!(result.skipped_objects, 1);
        assert_eq!(result.objects[0].height, 0.0);
        assert_eq!(result.objects[0].label, "cup");
    }

    #[test]
    fn test_unreadable_result_keeps_frame_id() {
        let err = parse_inbound(
            r#"{ "type": "result", "payload": { "objects": "none" }, "frameId": 77.0 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidResult { .. }));
        assert_eq!(err.frame_id(), Some(77));
    }
}
