//! Result encoding.
//!
//! Every step result is stored twice: as plain JSON, for evaluation and
//! display, and as a type-tagged envelope `{"type": .., "value": ..}` that a
//! host persists and hands back on resume. Encoding is checked: the envelope
//! must decode back to a value equal to the original, or the step fails.
//! Floats survive exactly: serde_json is built with `float_roundtrip`.
//!
//! The envelope tag is `std::any::type_name` of the output type. Its text is
//! not guaranteed stable across compiler versions, and it changes when the
//! type moves to another module. A checkpoint written before such a change
//! fails Resume with `InvalidSnapshot` for every finished step; those
//! workflows must be restarted instead of resumed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::definition::{StepDefinition, WorkflowError};
use super::step_runner::StepError;
use super::value::Data;

/// A step result in both of its stored forms.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EncodedResult {
    pub value: Json,
    pub serialized: String,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_name: String,
    value: Json,
}

/// Encode `output` and verify that it survives a round trip.
pub(crate) fn encode_checked<T: Data>(output: &T) -> Result<EncodedResult, StepError> {
    let type_name = std::any::type_name::<T>();
    let value = serde_json::to_value(output).map_err(|e| StepError::Serialization {
        type_name: type_name.to_string(),
        reason: e.to_string(),
    })?;
    let serialized = serde_json::to_string(&Envelope {
        type_name: type_name.to_string(),
        value: value.clone(),
    })
    .map_err(|e| StepError::Serialization {
        type_name: type_name.to_string(),
        reason: e.to_string(),
    })?;

    let decoded: T = serde_json::from_str::<Envelope>(&serialized)
        .and_then(|envelope| serde_json::from_value(envelope.value))
        .map_err(|e| StepError::Serialization {
            type_name: type_name.to_string(),
            reason: e.to_string(),
        })?;
    if decoded != *output {
        return Err(StepError::RoundTrip {
            type_name: type_name.to_string(),
            original: format!("{output:?}"),
            decoded: format!("{decoded:?}"),
        });
    }

    Ok(EncodedResult { value, serialized })
}

/// Decode a stored envelope for `step`, checking its type tag.
pub(crate) fn decode_snapshot(step: &StepDefinition, serialized: &str) -> Result<Json, WorkflowError> {
    let envelope: Envelope = serde_json::from_str(serialized).map_err(|e| WorkflowError::InvalidSnapshot {
        step: step.name.clone(),
        reason: format!("malformed result envelope: {e}"),
    })?;
    let expected = step.output_type.name();
    if envelope.type_name != expected {
        return Err(WorkflowError::InvalidSnapshot {
            step: step.name.clone(),
            reason: format!("result has type {}, step produces {expected}", envelope.type_name),
        });
    }
    Ok(envelope.value)
}

/// Decode the step argument at position `index`.
pub(crate) fn decode_input<A: DeserializeOwned>(index: usize, arg: Option<Json>) -> Result<A, StepError> {
    let json = arg.ok_or_else(|| StepError::InvalidInput {
        index,
        reason: "argument missing".to_string(),
    })?;
    serde_json::from_value(json).map_err(|e| StepError::InvalidInput {
        index,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Release {
        version: String,
        rc: u32,
    }

    /// Serializes fine but never compares equal, so no round trip succeeds.
    #[derive(Debug, Serialize, Deserialize)]
    struct Unequal(u8);

    impl PartialEq for Unequal {
        fn eq(&self, _other: &Self) -> bool {
            false
        }
    }

    /// Drops the field on the way out, so it decodes to a different value.
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Lossy {
        kept: u8,
        #[serde(skip)]
        dropped: u8,
    }

    #[test]
    fn encode_produces_tagged_envelope() {
        let out = Release {
            version: "go1.22".to_string(),
            rc: 2,
        };
        let encoded = encode_checked(&out).unwrap();
        assert_eq!(encoded.value, json!({"version": "go1.22", "rc": 2}));

        let envelope: Json = serde_json::from_str(&encoded.serialized).unwrap();
        assert_eq!(envelope["type"], std::any::type_name::<Release>());
        assert_eq!(envelope["value"]["rc"], 2);
    }

    #[test]
    fn unit_result_encodes_as_null() {
        let encoded = encode_checked(&()).unwrap();
        assert_eq!(encoded.value, Json::Null);
    }

    #[test]
    fn lossy_value_fails_round_trip() {
        let err = encode_checked(&Lossy { kept: 1, dropped: 9 }).unwrap_err();
        assert!(matches!(err, StepError::RoundTrip { .. }));
        assert!(err.to_string().contains("JSON marshaling"), "{err}");
    }

    #[test]
    fn unequal_value_fails_round_trip() {
        assert!(matches!(
            encode_checked(&Unequal(1)),
            Err(StepError::RoundTrip { .. })
        ));
    }

    #[test]
    fn decode_input_reports_position() {
        let ok: u32 = decode_input(0, Some(json!(7))).unwrap();
        assert_eq!(ok, 7);

        let err = decode_input::<u32>(2, Some(json!("seven"))).unwrap_err();
        assert!(matches!(err, StepError::InvalidInput { index: 2, .. }));
    }

    #[test]
    fn missing_input_names_its_position() {
        let err = decode_input::<u32>(3, None).unwrap_err();
        assert!(matches!(err, StepError::InvalidInput { index: 3, .. }), "{err}");
    }

    #[test]
    fn floats_round_trip_exactly() {
        for i in 1..20_000 {
            let x = f64::from(i) / 7.0;
            let encoded = encode_checked(&x).unwrap_or_else(|e| panic!("{x}: {e}"));
            assert_eq!(encoded.value, json!(x));
        }
        for x in [0.1, 1.0 / 3.0, f64::MIN_POSITIVE, f64::MAX, -2.5e-300, 90.28571428571429] {
            assert!(encode_checked(&x).is_ok(), "{x}");
        }
    }

    #[test]
    fn struct_with_float_field_round_trips() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Sample {
            label: String,
            ratio: f64,
            history: Vec<f64>,
        }

        let sample = Sample {
            label: "rc1".to_string(),
            ratio: 632.0 / 7.0,
            history: (1..50).map(|i| f64::from(i) / 3.0).collect(),
        };
        assert!(encode_checked(&sample).is_ok());
    }
}
