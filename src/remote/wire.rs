//! Shape-tolerant decoding of control-plane and callback payloads
//!
//! The service is inconsistent about where it puts fields: the same reply may
//! carry them at the top level or nested under `data`, and the callback
//! descriptor may be a single object or a list. Each decoder tries the known
//! shapes in a fixed order and normalizes to one record.

use serde::Deserialize;
use serde_json::Value;

use super::InitReply;
use crate::error::UploadError;
use crate::hash::ByteRange;
use crate::types::{CallbackSpec, ObjectTarget};

/// Initiation status: no record, transfer required
pub const STATUS_NEED_UPLOAD: i64 = 1;
/// Initiation status: content already held, no transfer
pub const STATUS_INSTANT: i64 = 2;
/// Initiation status: prove possession of a byte range
pub const STATUS_SIGN_CHECK: i64 = 7;

/// Callback descriptor as either one object or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CallbackField {
    One(CallbackSpec),
    Many(Vec<CallbackSpec>),
}

impl CallbackField {
    fn into_first(self) -> Option<CallbackSpec> {
        match self {
            Self::One(spec) => Some(spec),
            Self::Many(list) => list.into_iter().next(),
        }
    }
}

/// Final object metadata reported once a transfer completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    pub file_id: String,
    pub pick_code: String,
    pub file_size: u64,
    /// Remote-confirmed SHA-1, if reported
    pub sha1: Option<String>,
    pub file_name: Option<String>,
}

fn parse_json(body: &[u8]) -> Result<Value, UploadError> {
    serde_json::from_slice(body).map_err(|e| {
        UploadError::ProtocolViolation(format!("response is not valid JSON: {}", e))
    })
}

/// Look a field up under `data` first, then at the top level
fn field<'a>(root: &'a Value, name: &str) -> Option<&'a Value> {
    root.get("data")
        .filter(|d| d.is_object())
        .and_then(|d| d.get(name))
        .or_else(|| root.get(name))
        .filter(|v| !v.is_null())
}

fn string_field(root: &Value, name: &str) -> Option<String> {
    match field(root, name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_string(root: &Value, name: &str) -> Result<String, UploadError> {
    string_field(root, name)
        .ok_or_else(|| UploadError::ProtocolViolation(format!("response is missing '{}'", name)))
}

/// Accept numbers and numeric strings
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn message(root: &Value) -> String {
    ["message", "error", "msg"]
        .iter()
        .find_map(|name| string_field(root, name))
        .unwrap_or_default()
}

fn state_is_false(root: &Value) -> bool {
    matches!(root.get("state"), Some(Value::Bool(false)))
}

fn target_from(root: &Value) -> Result<ObjectTarget, UploadError> {
    let bucket = required_string(root, "bucket")?;
    let object_key = required_string(root, "object_key")?;
    let callback = field(root, "callback")
        .cloned()
        .ok_or_else(|| UploadError::ProtocolViolation("response is missing 'callback'".into()))
        .and_then(|raw| {
            serde_json::from_value::<CallbackField>(raw).map_err(|e| {
                UploadError::ProtocolViolation(format!("unrecognized callback descriptor: {}", e))
            })
        })?
        .into_first()
        .ok_or_else(|| UploadError::ProtocolViolation("callback descriptor list is empty".into()))?;

    Ok(ObjectTarget {
        bucket,
        object_key,
        callback,
    })
}

/// Decode an upload-initiation reply
pub fn decode_init_reply(body: &[u8]) -> Result<InitReply, UploadError> {
    let root = parse_json(body)?;

    let status = field(&root, "status").and_then(lenient_i64);
    if state_is_false(&root) {
        return Ok(InitReply::Rejected {
            status: status.unwrap_or(0),
            message: message(&root),
        });
    }

    let status = status
        .ok_or_else(|| UploadError::ProtocolViolation("response is missing 'status'".into()))?;

    match status {
        STATUS_NEED_UPLOAD => Ok(InitReply::NeedUpload(target_from(&root)?)),
        STATUS_INSTANT => Ok(InitReply::Instant {
            file_id: required_string(&root, "file_id")?,
            pick_code: string_field(&root, "pick_code").unwrap_or_default(),
        }),
        STATUS_SIGN_CHECK => {
            let sign_key = required_string(&root, "sign_key")?;
            let range = ByteRange::parse(&required_string(&root, "sign_check")?)?;
            Ok(InitReply::SignCheck { sign_key, range })
        }
        other => Ok(InitReply::Rejected {
            status: other,
            message: message(&root),
        }),
    }
}

/// Decode a transfer-target reply
pub fn decode_target(body: &[u8]) -> Result<ObjectTarget, UploadError> {
    let root = parse_json(body)?;
    if state_is_false(&root) {
        return Err(UploadError::ProtocolViolation(format!(
            "target request rejected: {}",
            message(&root)
        )));
    }
    target_from(&root)
}

/// Decode a bare acknowledgement such as a delete reply
pub fn decode_ack(body: &[u8]) -> Result<(), UploadError> {
    let root = parse_json(body)?;
    if state_is_false(&root) {
        return Err(UploadError::ProtocolViolation(format!(
            "request rejected: {}",
            message(&root)
        )));
    }
    Ok(())
}

/// Decode the callback result returned when a transfer completes
pub fn decode_callback_result(body: &[u8]) -> Result<CallbackResult, UploadError> {
    let root = parse_json(body)?;
    if state_is_false(&root) {
        return Err(UploadError::ProtocolViolation(format!(
            "completion callback rejected: {}",
            message(&root)
        )));
    }

    let file_size = field(&root, "file_size")
        .and_then(lenient_u64)
        .ok_or_else(|| UploadError::ProtocolViolation("callback is missing 'file_size'".into()))?;

    Ok(CallbackResult {
        file_id: required_string(&root, "file_id")?,
        pick_code: string_field(&root, "pick_code").unwrap_or_default(),
        file_size,
        sha1: string_field(&root, "sha1"),
        file_name: string_field(&root, "file_name"),
    })
}
