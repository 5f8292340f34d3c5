//! PayloadCodec - SerializedPayload と保存用文字列の相互変換
//!
//! Stores persist the payload as one JSON text column. The task type and
//! version ride along with the arguments so a row can be decoded without
//! consulting any other column.

use crate::domain::SerializedPayload;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("payload decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("payload has an empty task type")]
    MissingTaskType,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode(payload: &SerializedPayload) -> Result<String, CodecError> {
        serde_json::to_string(payload).map_err(CodecError::Encode)
    }

    pub fn decode(raw: &str) -> Result<SerializedPayload, CodecError> {
        let payload: SerializedPayload = serde_json::from_str(raw).map_err(CodecError::Decode)?;
        if payload.task_type.is_empty() {
            return Err(CodecError::MissingTaskType);
        }
        Ok(payload)
    }
}
