//! Error taxonomy for the scan-job core.
//!
//! Only `InvalidRequest` and `NotFound` cross the service boundary as `Err`.
//! The remaining variants describe why a job ended in `Failed`; their display
//! text becomes the job's error detail and the payload of the `error` event.

use thiserror::Error;

use crate::types::JobId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to spawn scan engine: {0}")]
    SpawnFailure(String),

    #[error("scan engine exited with {}: {detail}", exit_label(.code))]
    EngineFailure { code: Option<i32>, detail: String },

    #[error("failed to decode engine result: {0}")]
    DecodeFailure(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_failure_display() {
        let err = ScanError::EngineFailure { code: Some(2), detail: "unreachable".into() };
        assert_eq!(err.to_string(), "scan engine exited with code 2: unreachable");

        let err = ScanError::EngineFailure { code: None, detail: "killed".into() };
        assert_eq!(err.to_string(), "scan engine exited with a signal: killed");
    }
}
