//! Typed error kinds shared across the recorder and the driver
//!
//! Most plumbing code uses `anyhow::Result`; the enums here exist for the
//! places that have to branch on the failure class: the export HTTP handler,
//! the trace decoder, and the replay state machine.

use thiserror::Error;

/// Startup-fatal configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed kind string: {0}")]
    MalformedKind(String),

    #[error("invalid pod template path {path:?}: {reason}")]
    InvalidTemplatePath { path: String, reason: String },

    #[error("could not read config file {path:?}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path:?}")]
    Unparseable {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failures decoding or encoding a trace document.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported trace version {0}")]
    UnsupportedVersion(u16),

    #[error("corrupt trace data")]
    Corrupt(#[from] rmp_serde::decode::Error),

    #[error("could not encode trace")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Failures surfaced by the export endpoint.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid export range: end_ts {end_ts} < start_ts {start_ts}")]
    InvalidRange { start_ts: i64, end_ts: i64 },

    #[error("store snapshot unavailable: {0}")]
    Unavailable(String),
}

/// Failures writing to the simulation cluster during replay.
///
/// Transient failures are retried with bounded backoff; permanent ones move
/// the replay state machine to `Failed`.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("transient apply failure: {0}")]
    Transient(String),

    #[error("permanent apply failure: {0}")]
    Permanent(String),
}

impl ApplyError {
    /// Classify a Kubernetes API error.
    ///
    /// Rate limits, server errors, timeouts, and apply conflicts are worth
    /// retrying; validation-class responses are not.
    pub fn from_kube(err: kube::Error) -> ApplyError {
        match &err {
            kube::Error::Api(resp) => match resp.code {
                409 | 429 | 500 | 502 | 503 | 504 => ApplyError::Transient(err.to_string()),
                _ => ApplyError::Permanent(err.to_string()),
            },
            kube::Error::HyperError(_) | kube::Error::Service(_) => {
                ApplyError::Transient(err.to_string())
            },
            _ => ApplyError::Permanent(err.to_string()),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApplyError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: "test".into(),
            code,
        })
    }

    #[test]
    fn test_conflict_is_transient() {
        assert!(ApplyError::from_kube(api_error(409)).is_transient());
        assert!(ApplyError::from_kube(api_error(503)).is_transient());
    }

    #[test]
    fn test_validation_is_permanent() {
        assert!(!ApplyError::from_kube(api_error(422)).is_transient());
        assert!(!ApplyError::from_kube(api_error(400)).is_transient());
    }
}
