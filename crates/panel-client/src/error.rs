//! Unified error taxonomy shared by the G2 and G3 transports.
//!
//! Every fallible operation in this crate returns `Result<T, ErrorKind>`. The
//! variants classify failures the way the retry engine (`crate::retry`) and
//! the transports need them classified: transient kinds get retried with
//! backoff, terminal kinds propagate on the first attempt.

use std::fmt;

/// Failure kinds produced by either transport.
///
/// `AuthError` is special-cased by the G2 transport only: on the first
/// occurrence it triggers one forced re-authentication and retry (see
/// `crate::retry`), which counts as zero retries consumed.
#[derive(Debug)]
pub enum ErrorKind {
    /// 401/403 from a G2 endpoint, or an explicit auth failure.
    AuthError(String),
    /// Response did not match the expected shape, or caller input was invalid.
    ValidationError(String),
    /// HTTP status outside the endpoint's declared response set.
    UnexpectedStatus { status: u16, body: String },
    /// HTTP 500 from a G2 endpoint.
    ServerError { status: u16, body: String },
    /// HTTP 502/503/504 from a G2 endpoint — retriable.
    RetriableHttp { status: u16, body: String },
    /// Transport-level connection failure — retriable.
    NetworkConnect(String),
    /// Per-request deadline exceeded — retriable.
    Timeout(String),
    /// G3 RPC failure other than connect (bad reply, server-side fault).
    GrpcError(String),
    /// G3 RPC channel could not be established — retriable only during
    /// factory auto-detection (`crate::factory`).
    GrpcConnect(String),
    /// Malformed wire frame from the G3 codec.
    CodecError(String),
    /// G3 topology discovery's naming and metric instance-id lists disagree
    /// in length.
    TopologyMismatch { naming: usize, metric: usize },
    /// Simulation configuration failed to parse or validate.
    ConfigError(String),
    /// Factory auto-detection exhausted every transport without success.
    NoTransport,
}

impl ErrorKind {
    /// True for kinds the retry engine is allowed to retry with backoff.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RetriableHttp { .. } | Self::NetworkConnect(_) | Self::Timeout(_))
    }

    /// HTTP status code carried by this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. }
            | Self::ServerError { status, .. }
            | Self::RetriableHttp { status, .. } => Some(*status),
            Self::AuthError(_) => None,
            _ => None,
        }
    }

    /// Short machine-readable name, used in log fields and tests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthError(_) => "AUTH_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::UnexpectedStatus { .. } => "UNEXPECTED_STATUS",
            Self::ServerError { .. } => "SERVER_ERROR",
            Self::RetriableHttp { .. } => "RETRIABLE_HTTP",
            Self::NetworkConnect(_) => "NETWORK_CONNECT",
            Self::Timeout(_) => "TIMEOUT",
            Self::GrpcError(_) => "GRPC_ERROR",
            Self::GrpcConnect(_) => "GRPC_CONNECT",
            Self::CodecError(_) => "CODEC_ERROR",
            Self::TopologyMismatch { .. } => "TOPOLOGY_MISMATCH",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::NoTransport => "NO_TRANSPORT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthError(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::ValidationError(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::UnexpectedStatus { status, body } => {
                write!(f, "{}: HTTP {status}: {body}", self.as_str())
            }
            Self::ServerError { status, body } => {
                write!(f, "{}: HTTP {status}: {body}", self.as_str())
            }
            Self::RetriableHttp { status, body } => {
                write!(f, "{}: HTTP {status}: {body}", self.as_str())
            }
            Self::NetworkConnect(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::Timeout(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::GrpcError(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::GrpcConnect(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::CodecError(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::TopologyMismatch { naming, metric } => write!(
                f,
                "{}: naming list has {naming} entries, metric list has {metric}",
                self.as_str()
            ),
            Self::ConfigError(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::NoTransport => write!(f, "{}: no transport responded", self.as_str()),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Classifies a `reqwest::Error` into the matching `ErrorKind`, without
/// knowledge of the endpoint's declared status set. Callers that need
/// `UnexpectedStatus`/`AuthError`/`ServerError`/`RetriableHttp` classify the
/// response status themselves (see `g2::client::classify_status`); this
/// conversion only covers the transport-level failures reqwest can report
/// before a status line exists.
impl From<reqwest::Error> for ErrorKind {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::NetworkConnect(err.to_string())
        }
    }
}

impl From<serde_yaml::Error> for ErrorKind {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
