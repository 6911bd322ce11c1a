// =============================================================================
// Error taxonomy (spec §7)
// =============================================================================
//
// Kind names follow the spec verbatim. Transport and decoder errors are
// recovered locally by callers — constructing one of these does not by
// itself tear anything down; it is the caller's job to decide whether the
// connection survives.
// =============================================================================

use thiserror::Error;

/// Core error taxonomy shared across the transport, decoder, repository and
/// analytics subsystems.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("network timeout")]
    NetworkTimeout,

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("TLS/SSL error: {0}")]
    SslError(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("IP banned (HTTP 418)")]
    IpBanned,

    #[error("WAF rejected request (HTTP 403)")]
    WafRejected,

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("service unavailable (HTTP 503)")]
    ServiceUnavailable,

    #[error("exchange API error {code}: {msg}")]
    ExchangeApiError { code: i64, msg: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("business rule violation: {0}")]
    Business(String),
}

impl CoreError {
    /// Whether the error class represents a transient condition worth
    /// retrying with backoff (as opposed to a configuration mistake that
    /// will never succeed).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::ConnectionError(_)
                | Self::SslError(_)
                | Self::RateLimited
                | Self::ServiceUnavailable
                | Self::HttpStatus(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
