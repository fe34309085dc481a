//! Common error types.
//!
//! `TransportError` is what the HTTP primitive reports; `AppError` is the
//! taxonomy surfaced to callers of the resolver and the orchestrator.
use thiserror::Error;

/// Maximum number of characters of a response body kept for diagnostics.
pub const EXCERPT_LEN: usize = 200;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The server could not be reached (DNS, refused, reset, ...).
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success status.
    #[error("server returned HTTP {status}: {body}")]
    Protocol { status: u16, body: String },

    /// The transport's own timeout elapsed.
    #[error("request timed out")]
    Timeout,
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("server requires authentication (HTTP {status})")]
    AuthRequired { status: u16 },

    #[error(transparent)]
    Transport(TransportError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("server returned no images")]
    EmptyResult,

    #[error("corrupt image data: {0}")]
    Corrupt(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("server reported no models")]
    NoModels,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransportError> for AppError {
    /// 401/403 always become `AuthRequired`, whichever endpoint produced them.
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol { status, .. } if status == 401 || status == 403 => {
                AppError::AuthRequired { status }
            }
            other => AppError::Transport(other),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Truncate a body to `EXCERPT_LEN` characters for error messages.
pub fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= EXCERPT_LEN {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(EXCERPT_LEN).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_auth_required() {
        for status in [401u16, 403] {
            let err: AppError = TransportError::Protocol { status, body: String::new() }.into();
            assert!(matches!(err, AppError::AuthRequired { status: s } if s == status));
        }
    }

    #[test]
    fn other_transport_errors_stay_transport() {
        let err: AppError = TransportError::Protocol { status: 500, body: "boom".into() }.into();
        assert!(matches!(err, AppError::Transport(TransportError::Protocol { status: 500, .. })));

        let err: AppError = TransportError::Timeout.into();
        assert!(matches!(err, AppError::Transport(TransportError::Timeout)));
    }

    #[test]
    fn excerpt_truncates_long_bodies() {
        let long = "x".repeat(500);
        let out = excerpt(&long);
        assert_eq!(out.len(), EXCERPT_LEN + 3);
        assert!(out.ends_with("..."));
        assert_eq!(excerpt("  short  "), "short");
    }
}
