use thiserror::Error;

/// Unified error type for wiretap-core and its callers.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already active: {0}")]
    SessionAlreadyActive(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("bad upstream: {0}")]
    BadUpstream(String),

    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl CoreError {
    /// Map to HTTP status code for the admin API.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::SessionNotFound(_) => 404,
            CoreError::SessionAlreadyActive(_) => 409,
            CoreError::NoActiveSession => 409,
            CoreError::BadUpstream(_) => 502,
            CoreError::CertificateGeneration(_) => 500,
            CoreError::Persistence(_) => 500,
            CoreError::Config(_) => 500,
            CoreError::Io(_) => 500,
            CoreError::Serde(_) => 500,
            CoreError::Internal(_) => 500,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            CoreError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            CoreError::SessionAlreadyActive(_) => "SESSION_ALREADY_ACTIVE",
            CoreError::NoActiveSession => "NO_ACTIVE_SESSION",
            CoreError::BadUpstream(_) => "BAD_UPSTREAM",
            CoreError::CertificateGeneration(_) => "CERTIFICATE_GENERATION",
            CoreError::Persistence(_) => "PERSISTENCE",
            CoreError::Config(_) => "CONFIG",
            CoreError::Io(_) => "IO",
            CoreError::Serde(_) => "SERDE",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    /// JSON error body served by the admin API.
    pub fn to_json_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(CoreError::SessionNotFound("s1".into()).status_code(), 404);
        assert_eq!(CoreError::NoActiveSession.status_code(), 409);
        assert_eq!(CoreError::BadUpstream("x".into()).status_code(), 502);
    }

    #[test]
    fn json_body_contains_code_and_message() {
        let err = CoreError::SessionNotFound("abc".into());
        let body = err.to_json_body();
        assert_eq!(body["code"], "SESSION_NOT_FOUND");
        assert!(body["error"].as_str().unwrap().contains("abc"));
    }
}
