#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An OAuth2 endpoint answered with a non-success status.
    ///
    /// `code` is the RFC 6749 `error` field when the body carried one.
    #[error("OAuth2 {operation} failed: {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        code: Option<String>,
        detail: String,
    },
    #[cfg(feature = "oauth")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token error: {0}")]
    Token(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u64,
    },
}

impl Error {
    /// The OAuth2 `error` code, if the failure carried one.
    #[must_use]
    pub fn oauth_code(&self) -> Option<&str> {
        match self {
            Self::OAuth { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_error_display_and_code() {
        let err = Error::OAuth {
            operation: "token exchange",
            status: Some(400),
            code: Some("invalid_grant".into()),
            detail: "code already used".into(),
        };
        assert_eq!(
            err.to_string(),
            "OAuth2 token exchange failed: code already used"
        );
        assert_eq!(err.oauth_code(), Some("invalid_grant"));
    }

    #[test]
    fn non_oauth_errors_have_no_code() {
        assert_eq!(Error::Token("bad".into()).oauth_code(), None);
    }
}
