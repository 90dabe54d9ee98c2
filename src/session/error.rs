use crate::error::Error;
use crate::provider::ProviderFailure;
use crate::store::StoreError;

/// Machine-readable category of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AuthErrorKind {
    /// Backend or provider credentials are missing.
    NotConfigured,
    /// A sign-in is already running.
    FlowInProgress,
    /// The user dismissed the authorization surface.
    Cancelled,
    /// The identity provider returned an error or consent was denied.
    ProviderError,
    /// The authorization code could not be redeemed.
    TokenExchangeError,
    /// The session service rejected the bridged credential.
    InvalidCredential,
    /// The session service could not be reached.
    Network,
    /// The profile store could not be reached (recovered locally).
    StoreUnavailable,
    /// Remote sign-out failed (local state is cleared regardless).
    SignOutFailed,
}

/// Authentication error presented to the UI layer.
///
/// `Display` is the user-presentable message. Carries no retry state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthError {
    kind: AuthErrorKind,
    message: String,
}

impl AuthError {
    #[must_use]
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn not_configured() -> Self {
        Self::new(
            AuthErrorKind::NotConfigured,
            "Sign-in is not configured yet. Please try again later.",
        )
    }

    pub(crate) fn flow_in_progress() -> Self {
        Self::new(AuthErrorKind::FlowInProgress, "Sign-in is already in progress.")
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(AuthErrorKind::Cancelled, "Sign in cancelled")
    }

    pub(crate) fn sign_out_failed(e: &StoreError) -> Self {
        Self::new(
            AuthErrorKind::SignOutFailed,
            format!("Failed to sign out remotely: {e}"),
        )
    }

    pub(crate) fn store_unavailable(e: &StoreError) -> Self {
        Self::new(AuthErrorKind::StoreUnavailable, format!("Profile store unavailable: {e}"))
    }

    /// Failure reported by the identity provider or by callback validation.
    pub(crate) fn from_provider(failure: &ProviderFailure) -> Self {
        match failure.code.as_deref().and_then(map_code) {
            Some((kind, message)) => Self::new(kind, message),
            None => Self::new(
                AuthErrorKind::ProviderError,
                "Sign-in with your provider failed. Please try again.",
            ),
        }
    }

    /// Failure while redeeming the authorization code.
    pub(crate) fn from_exchange(e: &Error) -> Self {
        match e {
            Error::Config(_) => Self::not_configured(),
            _ => match e.oauth_code().and_then(map_code) {
                Some((AuthErrorKind::NotConfigured, message)) => {
                    Self::new(AuthErrorKind::NotConfigured, message)
                }
                _ => Self::new(
                    AuthErrorKind::TokenExchangeError,
                    "Sign-in expired or was already used. Please try again.",
                ),
            },
        }
    }

    /// The provider's tokens could not be bridged into a credential.
    pub(crate) fn invalid_token(_: &Error) -> Self {
        Self::new(
            AuthErrorKind::InvalidCredential,
            "Invalid credentials. Please try again.",
        )
    }

    /// The session service refused or could not process the credential.
    pub(crate) fn from_sign_in(e: &StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) => Self::new(
                AuthErrorKind::Network,
                "Network error. Check your connection and try again.",
            ),
            StoreError::PermissionDenied(_) | StoreError::Malformed(_) => Self::new(
                AuthErrorKind::InvalidCredential,
                "Invalid credentials. Please try again.",
            ),
            StoreError::Rejected { code, .. } => match map_code(code) {
                Some((kind, message)) => Self::new(kind, message),
                None => Self::new(
                    AuthErrorKind::InvalidCredential,
                    "Invalid credentials. Please try again.",
                ),
            },
        }
    }
}

impl From<Error> for AuthError {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(_) => Self::not_configured(),
            Error::Token(_) => Self::invalid_token(&e),
            _ => Self::from_exchange(&e),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        Self::from_sign_in(&e)
    }
}

/// Maps provider/backend error vocabulary onto the taxonomy.
///
/// Accepts backend codes with or without their `auth/` prefix and RFC 6749 codes.
fn map_code(code: &str) -> Option<(AuthErrorKind, &'static str)> {
    let code = code.strip_prefix("auth/").unwrap_or(code);
    let mapped = match code {
        "account-exists-with-different-credential" | "credential-already-in-use" => (
            AuthErrorKind::InvalidCredential,
            "An account already exists with this email.",
        ),
        "invalid-credential" | "invalid-idp-response" | "invalid_token" => (
            AuthErrorKind::InvalidCredential,
            "Invalid credentials. Please try again.",
        ),
        "user-disabled" => (
            AuthErrorKind::InvalidCredential,
            "This account has been disabled.",
        ),
        "popup-closed-by-user" | "cancelled-popup-request" | "user-cancelled" => {
            (AuthErrorKind::Cancelled, "Sign in cancelled")
        }
        "network-request-failed" | "temporarily_unavailable" => (
            AuthErrorKind::Network,
            "Network error. Check your connection and try again.",
        ),
        "too-many-requests" => (
            AuthErrorKind::ProviderError,
            "Too many failed attempts. Please try again later.",
        ),
        "access_denied" => (
            AuthErrorKind::ProviderError,
            "Sign-in was denied. Please allow access to continue.",
        ),
        "state_mismatch" | "missing_code" => (
            AuthErrorKind::ProviderError,
            "Sign-in response could not be verified. Please try again.",
        ),
        "invalid_grant" => (
            AuthErrorKind::TokenExchangeError,
            "Sign-in expired or was already used. Please try again.",
        ),
        "invalid_client" | "unauthorized_client" | "invalid-api-key" | "operation-not-allowed" => (
            AuthErrorKind::NotConfigured,
            "Sign-in is not configured correctly.",
        ),
        _ => return None,
    };
    Some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(code: &str) -> StoreError {
        StoreError::Rejected {
            code: code.into(),
            message: "backend message".into(),
        }
    }

    #[test]
    fn test_backend_codes_map_to_taxonomy() {
        let e = AuthError::from_sign_in(&rejected("auth/account-exists-with-different-credential"));
        assert_eq!(e.kind(), AuthErrorKind::InvalidCredential);
        assert_eq!(e.to_string(), "An account already exists with this email.");

        let e = AuthError::from_sign_in(&rejected("auth/network-request-failed"));
        assert_eq!(e.kind(), AuthErrorKind::Network);

        let e = AuthError::from_sign_in(&rejected("auth/something-new"));
        assert_eq!(e.kind(), AuthErrorKind::InvalidCredential);

        let e = AuthError::from(StoreError::Unavailable("timeout".into()));
        assert_eq!(e.kind(), AuthErrorKind::Network);
    }

    #[test]
    fn test_provider_failures_map_to_taxonomy() {
        let failure = |code: Option<&str>| ProviderFailure {
            code: code.map(str::to_owned),
            description: "x".into(),
        };
        assert_eq!(
            AuthError::from_provider(&failure(Some("access_denied"))).kind(),
            AuthErrorKind::ProviderError
        );
        assert_eq!(
            AuthError::from_provider(&failure(Some("popup-closed-by-user"))).kind(),
            AuthErrorKind::Cancelled
        );
        assert_eq!(
            AuthError::from_provider(&failure(None)).kind(),
            AuthErrorKind::ProviderError
        );
    }

    #[test]
    fn test_exchange_errors_map_to_token_exchange() {
        let e = Error::OAuth {
            operation: "token exchange",
            status: Some(400),
            code: Some("invalid_grant".into()),
            detail: "used".into(),
        };
        assert_eq!(AuthError::from(e).kind(), AuthErrorKind::TokenExchangeError);

        let e = Error::Timeout {
            operation: "token exchange",
            elapsed_ms: 15_000,
        };
        assert_eq!(AuthError::from(e).kind(), AuthErrorKind::TokenExchangeError);

        let e = Error::OAuth {
            operation: "token exchange",
            status: Some(401),
            code: Some("invalid_client".into()),
            detail: "unknown client".into(),
        };
        assert_eq!(AuthError::from(e).kind(), AuthErrorKind::NotConfigured);
    }

    #[test]
    fn test_config_and_token_errors() {
        assert_eq!(
            AuthError::from(Error::Config("x".into())).kind(),
            AuthErrorKind::NotConfigured
        );
        assert_eq!(
            AuthError::from(Error::Token("x".into())).kind(),
            AuthErrorKind::InvalidCredential
        );
    }

    #[test]
    fn test_messages_never_leak_provider_codes() {
        let e = AuthError::from_sign_in(&rejected("auth/invalid-credential"));
        assert!(!e.to_string().contains("auth/"));
    }
}
