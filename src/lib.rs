#![doc = include_str!("../README.md")]

pub mod config;
pub mod credential;
pub mod error;
pub mod memory;
pub mod oauth;
pub mod pkce;
pub mod profile;
pub mod provider;
pub mod redirect;
pub mod session;
pub mod store;
pub mod types;

// Re-exports for convenient access
pub use config::{AuthConfig, BackendConfig, ProviderConfig, ResponseMode};
pub use credential::{IdTokenClaims, SessionCredential, to_session_credential};
pub use error::Error;
#[cfg(feature = "oauth")]
pub use oauth::AuthClient;
pub use oauth::{TokenExchanger, TokenResponse};
pub use profile::{ProfileReconciler, UserProfile};
pub use provider::{
    AuthorizationGrant, AuthorizationOutcome, AuthorizationRequest, AuthorizationSurface,
    IdentityProviderClient, ProviderFailure, SurfaceOutcome,
};
pub use redirect::{is_stable_redirect, resolve_redirect_uri};
pub use session::{AuthError, AuthErrorKind, AuthPhase, SessionController, SignInOutcome};
pub use store::{
    CreateOutcome, DocumentStore, Session, SessionStore, SessionSubscription, StoreError,
};
pub use types::{AuthorizationCode, ClientId, SubjectId};
