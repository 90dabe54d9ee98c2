//! Session lifecycle: restoration, interactive sign-in, logout.
//!
//! [`SessionController`] is the single source of truth for "who is signed
//! in". UI code observes it through [`SessionController::subscribe`] and
//! drives it with [`SessionController::sign_in_with_provider`] and
//! [`SessionController::logout`].

mod controller;
mod error;
mod state;

pub use controller::{SessionController, SignInOutcome};
pub use error::{AuthError, AuthErrorKind};
pub use state::AuthPhase;
