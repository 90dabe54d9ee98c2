use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use super::error::AuthError;
use crate::profile::{ProfileReconciler, UserProfile};
use crate::provider::IdentityProviderClient;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthPhase {
    #[default]
    Uninitialized,
    /// Waiting for the first session-change notification.
    Restoring,
    /// An interactive sign-in is running.
    Authenticating,
    Authenticated(UserProfile),
    Unauthenticated,
    /// Transient: published when a sign-in fails, immediately followed by `Unauthenticated`.
    Error(AuthError),
}

impl AuthPhase {
    /// The signed-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Self::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    /// True until restoration settles. Never reflects an interactive sign-in.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Restoring)
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Settings {
    pub(super) configured: bool,
    pub(super) restore_timeout: Duration,
    pub(super) exchange_timeout: Duration,
}

/// State shared between the controller handle and its background tasks.
pub(super) struct Shared<P, T, S, D> {
    pub(super) provider: Arc<IdentityProviderClient<P>>,
    pub(super) exchanger: Arc<T>,
    pub(super) sessions: Arc<S>,
    pub(super) reconciler: Arc<ProfileReconciler<D>>,
    pub(super) phase: Arc<watch::Sender<AuthPhase>>,
    /// Held for the whole of one interactive sign-in.
    pub(super) flow: Arc<Mutex<()>>,
    /// Set by logout; `Some(session)` notifications are dropped until the
    /// store reports `None` or a new sign-in completes.
    pub(super) awaiting_sign_out: Arc<AtomicBool>,
    /// Set once by the first `start()`; the session subscription is taken at most once.
    pub(super) started: Arc<AtomicBool>,
    pub(super) settings: Settings,
}

// Manual Clone: avoid derive adding `P: Clone, T: Clone, ...` bounds.
impl<P, T, S, D> Clone for Shared<P, T, S, D> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            exchanger: self.exchanger.clone(),
            sessions: self.sessions.clone(),
            reconciler: self.reconciler.clone(),
            phase: self.phase.clone(),
            flow: self.flow.clone(),
            awaiting_sign_out: self.awaiting_sign_out.clone(),
            started: self.started.clone(),
            settings: self.settings,
        }
    }
}
