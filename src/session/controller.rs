use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::{AuthError, AuthErrorKind};
use super::state::{AuthPhase, Settings, Shared};
use crate::config::AuthConfig;
use crate::credential;
use crate::error::Error;
use crate::oauth::{TokenExchanger, TokenResponse};
use crate::profile::{ProfileReconciler, UserProfile};
use crate::provider::{
    AuthorizationGrant, AuthorizationOutcome, AuthorizationSurface, IdentityProviderClient,
};
use crate::store::{DocumentStore, Session, SessionStore, SessionSubscription};

/// Result of a sign-in that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    SignedIn(UserProfile),
    /// The user dismissed the provider surface, or logged out mid-flow.
    Cancelled,
}

/// Owns the authentication lifecycle and publishes the current [`AuthPhase`].
///
/// Dropping the controller (or calling [`shutdown`](Self::shutdown)) stops
/// the background tasks and releases the session-change subscription.
pub struct SessionController<P, T, S, D> {
    shared: Shared<P, T, S, D>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<P, T, S, D> SessionController<P, T, S, D>
where
    P: AuthorizationSurface,
    T: TokenExchanger,
    S: SessionStore,
    D: DocumentStore,
{
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        provider: IdentityProviderClient<P>,
        exchanger: T,
        sessions: S,
        documents: D,
    ) -> Self {
        let settings = Settings {
            configured: config.is_configured(),
            restore_timeout: config.restore_timeout(),
            exchange_timeout: config.exchange_timeout(),
        };
        let (phase, _) = watch::channel(AuthPhase::Uninitialized);

        Self {
            shared: Shared {
                provider: Arc::new(provider),
                exchanger: Arc::new(exchanger),
                sessions: Arc::new(sessions),
                reconciler: Arc::new(ProfileReconciler::new(documents)),
                phase: Arc::new(phase),
                flow: Arc::new(Mutex::new(())),
                awaiting_sign_out: Arc::new(AtomicBool::new(false)),
                started: Arc::new(AtomicBool::new(false)),
                settings,
            },
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Begin session restoration.
    ///
    /// Subscribes to session changes and leaves the loading state on the
    /// first notification or after the restore timeout, whichever comes
    /// first. Calling it again is a no-op. A sign-in started before `start()`
    /// starts the controller itself; after a logout, `start()` still
    /// subscribes but has nothing to restore.
    pub async fn start(&self) {
        let shared = &self.shared;
        if shared.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session controller already started");
            return;
        }
        if !shared.settings.configured {
            tracing::warn!("Authentication backend is not configured; sign-in is disabled");
            shared.end_restore();
            return;
        }

        let restoring = shared.phase.send_if_modified(|phase| {
            if *phase == AuthPhase::Uninitialized {
                *phase = AuthPhase::Restoring;
                true
            } else {
                false
            }
        });

        let deadline = Instant::now() + shared.settings.restore_timeout;
        let subscribed = tokio::time::timeout_at(deadline, shared.sessions.on_session_changed());
        let subscription = match subscribed.await {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Could not subscribe to session changes");
                shared.end_restore();
                return;
            }
            Err(_) => {
                tracing::warn!("Timed out subscribing to session changes");
                shared.end_restore();
                return;
            }
        };

        let mut tasks = vec![tokio::spawn(shared.clone().pump(subscription))];
        if restoring {
            let shared = shared.clone();
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if shared.end_restore() {
                    tracing::warn!(
                        timeout = ?shared.settings.restore_timeout,
                        "Session restoration timed out; continuing signed out"
                    );
                }
            }));
        }
        self.tasks.lock().extend(tasks);
    }

    /// Run one interactive sign-in with the identity provider.
    ///
    /// Already signed in: returns the current profile without prompting.
    ///
    /// # Errors
    ///
    /// [`AuthErrorKind::NotConfigured`] and [`AuthErrorKind::FlowInProgress`]
    /// are returned without opening any surface. Every other failure leaves
    /// the controller `Unauthenticated`.
    pub async fn sign_in_with_provider(&self) -> Result<SignInOutcome, AuthError> {
        let shared = &self.shared;
        if !shared.settings.configured {
            return Err(AuthError::not_configured());
        }
        self.start().await;
        let Ok(_flow) = shared.flow.try_lock() else {
            tracing::warn!("Rejected sign-in: another sign-in is in progress");
            return Err(AuthError::flow_in_progress());
        };

        let mut existing = None;
        shared.phase.send_if_modified(|phase| match phase {
            AuthPhase::Authenticated(profile) => {
                existing = Some(profile.clone());
                false
            }
            _ => {
                *phase = AuthPhase::Authenticating;
                true
            }
        });
        if let Some(profile) = existing {
            tracing::debug!(subject = %profile.id, "Already signed in");
            return Ok(SignInOutcome::SignedIn(profile));
        }

        match shared.authenticate().await {
            Ok(profile) => {
                let subject = profile.id.clone();
                let published = shared.phase.send_if_modified(|phase| {
                    if *phase == AuthPhase::Authenticating {
                        *phase = AuthPhase::Authenticated(profile.clone());
                        true
                    } else {
                        false
                    }
                });
                if published {
                    shared.awaiting_sign_out.store(false, Ordering::SeqCst);
                    tracing::info!(subject = %subject, "Sign-in successful");
                    return Ok(SignInOutcome::SignedIn(profile));
                }

                // Logged out while the flow was running.
                tracing::info!(subject = %subject, "Discarding sign-in completed after logout");
                if let Err(e) = shared.sessions.sign_out().await {
                    let err = AuthError::sign_out_failed(&e);
                    tracing::warn!(kind = ?err.kind(), error = %err, "Remote sign-out failed");
                }
                Ok(SignInOutcome::Cancelled)
            }
            Err(e) if e.kind() == AuthErrorKind::Cancelled => {
                tracing::info!("Sign-in cancelled by user");
                shared.settle_failed_flow(None);
                Ok(SignInOutcome::Cancelled)
            }
            Err(e) => {
                tracing::error!(kind = ?e.kind(), error = %e, "Sign-in failed");
                shared.settle_failed_flow(Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Sign out. Local state is cleared before the remote call and stays
    /// cleared even if the remote sign-out fails.
    pub async fn logout(&self) {
        let shared = &self.shared;
        shared.awaiting_sign_out.store(true, Ordering::SeqCst);
        let previous = shared.phase.send_replace(AuthPhase::Unauthenticated);
        let subject = previous.user().map(|profile| profile.id.to_string());

        if !shared.settings.configured {
            return;
        }
        match shared.sessions.sign_out().await {
            Ok(()) => tracing::info!(subject = ?subject, "Signed out"),
            Err(e) => {
                let err = AuthError::sign_out_failed(&e);
                tracing::warn!(
                    subject = ?subject,
                    kind = ?err.kind(),
                    error = %err,
                    "Remote sign-out failed; local session cleared"
                );
            }
        }
    }

    /// Stop background tasks and drop the session-change subscription.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        tracing::debug!("Session controller shut down");
    }

    /// Receiver of every phase change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthPhase> {
        self.shared.phase.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.shared.phase.borrow().clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.shared.phase.borrow().user().cloned()
    }

    /// True until restoration settles.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.shared.phase.borrow().is_loading()
    }

    /// Resolves once restoration has settled. Requires [`start`](Self::start).
    pub async fn wait_until_ready(&self) {
        let mut rx = self.shared.phase.subscribe();
        let _ = rx.wait_for(|phase| !phase.is_loading()).await;
    }
}

impl<P, T, S, D> Drop for SessionController<P, T, S, D> {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl<P, T, S, D> Shared<P, T, S, D>
where
    P: AuthorizationSurface,
    T: TokenExchanger,
    S: SessionStore,
    D: DocumentStore,
{
    /// Leave the loading state for `Unauthenticated`. Returns whether it applied.
    fn end_restore(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if phase.is_loading() {
                *phase = AuthPhase::Unauthenticated;
                true
            } else {
                false
            }
        })
    }

    async fn pump(self, mut subscription: SessionSubscription) {
        while let Some(change) = subscription.next().await {
            self.apply_change(change).await;
        }
        tracing::debug!("Session change subscription closed");
    }

    async fn apply_change(&self, change: Option<Session>) {
        let Some(session) = change else {
            self.awaiting_sign_out.store(false, Ordering::SeqCst);
            let ended = self.phase.send_if_modified(|phase| match phase {
                AuthPhase::Restoring | AuthPhase::Authenticated(_) => {
                    *phase = AuthPhase::Unauthenticated;
                    true
                }
                _ => false,
            });
            if ended {
                tracing::info!("Session ended");
            }
            return;
        };

        if self.awaiting_sign_out.load(Ordering::SeqCst) {
            tracing::debug!(
                subject = %session.subject,
                "Ignoring session notification after logout"
            );
            return;
        }

        let observed = self.phase.borrow().clone();
        let wanted = match &observed {
            AuthPhase::Restoring | AuthPhase::Unauthenticated => true,
            AuthPhase::Authenticated(profile) => {
                profile.id == session.subject && !profile.persisted
            }
            _ => false,
        };
        if !wanted {
            tracing::debug!(subject = %session.subject, "Ignoring session notification");
            return;
        }

        let profile = self.reconciler.reconcile(&session).await;
        let awaiting_sign_out = &self.awaiting_sign_out;
        let applied = self.phase.send_if_modified(|phase| {
            let unchanged = match (&observed, &*phase) {
                (AuthPhase::Restoring, AuthPhase::Restoring)
                | (AuthPhase::Unauthenticated, AuthPhase::Unauthenticated) => true,
                (AuthPhase::Authenticated(before), AuthPhase::Authenticated(now)) => {
                    before.id == now.id && !now.persisted
                }
                _ => false,
            };
            if unchanged && !awaiting_sign_out.load(Ordering::SeqCst) {
                *phase = AuthPhase::Authenticated(profile);
                true
            } else {
                false
            }
        });

        if applied {
            tracing::info!(subject = %session.subject, "Session restored");
        } else {
            tracing::debug!(subject = %session.subject, "Session notification superseded");
        }
    }

    /// Provider prompt, code exchange, credential bridge, profile.
    async fn authenticate(&self) -> Result<UserProfile, AuthError> {
        let (tokens, nonce) = match self.provider.begin_authorization().await? {
            AuthorizationOutcome::Success(AuthorizationGrant::Code {
                code,
                verifier,
                redirect_uri,
            }) => {
                let timeout = self.settings.exchange_timeout;
                let exchanged = tokio::time::timeout(
                    timeout,
                    self.exchanger.exchange(&code, &verifier, &redirect_uri),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Timeout {
                        operation: "token exchange",
                        elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                });
                let tokens = exchanged.map_err(|e| {
                    tracing::warn!(error = %e, "Authorization code exchange failed");
                    AuthError::from_exchange(&e)
                })?;
                (tokens, None)
            }
            AuthorizationOutcome::Success(AuthorizationGrant::Tokens {
                id_token,
                access_token,
                nonce,
            }) => (TokenResponse::new(id_token, access_token), Some(nonce)),
            AuthorizationOutcome::Cancelled => return Err(AuthError::cancelled()),
            AuthorizationOutcome::Failed(failure) => {
                tracing::warn!(
                    code = ?failure.code,
                    description = %failure.description,
                    "Identity provider reported a failure"
                );
                return Err(AuthError::from_provider(&failure));
            }
        };

        let credential = credential::to_session_credential(
            tokens.id_token.as_deref(),
            tokens.access_token.as_deref(),
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "Provider tokens could not be bridged");
            AuthError::invalid_token(&e)
        })?;
        drop(tokens);
        if let Some(nonce) = nonce {
            credential.verify_nonce(&nonce).map_err(|e| {
                tracing::warn!(error = %e, "ID token nonce check failed");
                AuthError::invalid_token(&e)
            })?;
        }

        let session = self
            .sessions
            .sign_in_with_credential(&credential)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Session service rejected the credential");
                AuthError::from_sign_in(&e)
            })?;
        drop(credential);

        Ok(self.reconciler.reconcile(&session).await)
    }

    /// Publish a failed attempt's outcome, unless a logout already took over.
    fn settle_failed_flow(&self, error: Option<AuthError>) {
        let failed = error.is_some();
        let settled = self.phase.send_if_modified(|phase| {
            if *phase != AuthPhase::Authenticating {
                return false;
            }
            *phase = error.map_or(AuthPhase::Unauthenticated, AuthPhase::Error);
            true
        });
        if settled && failed {
            self.phase.send_if_modified(|phase| {
                if matches!(phase, AuthPhase::Error(_)) {
                    *phase = AuthPhase::Unauthenticated;
                    true
                } else {
                    false
                }
            });
        }
    }
}
