use std::future::Future;

use url::Url;
use url::form_urlencoded;

use crate::config::{ProviderConfig, ResponseMode};
use crate::error::Error;
use crate::pkce::{self, PkceMaterial};
use crate::redirect;
use crate::types::AuthorizationCode;

/// Interactive, user-facing authorization surface (system browser or in-app webview).
///
/// # Example
///
/// ```rust,ignore
/// impl AuthorizationSurface for SystemBrowser {
///     async fn present(&self, authorize_url: &Url, redirect_uri: &Url) -> SurfaceOutcome {
///         match self.open_and_wait_for(authorize_url, redirect_uri).await {
///             Ok(Some(callback)) => SurfaceOutcome::Redirected(callback),
///             Ok(None) => SurfaceOutcome::Dismissed,
///             Err(e) => SurfaceOutcome::Failed(e.to_string()),
///         }
///     }
/// }
/// ```
pub trait AuthorizationSurface: Send + Sync + 'static {
    /// Opens `authorize_url` and suspends until the user completes, dismisses,
    /// or the surface errors. On completion returns the full URL the provider
    /// redirected to (a `redirect_uri` with query and/or fragment).
    fn present(
        &self,
        authorize_url: &Url,
        redirect_uri: &Url,
    ) -> impl Future<Output = SurfaceOutcome> + Send;
}

/// What the authorization surface reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceOutcome {
    Redirected(Url),
    Dismissed,
    Failed(String),
}

/// Error reported by the identity provider (or by callback validation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// OAuth2 `error` code, or a local code such as `state_mismatch`.
    pub code: Option<String>,
    pub description: String,
}

/// What the provider granted.
pub enum AuthorizationGrant {
    /// Code flow: redeem `code` with `verifier` at the token endpoint, using
    /// exactly `redirect_uri`.
    Code {
        code: AuthorizationCode,
        verifier: String,
        redirect_uri: Url,
    },
    /// Implicit flow: tokens arrived in the redirect; `nonce` must match the ID token.
    Tokens {
        id_token: Option<String>,
        access_token: Option<String>,
        nonce: String,
    },
}

impl std::fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code { redirect_uri, .. } => f
                .debug_struct("Code")
                .field("redirect_uri", &redirect_uri.as_str())
                .finish_non_exhaustive(),
            Self::Tokens { id_token, .. } => f
                .debug_struct("Tokens")
                .field("id_token", &id_token.as_ref().map(|_| "<redacted>"))
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub enum AuthorizationOutcome {
    Success(AuthorizationGrant),
    Cancelled,
    Failed(ProviderFailure),
}

/// One authorization attempt: the URL to open plus the single-use PKCE,
/// `state` and `nonce` values it was built with.
#[derive(Debug)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: Url,
    pub redirect_uri: Url,
    pub response_mode: ResponseMode,
    material: PkceMaterial,
}

impl AuthorizationRequest {
    #[must_use]
    pub fn state(&self) -> &str {
        self.material.state()
    }

    /// Validates the provider's redirect and consumes the request.
    #[must_use]
    pub fn complete(self, callback: &Url) -> AuthorizationOutcome {
        let params = CallbackParams::parse(callback);

        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_else(|| error.clone());
            tracing::warn!(
                error = %error,
                description = %description,
                "OAuth2 error from identity provider"
            );
            return AuthorizationOutcome::Failed(ProviderFailure {
                code: Some(error),
                description,
            });
        }

        let state_ok = params
            .state
            .as_deref()
            .is_some_and(|received| pkce::tokens_match(self.material.state(), received));
        if !state_ok {
            tracing::warn!("OAuth state mismatch");
            return AuthorizationOutcome::Failed(ProviderFailure {
                code: Some("state_mismatch".into()),
                description: "authorization response did not match this sign-in attempt".into(),
            });
        }

        match self.response_mode {
            ResponseMode::Code => match params.code {
                Some(code) => AuthorizationOutcome::Success(AuthorizationGrant::Code {
                    code: AuthorizationCode(code),
                    verifier: self.material.into_verifier(),
                    redirect_uri: self.redirect_uri,
                }),
                None => AuthorizationOutcome::Failed(ProviderFailure {
                    code: Some("missing_code".into()),
                    description: "authorization response carried no code".into(),
                }),
            },
            ResponseMode::IdToken => AuthorizationOutcome::Success(AuthorizationGrant::Tokens {
                id_token: params.id_token,
                access_token: params.access_token,
                nonce: self.material.nonce().to_owned(),
            }),
        }
    }
}

/// Parameters of the provider's redirect, from the query and the fragment.
#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    id_token: Option<String>,
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn parse(callback: &Url) -> Self {
        let mut params = Self::default();
        let query = callback.query_pairs();
        let fragment = form_urlencoded::parse(callback.fragment().unwrap_or_default().as_bytes());
        for (key, value) in query.chain(fragment) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "id_token" => params.id_token = value,
                "access_token" => params.access_token = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

/// Drives the interactive authorization step against the identity provider.
pub struct IdentityProviderClient<S> {
    config: ProviderConfig,
    surface: S,
}

impl<S: AuthorizationSurface> IdentityProviderClient<S> {
    #[must_use]
    pub fn new(config: ProviderConfig, surface: S) -> Self {
        Self { config, surface }
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The redirect URI actually sent to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the platform URI is not routable and no proxy is set.
    pub fn redirect_uri(&self) -> Result<Url, Error> {
        redirect::resolve_redirect_uri(
            &self.config.redirect_uri,
            self.config.proxy_redirect_uri.as_ref(),
        )
    }

    /// Build a fresh authorization request. Every call generates new PKCE,
    /// `state` and `nonce` values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] without a client id or a usable redirect URI.
    pub fn authorization_request(&self) -> Result<AuthorizationRequest, Error> {
        let client_id = self
            .config
            .client_id
            .as_ref()
            .ok_or_else(|| Error::Config("identity provider client id is not set".into()))?;
        let redirect_uri = self.redirect_uri()?;
        let material = PkceMaterial::fresh();
        let response_mode = self.config.response_mode;
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", response_mode.as_response_type())
                .append_pair("client_id", client_id.as_str())
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("scope", &scope)
                .append_pair("state", material.state());
            match response_mode {
                ResponseMode::Code => {
                    query
                        .append_pair("code_challenge", material.challenge())
                        .append_pair("code_challenge_method", "S256");
                }
                ResponseMode::IdToken => {
                    query.append_pair("nonce", material.nonce());
                }
            }
        }

        Ok(AuthorizationRequest {
            url,
            redirect_uri,
            response_mode,
            material,
        })
    }

    /// Runs one interactive authorization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] before opening any surface if the client is
    /// not configured. Provider-side failures are reported as
    /// [`AuthorizationOutcome::Failed`], user dismissal as
    /// [`AuthorizationOutcome::Cancelled`].
    pub async fn begin_authorization(&self) -> Result<AuthorizationOutcome, Error> {
        let request = self.authorization_request()?;
        tracing::debug!(
            redirect_uri = %request.redirect_uri,
            mode = ?request.response_mode,
            "Opening authorization surface"
        );

        Ok(
            match self.surface.present(&request.url, &request.redirect_uri).await {
                SurfaceOutcome::Redirected(callback) => request.complete(&callback),
                SurfaceOutcome::Dismissed => AuthorizationOutcome::Cancelled,
                SurfaceOutcome::Failed(description) => {
                    AuthorizationOutcome::Failed(ProviderFailure {
                        code: None,
                        description,
                    })
                }
            },
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Surface that answers every prompt through a closure over the authorize URL.
    pub(crate) struct ScriptedSurface<F> {
        respond: F,
        pub(crate) prompts: Arc<AtomicUsize>,
    }

    impl<F> ScriptedSurface<F>
    where
        F: Fn(&Url, &Url) -> SurfaceOutcome + Send + Sync + 'static,
    {
        pub(crate) fn new(respond: F) -> Self {
            Self {
                respond,
                prompts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl<F> AuthorizationSurface for ScriptedSurface<F>
    where
        F: Fn(&Url, &Url) -> SurfaceOutcome + Send + Sync + 'static,
    {
        async fn present(&self, authorize_url: &Url, redirect_uri: &Url) -> SurfaceOutcome {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            (self.respond)(authorize_url, redirect_uri)
        }
    }

    pub(crate) fn query_param(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Redirect carrying `code` and echoing the request's `state`.
    pub(crate) fn approved_redirect(
        authorize_url: &Url,
        redirect_uri: &Url,
        code: &str,
    ) -> SurfaceOutcome {
        let mut callback = redirect_uri.clone();
        callback
            .query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", &query_param(authorize_url, "state").unwrap_or_default());
        SurfaceOutcome::Redirected(callback)
    }

    pub(crate) fn approve_with_code(
        code: &'static str,
    ) -> impl Fn(&Url, &Url) -> SurfaceOutcome + Send + Sync + 'static {
        move |authorize_url, redirect_uri| approved_redirect(authorize_url, redirect_uri, code)
    }

    fn config() -> ProviderConfig {
        ProviderConfig::new("client-1", "com.example.journal:/oauth2redirect".parse().unwrap())
    }

    fn dismiss(_: &Url, _: &Url) -> SurfaceOutcome {
        SurfaceOutcome::Dismissed
    }

    fn dismissing_client(
        config: ProviderConfig,
    ) -> IdentityProviderClient<impl AuthorizationSurface> {
        IdentityProviderClient::new(config, ScriptedSurface::new(dismiss))
    }

    #[test]
    fn test_authorization_request_contains_pkce() {
        let client = dismissing_client(config());
        let req = client.authorization_request().unwrap();

        assert_eq!(query_param(&req.url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&req.url, "client_id").as_deref(), Some("client-1"));
        assert_eq!(query_param(&req.url, "scope").as_deref(), Some("openid profile email"));
        assert_eq!(query_param(&req.url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(
            query_param(&req.url, "code_challenge").as_deref(),
            Some(req.material.challenge())
        );
        assert_eq!(query_param(&req.url, "state").as_deref(), Some(req.state()));
        assert!(query_param(&req.url, "nonce").is_none());
    }

    #[test]
    fn test_authorization_request_unique_per_call() {
        let client = dismissing_client(config());
        let req1 = client.authorization_request().unwrap();
        let req2 = client.authorization_request().unwrap();

        assert_ne!(req1.state(), req2.state());
        assert_ne!(req1.material.verifier(), req2.material.verifier());
    }

    #[test]
    fn test_implicit_request_sends_nonce() {
        let config = config().with_response_mode(ResponseMode::IdToken);
        let client = dismissing_client(config);
        let req = client.authorization_request().unwrap();

        assert_eq!(query_param(&req.url, "response_type").as_deref(), Some("id_token"));
        assert_eq!(query_param(&req.url, "nonce").as_deref(), Some(req.material.nonce()));
        assert!(query_param(&req.url, "code_challenge").is_none());
    }

    #[test]
    fn test_unroutable_redirect_uses_proxy() {
        let config = ProviderConfig::new("client-1", "exp://192.168.1.20:8081".parse().unwrap())
            .with_proxy_redirect_uri("https://auth.example.com/@me/journal".parse().unwrap());
        let client = dismissing_client(config);
        let req = client.authorization_request().unwrap();

        assert_eq!(req.redirect_uri.as_str(), "https://auth.example.com/@me/journal");
        assert_eq!(
            query_param(&req.url, "redirect_uri").as_deref(),
            Some("https://auth.example.com/@me/journal")
        );
    }

    #[test]
    fn test_missing_client_id_is_config_error() {
        let config = ProviderConfig::new("", "myapp://redirect".parse().unwrap());
        let client = dismissing_client(config);
        assert!(matches!(client.authorization_request(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_code_flow_success() {
        let surface = ScriptedSurface::new(approve_with_code("4/abc"));
        let client = IdentityProviderClient::new(config(), surface);

        match client.begin_authorization().await.unwrap() {
            AuthorizationOutcome::Success(AuthorizationGrant::Code {
                code,
                verifier,
                redirect_uri,
            }) => {
                assert_eq!(code.as_str(), "4/abc");
                assert_eq!(verifier.len(), 64);
                assert_eq!(redirect_uri.as_str(), "com.example.journal:/oauth2redirect");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dismissal_is_cancelled() {
        let client = dismissing_client(config());
        assert!(matches!(
            client.begin_authorization().await.unwrap(),
            AuthorizationOutcome::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_state_mismatch_is_rejected() {
        let surface = ScriptedSurface::new(|_: &Url, redirect_uri: &Url| {
            let mut callback = redirect_uri.clone();
            callback
                .query_pairs_mut()
                .append_pair("code", "4/abc")
                .append_pair("state", "forged");
            SurfaceOutcome::Redirected(callback)
        });
        let client = IdentityProviderClient::new(config(), surface);

        match client.begin_authorization().await.unwrap() {
            AuthorizationOutcome::Failed(failure) => {
                assert_eq!(failure.code.as_deref(), Some("state_mismatch"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_provider_error_is_reported() {
        let surface = ScriptedSurface::new(|authorize_url: &Url, redirect_uri: &Url| {
            let mut callback = redirect_uri.clone();
            callback
                .query_pairs_mut()
                .append_pair("error", "access_denied")
                .append_pair("state", &query_param(authorize_url, "state").unwrap_or_default());
            SurfaceOutcome::Redirected(callback)
        });
        let client = IdentityProviderClient::new(config(), surface);

        match client.begin_authorization().await.unwrap() {
            AuthorizationOutcome::Failed(failure) => {
                assert_eq!(failure.code.as_deref(), Some("access_denied"));
                assert_eq!(failure.description, "access_denied");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_implicit_tokens_from_fragment() {
        let surface = ScriptedSurface::new(|authorize_url: &Url, redirect_uri: &Url| {
            let state = query_param(authorize_url, "state").unwrap_or_default();
            let mut callback = redirect_uri.clone();
            callback.set_fragment(Some(&format!("id_token=a.b.c&state={state}")));
            SurfaceOutcome::Redirected(callback)
        });
        let config = config().with_response_mode(ResponseMode::IdToken);
        let client = IdentityProviderClient::new(config, surface);

        match client.begin_authorization().await.unwrap() {
            AuthorizationOutcome::Success(AuthorizationGrant::Tokens {
                id_token, nonce, ..
            }) => {
                assert_eq!(id_token.as_deref(), Some("a.b.c"));
                assert_eq!(nonce.len(), 22);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
