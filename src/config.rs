use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::types::ClientId;

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Values shipped in config templates that mean "nobody filled this in".
const PLACEHOLDERS: &[&str] = &[
    "your-api-key-here",
    "your-project-id",
    "your-client-id",
    "changeme",
];

/// What the authorization endpoint is asked to return on the redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Authorization code, redeemed with the PKCE verifier at the token endpoint.
    #[default]
    Code,
    /// ID token delivered directly in the redirect fragment (implicit flow).
    IdToken,
}

impl ResponseMode {
    /// The `response_type` parameter value.
    #[must_use]
    pub fn as_response_type(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::IdToken => "id_token",
        }
    }
}

impl std::str::FromStr for ResponseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(Self::Code),
            "id_token" | "idtoken" | "token" => Ok(Self::IdToken),
            other => Err(Error::Config(format!("unknown response mode '{other}'"))),
        }
    }
}

/// Identity provider settings.
///
/// The redirect URI is required; the client id may be absent, in which case
/// sign-in fails fast as not configured.
///
/// ```rust,ignore
/// let config = ProviderConfig::new("1234.apps.googleusercontent.com", "myapp://redirect".parse()?)
///     .with_proxy_redirect_uri("https://auth.example.com/@me/journal".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub(crate) client_id: Option<ClientId>,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) proxy_redirect_uri: Option<Url>,
    pub(crate) scopes: Vec<String>,
    pub(crate) response_mode: ResponseMode,
}

impl ProviderConfig {
    /// Create a provider configuration targeting Google's OIDC endpoints.
    ///
    /// A blank `client_id` is accepted and reported by [`client_id`](Self::client_id) as `None`.
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            client_id: ClientId::try_from(client_id.into()).ok(),
            redirect_uri,
            auth_url: DEFAULT_AUTH_URL.parse().expect("valid default URL"),
            token_url: DEFAULT_TOKEN_URL.parse().expect("valid default URL"),
            proxy_redirect_uri: None,
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            response_mode: ResponseMode::Code,
        }
    }

    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Stable, publicly routable redirect used when the platform URI is not.
    #[must_use]
    pub fn with_proxy_redirect_uri(mut self, url: Url) -> Self {
        self.proxy_redirect_uri = Some(url);
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Redirect URI as reported by the platform (before proxy substitution).
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn proxy_redirect_uri(&self) -> Option<&Url> {
        self.proxy_redirect_uri.as_ref()
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn response_mode(&self) -> ResponseMode {
        self.response_mode
    }
}

/// Backend project credentials for the session and document services.
#[derive(Clone, Default)]
pub struct BackendConfig {
    api_key: Option<String>,
    project_id: Option<String>,
}

impl BackendConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            project_id: Some(project_id.into()),
        }
    }

    /// Both credentials present, non-blank and not left at a template placeholder.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        [&self.api_key, &self.project_id]
            .into_iter()
            .all(|v| v.as_deref().is_some_and(is_real_value))
    }

    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("project_id", &self.project_id)
            .finish()
    }
}

fn is_real_value(v: &str) -> bool {
    let v = v.trim();
    !v.is_empty() && !PLACEHOLDERS.iter().any(|p| v.eq_ignore_ascii_case(p))
}

/// Complete configuration for a [`SessionController`](crate::session::SessionController).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub(crate) provider: ProviderConfig,
    pub(crate) backend: BackendConfig,
    pub(crate) restore_timeout: Duration,
    pub(crate) exchange_timeout: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(provider: ProviderConfig, backend: BackendConfig) -> Self {
        Self {
            provider,
            backend,
            restore_timeout: DEFAULT_RESTORE_TIMEOUT,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `AUTH_REDIRECT_URI` or `AUTH_PROXY_REDIRECT_URI`
    ///
    /// # Optional env vars
    /// - `AUTH_CLIENT_ID`: identity provider client id (absent → not configured)
    /// - `AUTH_BACKEND_API_KEY`, `AUTH_BACKEND_PROJECT_ID`: backend credentials
    ///   (absent → not configured)
    /// - `AUTH_AUTHORIZE_URL`, `AUTH_TOKEN_URL`: endpoint overrides
    /// - `AUTH_SCOPES`: comma-separated scopes
    /// - `AUTH_RESPONSE_MODE`: `code` or `id_token`
    /// - `AUTH_RESTORE_TIMEOUT_MS`, `AUTH_EXCHANGE_TIMEOUT_MS`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no redirect URI is set or a value is malformed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let url = |key: &str| -> Result<Option<Url>, Error> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim().parse().map_err(|e| Error::Config(format!("{key}: {e}"))))
                .transpose()
        };
        let millis = |key: &str| -> Result<Option<Duration>, Error> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|e| Error::Config(format!("{key}: {e}")))
                })
                .transpose()
        };

        let proxy = url("AUTH_PROXY_REDIRECT_URI")?;
        let redirect_uri = match url("AUTH_REDIRECT_URI")? {
            Some(uri) => uri,
            None => proxy.clone().ok_or_else(|| {
                Error::Config("AUTH_REDIRECT_URI or AUTH_PROXY_REDIRECT_URI is required".into())
            })?,
        };

        let mut provider =
            ProviderConfig::new(lookup("AUTH_CLIENT_ID").unwrap_or_default(), redirect_uri);
        if let Some(proxy) = proxy {
            provider = provider.with_proxy_redirect_uri(proxy);
        }
        if let Some(auth_url) = url("AUTH_AUTHORIZE_URL")? {
            provider = provider.with_auth_url(auth_url);
        }
        if let Some(token_url) = url("AUTH_TOKEN_URL")? {
            provider = provider.with_token_url(token_url);
        }
        if let Some(scopes) = lookup("AUTH_SCOPES") {
            provider = provider.with_scopes(
                scopes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Some(mode) = lookup("AUTH_RESPONSE_MODE") {
            provider = provider.with_response_mode(mode.parse()?);
        }

        let backend = BackendConfig {
            api_key: lookup("AUTH_BACKEND_API_KEY"),
            project_id: lookup("AUTH_BACKEND_PROJECT_ID"),
        };

        let mut config = Self::new(provider, backend);
        if let Some(timeout) = millis("AUTH_RESTORE_TIMEOUT_MS")? {
            config = config.with_restore_timeout(timeout);
        }
        if let Some(timeout) = millis("AUTH_EXCHANGE_TIMEOUT_MS")? {
            config = config.with_exchange_timeout(timeout);
        }
        Ok(config)
    }

    /// Upper bound on waiting for the first session-change notification.
    #[must_use]
    pub fn with_restore_timeout(mut self, timeout: Duration) -> Self {
        self.restore_timeout = timeout;
        self
    }

    /// Upper bound on a single token-endpoint call.
    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    #[must_use]
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    #[must_use]
    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    #[must_use]
    pub fn restore_timeout(&self) -> Duration {
        self.restore_timeout
    }

    #[must_use]
    pub fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout
    }

    /// Backend credentials are real and a provider client id is set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.backend.is_configured() && self.provider.client_id.is_some()
    }
}
