use std::future::Future;

use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::types::AuthorizationCode;

#[cfg(feature = "oauth")]
use crate::config::ProviderConfig;

/// Token response from the provider's token endpoint.
#[derive(Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Tokens delivered without a token endpoint (implicit flow, or tests).
    #[must_use]
    pub fn new(id_token: Option<String>, access_token: Option<String>) -> Self {
        Self {
            access_token,
            id_token,
            token_type: None,
            expires_in: None,
            scope: None,
        }
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Redeems an authorization code at the token endpoint.
///
/// A code is single-use: the second exchange of the same code must fail.
/// Implementations never retry; a failed exchange ends the attempt.
pub trait TokenExchanger: Send + Sync + 'static {
    fn exchange(
        &self,
        code: &AuthorizationCode,
        code_verifier: &str,
        redirect_uri: &Url,
    ) -> impl Future<Output = Result<TokenResponse, Error>> + Send;
}

/// RFC 6749 §5.2 error body.
#[cfg_attr(not(feature = "oauth"), allow(dead_code))]
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP token-endpoint client for the configured identity provider.
#[cfg(feature = "oauth")]
#[derive(Clone)]
pub struct AuthClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

#[cfg(feature = "oauth")]
impl AuthClient {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Exchange an authorization code for tokens using PKCE.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] without a client id, [`Error::Http`] on
    /// network failure, or [`Error::OAuth`] if the token endpoint rejects the
    /// code (expired, already used, or verifier mismatch).
    pub async fn exchange_code(
        &self,
        code: &AuthorizationCode,
        code_verifier: &str,
        redirect_uri: &Url,
    ) -> Result<TokenResponse, Error> {
        let client_id = self
            .config
            .client_id
            .as_ref()
            .ok_or_else(|| Error::Config("identity provider client id is not set".into()))?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", client_id.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token exchange").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(oauth_error(operation, Some(status), &body))
    }
}

#[cfg(feature = "oauth")]
impl TokenExchanger for AuthClient {
    async fn exchange(
        &self,
        code: &AuthorizationCode,
        code_verifier: &str,
        redirect_uri: &Url,
    ) -> Result<TokenResponse, Error> {
        self.exchange_code(code, code_verifier, redirect_uri).await
    }
}

/// Builds [`Error::OAuth`] from an endpoint body, keeping the RFC 6749 code when present.
#[cfg_attr(not(feature = "oauth"), allow(dead_code))]
pub(crate) fn oauth_error(operation: &'static str, status: Option<u16>, body: &str) -> Error {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) => Error::OAuth {
            operation,
            status,
            detail: parsed
                .error_description
                .unwrap_or_else(|| parsed.error.clone()),
            code: Some(parsed.error),
        },
        Err(_) => Error::OAuth {
            operation,
            status,
            code: None,
            detail: body.to_owned(),
        },
    }
}

#[cfg(all(test, feature = "oauth"))]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> AuthClient {
        let config = ProviderConfig::new("test-client", "myapp://redirect".parse().unwrap())
            .with_token_url(format!("{}/token", server.uri()).parse().unwrap());
        AuthClient::new(config)
    }

    fn redirect() -> Url {
        "myapp://redirect".parse().unwrap()
    }

    #[tokio::test]
    async fn test_exchange_sends_pkce_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=code-1"))
            .and(body_string_contains("code_verifier=verifier-1"))
            .and(body_string_contains("client_id=test-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.access",
                "id_token": "header.payload.sig",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)
            .exchange(&AuthorizationCode::from("code-1".to_string()), "verifier-1", &redirect())
            .await
            .unwrap();

        assert_eq!(tokens.id_token.as_deref(), Some("header.payload.sig"));
        assert_eq!(tokens.access_token.as_deref(), Some("ya29.access"));
        assert_eq!(tokens.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn test_reused_code_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.access",
                "id_token": "header.payload.sig"
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Code was already redeemed."
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let code = AuthorizationCode::from("code-1".to_string());

        assert!(client.exchange(&code, "verifier", &redirect()).await.is_ok());
        let err = client.exchange(&code, "verifier", &redirect()).await.unwrap_err();
        assert_eq!(err.oauth_code(), Some("invalid_grant"));
        assert!(matches!(err, Error::OAuth { status: Some(400), .. }));
    }

    #[tokio::test]
    async fn test_missing_client_id_fails_before_network() {
        let config = ProviderConfig::new("", redirect());
        let err = AuthClient::new(config)
            .exchange(&AuthorizationCode::from("c".to_string()), "v", &redirect())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_oauth_error_without_json_body() {
        let err = oauth_error("token exchange", Some(502), "Bad Gateway");
        assert_eq!(err.oauth_code(), None);
        assert_eq!(err.to_string(), "OAuth2 token exchange failed: Bad Gateway");
    }

    #[test]
    fn test_token_response_debug_is_redacted() {
        let tokens = TokenResponse::new(Some("secret-id".into()), Some("secret-access".into()));
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-id"));
        assert!(!debug.contains("secret-access"));
    }
}
