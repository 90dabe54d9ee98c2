use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::pkce;

/// Unverified claims read from an OIDC ID token payload.
///
/// Signature verification is the session service's job; these are used for
/// shape checks, nonce binding and display fallbacks only.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<JsonValue>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// A foreign ID token wrapped in the form the session service accepts.
///
/// Lives only for the duration of one sign-in attempt and is never logged.
#[derive(Clone)]
pub struct SessionCredential {
    id_token: String,
    access_token: Option<String>,
    claims: IdTokenClaims,
}

impl SessionCredential {
    #[must_use]
    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    #[must_use]
    pub fn claims(&self) -> &IdTokenClaims {
        &self.claims
    }

    /// Checks the `nonce` claim sent with an implicit-flow request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the claim is missing or different.
    pub fn verify_nonce(&self, expected: &str) -> Result<(), Error> {
        match self.claims.nonce.as_deref() {
            Some(nonce) if pkce::tokens_match(expected, nonce) => Ok(()),
            Some(_) => Err(Error::Token("nonce mismatch".into())),
            None => Err(Error::Token("missing claim: nonce".into())),
        }
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("sub", &self.claims.sub)
            .field("iss", &self.claims.iss)
            .finish_non_exhaustive()
    }
}

/// Wraps a provider ID token (and optional access token) into a [`SessionCredential`].
///
/// Pure: no I/O, no signature check.
///
/// # Errors
///
/// Returns [`Error::Token`] if the ID token is absent, is not a three-part
/// JWS compact serialization, or its payload lacks a `sub` claim.
pub fn to_session_credential(
    id_token: Option<&str>,
    access_token: Option<&str>,
) -> Result<SessionCredential, Error> {
    let id_token = id_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Token("no ID token received from identity provider".into()))?;

    let claims = decode_claims(id_token)?;
    if claims.sub.is_empty() {
        return Err(Error::Token("missing claim: sub".into()));
    }

    Ok(SessionCredential {
        id_token: id_token.to_owned(),
        access_token: access_token
            .filter(|t| !t.is_empty())
            .map(str::to_owned),
        claims,
    })
}

/// Decodes the payload segment of a JWS compact token without verifying it.
fn decode_claims(token: &str) -> Result<IdTokenClaims, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().take(2).any(|p| p.is_empty()) {
        return Err(Error::Token("invalid token format".into()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| Error::Token("invalid token payload encoding".into()))?;

    serde_json::from_slice::<IdTokenClaims>(&payload)
        .map_err(|e| Error::Token(format!("invalid token payload: {e}")))
}
