use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::format_description::well_known::{Rfc2822, Rfc3339};

use crate::session::AuthError;
use crate::store::{CreateOutcome, DocumentStore, Session, StoreError};
use crate::types::SubjectId;

/// Collection holding one profile document per session subject.
pub const USERS_COLLECTION: &str = "users";

/// The app's view of a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UserProfile {
    pub id: SubjectId,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub church: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// `false` for a profile derived from session claims because the
    /// document store could not be reached.
    #[serde(skip)]
    pub persisted: bool,
}

impl UserProfile {
    /// Profile built purely from session claims, not yet stored.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.subject.clone(),
            email: session.email.clone().unwrap_or_default(),
            name: default_name(session),
            church: None,
            created_at: session.created_at.unwrap_or_else(OffsetDateTime::now_utc),
            persisted: false,
        }
    }

    fn from_document(session: &Session, stored: StoredProfile) -> Self {
        Self {
            id: session.subject.clone(),
            email: session.email.clone().or(stored.email).unwrap_or_default(),
            name: stored.name.unwrap_or_default(),
            church: stored.church,
            created_at: stored
                .created_at
                .or(session.created_at)
                .unwrap_or_else(OffsetDateTime::now_utc),
            persisted: true,
        }
    }
}

/// Shape written to `users/{uid}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDocument {
    name: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    church: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<&UserProfile> for ProfileDocument {
    fn from(profile: &UserProfile) -> Self {
        Self {
            name: profile.name.clone(),
            email: profile.email.clone(),
            church: profile.church.clone(),
            created_at: profile.created_at,
        }
    }
}

/// Fields read back from `users/{uid}`.
///
/// Older app versions wrote these loosely: any field may be missing, null or
/// of the wrong type, and `createdAt` may be an HTTP date or a
/// `{ seconds, nanoseconds }` timestamp.
#[derive(Debug, Default)]
struct StoredProfile {
    name: Option<String>,
    email: Option<String>,
    church: Option<String>,
    created_at: Option<OffsetDateTime>,
}

impl StoredProfile {
    fn from_value(value: &JsonValue) -> Result<Self, StoreError> {
        let fields = value
            .as_object()
            .ok_or_else(|| StoreError::Malformed("profile document is not an object".into()))?;
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(JsonValue::as_str)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_owned)
        };

        Ok(Self {
            name: text("name"),
            email: text("email"),
            church: text("church"),
            created_at: fields.get("createdAt").and_then(parse_timestamp),
        })
    }
}

fn parse_timestamp(value: &JsonValue) -> Option<OffsetDateTime> {
    match value {
        JsonValue::String(raw) => {
            let raw = raw.trim();
            OffsetDateTime::parse(raw, &Rfc3339).ok().or_else(|| {
                // RFC 7231 dates end in `GMT`, which RFC 2822 spells `+0000`.
                let raw = raw
                    .strip_suffix(" GMT")
                    .map_or_else(|| raw.to_owned(), |date| format!("{date} +0000"));
                OffsetDateTime::parse(&raw, &Rfc2822).ok()
            })
        }
        JsonValue::Object(ts) => ts
            .get("seconds")
            .and_then(JsonValue::as_i64)
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()),
        _ => None,
    }
}

/// Provider display name, else the local part of the email, else empty.
fn default_name(session: &Session) -> String {
    session
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| {
            session
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
        })
        .unwrap_or_default()
        .to_owned()
}

/// Fetches or lazily creates the profile document for a session.
pub struct ProfileReconciler<D> {
    documents: D,
}

impl<D: DocumentStore> ProfileReconciler<D> {
    #[must_use]
    pub fn new(documents: D) -> Self {
        Self { documents }
    }

    /// Never fails: when the store is unreachable the returned profile is
    /// derived from the session and has `persisted == false`.
    pub async fn reconcile(&self, session: &Session) -> UserProfile {
        match self.fetch_or_create(session).await {
            Ok(profile) => profile,
            // Retrying cannot repair the stored document, so do not ask for it.
            Err(StoreError::Malformed(reason)) => {
                tracing::warn!(
                    subject = %session.subject,
                    reason = %reason,
                    "Stored profile is unreadable; using session claims"
                );
                UserProfile {
                    persisted: true,
                    ..UserProfile::from_session(session)
                }
            }
            Err(e) => {
                let err = AuthError::store_unavailable(&e);
                tracing::warn!(
                    subject = %session.subject,
                    kind = ?err.kind(),
                    error = %err,
                    "Using unpersisted profile"
                );
                UserProfile::from_session(session)
            }
        }
    }

    async fn fetch_or_create(&self, session: &Session) -> Result<UserProfile, StoreError> {
        if let Some(profile) = self.fetch(session).await? {
            return Ok(profile);
        }

        let mut profile = UserProfile::from_session(session);
        let fields = serde_json::to_value(ProfileDocument::from(&profile))
            .map_err(|e| StoreError::Malformed(format!("encode profile: {e}")))?;

        match self
            .documents
            .create_document(USERS_COLLECTION, session.subject.as_str(), fields)
            .await?
        {
            CreateOutcome::Created => {
                tracing::info!(subject = %session.subject, "Created user profile");
                profile.persisted = true;
                Ok(profile)
            }
            // Lost a first-login race; the winner's document is authoritative.
            CreateOutcome::AlreadyExists => self.fetch(session).await?.ok_or_else(|| {
                StoreError::Unavailable("profile reported present but could not be read".into())
            }),
        }
    }

    async fn fetch(&self, session: &Session) -> Result<Option<UserProfile>, StoreError> {
        let Some(value) = self
            .documents
            .get_document(USERS_COLLECTION, session.subject.as_str())
            .await?
        else {
            return Ok(None);
        };
        let stored = StoredProfile::from_value(&value)?;
        Ok(Some(UserProfile::from_document(session, stored)))
    }
}
