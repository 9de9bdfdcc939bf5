//! Users table rows and the identity-format rules for usernames.
//!
//! A user lives twice: once in the identity authority (login email, password,
//! metadata) and once as a `users` row keyed by the identity ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{membership::MembershipRow, store::Table, util::nullable_list};

pub const DEFAULT_ROLE: &str = "regular";

/// A row of the `users` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Identity ID issued by the authority.
    pub uid: String,
    pub username: String,
    #[serde(default)]
    pub role: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Channel `uid`s this user may access.
    #[serde(default, deserialize_with = "nullable_list")]
    pub allowed_channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl MembershipRow for UserRecord {
    const TABLE: Table = Table::Users;
    const REVERSE_FIELD: &'static str = "allowed_channels";

    fn uid(&self) -> &str {
        &self.uid
    }

    fn reverse_list(&self) -> &[String] {
        &self.allowed_channels
    }
}

/// Input of the create-user saga.
#[derive(Clone, Debug, Default)]
pub struct UserDraft {
    pub username: String,
    pub password: String,
    pub role: Option<String>,
    pub active: Option<bool>,
    pub allowed_channels: Vec<String>,
}

/// Input of the update-user saga. `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
    pub allowed_channels: Option<Vec<String>>,
}

impl UserChanges {
    /// Password to push to the identity store, if a usable one was sent.
    ///
    /// Empty strings and the literal `undefined` some clients send are
    /// ignored.
    pub fn effective_password(&self) -> Option<&str> {
        self.password
            .as_deref()
            .filter(|password| !password.is_empty() && *password != "undefined")
    }
}

/// Turns a username into the email form the identity authority requires.
pub fn identity_email(username: &str, domain: &str) -> String {
    let username = username.trim();
    if username.contains('@') {
        username.to_string()
    } else {
        format!("{username}@{domain}")
    }
}

/// Drops the synthetic `@domain` suffix so the row keeps the bare name.
pub fn strip_identity_domain(username: &str, domain: &str) -> String {
    let username = username.trim();
    username
        .strip_suffix(&format!("@{domain}"))
        .unwrap_or(username)
        .to_string()
}

/// Metadata embedded in the identity record at creation.
pub(crate) fn identity_metadata(role: &str, active: bool, allowed_channels: &[String]) -> Value {
    json!({
        "role": role,
        "active": active,
        "allowed_channels": allowed_channels,
        "email_verified": true,
    })
}
