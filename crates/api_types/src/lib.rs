use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod user {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct UserNew {
        pub username: String,
        pub password: String,
        /// Defaults to `regular`.
        pub role: Option<String>,
        /// Defaults to `true`.
        pub active: Option<bool>,
        /// Channel uids. Unknown ones are dropped.
        #[serde(default)]
        pub allowed_channels: Vec<String>,
    }

    /// Partial update; absent fields are left untouched.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct UserUpdate {
        pub username: Option<String>,
        /// Empty or `"undefined"` keeps the current password.
        pub password: Option<String>,
        pub role: Option<String>,
        pub active: Option<bool>,
        /// Replaces the whole list when present.
        pub allowed_channels: Option<Vec<String>>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct UserView {
        pub uid: String,
        pub username: String,
        pub role: String,
        pub active: bool,
        pub allowed_channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub created_at: Option<DateTime<Utc>>,
    }
}

pub mod channel {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ChannelNew {
        pub name: String,
        /// User uids. Unknown ones are dropped.
        #[serde(default)]
        pub allowed_users: Vec<String>,
    }

    /// Partial update. `uid` and `channel_id` cannot change.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct ChannelUpdate {
        pub name: Option<String>,
        pub allowed_users: Option<Vec<String>>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct ChannelView {
        pub uid: String,
        /// Seven digit identifier shown to operators.
        pub channel_id: Option<u32>,
        pub name: String,
        pub allowed_users: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub created_at: Option<DateTime<Utc>>,
    }
}

pub mod response {
    use super::*;

    /// Outcome class reported in every response body.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Status {
        Success,
        /// The primary write committed but some reverse lists were not
        /// updated; see `unsynced`.
        Degraded,
        NotFound,
        ClientError,
        ServerError,
        /// Some steps committed and could not be undone; see
        /// `completed_steps` and `failed_step`.
        PartialFailure,
    }

    /// JSON body shared by every route.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct Envelope<T> {
        pub status: Status,
        pub detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub data: Option<T>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub unsynced: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub completed_steps: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub failed_step: Option<String>,
    }

    impl<T> Envelope<T> {
        pub fn success(detail: impl Into<String>, data: T) -> Self {
            Self {
                status: Status::Success,
                detail: detail.into(),
                data: Some(data),
                unsynced: None,
                completed_steps: None,
                failed_step: None,
            }
        }

        /// Success when `unsynced` is empty, degraded otherwise.
        pub fn committed(detail: impl Into<String>, data: T, unsynced: Vec<String>) -> Self {
            let mut envelope = Self::success(detail, data);
            if !unsynced.is_empty() {
                envelope.status = Status::Degraded;
                envelope.unsynced = Some(unsynced);
            }
            envelope
        }

        pub fn error(status: Status, detail: impl Into<String>) -> Self {
            Self {
                status,
                detail: detail.into(),
                data: None,
                unsynced: None,
                completed_steps: None,
                failed_step: None,
            }
        }
    }
}
