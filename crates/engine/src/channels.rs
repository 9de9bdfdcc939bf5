//! Channels table rows.
//!
//! A channel has two identifiers: a random seven digit `channel_id` shown to
//! operators, and the opaque `uid` every membership list refers to. Neither
//! changes after creation.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{membership::MembershipRow, store::Table, util::nullable_list};

pub const MIN_CHANNEL_ID: u32 = 1_000_000;
pub const MAX_CHANNEL_ID: u32 = 9_999_999;

/// A row of the `channels` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<u32>,
    pub name: String,
    /// User `uid`s allowed on this channel.
    #[serde(default, deserialize_with = "nullable_list")]
    pub allowed_users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MembershipRow for ChannelRecord {
    const TABLE: Table = Table::Channels;
    const REVERSE_FIELD: &'static str = "allowed_users";

    fn uid(&self) -> &str {
        &self.uid
    }

    fn reverse_list(&self) -> &[String] {
        &self.allowed_users
    }
}

/// Input of the create-channel saga.
#[derive(Clone, Debug, Default)]
pub struct ChannelDraft {
    pub name: String,
    pub allowed_users: Vec<String>,
}

/// Input of the update-channel saga. `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct ChannelChanges {
    pub name: Option<String>,
    pub allowed_users: Option<Vec<String>>,
}

/// Draws a display ID candidate; uniqueness is checked by the caller.
pub fn random_channel_id() -> u32 {
    rand::rng().random_range(MIN_CHANNEL_ID..=MAX_CHANNEL_ID)
}

pub fn is_valid_channel_id(value: u32) -> bool {
    (MIN_CHANNEL_ID..=MAX_CHANNEL_ID).contains(&value)
}
