#![allow(dead_code)]

use std::sync::Arc;

use engine::{ChannelDraft, ChannelRecord, Engine, MemoryProvider, Table, UserDraft, UserRecord};
use serde_json::Value;

pub fn engine_with_provider() -> (Engine, Arc<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let engine = Engine::builder()
        .transport(provider.clone())
        .build()
        .unwrap();
    (engine, provider)
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

pub async fn new_channel(engine: &Engine, name: &str) -> ChannelRecord {
    engine
        .create_channel(ChannelDraft {
            name: name.to_string(),
            allowed_users: Vec::new(),
        })
        .await
        .unwrap()
        .value
}

pub async fn new_user(engine: &Engine, username: &str, channels: Vec<String>) -> UserRecord {
    engine
        .create_user(UserDraft {
            username: username.to_string(),
            password: "password".to_string(),
            allowed_channels: channels,
            ..Default::default()
        })
        .await
        .unwrap()
        .value
}

/// Reverse list stored on the raw row, as the provider holds it.
pub fn stored_list(provider: &MemoryProvider, table: Table, uid: &str) -> Vec<String> {
    let field = match table {
        Table::Users => "allowed_channels",
        Table::Channels => "allowed_users",
    };
    provider
        .row(table, uid)
        .and_then(|row| row.get(field).cloned())
        .and_then(|list| serde_json::from_value::<Option<Vec<String>>>(list).ok())
        .flatten()
        .unwrap_or_default()
}

pub fn row_exists(provider: &MemoryProvider, table: Table, uid: &str) -> bool {
    provider.row(table, uid).is_some()
}

pub fn identity_email(provider: &MemoryProvider, id: &str) -> Option<String> {
    provider
        .identity(id)
        .and_then(|identity| identity.get("email").and_then(Value::as_str).map(ToString::to_string))
}
