//! In-process stand-in for the hosted provider.
//!
//! [`MemoryProvider`] answers the same paths as the real REST and identity
//! endpoints and feeds its replies through [`Outcome::from_response`], so the
//! engine sees exactly the shapes it would see over HTTP. Failures can be
//! injected per method and path prefix.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use serde_json::{Map, Value, json};
use url::form_urlencoded;
use uuid::Uuid;

use crate::{
    store::Table,
    transport::{BoxFuture, Method, Outcome, Transport},
};

const REST_PREFIX: &str = "/rest/v1/";
const IDENTITY_PREFIX: &str = "/auth/v1/admin/users";

#[derive(Debug, Default)]
struct State {
    identities: BTreeMap<String, Value>,
    users: Vec<Value>,
    channels: Vec<Value>,
    failures: Vec<(Method, String)>,
}

impl State {
    fn rows_mut(&mut self, table: Table) -> &mut Vec<Value> {
        match table {
            Table::Users => &mut self.users,
            Table::Channels => &mut self.channels,
        }
    }
}

/// Provider kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every `method` call whose path starts with `prefix` fail with a
    /// 500 until [`MemoryProvider::clear_failures`] is called.
    pub fn fail_on(&self, method: Method, prefix: &str) {
        self.state().failures.push((method, prefix.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Stores `row` as is, bypassing every check.
    pub fn insert_row(&self, table: Table, row: Value) {
        self.state().rows_mut(table).push(row);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.state().rows_mut(table).clone()
    }

    pub fn row(&self, table: Table, uid: &str) -> Option<Value> {
        self.state()
            .rows_mut(table)
            .iter()
            .find(|row| field_matches(row, "uid", uid))
            .cloned()
    }

    pub fn identity(&self, id: &str) -> Option<Value> {
        self.state().identities.get(id).cloned()
    }

    pub fn identity_count(&self) -> usize {
        self.state().identities.len()
    }

    fn handle(&self, method: &Method, path: &str, body: Option<&Value>) -> (u16, Value) {
        let mut state = self.state();
        if state
            .failures
            .iter()
            .any(|(failing, prefix)| failing == method && path.starts_with(prefix.as_str()))
        {
            return (500, json!({"message": "injected failure"}));
        }

        if let Some(rest) = path.strip_prefix(IDENTITY_PREFIX) {
            return match rest.strip_prefix('/') {
                None if rest.is_empty() => create_identity(&mut state, method, body),
                Some(id) if !id.is_empty() => identity_by_id(&mut state, method, id, body),
                _ => not_found(),
            };
        }

        if let Some(rest) = path.strip_prefix(REST_PREFIX) {
            let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
            let table = match name {
                "users" => Table::Users,
                "channels" => Table::Channels,
                _ => return not_found(),
            };
            let filter = parse_filter(query);
            return table_request(state.rows_mut(table), method, filter, body);
        }

        not_found()
    }
}

impl Transport for MemoryProvider {
    fn send<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<&'a Value>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let (status, reply) = self.handle(&method, path, body);
            tracing::debug!(%method, path, status, "memory provider call");
            let text = if reply.is_null() {
                String::new()
            } else {
                reply.to_string()
            };
            Outcome::from_response(status, &text)
        })
    }
}

fn not_found() -> (u16, Value) {
    (404, json!({"message": "not found"}))
}

fn user_not_found() -> (u16, Value) {
    (404, json!({"code": "user_not_found", "message": "User not found"}))
}

fn create_identity(state: &mut State, method: &Method, body: Option<&Value>) -> (u16, Value) {
    if *method != Method::POST {
        return (405, json!({"message": "method not allowed"}));
    }
    let Some(email) = body.and_then(|b| b.get("email")).and_then(Value::as_str) else {
        return (422, json!({"error_code": "validation_failed", "message": "email is required"}));
    };
    let taken = state
        .identities
        .values()
        .any(|identity| identity.get("email").and_then(Value::as_str) == Some(email));
    if taken {
        return (422, json!({"error_code": "email_exists", "message": "email already registered"}));
    }

    let id = Uuid::new_v4().to_string();
    let identity = json!({
        "id": id,
        "email": email,
        "user_metadata": body.and_then(|b| b.get("user_metadata")).cloned().unwrap_or(Value::Null),
        "created_at": Utc::now().to_rfc3339(),
    });
    state.identities.insert(id, identity.clone());
    (200, identity)
}

fn identity_by_id(
    state: &mut State,
    method: &Method,
    id: &str,
    body: Option<&Value>,
) -> (u16, Value) {
    if *method == Method::GET {
        match state.identities.get(id) {
            Some(identity) => (200, identity.clone()),
            None => user_not_found(),
        }
    } else if *method == Method::PUT {
        let Some(identity) = state.identities.get_mut(id) else {
            return user_not_found();
        };
        if let Some(email) = body.and_then(|b| b.get("email")).and_then(Value::as_str) {
            identity["email"] = Value::from(email);
        }
        (200, identity.clone())
    } else if *method == Method::DELETE {
        match state.identities.remove(id) {
            Some(_) => (200, Value::Null),
            None => user_not_found(),
        }
    } else {
        (405, json!({"message": "method not allowed"}))
    }
}

fn parse_filter(query: &str) -> Option<(String, String)> {
    form_urlencoded::parse(query.as_bytes()).find_map(|(field, value)| {
        value
            .strip_prefix("eq.")
            .map(|value| (field.into_owned(), value.to_string()))
    })
}

fn field_matches(row: &Value, field: &str, expected: &str) -> bool {
    match row.get(field) {
        Some(Value::String(value)) => value == expected,
        Some(Value::Number(value)) => value.to_string() == expected,
        Some(Value::Bool(value)) => value.to_string() == expected,
        _ => false,
    }
}

fn table_request(
    rows: &mut Vec<Value>,
    method: &Method,
    filter: Option<(String, String)>,
    body: Option<&Value>,
) -> (u16, Value) {
    let selected = |row: &Value| match &filter {
        Some((field, value)) => field_matches(row, field, value),
        None => true,
    };

    if *method == Method::GET {
        let found: Vec<Value> = rows.iter().filter(|row| selected(*row)).cloned().collect();
        (200, Value::from(found))
    } else if *method == Method::POST {
        let Some(Value::Object(fields)) = body else {
            return (400, json!({"message": "expected an object"}));
        };
        let uid = fields.get("uid").and_then(Value::as_str).unwrap_or_default();
        if rows.iter().any(|row| field_matches(row, "uid", uid)) {
            return (409, json!({"code": "23505", "message": "duplicate key value"}));
        }
        let mut row = fields.clone();
        row.entry("created_at")
            .or_insert_with(|| Value::from(Utc::now().to_rfc3339()));
        let row = Value::Object(row);
        rows.push(row.clone());
        (201, json!([row]))
    } else if *method == Method::PATCH {
        let Some(Value::Object(changes)) = body else {
            return (400, json!({"message": "expected an object"}));
        };
        let mut updated = Vec::new();
        for row in rows.iter_mut() {
            if !selected(&*row) {
                continue;
            }
            if let Value::Object(current) = row {
                merge(current, changes);
            }
            updated.push(row.clone());
        }
        (200, Value::from(updated))
    } else if *method == Method::DELETE {
        let (removed, kept): (Vec<Value>, Vec<Value>) = rows.drain(..).partition(|row| selected(row));
        *rows = kept;
        (200, Value::from(removed))
    } else {
        (405, json!({"message": "method not allowed"}))
    }
}

fn merge(row: &mut Map<String, Value>, changes: &Map<String, Value>) {
    for (key, value) in changes {
        row.insert(key.clone(), value.clone());
    }
}
