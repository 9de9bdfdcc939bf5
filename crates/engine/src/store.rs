//! Typed access to the data tables and to the identity authority.
//!
//! Both adapters sit directly on [`Transport`] and turn its [`Outcome`] into
//! `Option<T>`: zero rows and not-found become `None`, a failure is always an
//! error and never a `None`.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::form_urlencoded;

use crate::{
    EngineError, ResultEngine,
    transport::{Method, Outcome, Transport},
};

const REST_PREFIX: &str = "/rest/v1";
const IDENTITY_PREFIX: &str = "/auth/v1/admin/users";

/// Data tables reachable through the REST layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Channels,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Channels => "channels",
        }
    }

    fn path(self) -> String {
        format!("{REST_PREFIX}/{}", self.name())
    }

    fn filter_path(self, field: &str, value: &str) -> String {
        let value: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
        format!("{}?{field}=eq.{value}", self.path())
    }
}

/// Reduces the REST layer's "list of one", "object" and "nothing" shapes to
/// a single optional row.
fn single(value: Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.into_iter().next(),
        Value::Null => None,
        other => Some(other),
    }
}

fn decode<T: DeserializeOwned>(table: &str, value: Value) -> ResultEngine<T> {
    serde_json::from_value(value)
        .map_err(|err| EngineError::Transport(format!("malformed {table} row: {err}")))
}

/// Per-table helpers over the REST layer.
#[derive(Clone, Copy)]
pub struct Store<'a> {
    transport: &'a dyn Transport,
    table: Table,
}

impl<'a> Store<'a> {
    pub fn new(transport: &'a dyn Transport, table: Table) -> Self {
        Self { transport, table }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Outcome {
        self.transport.send(method, path, body).await
    }

    fn one<T: DeserializeOwned>(&self, outcome: Outcome) -> ResultEngine<Option<T>> {
        match outcome {
            Outcome::Payload(value) => single(value)
                .map(|row| decode(self.table.name(), row))
                .transpose(),
            Outcome::Empty | Outcome::NotFound => Ok(None),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }

    pub async fn fetch_by_uid<T: DeserializeOwned>(&self, uid: &str) -> ResultEngine<Option<T>> {
        self.fetch_by_field("uid", uid).await
    }

    pub async fn fetch_by_field<T: DeserializeOwned>(
        &self,
        field: &str,
        value: &str,
    ) -> ResultEngine<Option<T>> {
        let outcome = self
            .call(Method::GET, &self.table.filter_path(field, value), None)
            .await;
        self.one(outcome)
    }

    /// Every row of the table. Rows that do not decode are logged and skipped.
    pub async fn list<T: DeserializeOwned>(&self) -> ResultEngine<Vec<T>> {
        match self.call(Method::GET, &self.table.path(), None).await {
            Outcome::Payload(Value::Array(rows)) => Ok(rows
                .into_iter()
                .filter_map(|row| match decode(self.table.name(), row) {
                    Ok(row) => Some(row),
                    Err(err) => {
                        tracing::warn!(table = self.table.name(), "skipping row: {err}");
                        None
                    }
                })
                .collect()),
            Outcome::Payload(row) => Ok(vec![decode(self.table.name(), row)?]),
            Outcome::Empty | Outcome::NotFound => Ok(Vec::new()),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }

    /// Inserts a row. `None` means the provider accepted it without echoing it.
    pub async fn create<T: DeserializeOwned>(&self, fields: &Value) -> ResultEngine<Option<T>> {
        let outcome = self.call(Method::POST, &self.table.path(), Some(fields)).await;
        self.one(outcome)
    }

    /// Updates the row with `uid`. `None` means no row matched or the
    /// provider did not echo it; use [`Store::patch_matched`] to tell apart.
    pub async fn patch<T: DeserializeOwned>(
        &self,
        uid: &str,
        fields: &Value,
    ) -> ResultEngine<Option<T>> {
        let outcome = self
            .call(
                Method::PATCH,
                &self.table.filter_path("uid", uid),
                Some(fields),
            )
            .await;
        self.one(outcome)
    }

    /// Updates the row with `uid`, reporting whether any row matched.
    ///
    /// An empty success body counts as a match.
    pub async fn patch_matched(&self, uid: &str, fields: &Value) -> ResultEngine<bool> {
        let outcome = self
            .call(
                Method::PATCH,
                &self.table.filter_path("uid", uid),
                Some(fields),
            )
            .await;
        match outcome {
            Outcome::Payload(_) | Outcome::Empty => Ok(true),
            Outcome::NotFound => Ok(false),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }

    /// Deletes the row with `uid`. Returns `false` when there was none.
    pub async fn delete(&self, uid: &str) -> ResultEngine<bool> {
        let outcome = self
            .call(Method::DELETE, &self.table.filter_path("uid", uid), None)
            .await;
        match outcome {
            Outcome::Payload(_) | Outcome::Empty => Ok(true),
            Outcome::NotFound => Ok(false),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }
}

/// Identity record as returned by the authority.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

/// Fields of an identity that the sagas change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IdentityUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl IdentityUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.password.is_none()
    }
}

fn missing_identity_id() -> EngineError {
    EngineError::Transport("identity response carries no id".to_string())
}

/// Admin API of the identity authority.
#[derive(Clone, Copy)]
pub struct Identities<'a> {
    transport: &'a dyn Transport,
}

impl<'a> Identities<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    fn path(id: &str) -> String {
        let id: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
        format!("{IDENTITY_PREFIX}/{id}")
    }

    /// Creates a confirmed identity. A response without an `id` is an error.
    pub async fn create_identity(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> ResultEngine<Identity> {
        let body = json!({
            "email": email,
            "password": password,
            "email_confirm": true,
            "user_metadata": metadata,
        });
        let outcome = self
            .transport
            .send(Method::POST, IDENTITY_PREFIX, Some(&body))
            .await;
        match outcome {
            Outcome::Payload(value) => {
                let identity: Identity = single(value)
                    .map(|identity| decode("identity", identity))
                    .transpose()?
                    .ok_or_else(missing_identity_id)?;
                if identity.id.is_empty() {
                    return Err(missing_identity_id());
                }
                Ok(identity)
            }
            Outcome::Empty | Outcome::NotFound => Err(missing_identity_id()),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }

    pub async fn get_identity(&self, id: &str) -> ResultEngine<Option<Identity>> {
        match self.transport.send(Method::GET, &Self::path(id), None).await {
            Outcome::Payload(value) => single(value)
                .map(|identity| decode("identity", identity))
                .transpose(),
            Outcome::Empty | Outcome::NotFound => Ok(None),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }

    /// Applies `changes` to identity `id`.
    pub async fn update_identity(&self, id: &str, changes: &IdentityUpdate) -> ResultEngine<()> {
        let body = serde_json::to_value(changes)
            .map_err(|err| EngineError::Validation(format!("invalid identity update: {err}")))?;
        match self
            .transport
            .send(Method::PUT, &Self::path(id), Some(&body))
            .await
        {
            Outcome::Payload(_) | Outcome::Empty => Ok(()),
            Outcome::NotFound => Err(EngineError::NotFound(format!("identity {id}"))),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }

    /// Deletes identity `id`. Returns `false` when it was already gone.
    pub async fn delete_identity(&self, id: &str) -> ResultEngine<bool> {
        match self
            .transport
            .send(Method::DELETE, &Self::path(id), None)
            .await
        {
            Outcome::Payload(_) | Outcome::Empty => Ok(true),
            Outcome::NotFound => Ok(false),
            Outcome::Failure(detail) => Err(EngineError::Transport(detail)),
        }
    }
}
