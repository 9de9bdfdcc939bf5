use std::sync::Arc;

use crate::{
    EngineError, ResultEngine,
    membership::{Edge, MembershipRow},
    saga::{Compensation, SagaLog, Step},
    store::{Identities, IdentityUpdate, Store, Table},
    transport::Transport,
    util::dedup_ids,
};

mod channels;
mod membership;
mod users;

pub const DEFAULT_IDENTITY_DOMAIN: &str = "example.com";

/// Entry point of every user and channel operation.
///
/// The engine holds no state besides the transport: every operation reads
/// what it needs from the provider right before deciding what to write.
pub struct Engine {
    transport: Arc<dyn Transport>,
    identity_domain: String,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("identity_domain", &self.identity_domain)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Domain appended to bare usernames for the identity authority.
    pub fn identity_domain(&self) -> &str {
        &self.identity_domain
    }

    fn store(&self, table: Table) -> Store<'_> {
        Store::new(self.transport.as_ref(), table)
    }

    fn users(&self) -> Store<'_> {
        self.store(Table::Users)
    }

    fn channels(&self) -> Store<'_> {
        self.store(Table::Channels)
    }

    fn identities(&self) -> Identities<'_> {
        Identities::new(self.transport.as_ref())
    }

    /// Keeps the IDs of `ids` that exist in `table`, dropping unknown ones.
    async fn existing_ids(&self, table: Table, ids: &[String]) -> ResultEngine<Vec<String>> {
        let store = self.store(table);
        let mut found = Vec::new();
        for id in dedup_ids(ids) {
            match store.fetch_by_uid::<serde_json::Value>(&id).await? {
                Some(_) => found.push(id),
                None => tracing::info!(table = table.name(), %id, "dropping unknown reference"),
            }
        }
        Ok(found)
    }

    /// IDs of the `R` rows that reference `owner`, merged with `own_list`.
    ///
    /// Falls back to `own_list` alone when the table cannot be scanned.
    async fn referencing<R: MembershipRow>(&self, owner: &str, own_list: &[String]) -> Vec<String> {
        let mut ids = own_list.to_vec();
        match self.store(R::TABLE).list::<R>().await {
            Ok(rows) => ids.extend(
                rows.iter()
                    .filter(|row| row.reverse_list().iter().any(|id| id == owner))
                    .map(|row| row.uid().to_string()),
            ),
            Err(err) => tracing::warn!(
                table = R::TABLE.name(),
                owner,
                "scan for references failed, using the stored list only: {err}"
            ),
        }
        dedup_ids(ids)
    }

    /// Logs the failed step, unwinds the log and hands back the primary error.
    ///
    /// When the log holds a step that could not be undone the error becomes
    /// [`EngineError::PartialFailure`] instead.
    async fn abort(&self, mut log: SagaLog, step: Step, err: EngineError) -> EngineError {
        tracing::error!(saga = log.name(), %step, "step failed: {err}");
        self.compensate(&mut log).await;
        if log.is_reversible() {
            err
        } else {
            log.partial_failure(step, format!("earlier changes could not be undone: {err}"))
        }
    }

    /// Runs the recorded undo actions, most recent first.
    ///
    /// Failures are logged and never replace the error being reported.
    async fn compensate(&self, log: &mut SagaLog) {
        for action in log.take_compensations() {
            let step = action.step();
            let result = match &action {
                Compensation::DeleteIdentity { id } => {
                    self.identities().delete_identity(id).await.map(|_| ())
                }
                Compensation::RestoreIdentityEmail { id, email } => {
                    let update = IdentityUpdate {
                        email: Some(email.clone()),
                        password: None,
                    };
                    self.identities().update_identity(id, &update).await
                }
                Compensation::ReattachMemberships {
                    owner,
                    counterparts,
                    side,
                } => {
                    let report = self
                        .reconcile(owner, counterparts, *side, Edge::Attach)
                        .await;
                    if report.is_complete() {
                        Ok(())
                    } else {
                        Err(EngineError::Transport(format!(
                            "could not reattach {:?}",
                            report.failed_ids
                        )))
                    }
                }
            };
            match result {
                Ok(()) => tracing::info!(saga = log.name(), %step, "step compensated"),
                Err(err) => {
                    tracing::error!(saga = log.name(), %step, "compensation failed: {err}")
                }
            }
        }
    }
}

fn normalize_required(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// The builder for `Engine`
pub struct EngineBuilder {
    transport: Option<Arc<dyn Transport>>,
    identity_domain: String,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            identity_domain: DEFAULT_IDENTITY_DOMAIN.to_string(),
        }
    }
}

impl EngineBuilder {
    /// Pass the transport used to reach the provider
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> EngineBuilder {
        self.transport = Some(transport);
        self
    }

    /// Domain used to turn bare usernames into identity emails
    pub fn identity_domain(mut self, domain: &str) -> EngineBuilder {
        self.identity_domain = domain.trim().trim_start_matches('@').to_string();
        self
    }

    /// Construct `Engine`
    pub fn build(self) -> ResultEngine<Engine> {
        let transport = self
            .transport
            .ok_or_else(|| EngineError::Config("missing transport".to_string()))?;
        if self.identity_domain.is_empty() {
            return Err(EngineError::Config(
                "identity domain must not be empty".to_string(),
            ));
        }
        Ok(Engine {
            transport,
            identity_domain: self.identity_domain,
        })
    }
}
