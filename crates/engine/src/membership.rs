//! The user/channel relation.
//!
//! The relation is stored twice, as `allowed_channels` on users and
//! `allowed_users` on channels, with nothing in the store keeping the two in
//! step. The helpers here compute what a reverse list must become; the
//! engine's synchronizer (see `ops::membership`) applies it row by row.

use serde::{Serialize, de::DeserializeOwned};

use crate::{store::Table, util::dedup_ids};

/// A row that carries one side of the relation.
pub trait MembershipRow: DeserializeOwned + Send + Sync {
    const TABLE: Table;
    /// Column holding the list of counterpart IDs.
    const REVERSE_FIELD: &'static str;

    fn uid(&self) -> &str;
    fn reverse_list(&self) -> &[String];
}

/// Which table the counterparts of a reconciliation live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Counterparts are users; their `allowed_channels` is rewritten.
    Users,
    /// Counterparts are channels; their `allowed_users` is rewritten.
    Channels,
}

/// Whether the owner must end up in or out of a reverse list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Attach,
    Detach,
}

/// Aggregate of one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed_ids: Vec<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed_ids.is_empty()
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        for id in other.failed_ids {
            if !self.failed_ids.contains(&id) {
                self.failed_ids.push(id);
            }
        }
    }
}

/// Counterparts to detach and attach when a list moves from `old` to `new`.
///
/// Both sides keep the order in which IDs appear in their source list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl MembershipDiff {
    pub fn between(old: &[String], new: &[String]) -> Self {
        let removed = dedup_ids(old.iter().filter(|id| !new.contains(*id)));
        let added = dedup_ids(new.iter().filter(|id| !old.contains(*id)));
        Self { removed, added }
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// New content of `list` after applying `edge` for `owner`, or `None` when
/// the list already satisfies it.
pub fn apply_edge(list: &[String], owner: &str, edge: Edge) -> Option<Vec<String>> {
    let present = list.iter().any(|id| id == owner);
    match (edge, present) {
        (Edge::Attach, true) | (Edge::Detach, false) => None,
        (Edge::Attach, false) => {
            let mut next = list.to_vec();
            next.push(owner.to_string());
            Some(next)
        }
        (Edge::Detach, true) => Some(list.iter().filter(|id| *id != owner).cloned().collect()),
    }
}
