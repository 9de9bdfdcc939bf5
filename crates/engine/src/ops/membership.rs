use serde_json::{Map, Value};

use crate::{
    Engine,
    channels::ChannelRecord,
    membership::{Edge, MembershipDiff, MembershipRow, Side, SyncReport, apply_edge},
    users::UserRecord,
    util::dedup_ids,
};

impl Engine {
    /// Makes every counterpart in `ids` list (or stop listing) `owner`.
    ///
    /// Each counterpart is read and rewritten on its own; a missing row or a
    /// failed write is recorded in the report and never stops the pass.
    /// Running the same call twice leaves the store unchanged the second time.
    pub async fn reconcile(&self, owner: &str, ids: &[String], side: Side, edge: Edge) -> SyncReport {
        match side {
            Side::Users => self.reconcile_rows::<UserRecord>(owner, ids, edge).await,
            Side::Channels => self.reconcile_rows::<ChannelRecord>(owner, ids, edge).await,
        }
    }

    /// Detaches `owner` from the counterparts dropped between `old` and `new`,
    /// then attaches it to the added ones.
    pub async fn apply_membership_diff(
        &self,
        owner: &str,
        old: &[String],
        new: &[String],
        side: Side,
    ) -> SyncReport {
        let diff = MembershipDiff::between(old, new);
        let mut report = self
            .reconcile(owner, &diff.removed, side, Edge::Detach)
            .await;
        report.merge(self.reconcile(owner, &diff.added, side, Edge::Attach).await);
        report
    }

    async fn reconcile_rows<R: MembershipRow>(
        &self,
        owner: &str,
        ids: &[String],
        edge: Edge,
    ) -> SyncReport {
        let store = self.store(R::TABLE);
        let mut report = SyncReport::default();

        for id in dedup_ids(ids) {
            report.attempted += 1;
            let row = match store.fetch_by_uid::<R>(&id).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    tracing::warn!(table = R::TABLE.name(), %id, owner, "counterpart not found");
                    report.failed_ids.push(id);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(table = R::TABLE.name(), %id, owner, "fetch failed: {err}");
                    report.failed_ids.push(id);
                    continue;
                }
            };

            let Some(next) = apply_edge(row.reverse_list(), owner, edge) else {
                report.succeeded += 1;
                continue;
            };

            let mut fields = Map::new();
            fields.insert(R::REVERSE_FIELD.to_string(), Value::from(next));
            match store.patch_matched(&id, &Value::Object(fields)).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => {
                    tracing::warn!(table = R::TABLE.name(), %id, owner, "counterpart vanished before write");
                    report.failed_ids.push(id);
                }
                Err(err) => {
                    tracing::warn!(table = R::TABLE.name(), %id, owner, "write failed: {err}");
                    report.failed_ids.push(id);
                }
            }
        }

        if !report.is_complete() {
            tracing::warn!(
                table = R::TABLE.name(),
                owner,
                ?edge,
                failed = ?report.failed_ids,
                "membership left out of sync"
            );
        }
        report
    }
}
