use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::normalize_required;
use crate::{
    Engine, EngineError, ResultEngine,
    channels::{ChannelChanges, ChannelDraft, ChannelRecord, random_channel_id},
    membership::{Edge, MembershipDiff, Side},
    saga::{Compensation, SagaLog, SagaOutcome, Step},
    store::Table,
    users::UserRecord,
};

/// Draws of a free display ID before giving up.
const CHANNEL_ID_ATTEMPTS: usize = 16;

impl Engine {
    pub async fn list_channels(&self) -> ResultEngine<Vec<ChannelRecord>> {
        self.channels().list().await
    }

    pub async fn retrieve_channel(&self, uid: &str) -> ResultEngine<ChannelRecord> {
        self.channels()
            .fetch_by_uid(uid)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("channel {uid}")))
    }

    /// Inserts a channel with a fresh `uid` and display ID, then lists it on
    /// each requested user.
    pub async fn create_channel(
        &self,
        draft: ChannelDraft,
    ) -> ResultEngine<SagaOutcome<ChannelRecord>> {
        let name = normalize_required(&draft.name, "channel name")?;

        let mut log = SagaLog::new("create_channel");
        self.ensure_name_free(&name, None).await?;
        log.commit(Step::CheckName);

        let users = self
            .existing_ids(Table::Users, &draft.allowed_users)
            .await?;
        log.commit(Step::ValidateRelations);

        let uid = Uuid::new_v4().to_string();
        let channel_id = self.free_channel_id().await?;
        log.commit(Step::GenerateIds);

        let fields = json!({
            "uid": uid,
            "channel_id": channel_id,
            "name": name,
            "allowed_users": users,
        });
        let channel = match self.channels().create::<ChannelRecord>(&fields).await {
            Ok(Some(channel)) => channel,
            Ok(None) => match self.channels().fetch_by_uid(&uid).await {
                Ok(Some(channel)) => channel,
                other => {
                    if let Err(err) = other {
                        tracing::warn!(uid, "could not re-read created channel: {err}");
                    }
                    ChannelRecord {
                        uid: uid.clone(),
                        channel_id: Some(channel_id),
                        name,
                        allowed_users: users.clone(),
                        created_at: None,
                    }
                }
            },
            Err(err) => return Err(self.abort(log, Step::CreateRow, err).await),
        };
        log.commit(Step::CreateRow);

        let mut unsynced = Vec::new();
        if !users.is_empty() {
            let report = self
                .reconcile(&uid, &users, Side::Users, Edge::Attach)
                .await;
            log.commit(Step::AttachMemberships);
            unsynced = report.failed_ids;
        }
        Ok(log.finish(channel, unsynced))
    }

    /// Renames a channel and/or replaces its user list, then moves the
    /// channel between users' lists.
    pub async fn update_channel(
        &self,
        uid: &str,
        changes: ChannelChanges,
    ) -> ResultEngine<SagaOutcome<ChannelRecord>> {
        let mut log = SagaLog::new("update_channel");
        let current = self.retrieve_channel(uid).await?;
        log.commit(Step::FetchCurrent);

        let name = match changes.name.as_deref() {
            Some(name) => Some(normalize_required(name, "channel name")?),
            None => None,
        };
        if let Some(name) = name.as_deref().filter(|name| *name != current.name) {
            self.ensure_name_free(name, Some(uid)).await?;
            log.commit(Step::CheckName);
        }

        let users = match &changes.allowed_users {
            Some(requested) => {
                let found = self.existing_ids(Table::Users, requested).await?;
                log.commit(Step::ValidateRelations);
                Some(found)
            }
            None => None,
        };

        let mut desired = current.clone();
        let mut fields = Map::new();
        if let Some(name) = name {
            fields.insert("name".to_string(), Value::from(name.clone()));
            desired.name = name;
        }
        if let Some(users) = &users {
            fields.insert("allowed_users".to_string(), Value::from(users.clone()));
            desired.allowed_users = users.clone();
        }

        let updated = if fields.is_empty() {
            desired
        } else {
            let patched = match self
                .channels()
                .patch::<ChannelRecord>(uid, &Value::Object(fields))
                .await
            {
                Ok(Some(channel)) => channel,
                Ok(None) => match self.channels().fetch_by_uid::<ChannelRecord>(uid).await {
                    Ok(Some(channel)) => channel,
                    Ok(None) => {
                        let err = EngineError::NotFound(format!("channel {uid}"));
                        return Err(self.abort(log, Step::PatchRow, err).await);
                    }
                    Err(err) => {
                        tracing::warn!(uid, "could not re-read updated channel: {err}");
                        desired
                    }
                },
                Err(err) => return Err(self.abort(log, Step::PatchRow, err).await),
            };
            log.commit(Step::PatchRow);
            patched
        };

        let mut unsynced = Vec::new();
        if let Some(users) = &users {
            let diff = MembershipDiff::between(&current.allowed_users, users);
            if !diff.removed.is_empty() {
                let report = self
                    .reconcile(uid, &diff.removed, Side::Users, Edge::Detach)
                    .await;
                log.commit(Step::DetachMemberships);
                unsynced.extend(report.failed_ids);
            }
            if !diff.added.is_empty() {
                let report = self
                    .reconcile(uid, &diff.added, Side::Users, Edge::Attach)
                    .await;
                log.commit(Step::AttachMemberships);
                unsynced.extend(report.failed_ids);
            }
        }
        Ok(log.finish(updated, unsynced))
    }

    /// Removes the channel from every user's list, then deletes the row.
    ///
    /// Users whose list could not be rewritten are reported in
    /// [`SagaOutcome::unsynced`]; the channel is deleted regardless. A failed
    /// row delete puts the channel back on the users it was removed from.
    pub async fn delete_channel(&self, uid: &str) -> ResultEngine<SagaOutcome<ChannelRecord>> {
        let mut log = SagaLog::new("delete_channel");
        let channel = self.retrieve_channel(uid).await?;
        log.commit(Step::FetchCurrent);

        let users = self
            .referencing::<UserRecord>(uid, &channel.allowed_users)
            .await;
        let mut unsynced = Vec::new();
        if !users.is_empty() {
            let report = self
                .reconcile(uid, &users, Side::Users, Edge::Detach)
                .await;
            let detached = users
                .into_iter()
                .filter(|id| !report.failed_ids.contains(id))
                .collect();
            log.commit_with(Compensation::ReattachMemberships {
                owner: uid.to_string(),
                counterparts: detached,
                side: Side::Users,
            });
            unsynced = report.failed_ids;
        }

        match self.channels().delete(uid).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(uid, "channel row disappeared before delete"),
            Err(err) => return Err(self.abort(log, Step::DeleteRow, err).await),
        }
        log.commit(Step::DeleteRow);

        Ok(log.finish(channel, unsynced))
    }

    /// Fails with `ExistingKey` when another channel already uses `name`.
    async fn ensure_name_free(&self, name: &str, except_uid: Option<&str>) -> ResultEngine<()> {
        let existing = self
            .channels()
            .fetch_by_field::<ChannelRecord>("name", name)
            .await?;
        match existing {
            Some(channel) if Some(channel.uid.as_str()) != except_uid => {
                Err(EngineError::ExistingKey(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn free_channel_id(&self) -> ResultEngine<u32> {
        for _ in 0..CHANNEL_ID_ATTEMPTS {
            let candidate = random_channel_id();
            let taken = self
                .channels()
                .fetch_by_field::<Value>("channel_id", &candidate.to_string())
                .await?;
            if taken.is_none() {
                return Ok(candidate);
            }
            tracing::debug!(candidate, "channel_id taken, drawing again");
        }
        Err(EngineError::ExistingKey(format!(
            "no free channel_id after {CHANNEL_ID_ATTEMPTS} attempts"
        )))
    }
}
