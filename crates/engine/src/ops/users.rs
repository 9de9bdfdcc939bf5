use serde_json::{Map, Value, json};

use super::{normalize_optional_text, normalize_required};
use crate::{
    Engine, EngineError, ResultEngine,
    channels::ChannelRecord,
    membership::{Edge, MembershipDiff, Side},
    saga::{Compensation, SagaLog, SagaOutcome, Step},
    store::{IdentityUpdate, Table},
    users::{
        DEFAULT_ROLE, UserChanges, UserDraft, UserRecord, identity_email, identity_metadata,
        strip_identity_domain,
    },
};

impl Engine {
    pub async fn list_users(&self) -> ResultEngine<Vec<UserRecord>> {
        self.users().list().await
    }

    pub async fn retrieve_user(&self, uid: &str) -> ResultEngine<UserRecord> {
        self.users()
            .fetch_by_uid(uid)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {uid}")))
    }

    /// Creates the identity, then the `users` row, then lists the user on
    /// each requested channel.
    ///
    /// Unknown channel IDs are dropped. A failed row insert deletes the
    /// identity again; channels that could not be updated are reported in
    /// [`SagaOutcome::unsynced`].
    pub async fn create_user(&self, draft: UserDraft) -> ResultEngine<SagaOutcome<UserRecord>> {
        let username = strip_identity_domain(
            &normalize_required(&draft.username, "username")?,
            &self.identity_domain,
        );
        if draft.password.is_empty() {
            return Err(EngineError::Validation(
                "password must not be empty".to_string(),
            ));
        }
        let role = normalize_optional_text(draft.role.as_deref())
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());
        let active = draft.active.unwrap_or(true);

        let mut log = SagaLog::new("create_user");
        let channels = self
            .existing_ids(Table::Channels, &draft.allowed_channels)
            .await?;
        log.commit(Step::ValidateRelations);

        let email = identity_email(&username, &self.identity_domain);
        let identity = match self
            .identities()
            .create_identity(
                &email,
                &draft.password,
                identity_metadata(&role, active, &channels),
            )
            .await
        {
            Ok(identity) => identity,
            Err(err) => return Err(self.abort(log, Step::CreateIdentity, err).await),
        };
        log.commit_with(Compensation::DeleteIdentity {
            id: identity.id.clone(),
        });

        let uid = identity.id;
        let fields = json!({
            "uid": uid,
            "username": username,
            "role": role,
            "active": active,
            "allowed_channels": channels,
        });
        let user = match self.users().create::<UserRecord>(&fields).await {
            Ok(Some(user)) => user,
            Ok(None) => self
                .refetch_user(&uid)
                .await
                .unwrap_or_else(|| UserRecord {
                    uid: uid.clone(),
                    username,
                    role,
                    active,
                    allowed_channels: channels.clone(),
                    created_at: None,
                }),
            Err(err) => return Err(self.abort(log, Step::CreateRow, err).await),
        };
        log.commit(Step::CreateRow);

        let mut unsynced = Vec::new();
        if !channels.is_empty() {
            let report = self
                .reconcile(&uid, &channels, Side::Channels, Edge::Attach)
                .await;
            log.commit(Step::AttachMemberships);
            unsynced = report.failed_ids;
        }
        Ok(log.finish(user, unsynced))
    }

    /// Applies `changes` to the identity first and to the row second, then
    /// moves the user between channels.
    ///
    /// When the row update fails the identity email is put back; if a new
    /// password was already set the failure is reported as
    /// [`EngineError::PartialFailure`]. Two updates racing on the same user
    /// both read before they write, so the later write wins and the
    /// membership diff of the earlier one may be lost.
    pub async fn update_user(
        &self,
        uid: &str,
        changes: UserChanges,
    ) -> ResultEngine<SagaOutcome<UserRecord>> {
        let mut log = SagaLog::new("update_user");
        let current = self.retrieve_user(uid).await?;
        log.commit(Step::FetchCurrent);

        let domain = self.identity_domain.as_str();
        let username = match changes.username.as_deref() {
            Some(name) => Some(strip_identity_domain(
                &normalize_required(name, "username")?,
                domain,
            )),
            None => None,
        };
        let channels = match &changes.allowed_channels {
            Some(requested) => {
                let found = self.existing_ids(Table::Channels, requested).await?;
                log.commit(Step::ValidateRelations);
                Some(found)
            }
            None => None,
        };

        let mut identity_update = IdentityUpdate::default();
        if let Some(name) = username.as_deref().filter(|name| *name != current.username) {
            identity_update.email = Some(identity_email(name, domain));
        }
        identity_update.password = changes.effective_password().map(ToString::to_string);

        if !identity_update.is_empty() {
            if let Err(err) = self.identities().update_identity(uid, &identity_update).await {
                return Err(self.abort(log, Step::UpdateIdentity, err).await);
            }
            if identity_update.email.is_some() {
                log.commit_with(Compensation::RestoreIdentityEmail {
                    id: uid.to_string(),
                    email: identity_email(&current.username, domain),
                });
            } else {
                log.commit(Step::UpdateIdentity);
            }
            // Passwords cannot be read back.
            if identity_update.password.is_some() {
                log.mark_irreversible(Step::UpdateIdentity);
            }
        }

        let mut desired = current.clone();
        let mut fields = Map::new();
        if let Some(name) = username {
            fields.insert("username".to_string(), Value::from(name.clone()));
            desired.username = name;
        }
        if let Some(role) = normalize_optional_text(changes.role.as_deref()) {
            fields.insert("role".to_string(), Value::from(role.clone()));
            desired.role = role;
        }
        if let Some(active) = changes.active {
            fields.insert("active".to_string(), Value::from(active));
            desired.active = active;
        }
        if let Some(channels) = &channels {
            fields.insert("allowed_channels".to_string(), Value::from(channels.clone()));
            desired.allowed_channels = channels.clone();
        }

        let updated = if fields.is_empty() {
            desired
        } else {
            let patched = match self
                .users()
                .patch::<UserRecord>(uid, &Value::Object(fields))
                .await
            {
                Ok(Some(user)) => user,
                Ok(None) => match self.users().fetch_by_uid::<UserRecord>(uid).await {
                    Ok(Some(user)) => user,
                    Ok(None) => {
                        let err = EngineError::NotFound(format!("user {uid}"));
                        return Err(self.abort(log, Step::PatchRow, err).await);
                    }
                    Err(err) => {
                        tracing::warn!(uid, "could not re-read updated user: {err}");
                        desired
                    }
                },
                Err(err) => return Err(self.abort(log, Step::PatchRow, err).await),
            };
            log.commit(Step::PatchRow);
            patched
        };

        let mut unsynced = Vec::new();
        if let Some(channels) = &channels {
            let diff = MembershipDiff::between(&current.allowed_channels, channels);
            if !diff.removed.is_empty() {
                let report = self
                    .reconcile(uid, &diff.removed, Side::Channels, Edge::Detach)
                    .await;
                log.commit(Step::DetachMemberships);
                unsynced.extend(report.failed_ids);
            }
            if !diff.added.is_empty() {
                let report = self
                    .reconcile(uid, &diff.added, Side::Channels, Edge::Attach)
                    .await;
                log.commit(Step::AttachMemberships);
                unsynced.extend(report.failed_ids);
            }
        }
        Ok(log.finish(updated, unsynced))
    }

    /// Removes the user from every channel, then deletes the identity and
    /// finally the row.
    ///
    /// Channels are found both through the user's own list and by scanning
    /// the channels table, so stale one-sided references are cleaned too.
    /// If the identity cannot be deleted the user is put back on the channels.
    /// Once the identity is gone there is no way back: a failed row delete is
    /// reported as [`EngineError::PartialFailure`].
    pub async fn delete_user(&self, uid: &str) -> ResultEngine<SagaOutcome<UserRecord>> {
        let mut log = SagaLog::new("delete_user");
        let user = self.retrieve_user(uid).await?;
        log.commit(Step::FetchCurrent);

        let channels = self
            .referencing::<ChannelRecord>(uid, &user.allowed_channels)
            .await;
        let mut unsynced = Vec::new();
        if !channels.is_empty() {
            let report = self
                .reconcile(uid, &channels, Side::Channels, Edge::Detach)
                .await;
            let detached = channels
                .into_iter()
                .filter(|id| !report.failed_ids.contains(id))
                .collect();
            log.commit_with(Compensation::ReattachMemberships {
                owner: uid.to_string(),
                counterparts: detached,
                side: Side::Channels,
            });
            unsynced = report.failed_ids;
        }

        match self.identities().delete_identity(uid).await {
            Ok(true) => {}
            Ok(false) => tracing::info!(uid, "identity already deleted"),
            Err(err) => return Err(self.abort(log, Step::DeleteIdentity, err).await),
        }
        log.commit(Step::DeleteIdentity);

        match self.users().delete(uid).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(uid, "users row disappeared before delete"),
            Err(err) => {
                return Err(log.partial_failure(
                    Step::DeleteRow,
                    format!("identity deleted but the users row remains: {err}"),
                ));
            }
        }
        log.commit(Step::DeleteRow);

        Ok(log.finish(user, unsynced))
    }

    async fn refetch_user(&self, uid: &str) -> Option<UserRecord> {
        match self.users().fetch_by_uid(uid).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(uid, "could not re-read created user: {err}");
                None
            }
        }
    }
}
