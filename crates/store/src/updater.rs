use std::sync::Arc;

use pvs_auth::{Authorizer, Identity, Permission};
use pvs_errors::ErrorMetadata;
use pvs_metrics::StatusTimer;
use pvs_value::{PointUuid, StateValue, VersionedValue};
use tokio::sync::RwLock;

use crate::{
    backend::Writer,
    notifier::Notifier,
    replicator::Replicator,
    state_group::StateGroupResolver,
};

pvs_metrics::register_pvs_status_histogram!(
    UPDATER_BATCH_SECONDS,
    "time spent applying one update() batch"
);

/// What a point's metadata says about updates targeting it. Stands in for
/// the full metadata loader (out of this crate's scope): callers construct
/// one from whatever configuration store they have.
#[derive(Clone, Debug, Default)]
pub struct PointMetadata {
    pub known: bool,
    pub state_group: String,
    pub has_input_relations: bool,
    pub null_removes: bool,
}

/// What the updater needs in order to classify and apply one incoming
/// value; each field maps directly to a step of the update algorithm.
pub struct PendingUpdate {
    pub point_uuid: PointUuid,
    pub stamp: i64,
    pub state: Option<StateValue>,
    pub value: Option<pvs_value::Value>,
}

/// The fair read/write lock `suspendUpdates` takes the writer side of; a
/// batch holds the reader side for its duration so concurrent batches
/// coexist but none overlap a suspend.
#[derive(Default)]
pub struct SuspendGate {
    lock: RwLock<()>,
}

impl SuspendGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin_batch(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    pub async fn suspend(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

/// Applies incoming point values: resolves metadata, checks permissions,
/// converts null-removes candidates to tombstones, writes through the
/// backend, and fans out to the notifier and replicator.
pub struct Updater {
    pub gate: Arc<SuspendGate>,
    pub store_null_removes: bool,
    pub drop_deleted: bool,
}

impl Updater {
    pub fn new(gate: Arc<SuspendGate>, store_null_removes: bool) -> Self {
        Self {
            gate,
            store_null_removes,
            drop_deleted: false,
        }
    }

    pub fn with_drop_deleted(mut self, drop_deleted: bool) -> Self {
        self.drop_deleted = drop_deleted;
        self
    }

    /// Apply a batch of updates, returning one result per input element in
    /// the same order. A per-value failure does not abort the batch; only a
    /// `Writer::commit` or `Replicator::commit` failure does -- a partner
    /// commit rejection is fatal to the whole batch (see DESIGN.md).
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(name = "updater_update", skip_all, fields(batch_len = updates.len()))]
    pub async fn update(
        &self,
        updates: Vec<PendingUpdate>,
        metadata: impl Fn(PointUuid) -> Option<PointMetadata>,
        identity: &Identity,
        authorizer: &dyn Authorizer,
        state_groups: &StateGroupResolver,
        writer: &dyn Writer,
        notifier: &Notifier,
        replicator: &Replicator,
    ) -> Vec<anyhow::Result<()>> {
        let mut timer = StatusTimer::new(&UPDATER_BATCH_SECONDS);
        let _batch_guard = self.gate.begin_batch().await;

        let mut results = Vec::with_capacity(updates.len());
        let mut applied_any = false;
        for update in updates {
            let outcome = self
                .apply_one(
                    update,
                    &metadata,
                    identity,
                    authorizer,
                    state_groups,
                    writer,
                    notifier,
                    replicator,
                )
                .await;
            if outcome.is_ok() {
                applied_any = true;
            }
            results.push(outcome);
        }

        if applied_any {
            if let Err(e) = self.finalize(writer, replicator).await {
                timer.set_status(pvs_errors::StatusCode::Unrecoverable);
                return results.into_iter().map(|_| Err(clone_err(&e))).collect();
            }
        }
        results
    }

    async fn finalize(&self, writer: &dyn Writer, replicator: &Replicator) -> anyhow::Result<()> {
        writer
            .commit()
            .await
            .map_err(|e| ErrorMetadata::store_access(format!("batch commit failed: {e}")))?;
        replicator
            .commit()
            .map_err(|e| ErrorMetadata::store_access(format!("partner commit failed: {e}")))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_one(
        &self,
        update: PendingUpdate,
        metadata: &impl Fn(PointUuid) -> Option<PointMetadata>,
        identity: &Identity,
        authorizer: &dyn Authorizer,
        state_groups: &StateGroupResolver,
        writer: &dyn Writer,
        notifier: &Notifier,
        replicator: &Replicator,
    ) -> anyhow::Result<()> {
        // Step 1: resolve the point and its state. An unknown point is
        // still accepted, classified as an injected write below.
        let point_meta = metadata(update.point_uuid).unwrap_or_default();

        let state = match &update.state {
            Some(s) if !s.is_resolved() => {
                Some(state_groups.resolve(&point_meta.state_group, s)?)
            },
            other => other.clone(),
        };

        // Step 2: permission check.
        let is_tombstone = update.value.is_none() && state.is_none();
        let action = if point_meta.has_input_relations {
            Permission::PROCESS
        } else if is_tombstone {
            Permission::DELETE
        } else if point_meta.known {
            Permission::WRITE
        } else {
            Permission::INJECT
        };
        authorizer.check_point(identity, update.point_uuid, action)?;
        authorizer.check_store(identity, action)?;

        // Step 3: null-removes conversion.
        let null_removes = point_meta.null_removes || self.store_null_removes;
        let versioned = if update.value.is_none() && null_removes {
            VersionedValue::deleted(update.point_uuid, update.stamp, update.stamp)
        } else {
            VersionedValue::value_with_state(
                update.point_uuid,
                update.stamp,
                update.stamp,
                update.value,
                state,
            )
        };

        // Step 5: forward to the backend.
        if versioned.is_deleted() {
            writer
                .delete(update.point_uuid, update.stamp, self.drop_deleted)
                .await?;
        } else {
            writer.upsert(&versioned).await?;
        }

        // Step 6: fan out.
        notifier.notify(&versioned);
        replicator.replicate(&versioned);

        Ok(())
    }
}

fn clone_err(e: &anyhow::Error) -> anyhow::Error {
    anyhow::anyhow!("{e}")
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use async_trait::async_trait;
    use pvs_auth::InMemoryAuthorizer;
    use pvs_common::Interval;
    use pvs_value::Value;

    use super::*;
    use crate::backend::WriteOutcome;

    #[derive(Default)]
    struct RecordingWriter {
        upserts: Mutex<Vec<VersionedValue>>,
        deletes: Mutex<Vec<(PointUuid, i64)>>,
        committed: Mutex<bool>,
    }

    #[async_trait]
    impl Writer for RecordingWriter {
        async fn upsert(&self, value: &VersionedValue) -> anyhow::Result<WriteOutcome> {
            self.upserts.lock().unwrap().push(value.clone());
            Ok(WriteOutcome::Inserted)
        }

        async fn delete(&self, point_uuid: PointUuid, stamp: i64, _drop_deleted: bool) -> anyhow::Result<u64> {
            self.deletes.lock().unwrap().push((point_uuid, stamp));
            Ok(1)
        }

        async fn purge(&self, _point_uuid: PointUuid, _interval: Interval) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn commit(&self) -> anyhow::Result<()> {
            *self.committed.lock().unwrap() = true;
            Ok(())
        }
    }

    fn known_point() -> HashMap<PointUuid, PointMetadata> {
        HashMap::new()
    }

    #[tokio::test]
    async fn unknown_point_write_is_injected_and_applied() {
        let updater = Updater::new(Arc::new(SuspendGate::new()), false);
        let auth = InMemoryAuthorizer::new();
        let identity = Identity::anonymous();
        let groups = StateGroupResolver::new();
        let writer = RecordingWriter::default();
        let notifier = Notifier::new();
        let replicator = Replicator::new();
        let uuid = PointUuid::new_v4();

        let results = updater
            .update(
                vec![PendingUpdate {
                    point_uuid: uuid,
                    stamp: 100,
                    state: None,
                    value: Some(Value::Signed64(5)),
                }],
                |_| known_point().get(&uuid).cloned(),
                &identity,
                &auth,
                &groups,
                &writer,
                &notifier,
                &replicator,
            )
            .await;

        assert!(results[0].is_ok());
        assert_eq!(writer.upserts.lock().unwrap().len(), 1);
        assert!(*writer.committed.lock().unwrap());
    }

    #[tokio::test]
    async fn null_value_on_a_null_removes_point_becomes_a_tombstone() {
        let updater = Updater::new(Arc::new(SuspendGate::new()), true);
        let auth = InMemoryAuthorizer::new();
        let identity = Identity::anonymous();
        let groups = StateGroupResolver::new();
        let writer = RecordingWriter::default();
        let notifier = Notifier::new();
        let replicator = Replicator::new();
        let uuid = PointUuid::new_v4();

        let results = updater
            .update(
                vec![PendingUpdate {
                    point_uuid: uuid,
                    stamp: 100,
                    state: None,
                    value: None,
                }],
                |_| None,
                &identity,
                &auth,
                &groups,
                &writer,
                &notifier,
                &replicator,
            )
            .await;

        assert!(results[0].is_ok());
        assert!(writer.upserts.lock().unwrap().is_empty());
        assert_eq!(writer.deletes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_write_is_reported_but_does_not_abort_the_batch() {
        let updater = Updater::new(Arc::new(SuspendGate::new()), false);
        let auth = InMemoryAuthorizer::new();
        let identity = Identity::new("alice");
        let uuid_a = PointUuid::new_v4();
        let uuid_b = PointUuid::new_v4();
        auth.grant_point(uuid_a, &identity, Permission::INJECT);
        auth.grant_point(uuid_b, &identity, Permission::READ);
        let groups = StateGroupResolver::new();
        let writer = RecordingWriter::default();
        let notifier = Notifier::new();
        let replicator = Replicator::new();

        let results = updater
            .update(
                vec![
                    PendingUpdate {
                        point_uuid: uuid_a,
                        stamp: 1,
                        state: None,
                        value: Some(Value::Signed64(1)),
                    },
                    PendingUpdate {
                        point_uuid: uuid_b,
                        stamp: 2,
                        state: None,
                        value: Some(Value::Signed64(2)),
                    },
                ],
                |u| {
                    if u == uuid_b {
                        Some(PointMetadata {
                            known: true,
                            ..Default::default()
                        })
                    } else {
                        None
                    }
                },
                &identity,
                &auth,
                &groups,
                &writer,
                &notifier,
                &replicator,
            )
            .await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(writer.upserts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn a_fatal_partner_commit_failure_fails_the_whole_batch() {
        struct RejectingPartner;
        impl crate::replicator::Partner for RejectingPartner {
            fn name(&self) -> &str {
                "rejecting"
            }

            fn enqueue(&self, _value: crate::replicator::ReplicatedValue) -> anyhow::Result<()> {
                Ok(())
            }

            fn commit(&self) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("partner queue fsync failed"))
            }
        }

        let updater = Updater::new(Arc::new(SuspendGate::new()), false);
        let auth = InMemoryAuthorizer::new();
        let identity = Identity::anonymous();
        let groups = StateGroupResolver::new();
        let writer = RecordingWriter::default();
        let notifier = Notifier::new();
        let replicator = Replicator::new();
        replicator.add_partner(Arc::new(RejectingPartner), true);
        let uuid = PointUuid::new_v4();
        replicator.configure_point(
            uuid,
            crate::replicator::PointReplicationConfig {
                replicated: true,
                targets: vec![],
            },
        );

        let results = updater
            .update(
                vec![PendingUpdate {
                    point_uuid: uuid,
                    stamp: 1,
                    state: None,
                    value: Some(Value::Signed64(1)),
                }],
                |_| None,
                &identity,
                &auth,
                &groups,
                &writer,
                &notifier,
                &replicator,
            )
            .await;

        assert!(results[0].is_err());
    }

    #[tokio::test]
    async fn suspend_waits_for_in_flight_batches_and_blocks_new_ones() {
        let gate = Arc::new(SuspendGate::new());
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let batch_guard = gate.begin_batch().await;

        let gate_for_suspend = gate.clone();
        let log_for_suspend = log.clone();
        let suspend_task = tokio::spawn(async move {
            let _write_guard = gate_for_suspend.suspend().await;
            log_for_suspend.lock().unwrap().push("suspended");
        });

        // Give the suspend task a chance to start waiting on the writer side
        // before the in-flight batch releases its reader guard.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(log.lock().unwrap().is_empty());

        log.lock().unwrap().push("batch done");
        drop(batch_guard);

        suspend_task.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["batch done", "suspended"]);
    }
}
