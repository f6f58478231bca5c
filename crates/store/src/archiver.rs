use pvs_common::Interval;
use pvs_metrics::StatusTimer;
use pvs_value::{PointUuid, VersionedValue};

use crate::{
    backend::{Order, ResetSpec, Responder, Writer},
    notifier::Notifier,
    query::{QueryFlags, QueryPoint, StoreValuesQueryBuilder},
    replicator::Replicator,
};

pvs_metrics::register_pvs_counter!(ARCHIVER_PURGED_TOTAL, "rows removed by purge or life-time sweep");
pvs_metrics::register_pvs_status_histogram!(ARCHIVER_SWEEP_SECONDS, "time spent running one life-time sweep");

/// Offline retention destination a purge can spill values to before they're
/// removed. Best-effort: a failed spill does not block the purge.
pub trait Attic: Send + Sync {
    fn spill(&self, value: &VersionedValue);
}

/// A point configured with a life-time limit: rows older than
/// `now - life_time` are swept away on the archiver's schedule.
#[derive(Clone, Copy, Debug)]
pub struct LifeTimeConfig {
    pub point_uuid: PointUuid,
    pub life_time: i64,
}

/// Removes rows by explicit request (`purge`) or by per-point life-time
/// schedule. Both paths go through the same backend `Writer`
/// and emit `Purged` variants to the notifier/replicator so subscribers and
/// partner stores observe the removal.
pub struct Archiver {
    pub attic: Option<std::sync::Arc<dyn Attic>>,
}

impl Archiver {
    pub fn new(attic: Option<std::sync::Arc<dyn Attic>>) -> Self {
        Self { attic }
    }

    /// Purge every row for `point_uuid` (plain and deleted-shadow) with
    /// `stamp` in `interval`, returning the count removed.
    #[tracing::instrument(name = "archiver_purge", skip_all)]
    pub async fn purge(
        &self,
        point_uuid: PointUuid,
        interval: Interval,
        responder: &mut dyn Responder,
        writer: &dyn Writer,
        notifier: &Notifier,
        replicator: &Replicator,
    ) -> anyhow::Result<u64> {
        let query = StoreValuesQueryBuilder::new()
            .point(QueryPoint::Uuid(point_uuid), false)
            .after(interval.after.unwrap_or(i64::MIN))
            .before(interval.before.unwrap_or(i64::MAX).saturating_add(1))
            .flag(QueryFlags::DELETED)
            .flag(QueryFlags::MULTIPLE)
            .flag(QueryFlags::FORWARD)
            .build()?;

        responder
            .reset(Some(ResetSpec {
                point_uuid: Some(point_uuid),
                query,
                order: Order::Forward,
            }))
            .await?;

        let mut matched = Vec::new();
        while let Some(candidate) = responder.next().await? {
            matched.push(candidate);
        }

        if matched.is_empty() {
            return Ok(0);
        }

        if let Some(attic) = &self.attic {
            for value in &matched {
                attic.spill(value);
            }
        }

        let removed = writer.purge(point_uuid, interval).await?;
        writer.commit().await?;

        for value in &matched {
            let purged = VersionedValue::purged(value.point_uuid(), value.stamp(), value.version);
            notifier.notify(&purged);
            replicator.replicate(&purged);
        }
        replicator.commit()?;

        ARCHIVER_PURGED_TOTAL.inc_by(removed);
        Ok(removed)
    }

    /// Sweep every point in `configs` whose oldest admissible stamp has
    /// fallen behind its life-time limit, purging everything older than
    /// `now - life_time`.
    #[tracing::instrument(name = "archiver_sweep", skip_all, fields(points = configs.len()))]
    pub async fn sweep(
        &self,
        configs: &[LifeTimeConfig],
        now: i64,
        responder: &mut dyn Responder,
        writer: &dyn Writer,
        notifier: &Notifier,
        replicator: &Replicator,
    ) -> anyhow::Result<u64> {
        let mut timer = StatusTimer::new(&ARCHIVER_SWEEP_SECONDS);
        let mut total = 0u64;
        for config in configs {
            let cutoff = now.saturating_sub(config.life_time);
            let interval = Interval::new(None, Some(cutoff));
            match self
                .purge(config.point_uuid, interval, responder, writer, notifier, replicator)
                .await
            {
                Ok(removed) => total += removed,
                Err(e) => {
                    timer.set_status(pvs_errors::StatusCode::Failed);
                    return Err(e);
                },
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pvs_value::Value;

    use super::*;
    use crate::backend::WriteOutcome;

    #[derive(Default)]
    struct FakeResponder {
        rows: Vec<VersionedValue>,
        cursor: usize,
    }

    #[async_trait]
    impl Responder for FakeResponder {
        async fn reset(&mut self, _spec: Option<ResetSpec>) -> anyhow::Result<()> {
            self.cursor = 0;
            Ok(())
        }

        async fn next(&mut self) -> anyhow::Result<Option<VersionedValue>> {
            let next = self.rows.get(self.cursor).cloned();
            self.cursor += 1;
            Ok(next)
        }

        async fn count(&mut self) -> anyhow::Result<u64> {
            Ok(self.rows.len() as u64)
        }

        fn limit(&self) -> u32 {
            0
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        purged: Mutex<Vec<(PointUuid, Interval)>>,
    }

    #[async_trait]
    impl Writer for RecordingWriter {
        async fn upsert(&self, _value: &VersionedValue) -> anyhow::Result<WriteOutcome> {
            Ok(WriteOutcome::Inserted)
        }

        async fn delete(&self, _point_uuid: PointUuid, _stamp: i64, _drop_deleted: bool) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn purge(&self, point_uuid: PointUuid, interval: Interval) -> anyhow::Result<u64> {
            self.purged.lock().unwrap().push((point_uuid, interval));
            Ok(1)
        }

        async fn commit(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAttic {
        spilled: Mutex<Vec<VersionedValue>>,
    }

    impl Attic for RecordingAttic {
        fn spill(&self, value: &VersionedValue) {
            self.spilled.lock().unwrap().push(value.clone());
        }
    }

    #[tokio::test]
    async fn purge_with_no_matching_rows_is_a_no_op() {
        let archiver = Archiver::new(None);
        let mut responder = FakeResponder::default();
        let writer = RecordingWriter::default();
        let notifier = Notifier::new();
        let replicator = Replicator::new();

        let removed = archiver
            .purge(
                PointUuid::new_v4(),
                Interval::new(Some(0), Some(10)),
                &mut responder,
                &writer,
                &notifier,
                &replicator,
            )
            .await
            .unwrap();

        assert_eq!(removed, 0);
        assert!(writer.purged.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_spills_to_the_attic_before_removing() {
        let uuid = PointUuid::new_v4();
        let attic = std::sync::Arc::new(RecordingAttic::default());
        let archiver = Archiver::new(Some(attic.clone()));
        let mut responder = FakeResponder {
            rows: vec![VersionedValue::value(uuid, 5, 1, Value::Signed64(9))],
            cursor: 0,
        };
        let writer = RecordingWriter::default();
        let notifier = Notifier::new();
        let replicator = Replicator::new();

        let removed = archiver
            .purge(
                uuid,
                Interval::new(Some(0), Some(10)),
                &mut responder,
                &writer,
                &notifier,
                &replicator,
            )
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(writer.purged.lock().unwrap().len(), 1);
        assert_eq!(attic.spilled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sweep_purges_each_configured_point_against_its_own_cutoff() {
        let a = PointUuid::new_v4();
        let b = PointUuid::new_v4();
        let archiver = Archiver::new(None);
        let mut responder = FakeResponder::default();
        let writer = RecordingWriter::default();
        let notifier = Notifier::new();
        let replicator = Replicator::new();

        archiver
            .sweep(
                &[
                    LifeTimeConfig {
                        point_uuid: a,
                        life_time: 1000,
                    },
                    LifeTimeConfig {
                        point_uuid: b,
                        life_time: 2000,
                    },
                ],
                10_000,
                &mut responder,
                &writer,
                &notifier,
                &replicator,
            )
            .await
            .unwrap();

        // no rows matched either point, so no purge call reached the writer
        assert!(writer.purged.lock().unwrap().is_empty());
    }
}
