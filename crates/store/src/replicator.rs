use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use pvs_value::{PointUuid, VersionedValue};

pvs_metrics::register_pvs_counter!(REPLICATOR_ENQUEUED_TOTAL, "values enqueued to partner stores");
pvs_metrics::register_pvs_histogram!(REPLICATOR_DISPATCH_SECONDS, "time spent enqueueing one value to its partners");

/// A value morphed for delivery to one partner store: the same
/// measurement, addressed under the target store's point UUID.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicatedValue {
    pub value: VersionedValue,
    pub target_point_uuid: PointUuid,
}

/// A peer store receiving replicated values over a durable outbound queue.
/// Implementations own the queue's durability; this crate only decides what
/// gets enqueued and when it's committed.
pub trait Partner: Send + Sync {
    fn name(&self) -> &str;

    fn enqueue(&self, value: ReplicatedValue) -> anyhow::Result<()>;

    /// Finalize queued messages. A partner commit failure is fatal to the
    /// whole batch, not just the values bound for that partner (see
    /// DESIGN.md).
    fn commit(&self) -> anyhow::Result<()>;
}

/// Per-point deadband/step decision on whether a value is worth
/// replicating. State is per point and
/// reset on metadata reload.
pub trait ValueFilter: Send + Sync {
    fn accept(&self, point_uuid: PointUuid, value: &VersionedValue) -> bool;

    fn reset(&self, point_uuid: PointUuid);
}

/// One per-point replicate target: a named partner plus the point UUID that
/// partner knows this value by, and whether the value should be
/// normalized/denormalized in transit when the convert flag differs.
#[derive(Clone, Debug)]
pub struct ReplicateTarget {
    pub partner: String,
    pub target_point_uuid: PointUuid,
    pub convert: bool,
}

/// What a point's metadata says about replication (the per-point
/// `Replicated`/`Replicates` parameters).
#[derive(Clone, Debug, Default)]
pub struct PointReplicationConfig {
    /// Broadcast to every partner registered without a specific per-point
    /// target: if the point is "replicated", enqueue to each anonymous
    /// partner.
    pub replicated: bool,
    pub targets: Vec<ReplicateTarget>,
}

/// Batches replicated values to partner queues. Partners are
/// configured once; per-point configuration and the value filter
/// are reloaded with metadata.
#[derive(Default)]
pub struct Replicator {
    named_partners: RwLock<HashMap<String, Arc<dyn Partner>>>,
    anonymous_partners: RwLock<Vec<Arc<dyn Partner>>>,
    point_configs: RwLock<HashMap<PointUuid, PointReplicationConfig>>,
    filter: RwLock<Option<Arc<dyn ValueFilter>>>,
}

impl Replicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_partner(&self, partner: Arc<dyn Partner>, anonymous: bool) {
        if anonymous {
            self.anonymous_partners.write().push(partner);
        } else {
            self.named_partners
                .write()
                .insert(partner.name().to_string(), partner);
        }
    }

    pub fn configure_point(&self, point_uuid: PointUuid, config: PointReplicationConfig) {
        self.point_configs.write().insert(point_uuid.undeleted(), config);
    }

    pub fn set_filter(&self, filter: Arc<dyn ValueFilter>) {
        *self.filter.write() = Some(filter);
    }

    /// Drop all per-point configuration and filter state: filter state is
    /// per point and reset on metadata reload.
    pub fn reload(&self) {
        self.point_configs.write().clear();
        *self.filter.write() = None;
    }

    /// Enqueue `value` to whichever partners its point is configured to
    /// replicate to.
    #[tracing::instrument(name = "replicator_replicate", skip_all)]
    pub fn replicate(&self, value: &VersionedValue) {
        let start = std::time::Instant::now();
        let point_uuid = value.point_uuid();
        if let Some(filter) = self.filter.read().as_ref() {
            if !filter.accept(point_uuid, value) {
                REPLICATOR_DISPATCH_SECONDS.observe(start.elapsed().as_secs_f64());
                return;
            }
        }

        let configs = self.point_configs.read();
        let config = configs.get(&point_uuid);

        if config.is_some_and(|c| c.replicated) {
            for partner in self.anonymous_partners.read().iter() {
                REPLICATOR_ENQUEUED_TOTAL.inc();
                let _ = partner.enqueue(ReplicatedValue {
                    value: value.clone(),
                    target_point_uuid: point_uuid,
                });
            }
        }

        if let Some(config) = config {
            let named = self.named_partners.read();
            for target in &config.targets {
                let Some(partner) = named.get(&target.partner) else {
                    continue;
                };
                let morphed = morph(value, target.target_point_uuid);
                REPLICATOR_ENQUEUED_TOTAL.inc();
                let _ = partner.enqueue(ReplicatedValue {
                    value: morphed,
                    target_point_uuid: target.target_point_uuid,
                });
            }
        }
        REPLICATOR_DISPATCH_SECONDS.observe(start.elapsed().as_secs_f64());
    }

    /// Finalize every partner's queue as part of the source update's
    /// commit, transactionally with it.
    pub fn commit(&self) -> anyhow::Result<()> {
        for partner in self.named_partners.read().values() {
            partner.commit()?;
        }
        for partner in self.anonymous_partners.read().iter() {
            partner.commit()?;
        }
        Ok(())
    }
}

/// Clone `value` onto `target_point_uuid`, preserving whether it's a plain
/// write or a tombstone. The convert flag's actual normalize/denormalize
/// numerics are the interpolator's concern and are not applied here.
fn morph(value: &VersionedValue, target_point_uuid: PointUuid) -> VersionedValue {
    let mut morphed = value.clone();
    morphed.point_value.point_uuid = if value.point_value.point_uuid.is_deleted() {
        target_point_uuid.deleted()
    } else {
        target_point_uuid.undeleted()
    };
    morphed
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pvs_value::Value;

    use super::*;

    #[derive(Default)]
    struct RecordingPartner {
        name: String,
        enqueued: Mutex<Vec<ReplicatedValue>>,
        committed: Mutex<bool>,
    }

    impl RecordingPartner {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Default::default()
            })
        }
    }

    impl Partner for RecordingPartner {
        fn name(&self) -> &str {
            &self.name
        }

        fn enqueue(&self, value: ReplicatedValue) -> anyhow::Result<()> {
            self.enqueued.lock().unwrap().push(value);
            Ok(())
        }

        fn commit(&self) -> anyhow::Result<()> {
            *self.committed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[test]
    fn unconfigured_point_replicates_nowhere() {
        let replicator = Replicator::new();
        let anon = RecordingPartner::new("anon");
        replicator.add_partner(anon.clone(), true);

        let v = VersionedValue::value(PointUuid::new_v4(), 1, 1, Value::Signed64(1));
        replicator.replicate(&v);

        assert!(anon.enqueued.lock().unwrap().is_empty());
    }

    #[test]
    fn replicated_point_reaches_every_anonymous_partner() {
        let replicator = Replicator::new();
        let a = RecordingPartner::new("a");
        let b = RecordingPartner::new("b");
        replicator.add_partner(a.clone(), true);
        replicator.add_partner(b.clone(), true);

        let uuid = PointUuid::new_v4();
        replicator.configure_point(
            uuid,
            PointReplicationConfig {
                replicated: true,
                targets: vec![],
            },
        );
        let v = VersionedValue::value(uuid, 1, 1, Value::Signed64(1));
        replicator.replicate(&v);

        assert_eq!(a.enqueued.lock().unwrap().len(), 1);
        assert_eq!(b.enqueued.lock().unwrap().len(), 1);
    }

    #[test]
    fn per_point_target_morphs_the_point_uuid() {
        let replicator = Replicator::new();
        let named = RecordingPartner::new("hq");
        replicator.add_partner(named.clone(), false);

        let uuid = PointUuid::new_v4();
        let target_uuid = PointUuid::new_v4();
        replicator.configure_point(
            uuid,
            PointReplicationConfig {
                replicated: false,
                targets: vec![ReplicateTarget {
                    partner: "hq".into(),
                    target_point_uuid: target_uuid,
                    convert: false,
                }],
            },
        );
        let v = VersionedValue::value(uuid, 1, 1, Value::Signed64(1));
        replicator.replicate(&v);

        let enqueued = named.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].value.point_uuid(), target_uuid);
    }

    #[test]
    fn tombstone_morph_preserves_the_deleted_bit() {
        let replicator = Replicator::new();
        let named = RecordingPartner::new("hq");
        replicator.add_partner(named.clone(), false);

        let uuid = PointUuid::new_v4();
        let target_uuid = PointUuid::new_v4();
        replicator.configure_point(
            uuid,
            PointReplicationConfig {
                replicated: false,
                targets: vec![ReplicateTarget {
                    partner: "hq".into(),
                    target_point_uuid: target_uuid,
                    convert: false,
                }],
            },
        );
        let tombstone = VersionedValue::deleted(uuid, 1, 1);
        replicator.replicate(&tombstone);

        let enqueued = named.enqueued.lock().unwrap();
        assert!(enqueued[0].value.point_value.point_uuid.is_deleted());
    }

    #[test]
    fn filter_suppresses_replication() {
        struct RejectAll;
        impl ValueFilter for RejectAll {
            fn accept(&self, _: PointUuid, _: &VersionedValue) -> bool {
                false
            }
            fn reset(&self, _: PointUuid) {}
        }

        let replicator = Replicator::new();
        let anon = RecordingPartner::new("anon");
        replicator.add_partner(anon.clone(), true);
        replicator.set_filter(Arc::new(RejectAll));

        let uuid = PointUuid::new_v4();
        replicator.configure_point(
            uuid,
            PointReplicationConfig {
                replicated: true,
                targets: vec![],
            },
        );
        replicator.replicate(&VersionedValue::value(uuid, 1, 1, Value::Signed64(1)));
        assert!(anon.enqueued.lock().unwrap().is_empty());
    }

    #[test]
    fn commit_finalizes_every_partner() {
        let replicator = Replicator::new();
        let named = RecordingPartner::new("hq");
        let anon = RecordingPartner::new("anon");
        replicator.add_partner(named.clone(), false);
        replicator.add_partner(anon.clone(), true);

        replicator.commit().unwrap();
        assert!(*named.committed.lock().unwrap());
        assert!(*anon.committed.lock().unwrap());
    }
}
