//! An in-memory [`Responder`]/[`Writer`] pair: a single `Mutex`-guarded
//! table good enough for tests and for a single-process deployment that
//! doesn't need durability across restarts.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use pvs_common::Interval;
use pvs_store::{Backend, Order, ResetSpec, Responder, WriteOutcome, Writer};
use pvs_value::{PointUuid, VersionedValue};

#[derive(Default)]
struct Inner {
    /// Keyed by the row's literal point UUID, which already carries the
    /// deleted bit -- a tombstone and its live row live under distinct keys
    /// so that delete/purge can act symmetrically.
    rows: BTreeMap<(PointUuid, i64), VersionedValue>,
    next_version: i64,
}

impl Inner {
    fn rows_for_point(&self, point_uuid: PointUuid, include_deleted: bool) -> Vec<VersionedValue> {
        let plain = point_uuid.undeleted();
        let deleted = point_uuid.deleted();
        self.rows
            .values()
            .filter(|v| {
                let key = v.point_value.point_uuid;
                key == plain || (include_deleted && key == deleted)
            })
            .cloned()
            .collect()
    }

    fn all_rows(&self, include_deleted: bool) -> Vec<VersionedValue> {
        self.rows
            .values()
            .filter(|v| include_deleted || !v.point_value.point_uuid.is_deleted())
            .cloned()
            .collect()
    }

    fn next_version(&mut self) -> i64 {
        self.next_version += 1;
        self.next_version
    }
}

/// A single in-process table shared by every [`MemoryResponder`] prepared
/// against it and by its own [`Writer`] implementation.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare a fresh [`Responder`] against this table. Cheap: it shares
    /// the underlying table and only materializes rows on `reset`.
    pub fn responder(&self) -> MemoryResponder {
        MemoryResponder {
            inner: self.inner.clone(),
            rows: Vec::new(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Writer for MemoryBackend {
    async fn upsert(&self, value: &VersionedValue) -> anyhow::Result<WriteOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let key = (value.point_value.point_uuid, value.stamp());
        let outcome = if inner.rows.contains_key(&key) {
            WriteOutcome::Replaced
        } else {
            WriteOutcome::Inserted
        };
        let version = inner.next_version();
        let mut value = value.clone();
        value.version = version;
        inner.rows.insert(key, value);
        Ok(outcome)
    }

    async fn delete(&self, point_uuid: PointUuid, stamp: i64, drop_deleted: bool) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let plain_key = (point_uuid.undeleted(), stamp);
        let removed = inner.rows.remove(&plain_key).is_some();
        if removed && !drop_deleted {
            let version = inner.next_version();
            let tombstone = VersionedValue::deleted(point_uuid.undeleted(), stamp, version);
            let tombstone_key = (tombstone.point_value.point_uuid, stamp);
            inner.rows.insert(tombstone_key, tombstone);
        }
        Ok(removed as u64)
    }

    async fn purge(&self, point_uuid: PointUuid, interval: Interval) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let plain = point_uuid.undeleted();
        let deleted = point_uuid.deleted();
        let doomed: Vec<(PointUuid, i64)> = inner
            .rows
            .keys()
            .filter(|(uuid, stamp)| (*uuid == plain || *uuid == deleted) && interval.contains(*stamp))
            .cloned()
            .collect();
        let count = doomed.len() as u64;
        for key in doomed {
            inner.rows.remove(&key);
        }
        Ok(count)
    }

    async fn commit(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn new_responder(&self) -> Box<dyn Responder> {
        Box::new(self.responder())
    }

    fn writer(&self) -> &dyn Writer {
        self
    }
}

/// A prepared iteration against a [`MemoryBackend`]'s table; materializes
/// and sorts the matching rows once, on `reset`, then serves them through
/// `next`/`count`.
pub struct MemoryResponder {
    inner: Arc<Mutex<Inner>>,
    rows: Vec<VersionedValue>,
    cursor: usize,
}

#[async_trait]
impl Responder for MemoryResponder {
    async fn reset(&mut self, spec: Option<ResetSpec>) -> anyhow::Result<()> {
        self.cursor = 0;
        self.rows.clear();
        let Some(spec) = spec else {
            return Ok(());
        };

        let inner = self.inner.lock().unwrap();
        let mut rows = match spec.point_uuid {
            Some(p) => inner.rows_for_point(p, spec.query.is_deleted()),
            None => inner.all_rows(spec.query.is_deleted()),
        };
        drop(inner);

        rows.retain(|v| spec.query.interval.contains(v.stamp()));
        if spec.query.is_pull() {
            rows.sort_by_key(|v| v.version);
        } else {
            rows.sort_by_key(|v| (v.stamp(), v.version));
        }
        if spec.order == Order::Reverse {
            rows.reverse();
        }
        self.rows = rows;
        Ok(())
    }

    async fn next(&mut self) -> anyhow::Result<Option<VersionedValue>> {
        let next = self.rows.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }

    async fn count(&mut self) -> anyhow::Result<u64> {
        Ok(self.rows.len() as u64)
    }

    fn limit(&self) -> u32 {
        0
    }
}
