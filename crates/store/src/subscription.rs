use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use pvs_errors::ErrorMetadata;
use pvs_value::{PointUuid, VersionedValue};
use tokio::sync::Notify;

use crate::notifier::UpdatesListener;

/// A session identifier, opaque to this crate. `pvs-session` owns what a
/// session actually is; here it's just a hashable handle.
pub type SessionId = u64;

const DEFAULT_QUEUE_CAPACITY: usize = 1000;

enum QueueItem {
    Value(VersionedValue),
    /// Pushed by `interrupt` to wake a blocked `deliver`: the session is
    /// not closed, just nudged.
    Interrupt,
}

struct SessionState {
    points: HashSet<PointUuid>,
    queue: VecDeque<QueueItem>,
    capacity: usize,
    /// Set once the queue has overflowed; the session must resubscribe
    /// before it can deliver again. Future delivers fail with
    /// `ServiceClosed` until it does.
    lost: bool,
    notify: Arc<Notify>,
}

impl SessionState {
    fn new(capacity: usize) -> Self {
        Self {
            points: HashSet::new(),
            queue: VecDeque::new(),
            capacity,
            lost: false,
            notify: Arc::new(Notify::new()),
        }
    }

    fn push(&mut self, item: QueueItem) {
        if self.lost {
            return;
        }
        if self.queue.len() >= self.capacity {
            self.lost = true;
            self.queue.clear();
        } else {
            self.queue.push_back(item);
        }
        self.notify.notify_waiters();
    }
}

/// Per-session subscribed point sets and delivery queues.
pub struct SubscriptionManager {
    sessions: Mutex<HashMap<SessionId, SessionState>>,
    queue_capacity: usize,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl SubscriptionManager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Register `(session, uuid)` for each of `point_uuids`. The caller
    /// supplies the "latest committed value" lookup and does its own
    /// permission check before calling; this only tracks membership.
    pub fn subscribe(
        &self,
        session: SessionId,
        point_uuids: &[PointUuid],
        mut latest: impl FnMut(PointUuid) -> Option<VersionedValue>,
    ) -> Vec<anyhow::Result<Option<VersionedValue>>> {
        let mut sessions = self.sessions.lock();
        let state = sessions
            .entry(session)
            .or_insert_with(|| SessionState::new(self.queue_capacity));
        point_uuids
            .iter()
            .map(|uuid| {
                if !state.points.insert(*uuid) {
                    return Err(ErrorMetadata::illegal_state(format!(
                        "session already subscribed to {uuid}"
                    ))
                    .into());
                }
                Ok(latest(*uuid))
            })
            .collect()
    }

    pub fn unsubscribe(
        &self,
        session: SessionId,
        point_uuids: &[PointUuid],
    ) -> Vec<anyhow::Result<()>> {
        let mut sessions = self.sessions.lock();
        let Some(state) = sessions.get_mut(&session) else {
            return point_uuids
                .iter()
                .map(|_| Err(ErrorMetadata::illegal_state("no such session").into()))
                .collect();
        };
        point_uuids
            .iter()
            .map(|uuid| {
                if state.points.remove(uuid) {
                    Ok(())
                } else {
                    Err(ErrorMetadata::illegal_state(format!("not subscribed to {uuid}")).into())
                }
            })
            .collect()
    }

    /// Drop every subscription for `session`: closing a session drops
    /// them.
    pub fn close_session(&self, session: SessionId) {
        self.sessions.lock().remove(&session);
    }

    /// Deliver `value` (already committed) to every subscribed session, in
    /// the order called -- the notifier calls this once per committed
    /// update, preserving commit order across all points a session
    /// observes.
    pub fn notify(&self, value: &VersionedValue) {
        let mut sessions = self.sessions.lock();
        let point_uuid = value.point_uuid();
        for state in sessions.values_mut() {
            if state.points.contains(&point_uuid) {
                state.push(QueueItem::Value(value.clone()));
            }
        }
    }

    /// Wake a blocked `deliver`/`pull` for `session` with a sentinel; the
    /// call in progress returns `ServiceClosed`.
    pub fn interrupt(&self, session: SessionId) {
        let mut sessions = self.sessions.lock();
        if let Some(state) = sessions.get_mut(&session) {
            state.push(QueueItem::Interrupt);
        }
    }

    /// Block up to `timeout` for at least one value, then drain up to
    /// `limit` items from `session`'s queue.
    pub async fn deliver(
        &self,
        session: SessionId,
        limit: usize,
        timeout: Duration,
    ) -> anyhow::Result<Vec<VersionedValue>> {
        let notify = {
            let mut sessions = self.sessions.lock();
            let state = sessions
                .entry(session)
                .or_insert_with(|| SessionState::new(self.queue_capacity));
            state.notify.clone()
        };

        loop {
            {
                let mut sessions = self.sessions.lock();
                let Some(state) = sessions.get_mut(&session) else {
                    return Err(ErrorMetadata::service_closed().into());
                };
                if state.lost {
                    return Err(ErrorMetadata::service_closed().into());
                }
                if !state.queue.is_empty() {
                    let mut out = Vec::new();
                    while out.len() < limit {
                        match state.queue.pop_front() {
                            Some(QueueItem::Value(v)) => out.push(v),
                            Some(QueueItem::Interrupt) => {
                                return Err(ErrorMetadata::service_closed().into());
                            },
                            None => break,
                        }
                    }
                    return Ok(out);
                }
            }
            let waited = tokio::time::timeout(timeout, notify.notified()).await;
            if waited.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    pub fn subscribed_points(&self, session: SessionId) -> HashSet<PointUuid> {
        self.sessions
            .lock()
            .get(&session)
            .map(|s| s.points.clone())
            .unwrap_or_default()
    }
}

/// The subscription manager is itself the [`Notifier`](crate::notifier::Notifier)
/// listener that ultimately feeds every session's `deliver` queue.
impl UpdatesListener for SubscriptionManager {
    fn deliver(&self, values: &[VersionedValue]) {
        for value in values {
            self.notify(value);
        }
    }
}
