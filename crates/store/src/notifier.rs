use std::sync::Arc;

use parking_lot::RwLock;
use pvs_value::VersionedValue;

pvs_metrics::register_pvs_counter!(NOTIFIER_VALUES_TOTAL, "values forwarded to update listeners");
pvs_metrics::register_pvs_histogram!(NOTIFIER_DISPATCH_SECONDS, "time spent fanning one batch out to listeners");

/// A consumer of committed writes, registered with a [`Notifier`] with its
/// own batch limit. [`crate::subscription::SubscriptionManager`] is the
/// listener every session's deliveries ultimately flow through; a
/// metadata-loader-configured external listener is just another
/// implementation of this trait.
pub trait UpdatesListener: Send + Sync {
    /// Receive one batch of values, already chunked to this listener's
    /// configured `batch.limit`, in commit order.
    fn deliver(&self, values: &[VersionedValue]);
}

struct Registration {
    listener: Arc<dyn UpdatesListener>,
    batch_limit: usize,
}

/// Batches notices to listeners. `notify`/`notify_batch` are synchronous and
/// infallible from the updater's point of view: a listener that wants to
/// drop or queue asynchronously is free to do so internally, but a full
/// per-session queue is the listener's problem, not the notifier's.
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<Registration>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener with its configured batch limit (default
    /// 1000).
    pub fn add_listener(&self, listener: Arc<dyn UpdatesListener>, batch_limit: usize) {
        self.listeners.write().push(Registration {
            listener,
            batch_limit: batch_limit.max(1),
        });
    }

    pub fn notify(&self, value: &VersionedValue) {
        self.notify_batch(std::slice::from_ref(value));
    }

    /// Fan `values` out to every registered listener in commit order,
    /// chunked to each listener's own batch limit.
    #[tracing::instrument(name = "notifier_notify_batch", skip_all, fields(len = values.len()))]
    pub fn notify_batch(&self, values: &[VersionedValue]) {
        if values.is_empty() {
            return;
        }
        let start = std::time::Instant::now();
        NOTIFIER_VALUES_TOTAL.inc_by(values.len() as u64);
        for reg in self.listeners.read().iter() {
            for chunk in values.chunks(reg.batch_limit) {
                reg.listener.deliver(chunk);
            }
        }
        NOTIFIER_DISPATCH_SECONDS.observe(start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pvs_value::{PointUuid, Value};

    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        batches: Mutex<Vec<Vec<VersionedValue>>>,
    }

    impl UpdatesListener for RecordingListener {
        fn deliver(&self, values: &[VersionedValue]) {
            self.batches.lock().unwrap().push(values.to_vec());
        }
    }

    #[test]
    fn single_notify_reaches_every_listener() {
        let notifier = Notifier::new();
        let a = Arc::new(RecordingListener::default());
        let b = Arc::new(RecordingListener::default());
        notifier.add_listener(a.clone(), 1000);
        notifier.add_listener(b.clone(), 1000);

        let v = VersionedValue::value(PointUuid::new_v4(), 1, 1, Value::Signed64(1));
        notifier.notify(&v);

        assert_eq!(a.batches.lock().unwrap().len(), 1);
        assert_eq!(b.batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn batch_is_chunked_to_the_listener_limit() {
        let notifier = Notifier::new();
        let listener = Arc::new(RecordingListener::default());
        notifier.add_listener(listener.clone(), 2);

        let point = PointUuid::new_v4();
        let values: Vec<_> = (0..5)
            .map(|i| VersionedValue::value(point, i, i, Value::Signed64(i)))
            .collect();
        notifier.notify_batch(&values);

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[test]
    fn no_listeners_is_a_silent_no_op() {
        let notifier = Notifier::new();
        notifier.notify(&VersionedValue::value(PointUuid::new_v4(), 1, 1, Value::Signed64(1)));
    }
}
