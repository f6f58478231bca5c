//! Runtime abstraction over time, task spawning, and randomness, so the
//! store core can be exercised deterministically in tests without caring
//! whether its clock or executor are real: the core never touches
//! `std::time`, `tokio::spawn`, or `rand` directly -- it only goes through a
//! `Runtime`.

use std::{
    future::Future,
    ops::{Add, Sub},
    pin::Pin,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use futures::future::{BoxFuture, FusedFuture};
use rand::RngCore;
use uuid::Uuid;

pub mod prod;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[derive(thiserror::Error, Debug)]
pub enum JoinError {
    #[error("task was canceled")]
    Canceled,
    #[error("task panicked: {0:?}")]
    Panicked(anyhow::Error),
}

/// A handle to a spawned task or thread. Dropping the handle does not cancel
/// the underlying work; call [`SpawnHandle::shutdown`] explicitly.
pub trait SpawnHandle: Send + Sync {
    fn shutdown(&mut self);
    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>>;
}

/// Shut the handle down and wait for it to finish, swallowing a clean
/// cancellation but propagating a panic.
pub async fn shutdown_and_join(mut handle: Box<dyn SpawnHandle>) -> anyhow::Result<()> {
    handle.shutdown();
    if let Err(e) = handle.join().await {
        if !matches!(e, JoinError::Canceled) {
            return Err(e.into());
        }
    }
    Ok(())
}

/// A point on a runtime's monotonic clock.
pub trait RuntimeInstant:
    Copy + Clone + Send + Sync + Ord + Add<Duration, Output = Self> + Sub<Output = Duration> + 'static
{
    fn elapsed(&self) -> Duration;
}

/// Abstraction over OS-level concerns: time, task/thread spawning, and
/// randomness. The store core is generic over `RT: Runtime` so the same code
/// runs against a real clock in production and a virtual one in tests.
#[async_trait]
pub trait Runtime: Clone + Send + Sync + 'static {
    type Instant: RuntimeInstant;
    type Rng: RngCore;

    /// Sleep for the given duration.
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>>;

    /// Spawn a future on the runtime's executor.
    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle>;

    /// Spawn a future on a dedicated OS thread.
    #[must_use = "threads are canceled when their `SpawnHandle` is dropped"]
    fn spawn_thread<Fut, F>(&self, f: F) -> Box<dyn SpawnHandle>
    where
        Fut: Future<Output = ()>,
        F: FnOnce() -> Fut + Send + 'static;

    /// Return (a potentially-virtualized) system time.
    fn system_time(&self) -> SystemTime;

    fn unix_timestamp(&self) -> UnixTimestamp {
        UnixTimestamp(
            self.system_time()
                .duration_since(UNIX_EPOCH)
                .expect("system clock is before the unix epoch"),
        )
    }

    /// Return (a potentially-virtualized) reading from a monotonic clock.
    fn monotonic_now(&self) -> Self::Instant;

    /// Use the runtime's source of randomness.
    fn with_rng<R>(&self, f: impl FnOnce(&mut Self::Rng) -> R) -> R;

    fn new_uuid_v4(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.with_rng(|rng| rng.fill_bytes(&mut bytes));
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

/// A Unix timestamp backed by a `Duration` since the epoch. Only meaningful
/// for instants at or after `UNIX_EPOCH`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnixTimestamp(Duration);

impl UnixTimestamp {
    pub fn from_secs_f64(secs: f64) -> Self {
        UnixTimestamp(Duration::from_secs_f64(secs))
    }

    pub fn from_millis(ms: u64) -> Self {
        UnixTimestamp(Duration::from_millis(ms))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    pub fn as_system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.0
    }

    pub fn checked_sub(&self, rhs: UnixTimestamp) -> Option<Duration> {
        self.0.checked_sub(rhs.0)
    }
}

impl Sub<UnixTimestamp> for UnixTimestamp {
    type Output = Duration;

    fn sub(self, rhs: UnixTimestamp) -> Duration {
        self.0 - rhs.0
    }
}

impl Add<Duration> for UnixTimestamp {
    type Output = UnixTimestamp;

    fn add(self, rhs: Duration) -> UnixTimestamp {
        UnixTimestamp(self.0 + rhs)
    }
}
