//! Deterministic runtime for tests: a seeded RNG and a virtual clock driven
//! by `tokio::time::advance` rather than the wall clock, so tests that
//! exercise timeouts and scheduled work don't actually sleep.
//!
//! Only meaningful under `#[tokio::test(start_paused = true)]`: the pieces
//! that would otherwise require hand-rolling a deterministic executor --
//! advancing time, draining ready tasks -- are provided by tokio itself.

use std::{
    future::Future,
    ops::{Add, Sub},
    pin::Pin,
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use futures::{future::FusedFuture, FutureExt};
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};

use crate::{prod::FutureHandle, JoinError, Runtime, RuntimeInstant, SpawnHandle};

const DEFAULT_SEED: u64 = 0;

#[derive(Clone)]
pub struct TestRuntime {
    rng: Arc<Mutex<StdRng>>,
    base_system_time: SystemTime,
    base_instant: tokio::time::Instant,
}

impl Default for TestRuntime {
    fn default() -> Self {
        Self::new_with_seed(DEFAULT_SEED)
    }
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            base_system_time: SystemTime::now(),
            base_instant: tokio::time::Instant::now(),
        }
    }

    /// Advance the runtime's virtual clock. Requires the enclosing tokio
    /// executor to have been started with `start_paused = true`.
    pub async fn advance_time(&self, duration: Duration) {
        tokio::time::advance(duration).await;
    }
}

#[async_trait]
impl Runtime for TestRuntime {
    type Instant = TestInstant;
    type Rng = StdRng;

    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(tokio::time::sleep(duration).fuse())
    }

    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        Box::new(FutureHandle {
            handle: tokio::spawn(f),
        })
    }

    fn spawn_thread<Fut, F>(&self, f: F) -> Box<dyn SpawnHandle>
    where
        Fut: Future<Output = ()>,
        F: FnOnce() -> Fut + Send + 'static,
    {
        // Tests never need a dedicated OS thread; run the future as an
        // ordinary task on the test executor instead.
        Box::new(FutureHandle {
            handle: tokio::spawn(async move { f().await }),
        })
    }

    fn system_time(&self) -> SystemTime {
        self.base_system_time + (tokio::time::Instant::now() - self.base_instant)
    }

    fn monotonic_now(&self) -> TestInstant {
        TestInstant(tokio::time::Instant::now())
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut Self::Rng) -> R) -> R {
        let mut rng = self.rng.lock();
        f(&mut rng)
    }
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct TestInstant(tokio::time::Instant);

impl Sub for TestInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0 - rhs.0
    }
}

impl Add<Duration> for TestInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

impl RuntimeInstant for TestInstant {
    fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn advancing_time_moves_system_time_forward() {
        let rt = TestRuntime::new();
        let before = rt.system_time();
        rt.advance_time(Duration::from_secs(60)).await;
        let after = rt.system_time();
        assert_eq!(after.duration_since(before).unwrap(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_rng_is_deterministic() {
        let a = TestRuntime::new_with_seed(7);
        let b = TestRuntime::new_with_seed(7);
        let x = a.with_rng(|r| rand::RngCore::next_u64(r));
        let y = b.with_rng(|r| rand::RngCore::next_u64(r));
        assert_eq!(x, y);
    }
}
