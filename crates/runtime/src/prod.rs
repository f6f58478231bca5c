//! Production implementation of [`Runtime`] backed by a real tokio executor
//! and wall clock.

use std::{
    future::Future,
    ops::{Add, Sub},
    pin::Pin,
    time::{Duration, Instant, SystemTime},
};

use async_trait::async_trait;
use futures::{channel::oneshot, future::FusedFuture, FutureExt};
use rand::rngs::ThreadRng;
use tokio::{
    runtime::Handle as TokioRuntimeHandle,
    time::sleep,
};

use crate::{JoinError, Runtime, RuntimeInstant, SpawnHandle};

pub struct FutureHandle {
    pub(crate) handle: tokio::task::JoinHandle<()>,
}

impl SpawnHandle for FutureHandle {
    fn shutdown(&mut self) {
        self.handle.abort();
    }

    fn join(&mut self) -> futures::future::BoxFuture<'_, Result<(), JoinError>> {
        async move {
            (&mut self.handle).await.map_err(|e| {
                if e.is_cancelled() {
                    JoinError::Canceled
                } else {
                    JoinError::Panicked(anyhow::anyhow!("task panicked: {e}"))
                }
            })
        }
        .boxed()
    }
}

pub struct ThreadHandle {
    cancel: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<bool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SpawnHandle for ThreadHandle {
    fn shutdown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    fn join(&mut self) -> futures::future::BoxFuture<'_, Result<(), JoinError>> {
        async move {
            if let Ok(was_canceled) = (&mut self.done).await {
                return if was_canceled {
                    Err(JoinError::Canceled)
                } else {
                    Ok(())
                };
            }
            let join_result = self
                .handle
                .take()
                .expect("thread handle joined twice")
                .join();
            let panic = join_result.expect_err("thread finished without a done signal or panic");
            Err(JoinError::Panicked(anyhow::anyhow!("{panic:?}")))
        }
        .boxed()
    }
}

impl ThreadHandle {
    fn spawn<Fut, F>(tokio_handle: TokioRuntimeHandle, f: F) -> Self
    where
        Fut: Future<Output = ()>,
        F: FnOnce() -> Fut + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let handle = std::thread::spawn(move || {
            let _guard = tokio_handle.enter();
            let body = async move {
                let future = f();
                let was_canceled = futures::select! {
                    _ = cancel_rx => true,
                    _ = future.fuse() => false,
                };
                let _ = done_tx.send(was_canceled);
            };
            tokio_handle.block_on(body);
        });
        ThreadHandle {
            cancel: Some(cancel_tx),
            done: done_rx,
            handle: Some(handle),
        }
    }
}

/// Runtime that sleeps real wallclock time and spawns onto a real tokio
/// executor. Clone is cheap: it's a handle into the shared tokio runtime.
#[derive(Clone)]
pub struct ProdRuntime {
    rt: TokioRuntimeHandle,
}

impl ProdRuntime {
    /// Wraps an already-running tokio runtime handle, e.g. the one set up by
    /// `#[tokio::main]` in the server binary.
    pub fn new(handle: TokioRuntimeHandle) -> Self {
        Self { rt: handle }
    }
}

#[async_trait]
impl Runtime for ProdRuntime {
    type Instant = ProdInstant;
    type Rng = ThreadRng;

    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(sleep(duration).fuse())
    }

    fn spawn(
        &self,
        _name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        Box::new(FutureHandle {
            handle: self.rt.spawn(f),
        })
    }

    fn spawn_thread<Fut, F>(&self, f: F) -> Box<dyn SpawnHandle>
    where
        Fut: Future<Output = ()>,
        F: FnOnce() -> Fut + Send + 'static,
    {
        Box::new(ThreadHandle::spawn(self.rt.clone(), f))
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> ProdInstant {
        ProdInstant(Instant::now())
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut Self::Rng) -> R) -> R {
        let mut rng = rand::rng();
        f(&mut rng)
    }
}

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub struct ProdInstant(Instant);

impl Sub for ProdInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0 - rhs.0
    }
}

impl Add<Duration> for ProdInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

impl RuntimeInstant for ProdInstant {
    fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}
