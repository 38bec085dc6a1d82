use crate::core::{ResolveError, Result};
use crate::index::ResolutionIndex;
use futures::future::{BoxFuture, Shared, WeakShared};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

pub(crate) type BuildResult = Result<Arc<ResolutionIndex>>;
pub(crate) type SharedBuild = Shared<BoxFuture<'static, BuildResult>>;

/// Slot entry for the build currently in flight.
///
/// Only a weak handle is kept here: the waiters own the build. Once the last
/// waiter drops its handle, [`BuildTask`] is dropped and the build aborted.
pub(crate) struct InFlight {
    pub(crate) epoch: u64,
    pub(crate) build: WeakShared<BoxFuture<'static, BuildResult>>,
}

impl InFlight {
    /// The shared build, if it still has waiters and has not finished yet.
    pub(crate) fn join(&self, epoch: u64) -> Option<SharedBuild> {
        if self.epoch != epoch {
            return None;
        }
        let build = self.build.upgrade()?;
        // A finished build is never joined: its result may be an error or an
        // index the TTL already rejected.
        build.peek().is_none().then_some(build)
    }
}

/// Spawned build that is aborted when dropped.
pub(crate) struct BuildTask(pub(crate) JoinHandle<BuildResult>);

impl Future for BuildTask {
    type Output = BuildResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) if err.is_cancelled() => Poll::Ready(Err(
                ResolveError::IndexUnavailable("index build was cancelled".to_string()),
            )),
            Poll::Ready(Err(err)) => Poll::Ready(Err(ResolveError::IndexUnavailable(format!(
                "index build task failed: {}",
                err
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for BuildTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
