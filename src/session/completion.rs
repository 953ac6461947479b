use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{MediaError, MediaResult};

/// Outcome of a session request, observable by awaiting it, by a callback
/// (`on_complete`) or by blocking (`wait_blocking`)
#[must_use = "a completion does nothing unless awaited or observed"]
pub struct Completion<T> {
    rx: oneshot::Receiver<MediaResult<T>>,
    runtime: Handle,
}

/// Sending half kept by the session actor
pub(crate) struct Responder<T> {
    tx: oneshot::Sender<MediaResult<T>>,
}

pub(crate) fn pair<T>(runtime: Handle) -> (Responder<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Responder { tx }, Completion { rx, runtime })
}

impl<T> Responder<T> {
    pub(crate) fn send(self, result: MediaResult<T>) {
        // the caller may have dropped its completion
        let _ = self.tx.send(result);
    }

    pub(crate) fn fail(self, err: MediaError) {
        self.send(Err(err));
    }
}

impl Responder<()> {
    pub(crate) fn ok(self) {
        self.send(Ok(()));
    }
}

fn actor_gone() -> MediaError {
    MediaError::ServiceDied("session actor stopped before answering".to_string())
}

impl<T> Completion<T> {
    /// A completion that is already resolved
    pub(crate) fn ready(runtime: Handle, result: MediaResult<T>) -> Self {
        let (responder, completion) = pair(runtime);
        responder.send(result);
        completion
    }

    /// Block the current thread until the result arrives. Must not be called
    /// from inside the async runtime.
    pub fn wait_blocking(self) -> MediaResult<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(actor_gone()))
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Deliver the result to `callback` on the runtime
    pub fn on_complete<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(MediaResult<T>) + Send + 'static,
    {
        let runtime = self.runtime.clone();
        runtime.spawn(async move { callback(self.await) })
    }
}

impl<T> Future for Completion<T> {
    type Output = MediaResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(actor_gone())),
            Poll::Pending => Poll::Pending,
        }
    }
}
