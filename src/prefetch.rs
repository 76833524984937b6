//! Abortable pre-fetch primitives.
//!
//! Handlers pre-issue price, balance, refund-fee and sign-data fetches
//! concurrently with request parsing. All pre-fetches of one request share an
//! abort signal tied to the response stream: a client disconnect or a single
//! failing pre-fetch cancels the whole group.

use crate::error::{Error, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected abort handle/signal pair.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

/// Raises the abort flag for every associated [`AbortSignal`].
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Abort every task watching this handle's signal.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    /// A new signal watching this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Cooperative cancellation signal checked at every await point.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Whether the request was aborted.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Errors with [`Error::Aborted`] if the request was aborted.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    /// Resolves once the request is aborted; never resolves otherwise.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without aborting; nothing will ever abort us.
                std::future::pending::<()>().await;
            }
        }
    }

}

/// A group of pre-fetch tasks sharing one abort signal.
pub struct PrefetchGroup {
    handle: AbortHandle,
    signal: AbortSignal,
}

impl PrefetchGroup {
    pub fn new() -> Self {
        let (handle, signal) = abort_pair();
        Self { handle, signal }
    }

    /// The group's shared abort signal.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the whole group.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Spawn a pre-fetch task.
    ///
    /// The returned handle can be awaited any number of times; the underlying
    /// fetch runs once. A failing fetch aborts the rest of the group.
    pub fn spawn<T, F>(&self, fut: F) -> Prefetch<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let signal = self.signal.clone();
        let handle = self.handle.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = signal.aborted() => Err("aborted".to_string()),
                result = fut => match result {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        handle.abort();
                        Err(err.to_string())
                    }
                },
            }
        });

        let shared: Shared<BoxFuture<'static, std::result::Result<T, String>>> = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(format!("prefetch task failed: {err}")),
            }
        }
        .boxed()
        .shared();

        Prefetch { inner: shared }
    }
}

impl Default for PrefetchGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a pending pre-fetched value.
#[derive(Clone)]
pub struct Prefetch<T: Clone> {
    inner: Shared<BoxFuture<'static, std::result::Result<T, String>>>,
}

impl<T: Clone> Prefetch<T> {
    /// Await the pre-fetched value.
    pub async fn get(&self) -> Result<T> {
        self.inner.clone().await.map_err(|msg| {
            if msg == "aborted" {
                Error::Aborted
            } else {
                Error::Other(msg)
            }
        })
    }
}
