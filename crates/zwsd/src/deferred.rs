//! One-shot resolver/waiter pair.
//!
//! A [`Deferred`] is a value that will be supplied later by whoever holds
//! the matching [`Resolver`]. Resolving or rejecting consumes the resolver,
//! so each deferred settles at most once. Dropping the resolver without
//! settling is reported to the waiter as [`DeferredError::Dropped`].
//!
//! ```text
//!   let (resolver, deferred) = deferred();
//!   coordinator keeps `resolver`      waiter calls `deferred.wait().await`
//!   resolver.resolve(v)  ───────────▶ Ok(v)
//!   resolver.reject()    ───────────▶ Err(Rejected)
//!   drop(resolver)       ───────────▶ Err(Dropped)
//! ```

use thiserror::Error;
use tokio::sync::oneshot;

/// Why a deferred value never arrived.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredError {
    #[error("Deferred operation was rejected")]
    Rejected,

    #[error("Deferred operation was abandoned")]
    Dropped,
}

/// The settling half.
#[derive(Debug)]
pub struct Resolver<T> {
    sender: oneshot::Sender<Result<T, DeferredError>>,
}

/// The waiting half.
#[derive(Debug)]
pub struct Deferred<T> {
    receiver: oneshot::Receiver<Result<T, DeferredError>>,
}

/// Creates a linked resolver and deferred.
pub fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let (sender, receiver) = oneshot::channel();
    (Resolver { sender }, Deferred { receiver })
}

impl<T> Resolver<T> {
    /// Supplies the value. Returns `false` if the waiter is gone.
    pub fn resolve(self, value: T) -> bool {
        self.sender.send(Ok(value)).is_ok()
    }

    /// Fails the waiter. Returns `false` if the waiter is gone.
    pub fn reject(self) -> bool {
        self.sender.send(Err(DeferredError::Rejected)).is_ok()
    }

    /// True once the waiting half has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> Deferred<T> {
    /// Waits for the resolver to settle.
    pub async fn wait(self) -> Result<T, DeferredError> {
        self.receiver.await.unwrap_or(Err(DeferredError::Dropped))
    }
}
