//! Per-request connection lease
//!
//! A [`Lease`] is created empty by the request middleware, filled from a
//! [`ConnectionSource`], shared with the handler through request extensions
//! and emptied again when the response is ready. Every lease ends in
//! [`LeaseState::Released`], whether the handler returned, failed, panicked
//! or was cancelled, and the connection is handed back exactly once.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::engine::EngineConnection;
use crate::error::{Error, Result};

/// Anything that hands out and takes back connections
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn acquire(&self) -> Result<Self::Connection>;

    /// Take a connection back. The default just drops it.
    async fn release(&self, connection: Self::Connection) {
        drop(connection);
    }
}

/// Lease lifecycle: `Idle → Acquiring → Acquired → Releasing → Released`,
/// or `Acquiring → Released` when acquisition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeaseState {
    Idle = 0,
    Acquiring = 1,
    Acquired = 2,
    Releasing = 3,
    Released = 4,
}

impl LeaseState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Acquiring,
            2 => Self::Acquired,
            3 => Self::Releasing,
            _ => Self::Released,
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Acquired => "acquired",
            Self::Releasing => "releasing",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

/// Shared handle to the connection borrowed for one request
pub struct Lease<C> {
    inner: Arc<LeaseInner<C>>,
}

/// The lease type the middleware installs for an [`Engine`](crate::Engine)
pub type RequestConnection = Lease<EngineConnection>;

/// Locked access to a leased connection
pub type LeaseGuard<'a, C> = MappedMutexGuard<'a, C>;

tokio::task_local! {
    // The lease the running request was given; typed per connection kind.
    static CURRENT: Arc<dyn Any + Send + Sync>;
}

struct LeaseInner<C> {
    state: AtomicU8,
    slot: Mutex<Option<C>>,
}

impl<C> Clone for Lease<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("state", &self.state()).finish()
    }
}

impl<C> Default for Lease<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Lease<C> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LeaseInner {
                state: AtomicU8::new(LeaseState::Idle as u8),
                slot: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> LeaseState {
        LeaseState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: LeaseState, to: LeaseState) -> bool {
        let moved = self
            .inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            tracing::debug!(%from, %to, "Lease transition");
        }
        moved
    }

    /// Lock the connection for query use.
    ///
    /// Fails with [`Error::ConnectionReleased`] once the lease is released.
    pub async fn get(&self) -> Result<LeaseGuard<'_, C>> {
        let mut guard = self.inner.slot.lock().await;
        match self.state() {
            LeaseState::Acquired => {}
            LeaseState::Released => {
                // `release_now` could not reach a locked slot; drop what it left.
                drop(guard.take());
                return Err(Error::ConnectionReleased);
            }
            _ => return Err(Error::ConnectionReleased),
        }
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| Error::ConnectionReleased)
    }

    /// Borrow a connection from `source` into this lease.
    ///
    /// On failure the lease goes straight to `Released`; there is nothing to
    /// give back.
    pub async fn acquire_from<S>(&self, source: &S) -> Result<()>
    where
        S: ConnectionSource<Connection = C> + ?Sized,
    {
        if !self.transition(LeaseState::Idle, LeaseState::Acquiring) {
            return Err(Error::config(format!(
                "lease can only acquire once (currently {})",
                self.state()
            )));
        }

        match source.acquire().await {
            Ok(connection) => {
                match self.inner.slot.try_lock() {
                    Ok(mut slot) => *slot = Some(connection),
                    Err(_) => *self.inner.slot.lock().await = Some(connection),
                }
                self.transition(LeaseState::Acquiring, LeaseState::Acquired);
                Ok(())
            }
            Err(e) => {
                self.transition(LeaseState::Acquiring, LeaseState::Released);
                Err(e)
            }
        }
    }

    /// Hand the connection back to `source`. Returns false if some other
    /// path already released it.
    pub async fn release_to<S>(&self, source: &S) -> bool
    where
        S: ConnectionSource<Connection = C> + ?Sized,
    {
        if !self.transition(LeaseState::Acquired, LeaseState::Releasing) {
            return false;
        }

        let connection = self.inner.slot.lock().await.take();
        if let Some(connection) = connection {
            source.release(connection).await;
        }
        self.transition(LeaseState::Releasing, LeaseState::Released);
        true
    }

    /// Synchronous release for `Drop` paths (cancellation, unwinding).
    ///
    /// The connection is dropped, which returns a pooled connection to its
    /// pool. If a handler still holds the lock the connection goes back when
    /// that handler's last clone of the lease is dropped.
    pub fn release_now(&self) -> bool {
        // Cancelled while acquiring: the pending connection never arrived.
        if self.transition(LeaseState::Acquiring, LeaseState::Released) {
            return true;
        }
        // Cancelled inside `release_to`: finish what it started.
        let interrupted = self.state() == LeaseState::Releasing;
        if !interrupted && !self.transition(LeaseState::Acquired, LeaseState::Releasing) {
            return false;
        }

        match self.inner.slot.try_lock() {
            Ok(mut slot) => drop(slot.take()),
            Err(_) => tracing::debug!("Lease is locked by a handler; connection drops with it"),
        }
        self.transition(LeaseState::Releasing, LeaseState::Released);
        true
    }
}

impl<C: Send + 'static> Lease<C> {
    /// Run `future` with this lease as the task's current request connection.
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        CURRENT.scope(Arc::new(self.clone()), future).await
    }

    /// The lease scoped around the running task, if there is one of this
    /// connection type.
    pub fn current() -> Option<Self> {
        CURRENT
            .try_with(|lease| lease.downcast_ref::<Self>().cloned())
            .ok()
            .flatten()
    }

    /// True when both handles share one lease
    pub fn same_lease(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        acquired: AtomicUsize,
        released: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ConnectionSource for Counting {
        type Connection = u32;

        async fn acquire(&self) -> Result<u32> {
            if self.fail {
                return Err(Error::PoolTimedOut);
            }
            Ok(self.acquired.fetch_add(1, Ordering::SeqCst) as u32 + 1)
        }

        async fn release(&self, _connection: u32) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn walks_every_state() {
        let source = Counting::default();
        let lease = Lease::new();
        assert_eq!(lease.state(), LeaseState::Idle);

        lease.acquire_from(&source).await.unwrap();
        assert_eq!(lease.state(), LeaseState::Acquired);
        assert_eq!(*lease.get().await.unwrap(), 1);

        assert!(lease.release_to(&source).await);
        assert_eq!(lease.state(), LeaseState::Released);
        assert_eq!(source.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_happens_once() {
        let source = Counting::default();
        let lease = Lease::new();
        lease.acquire_from(&source).await.unwrap();

        assert!(lease.release_to(&source).await);
        assert!(!lease.release_to(&source).await);
        assert!(!lease.release_now());
        assert_eq!(source.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_acquire_ends_released() {
        let source = Counting {
            fail: true,
            ..Counting::default()
        };
        let lease: Lease<u32> = Lease::new();

        let err = lease.acquire_from(&source).await.unwrap_err();
        assert!(matches!(err, Error::PoolTimedOut));
        assert_eq!(lease.state(), LeaseState::Released);
        assert!(!lease.release_to(&source).await);
        assert_eq!(source.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_after_release_fails() {
        let source = Counting::default();
        let lease = Lease::new();
        lease.acquire_from(&source).await.unwrap();
        assert!(lease.release_now());

        assert!(matches!(lease.get().await, Err(Error::ConnectionReleased)));
        assert_eq!(lease.state(), LeaseState::Released);
    }

    #[tokio::test]
    async fn second_acquire_rejected() {
        let source = Counting::default();
        let lease = Lease::new();
        lease.acquire_from(&source).await.unwrap();
        assert!(lease.acquire_from(&source).await.is_err());
        assert_eq!(source.acquired.load(Ordering::SeqCst), 1);
    }

    struct Stuck;

    #[async_trait]
    impl ConnectionSource for Stuck {
        type Connection = u32;

        async fn acquire(&self) -> Result<u32> {
            Ok(7)
        }

        async fn release(&self, _connection: u32) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn release_now_finishes_interrupted_release() {
        let lease = Lease::new();
        lease.acquire_from(&Stuck).await.unwrap();

        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(10), lease.release_to(&Stuck))
                .await;
        assert!(outcome.is_err());
        assert_eq!(lease.state(), LeaseState::Releasing);

        assert!(lease.release_now());
        assert_eq!(lease.state(), LeaseState::Released);
        assert!(!lease.release_now());
    }

    #[tokio::test]
    async fn connection_left_by_release_now_is_unreachable() {
        let source = Counting::default();
        let lease = Lease::new();
        lease.acquire_from(&source).await.unwrap();

        let held = lease.get().await.unwrap();
        let other = lease.clone();
        assert!(other.release_now());
        drop(held);

        assert!(matches!(other.get().await, Err(Error::ConnectionReleased)));
        assert!(matches!(lease.get().await, Err(Error::ConnectionReleased)));
        assert!(lease.inner.slot.lock().await.is_none());
    }

    #[tokio::test]
    async fn scope_exposes_current_lease() {
        let source = Counting::default();
        let lease: Lease<u32> = Lease::new();
        lease.acquire_from(&source).await.unwrap();

        assert!(Lease::<u32>::current().is_none());

        let seen = lease
            .scope(async {
                let current = Lease::<u32>::current().expect("lease in scope");
                let id = *current.get().await.unwrap();
                (current.same_lease(&lease), id, Lease::<u64>::current().is_none())
            })
            .await;
        assert_eq!(seen, (true, 1, true));

        assert!(Lease::<u32>::current().is_none());
    }
}
