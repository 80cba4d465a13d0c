use secrecy::{ExposeSecret, SecretString};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<Option<SecretString>>>,
}

/// Single-flight refresh: one leader runs it, later arrivals queue and are
/// released in arrival order with the leader's outcome.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

/// Role handed out by [`RefreshCoordinator::begin`].
#[derive(Debug)]
pub enum RefreshTicket<'a> {
    Leader(RefreshLeader<'a>),
    Waiter(RefreshWaiter),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims leadership if no refresh is running, otherwise enqueues.
    pub fn begin(&self) -> RefreshTicket<'_> {
        let mut state = self.lock();
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            tracing::debug!(queued = state.waiters.len(), "refresh in flight; waiting");
            RefreshTicket::Waiter(RefreshWaiter { rx })
        } else {
            state.in_flight = true;
            RefreshTicket::Leader(RefreshLeader {
                coordinator: self,
                settled: false,
            })
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight
    }

    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    fn settle(&self, token: Option<&SecretString>) {
        let waiters = {
            let mut state = self.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        let released = waiters.len();
        for waiter in waiters {
            let token = token.map(|t| SecretString::new(t.expose_secret().clone()));
            // A waiter whose request was abandoned has dropped its receiver.
            let _ = waiter.send(token);
        }
        tracing::debug!(released, success = token.is_some(), "refresh settled");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to perform the refresh. Dropping it unsettled releases
/// every waiter with `None`.
#[derive(Debug)]
pub struct RefreshLeader<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLeader<'_> {
    pub fn succeed(mut self, token: &SecretString) {
        self.settled = true;
        self.coordinator.settle(Some(token));
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.coordinator.settle(None);
    }
}

impl Drop for RefreshLeader<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("refresh leader abandoned; releasing waiters");
            self.coordinator.settle(None);
        }
    }
}

#[derive(Debug)]
pub struct RefreshWaiter {
    rx: oneshot::Receiver<Option<SecretString>>,
}

impl RefreshWaiter {
    /// The refreshed access token, or `None` if the refresh failed.
    pub async fn wait(self) -> Option<SecretString> {
        self.rx.await.ok().flatten()
    }
}
