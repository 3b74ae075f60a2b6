//! Query Cancellation Module
//!
//! Lets a caller abort an in-flight query.
//!
//! ## Design
//!
//! - A `CancelSignal` is a shared flag plus a wakeup: `cancel()` flips it
//!   once, and anything awaiting `cancelled()` wakes with the reason.
//! - The `CancellationController` holds the *current* signal. Cancelling
//!   fires the current signal and swaps a fresh one in, so the controller
//!   is reusable across queries.
//! - Cancellation is best-effort. `race` stops waiting, but the engine may
//!   finish the statement in the background; its result is dropped.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Cancellation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Query cancelled: {reason}")]
pub struct Cancelled {
    pub reason: String,
}

impl Cancelled {
    pub fn new(reason: impl Into<String>) -> Self {
        Cancelled {
            reason: reason.into(),
        }
    }

    pub fn timed_out(limit: Duration) -> Self {
        Cancelled::new(format!("query timed out after {}ms", limit.as_millis()))
    }
}

#[derive(Debug, Default)]
struct SignalState {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// Handle observing (and able to trigger) one cancellation
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    state: Arc<SignalState>,
}

impl CancelSignal {
    pub fn new() -> Self {
        CancelSignal::default()
    }

    /// Fire the signal. The first reason wins; returns whether this call
    /// did the firing.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        {
            let mut slot = self.state.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason.into());
            self.state.cancelled.store(true, Ordering::Release);
        }
        self.state.notify.notify_waiters();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.state.reason.lock().clone()
    }

    /// `Err` once the signal has fired
    pub fn check(&self) -> Result<(), Cancelled> {
        match self.fired() {
            Some(cancelled) => Err(cancelled),
            None => Ok(()),
        }
    }

    /// Resolves when the signal fires
    pub async fn cancelled(&self) -> Cancelled {
        loop {
            // Register before checking the flag so a concurrent
            // notify_waiters is not missed.
            let notified = self.state.notify.notified();
            if let Some(cancelled) = self.fired() {
                return cancelled;
            }
            notified.await;
        }
    }

    fn fired(&self) -> Option<Cancelled> {
        if !self.is_cancelled() {
            return None;
        }
        let reason = self.reason().unwrap_or_default();
        Some(Cancelled { reason })
    }

    fn same_as(&self, other: &Arc<SignalState>) -> bool {
        Arc::ptr_eq(&self.state, other)
    }
}

/// Reusable source of cancellation signals
#[derive(Debug, Default)]
pub struct CancellationController {
    current: ArcSwap<SignalState>,
    in_flight: AtomicUsize,
}

impl CancellationController {
    pub fn new() -> Self {
        CancellationController::default()
    }

    /// Signal the next query should observe
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            state: self.current.load_full(),
        }
    }

    /// Queries currently inside `race`
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Cancel whatever is running and arm a fresh signal.
    ///
    /// A no-op returning `false` when nothing is in flight, so a stray
    /// cancel cannot poison the next query.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self.in_flight() == 0 {
            return false;
        }
        let old = self.current.swap(Arc::new(SignalState::default()));
        CancelSignal { state: old }.cancel(reason)
    }

    /// Run `fut` unless `signal` fires first
    pub async fn race<F, T>(&self, signal: &CancelSignal, fut: F) -> Result<T, Cancelled>
    where
        F: Future<Output = T>,
    {
        let _guard = InFlight::enter(&self.in_flight);
        tokio::select! {
            biased;
            cancelled = signal.cancelled() => Err(cancelled),
            out = fut => Ok(out),
        }
    }

    /// `race` with an optional deadline; expiry reports as `Cancelled`
    pub async fn race_with_timeout<F, T>(
        &self,
        signal: &CancelSignal,
        timeout: Option<Duration>,
        fut: F,
    ) -> Result<T, Cancelled>
    where
        F: Future<Output = T>,
    {
        match timeout {
            None => self.race(signal, fut).await,
            Some(limit) => tokio::time::timeout(limit, self.race(signal, fut))
                .await
                .unwrap_or_else(|_| Err(Cancelled::timed_out(limit))),
        }
    }

    /// Whether `signal` is the one the controller is currently handing out
    pub fn is_current(&self, signal: &CancelSignal) -> bool {
        signal.same_as(&self.current.load())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_starts_clear() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.check().is_ok());
        assert_eq!(signal.reason(), None);
    }

    #[test]
    fn test_first_reason_wins() {
        let signal = CancelSignal::new();
        assert!(signal.cancel("user"));
        assert!(!signal.cancel("again"));
        assert_eq!(signal.reason().as_deref(), Some("user"));
        assert_eq!(signal.check(), Err(Cancelled::new("user")));
    }

    #[test]
    fn test_clone_shares_state() {
        let signal = CancelSignal::new();
        let cloned = signal.clone();
        signal.cancel("stop");
        assert!(cloned.is_cancelled());
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(Cancelled::new("user").to_string(), "Query cancelled: user");
        assert_eq!(
            Cancelled::timed_out(Duration::from_millis(250)).reason,
            "query timed out after 250ms"
        );
    }

    #[test]
    fn test_cancel_without_in_flight_is_noop() {
        let controller = CancellationController::new();
        let signal = controller.signal();
        assert!(!controller.cancel("nothing running"));
        assert!(!signal.is_cancelled());
        assert!(controller.is_current(&signal));
    }

    #[tokio::test]
    async fn test_race_completes() {
        let controller = CancellationController::new();
        let signal = controller.signal();
        let out = controller.race(&signal, async { 7 }).await;
        assert_eq!(out, Ok(7));
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_race_with_prefired_signal() {
        let controller = CancellationController::new();
        let signal = CancelSignal::new();
        signal.cancel("early");
        let out = controller.race(&signal, async { 7 }).await;
        assert_eq!(out, Err(Cancelled::new("early")));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let controller = Arc::new(CancellationController::new());
        let signal = controller.signal();

        let racer = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .race(&signal, std::future::pending::<()>())
                    .await
            })
        };

        while controller.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(controller.cancel("user requested"));

        let out = racer.await.unwrap();
        assert_eq!(out, Err(Cancelled::new("user requested")));
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_controller_is_reusable() {
        let controller = Arc::new(CancellationController::new());
        let first = controller.signal();

        let racer = {
            let controller = Arc::clone(&controller);
            let signal = first.clone();
            tokio::spawn(async move {
                controller
                    .race(&signal, std::future::pending::<()>())
                    .await
            })
        };
        while controller.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        controller.cancel("first");
        assert!(racer.await.unwrap().is_err());

        let second = controller.signal();
        assert!(!second.is_cancelled());
        assert!(!controller.is_current(&first));
        assert_eq!(controller.race(&second, async { "ok" }).await, Ok("ok"));
    }

    #[tokio::test]
    async fn test_timeout_reports_cancelled() {
        let controller = CancellationController::new();
        let signal = controller.signal();
        let out = controller
            .race_with_timeout(
                &signal,
                Some(Duration::from_millis(20)),
                std::future::pending::<()>(),
            )
            .await;
        assert_eq!(out, Err(Cancelled::new("query timed out after 20ms")));
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_no_timeout_passes_through() {
        let controller = CancellationController::new();
        let signal = controller.signal();
        let out = controller
            .race_with_timeout(&signal, None, async { 1 })
            .await;
        assert_eq!(out, Ok(1));
    }
}
