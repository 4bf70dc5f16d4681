//! Coalescing re-run of an async action.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::error;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Action = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// Runs an action at most once at a time, with at most one queued re-run.
///
/// - idle: a call starts a run right away;
/// - busy: a call queues one trailing run, later calls join that same run.
///
/// `call()` resolves when the run it started or joined has finished.
#[derive(Clone)]
pub struct TakeOne {
    action: Action,
    state: Arc<Mutex<RunState>>,
    finished: Arc<watch::Sender<u64>>,
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    trailing: bool,
    /// Runs started or queued so far; the value is the number of the last one
    scheduled: u64,
}

impl TakeOne {
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (finished, _) = watch::channel(0);
        Self {
            action: Arc::new(move || Box::pin(action()) as BoxFuture),
            state: Arc::new(Mutex::new(RunState::default())),
            finished: Arc::new(finished),
        }
    }

    /// Request a run and wait for it.
    pub async fn call(&self) {
        let mut finished = self.finished.subscribe();
        let target = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !state.running {
                state.running = true;
                state.scheduled += 1;
                self.spawn_driver();
            } else if !state.trailing {
                state.trailing = true;
                state.scheduled += 1;
            }
            state.scheduled
        };

        while *finished.borrow_and_update() < target {
            if finished.changed().await.is_err() {
                return;
            }
        }
    }

    /// Request a run without waiting for it.
    pub fn trigger(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.call().await });
    }

    fn spawn_driver(&self) {
        let action = Arc::clone(&self.action);
        let state = Arc::clone(&self.state);
        let finished = Arc::clone(&self.finished);
        tokio::spawn(async move {
            loop {
                // a panicking run must not leave `running` stuck
                if let Err(e) = tokio::spawn(action()).await {
                    error!(error = %e, "Coalesced run panicked");
                }
                let mut state = match state.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };
                finished.send_modify(|n| *n += 1);
                if state.trailing {
                    state.trailing = false;
                } else {
                    state.running = false;
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting(delay: Duration) -> (TakeOne, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let take = TakeOne::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
            }
        });
        (take, count)
    }

    #[tokio::test]
    async fn test_calls_during_flight_collapse_into_one_trailing_run() {
        let (take, count) = counting(Duration::from_millis(50));

        tokio::join!(take.call(), take.call(), take.call(), take.call());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_call_runs_immediately() {
        let (take, count) = counting(Duration::from_millis(1));

        take.call().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        take.call().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_late_caller_waits_for_trailing_run() {
        let (take, count) = counting(Duration::from_millis(30));

        let first = {
            let take = take.clone();
            tokio::spawn(async move { take.call().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // joins the trailing run, so both runs are done when it returns
        take.call().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_run_releases_state() {
        let take = TakeOne::new(|| async { panic!("boom") });
        take.call().await;
        take.call().await;
    }
}
