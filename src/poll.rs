//! Fixed-cadence polling loop.
//!
//! Runs a supplied async step on a fixed interval. Transient failures are
//! reported and counted; once the consecutive-failure count reaches the
//! configured maximum the loop reports exhaustion and stops permanently.
//! There is no backoff growth here — polling already has a bounded retry
//! count, and backoff is the stream-reconnect path's concern.

use std::future::Future;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::ClientError;

/// A signal reported by a [`PollLoop`] to its owner.
#[derive(Debug)]
pub enum PollSignal {
    /// One step failed; the loop will retry at the same cadence.
    StepFailed(ClientError),
    /// Consecutive failures hit the maximum. The loop has stopped.
    Exhausted(ClientError),
}

/// Owns the repeating timer and the task driving the step function.
pub struct PollLoop {
    token: CancelToken,
    _task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("stopped", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PollLoop {
    /// Start polling. The first step runs after one full `interval`.
    ///
    /// `step` receives a token it must honor; a step resolving to
    /// [`ClientError::Aborted`] ends the loop silently (the stop was
    /// intentional, not a failure). Successful steps reset the failure
    /// counter.
    pub fn start<S, Fut, F>(
        interval: Duration,
        max_error_attempts: u32,
        parent: &CancelToken,
        step: S,
        on_signal: F,
    ) -> Self
    where
        S: Fn(CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
        F: Fn(PollSignal) + Send + Sync + 'static,
    {
        let token = parent.child();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            let mut consecutive_failures: u32 = 0;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                let result = tokio::select! {
                    _ = task_token.cancelled() => return,
                    res = step(task_token.clone()) => res,
                };

                match result {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) if e.is_aborted() => return,
                    Err(e) => {
                        consecutive_failures += 1;
                        tracing::debug!(
                            error = %e,
                            consecutive_failures,
                            max_error_attempts,
                            "poll step failed"
                        );
                        if consecutive_failures >= max_error_attempts {
                            on_signal(PollSignal::Exhausted(ClientError::RetriesExhausted {
                                attempts: consecutive_failures,
                                last: Box::new(e),
                            }));
                            return;
                        }
                        on_signal(PollSignal::StepFailed(e));
                    }
                }
            }
        });

        Self { token, _task: task }
    }

    /// Stop polling. Idempotent; aborts any in-flight step.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Same as [`stop`](Self::stop); the orchestrator restarts a fresh loop
    /// to resume.
    pub fn pause(&self) {
        self.stop();
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn collect() -> (Arc<Mutex<Vec<String>>>, impl Fn(PollSignal) + Send + Sync) {
        let signals: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = signals.clone();
        let on_signal = move |signal: PollSignal| {
            let tag = match signal {
                PollSignal::StepFailed(_) => "failed".to_string(),
                PollSignal::Exhausted(_) => "exhausted".to_string(),
            };
            sink.lock().unwrap().push(tag);
        };
        (signals, on_signal)
    }

    #[tokio::test]
    async fn steps_run_on_cadence_and_success_resets_counter() {
        let count = Arc::new(AtomicU32::new(0));
        let step_count = count.clone();
        let (signals, on_signal) = collect();
        let root = CancelToken::new();

        let poll = PollLoop::start(
            Duration::from_millis(10),
            3,
            &root,
            move |_token| {
                let n = step_count.fetch_add(1, Ordering::SeqCst);
                async move {
                    // Alternate failure and success, never two consecutive.
                    if n % 2 == 0 {
                        Err(ClientError::Transport("flaky".into()))
                    } else {
                        Ok(())
                    }
                }
            },
            on_signal,
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        poll.stop();

        assert!(count.load(Ordering::SeqCst) >= 4);
        let signals = signals.lock().unwrap();
        assert!(signals.iter().all(|s| s == "failed"), "got {signals:?}");
    }

    #[tokio::test]
    async fn exhaustion_after_max_consecutive_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let step_count = count.clone();
        let (signals, on_signal) = collect();
        let root = CancelToken::new();

        let _poll = PollLoop::start(
            Duration::from_millis(5),
            3,
            &root,
            move |_token| {
                step_count.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Transport("down".into())) }
            },
            on_signal,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Exactly max attempts ran, then the loop stopped permanently.
        assert_eq!(count.load(Ordering::SeqCst), 3);
        let signals = signals.lock().unwrap();
        assert_eq!(*signals, vec!["failed", "failed", "exhausted"]);
    }

    #[tokio::test]
    async fn aborted_step_ends_loop_silently() {
        let (signals, on_signal) = collect();
        let root = CancelToken::new();

        let _poll = PollLoop::start(
            Duration::from_millis(5),
            3,
            &root,
            |_token| async { Err(ClientError::Aborted) },
            on_signal,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(signals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_prevents_further_steps() {
        let count = Arc::new(AtomicU32::new(0));
        let step_count = count.clone();
        let (_signals, on_signal) = collect();
        let root = CancelToken::new();

        let poll = PollLoop::start(
            Duration::from_millis(10),
            3,
            &root,
            move |_token| {
                step_count.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            on_signal,
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        poll.stop();
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn parent_cancel_stops_loop() {
        let count = Arc::new(AtomicU32::new(0));
        let step_count = count.clone();
        let (_signals, on_signal) = collect();
        let root = CancelToken::new();

        let _poll = PollLoop::start(
            Duration::from_millis(10),
            3,
            &root,
            move |_token| {
                step_count.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            on_signal,
        );

        root.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
