// SPDX-License-Identifier: GPL-3.0-only

//! Thread lifecycle management for pipeline loops
//!
//! The capture loop, the world-transform worker and the synthetic sensor all
//! run as a named thread repeatedly calling one closure. Stopping is
//! cooperative: the stop signal is checked between iterations, so an
//! iteration in flight always runs to completion, and `stop()` joins the
//! thread before returning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by a loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run another iteration
    Continue,
    /// Exit the loop
    Stop,
}

/// Controller for a loop running on its own thread
///
/// ```ignore
/// let mut worker = LoopController::start("world-transform", move || {
///     run_one_pass();
///     LoopAction::Continue
/// });
/// worker.stop(); // waits for the pass in flight
/// ```
pub struct LoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl LoopController {
    /// Start a loop that calls `loop_fn` until it returns `LoopAction::Stop`
    /// or `stop()` is called.
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting loop");

        let spawn_result = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut iterations = 0u64;
                while !thread_stop.load(Ordering::SeqCst) {
                    iterations += 1;
                    if loop_fn() == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                }
                info!(name = %thread_name, iterations, "Loop thread exiting");
            });

        let thread_handle = match spawn_result {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn loop thread");
                None
            }
        };

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Check if the loop thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Signal the loop to stop and wait for the current iteration to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without signalling it
    pub fn join(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        match handle.join() {
            Ok(()) => debug!(name = %self.name, "Loop thread joined"),
            Err(_) => warn!(name = %self.name, "Loop thread panicked"),
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_drains_until_source_closes() {
        let (tx, rx) = crossbeam::channel::bounded::<u32>(8);
        let total = Arc::new(AtomicUsize::new(0));
        let sum = Arc::clone(&total);

        let mut consumer = LoopController::start("test-drain", move || match rx.recv() {
            Ok(value) => {
                sum.fetch_add(value as usize, Ordering::SeqCst);
                LoopAction::Continue
            }
            Err(_) => LoopAction::Stop,
        });

        for value in 1..=5 {
            tx.send(value).unwrap();
        }
        drop(tx);
        consumer.join();
        assert_eq!(total.load(Ordering::SeqCst), 15);
        assert!(!consumer.is_running());
    }

    #[test]
    fn test_stop_lets_pass_in_flight_finish() {
        let passes_started = Arc::new(AtomicUsize::new(0));
        let passes_done = Arc::new(AtomicUsize::new(0));
        let started = Arc::clone(&passes_started);
        let done = Arc::clone(&passes_done);

        let mut worker = LoopController::start("test-pass", move || {
            started.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            done.fetch_add(1, Ordering::SeqCst);
            LoopAction::Continue
        });

        thread::sleep(Duration::from_millis(25));
        worker.stop();

        let started = passes_started.load(Ordering::SeqCst);
        assert!(started > 0);
        assert_eq!(started, passes_done.load(Ordering::SeqCst));
        assert!(!worker.is_running());
    }

    #[test]
    fn test_drop_stops_thread() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&iterations);
        {
            let _worker = LoopController::start("test-drop", move || {
                count.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
                LoopAction::Continue
            });
            thread::sleep(Duration::from_millis(10));
        }
        let after_drop = iterations.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(iterations.load(Ordering::SeqCst), after_drop);
    }
}
