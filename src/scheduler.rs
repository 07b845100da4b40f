//! Scheduler (C11): cron-triggered invocation of the pipeline, with overlap
//! suppression. Grounded in `scheduling/scheduler.py`; the teacher's
//! tokio-based scheduling is replaced with a dedicated `std::thread` loop
//! (per spec: multi-threaded, not async/await). The cancellable sleep uses
//! a `crossbeam_channel` stop signal rather than a polled flag, in the style
//! of `Haruko-Haruhara-GSPB-shredtop`'s capture thread.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Sender};
use cron::Schedule;

#[derive(Debug)]
pub enum SchedulerError {
	InvalidCron(String),
}

impl fmt::Display for SchedulerError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SchedulerError::InvalidCron(s) => write!(f, "invalid cron expression: {}", s),
		}
	}
}

impl std::error::Error for SchedulerError {}

struct Inner {
	schedule: Schedule,
	stop_tx: Sender<()>,
	handle: Option<JoinHandle<()>>,
}

/// `max_instances = 1`: overlap suppression is delegated to the pipeline's
/// own single-flight mutex (`Pipeline::execute_capture`'s try-lock), so the
/// scheduler only needs to fire on cron edges; a firing that lands on a
/// running batch is coalesced away there, not here.
#[derive(Default)]
pub struct Scheduler {
	inner: Mutex<Option<Inner>>,
}

impl Scheduler {
	/// Starts the scheduler thread. `on_fire` is called on every cron edge,
	/// from the scheduler thread; it must not block longer than a batch
	/// takes, since firings are coalesced (`max_instances = 1`), not queued.
	pub fn start<F>(&self, cron_expr: &str, on_fire: F) -> Result<(), SchedulerError>
	where
		F: Fn() + Send + 'static,
	{
		self.stop();

		let schedule = Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;
		let (stop_tx, stop_rx) = bounded::<()>(0);
		let thread_schedule = schedule.clone();

		let handle = std::thread::Builder::new()
			.name("scheduler".to_string())
			.spawn(move || {
				log::info!("scheduler: started with cron {}", thread_schedule);
				loop {
					let now = Utc::now();
					let next = match thread_schedule.upcoming(Utc).next() {
						Some(t) => t,
						None => {
							log::warn!("scheduler: cron schedule has no further occurrences, stopping");
							break;
						}
					};
					let wait = (next - now).to_std().unwrap_or(Duration::from_millis(0));

					// A stop signal wakes this recv immediately instead of
					// oversleeping a polled flag until the next tick.
					match stop_rx.recv_timeout(wait) {
						Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
						Err(crossbeam_channel::RecvTimeoutError::Timeout) => on_fire(),
					}
				}
				log::info!("scheduler: stopped");
			})
			.expect("failed to spawn scheduler thread");

		*self.inner.lock().expect("scheduler mutex poisoned") = Some(Inner { schedule, stop_tx, handle: Some(handle) });
		Ok(())
	}

	/// Removes the job, signals the thread to stop and joins it, dropping
	/// the instance so a subsequent `start` creates a fresh one.
	pub fn stop(&self) {
		let mut guard = self.inner.lock().expect("scheduler mutex poisoned");
		if let Some(mut inner) = guard.take() {
			let _ = inner.stop_tx.send(());
			if let Some(handle) = inner.handle.take() {
				let _ = handle.join();
			}
		}
	}

	/// Earliest `next_run_time` across the registered job, as ISO-8601.
	pub fn next_scheduled_time(&self) -> Option<String> {
		let guard = self.inner.lock().expect("scheduler mutex poisoned");
		guard.as_ref().and_then(|inner| inner.schedule.upcoming(Utc).next()).map(|t| t.to_rfc3339())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[test]
	fn invalid_cron_expression_is_rejected() {
		let scheduler = Scheduler::default();
		assert!(scheduler.start("not a cron expression", || {}).is_err());
	}

	#[test]
	fn next_scheduled_time_is_none_before_start() {
		let scheduler = Scheduler::default();
		assert!(scheduler.next_scheduled_time().is_none());
	}

	#[test]
	fn stop_before_start_is_a_no_op() {
		let scheduler = Scheduler::default();
		scheduler.stop();
	}

	#[test]
	fn fires_at_least_once_on_a_every_second_schedule() {
		let scheduler = Scheduler::default();
		let count = Arc::new(AtomicUsize::new(0));
		let thread_count = count.clone();
		scheduler.start("* * * * * * *", move || {
			thread_count.fetch_add(1, Ordering::SeqCst);
		}).unwrap();
		std::thread::sleep(Duration::from_millis(1500));
		scheduler.stop();
		assert!(count.load(Ordering::SeqCst) >= 1);
	}
}
