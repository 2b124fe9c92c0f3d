//! Parallelism limits and bounded fork-join helpers.
//!
//! The engine never creates unbounded threads: parallel range I/O and
//! parallel tile compression run through these helpers, each bounded by a
//! limit derived from the hardware concurrency.

use crate::{Error, Result};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Parallelism limits for the different workload types of the engine.
#[derive(Clone, Copy, Debug)]
pub struct ConcurrencyLimits {
	/// Parallel range reads against one backend.
	pub io_bound: usize,
	/// Parallel tile compression during finalize.
	pub cpu_bound: usize,
	/// Parallel block uploads to object stores.
	pub upload: usize,
}

impl Default for ConcurrencyLimits {
	fn default() -> Self {
		let cpus = num_cpus::get();
		Self {
			io_bound: cpus * 2,
			cpu_bound: cpus,
			upload: (cpus / 2).max(1),
		}
	}
}

/// Runs all `tasks` concurrently, at most `limit` at a time, failing fast on
/// the first error.
pub async fn join_bounded<T, F>(limit: usize, tasks: Vec<F>) -> Result<Vec<T>>
where
	F: Future<Output = Result<T>>,
{
	let semaphore = Arc::new(Semaphore::new(limit.max(1)));
	try_join_all(tasks.into_iter().map(|task| {
		let semaphore = Arc::clone(&semaphore);
		async move {
			let _permit = semaphore.acquire().await.expect("semaphore is never closed");
			task.await
		}
	}))
	.await
}

/// Runs a CPU-bound closure on the blocking pool.
pub async fn run_compute<T, F>(task: F) -> Result<T>
where
	T: Send + 'static,
	F: FnOnce() -> Result<T> + Send + 'static,
{
	tokio::task::spawn_blocking(task)
		.await
		.map_err(|e| Error::io_other("<compute pool>", e))?
}
