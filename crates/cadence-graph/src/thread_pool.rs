//! Persistent worker pool for the multi-threaded player.
//!
//! Workers are spawned once and sleep on a [`LightweightSemaphore`] until a
//! node becomes ready. Ready nodes travel through one lock-free FIFO queue;
//! the worker that finishes a node pushes each consumer it made ready, in the
//! order the node lists its consumers.
//!
//! ```text
//! Audio thread            Worker 0            Worker 1
//!      |                     |                   |
//!      |--[leaf a]---------->|                   |
//!      |--[leaf b]-------------------------------->|
//!      |                  process a           process b
//!      |                     |--[mix ready]------>|
//!      |                     |                process mix
//!      |<--------------------------------[done]---|
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::queue::ArrayQueue;
use thiserror::Error;

use crate::graph::PreparedPlan;
use crate::semaphore::LightweightSemaphore;

/// Worker count that leaves one core for the audio thread.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Thread pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Ask for real-time (SCHED_FIFO) scheduling on unix.
    pub real_time_priority: bool,
    /// Pin worker `n` to core `n + 1`, keeping core 0 for the audio thread.
    pub pin_to_cores: bool,
    /// Capacity of the ready queue.
    pub queue_capacity: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            real_time_priority: false,
            pin_to_cores: false,
            queue_capacity: 1024,
        }
    }
}

impl ThreadPoolConfig {
    /// Default settings with `workers` workers.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

/// Errors creating a [`ThreadPool`].
#[derive(Debug, Error)]
pub enum ThreadPoolError {
    /// Zero workers were requested.
    #[error("thread pool needs at least one worker")]
    NoWorkers,
    /// The OS refused to spawn a worker.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// One ready node of one plan.
///
/// The plan reference can outlive the block by a few instructions; players
/// hold a replaced plan back until every job has dropped it.
pub(crate) struct Job {
    pub(crate) plan: Arc<PreparedPlan>,
    pub(crate) index: usize,
}

struct Shared {
    queue: ArrayQueue<Job>,
    available: LightweightSemaphore,
    shutdown: AtomicBool,
}

impl Shared {
    fn push(&self, job: Job) {
        match self.queue.push(job) {
            Ok(()) => self.available.signal(1),
            Err(job) => self.run(job),
        }
    }

    fn run(&self, job: Job) {
        let Job { plan, index } = job;
        let last = plan.process_node(index, |next| {
            self.push(Job {
                plan: Arc::clone(&plan),
                index: next,
            });
        });
        if last {
            plan.signal_done();
        }
    }

    fn worker_loop(&self) {
        loop {
            self.available.wait();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if let Some(job) = self.queue.pop() {
                self.run(job);
            }
        }
    }
}

/// Fixed set of persistent worker threads.
///
/// Created once and shared by `Arc` between players. Dropping the last
/// handle stops and joins every worker.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    config: ThreadPoolConfig,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

impl ThreadPool {
    /// Spawns the workers described by `config`.
    pub fn new(config: ThreadPoolConfig) -> Result<Self, ThreadPoolError> {
        if config.workers == 0 {
            return Err(ThreadPoolError::NoWorkers);
        }
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(config.queue_capacity.max(1)),
            available: LightweightSemaphore::new(0),
            shutdown: AtomicBool::new(false),
        });
        let core_ids = if config.pin_to_cores {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(config.workers),
            config,
        };
        for id in 0..pool.config.workers {
            let shared = Arc::clone(&pool.shared);
            let core = core_ids.get(id + 1).or_else(|| core_ids.get(id)).copied();
            let real_time = pool.config.real_time_priority;
            let handle = thread::Builder::new()
                .name(format!("cadence-worker-{id}"))
                .spawn(move || {
                    if let Some(core) = core {
                        if !core_affinity::set_for_current(core) {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("thread_pool: could not pin worker {id} to core {}", core.id);
                        }
                    }
                    if real_time && !set_real_time_priority() {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("thread_pool: real-time priority refused for worker {id}");
                    }
                    shared.worker_loop();
                })?;
            pool.workers.push(handle);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            "thread_pool: {} workers, real-time {}, pinned {}",
            pool.workers.len(),
            pool.config.real_time_priority,
            !core_ids.is_empty()
        );
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// The settings the pool was created with.
    pub fn config(&self) -> &ThreadPoolConfig {
        &self.config
    }

    /// Queues a ready node. Runs it on the calling thread if the queue is full.
    pub(crate) fn push(&self, job: Job) {
        self.shared.push(job);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.available.signal(self.workers.len());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("thread_pool: workers joined");
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn set_real_time_priority() -> bool {
    // SAFETY: `sched_param` is plain old data, so a zeroed value is valid, and
    // `pthread_self` always names the calling thread.
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) == 0
    }
}

#[cfg(not(unix))]
fn set_real_time_priority() -> bool {
    false
}
