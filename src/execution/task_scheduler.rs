use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// A unit of work executed on one worker thread of the scheduler.
pub trait Task: Send {
    fn execute(self: Box<Self>);
}

/// Identifies the producer of scheduled tasks, every executor owns one.
#[derive(Debug)]
pub struct ProducerToken {
    producer_id: usize,
}

impl ProducerToken {
    pub fn producer_id(&self) -> usize {
        self.producer_id
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("task rejected: {0}")]
    Rejected(String),
    #[error("failed to build thread pool: {0}")]
    ThreadPoolBuildError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
}

/// Number of tasks handed to the pool that did not finish yet.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    drained: Condvar,
}

/// Decrements the outstanding count when the task is done, even if it panicked.
struct OutstandingGuard(Arc<Outstanding>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.drained.notify_all();
        }
    }
}

/// The session wide pool executing pipeline tasks. Tasks are executed in no particular order.
pub struct TaskScheduler {
    pool: ThreadPool,
    shutdown: AtomicBool,
    outstanding: Arc<Outstanding>,
    next_producer_id: AtomicUsize,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("num_threads", &self.pool.current_num_threads())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    pub fn try_new(num_threads: usize) -> Result<Self, SchedulerError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|idx| format!("sqlrs-worker-{idx}"))
            .panic_handler(|_| error!("task panicked on a worker thread"))
            .build()?;
        debug!(
            "task scheduler started with {} threads",
            pool.current_num_threads()
        );
        Ok(Self {
            pool,
            shutdown: AtomicBool::new(false),
            outstanding: Arc::new(Outstanding::default()),
            next_producer_id: AtomicUsize::new(0),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn create_producer(&self) -> ProducerToken {
        ProducerToken {
            producer_id: self.next_producer_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Hand a task to the pool and return immediately.
    pub fn schedule_task(
        &self,
        producer: &ProducerToken,
        task: Box<dyn Task>,
    ) -> Result<(), SchedulerError> {
        {
            // checked under the lock so shutdown can't miss a task registered concurrently
            let mut count = self.outstanding.count.lock();
            if self.is_shutdown() {
                return Err(SchedulerError::Rejected(format!(
                    "scheduler is shut down, producer {}",
                    producer.producer_id
                )));
            }
            *count += 1;
        }
        trace!("producer {} scheduled a task", producer.producer_id);
        let guard = OutstandingGuard(self.outstanding.clone());
        self.pool.spawn(move || {
            let _guard = guard;
            task.execute();
        });
        Ok(())
    }

    /// Stop accepting tasks and wait until the outstanding ones are done. Must not be called
    /// from a task.
    pub fn shutdown(&self) {
        let mut count = self.outstanding.count.lock();
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("task scheduler shutting down, {} tasks outstanding", *count);
        }
        while *count > 0 {
            self.outstanding.drained.wait(&mut count);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        // the last owner may be a task on one of our own workers, which can't wait for itself
        if self.pool.current_thread_index().is_some() {
            self.shutdown.store(true, Ordering::SeqCst);
        } else {
            self.shutdown();
        }
    }
}
