//! Serial job dispatcher
//!
//! Executes submitted jobs one at a time, in submission order:
//! - Each job is a boxed future returning `anyhow::Result<()>`
//! - Every submission returns a [`JobHandle`] that can be waited on
//! - Jobs never overlap, so a job submitted after another one always observes
//!   the side effects of the earlier job
//!
//! ## Usage
//!
//! ```ignore
//! let dispatcher = SerialDispatcher::new()?;
//!
//! let handle = dispatcher.submit(job(async move {
//!     upload_pending_pings().await
//! }))?;
//!
//! // Block until the job has run
//! handle.wait()?;
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Default name of the worker thread
const DEFAULT_THREAD_NAME: &str = "glint.dispatcher";

/// Identifier assigned to each submitted job, increasing in submission order
pub type JobId = u64;

/// A unit of background work
pub type Job = BoxFuture<'static, anyhow::Result<()>>;

/// Box a future into a [`Job`]
pub fn job<F>(future: F) -> Job
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::pin(future)
}

type Outcome = Result<()>;

/// Executor for background work.
///
/// Implementations must run at most one job at a time, in submission order.
pub trait JobDispatcher: Send + Sync {
    /// Queue a job for execution.
    fn submit(&self, job: Job) -> Result<JobHandle>;

    /// Block until every job submitted before this call has completed.
    ///
    /// Submits an empty barrier job and waits for it; FIFO execution means
    /// all earlier jobs are finished once the barrier runs.
    fn wait_for_last(&self) -> Result<()> {
        self.submit(job(async { anyhow::Ok(()) }))?.wait()
    }
}

/// Handle to a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    done: oneshot::Receiver<Outcome>,
}

impl JobHandle {
    /// Get the job identifier
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Block the current thread until the job has completed.
    ///
    /// Safe to call from a runtime thread: a multi-thread runtime is told the
    /// worker is blocking, a current-thread runtime hands the receive to a
    /// helper thread. Async code should still prefer [`JobHandle::join`].
    pub fn wait(self) -> Result<()> {
        let id = self.id;
        let mut done = self.done;
        let received = match Handle::try_current() {
            Err(_) => done.blocking_recv(),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| done.blocking_recv())
            }
            Ok(_) => thread::scope(|scope| {
                scope
                    .spawn(|| done.blocking_recv())
                    .join()
                    .unwrap_or_else(|_| {
                        error!(job_id = id, "Job wait thread panicked");
                        Ok(Err(Error::Abandoned { id }))
                    })
            }),
        };
        received.unwrap_or_else(|_| Err(Error::Abandoned { id }))
    }

    /// Wait asynchronously for the job to complete.
    pub async fn join(self) -> Result<()> {
        let id = self.id;
        self.done
            .await
            .unwrap_or_else(|_| Err(Error::Abandoned { id }))
    }
}

struct Envelope {
    id: JobId,
    job: Job,
    done: oneshot::Sender<Outcome>,
}

#[derive(Debug, Default)]
struct WorkerState {
    /// Jobs queued or running
    pending: AtomicUsize,
    /// Jobs with an id below this mark are skipped if they have not started
    cancel_below: AtomicU64,
}

/// Dispatcher backed by a dedicated worker thread.
///
/// The worker drives a current-thread tokio runtime and awaits each job to
/// completion before taking the next one from the queue.
pub struct SerialDispatcher {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    next_id: AtomicU64,
    state: Arc<WorkerState>,
}

impl SerialDispatcher {
    /// Start a dispatcher with the default worker thread name
    pub fn new() -> Result<Self> {
        Self::with_thread_name(DEFAULT_THREAD_NAME)
    }

    /// Start a dispatcher whose worker thread carries the given name
    pub fn with_thread_name(name: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(WorkerState::default());

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || runtime.block_on(run_worker(receiver, worker_state)))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            next_id: AtomicU64::new(0),
            state,
        })
    }

    /// Number of jobs queued or currently running
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Cancel every job submitted so far that has not started yet.
    ///
    /// The running job (if any) is not interrupted. Handles of skipped jobs
    /// resolve to [`Error::Cancelled`]. Jobs submitted afterwards run normally.
    pub fn cancel_pending(&self) {
        let mark = self.next_id.load(Ordering::SeqCst);
        self.state.cancel_below.fetch_max(mark, Ordering::SeqCst);
        debug!(below = mark, "Pending jobs cancelled");
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    ///
    /// When called from the worker thread itself (e.g. a job dropping the last
    /// reference), the channel is closed but the worker is not joined.
    pub fn close(&self) {
        self.sender.lock().take();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            error!("Dispatcher worker panicked");
        }
    }
}

impl JobDispatcher for SerialDispatcher {
    fn submit(&self, job: Job) -> Result<JobHandle> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(Error::Closed)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (done, receiver) = oneshot::channel();

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(Envelope { id, job, done }).is_err() {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Closed);
        }

        debug!(job_id = id, "Job submitted");
        Ok(JobHandle { id, done: receiver })
    }
}

impl Drop for SerialDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SerialDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDispatcher")
            .field("pending_jobs", &self.pending_jobs())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<Envelope>, state: Arc<WorkerState>) {
    while let Some(Envelope { id, job, done }) = receiver.recv().await {
        let outcome = if id < state.cancel_below.load(Ordering::SeqCst) {
            debug!(job_id = id, "Skipping cancelled job");
            drop(job);
            Err(Error::Cancelled { id })
        } else {
            match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    warn!(job_id = id, error = %e, "Job failed");
                    Err(Error::JobFailed {
                        id,
                        message: format!("{e:#}"),
                    })
                }
                Err(_) => {
                    error!(job_id = id, "Job panicked");
                    Err(Error::JobFailed {
                        id,
                        message: "job panicked".to_string(),
                    })
                }
            }
        };

        state.pending.fetch_sub(1, Ordering::SeqCst);
        // The submitter may have dropped its handle; that is fine.
        let _ = done.send(outcome);
    }

    debug!("Dispatcher queue closed, worker exiting");
}
