//! Task execution for database operations
//!
//! Every database owns an [`Executor`], a small tokio runtime that runs its
//! I/O, async completions and listener deliveries. Operations started on it
//! hand back a [`PendingOp`], which the caller may await, wait on, detach or
//! cancel.
//!
//! Key-value commands and publishes go through [`Executor::submit`], a single
//! FIFO queue per executor: they reach the backend in the order they were
//! issued, whether or not anybody waits for them.

use errors::{DbkitError, DbkitResult};
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

const WORKER_THREADS: usize = 2;
const THREAD_NAME: &str = "dbkit-redis";

type Job = BoxFuture<'static, ()>;

/// Dedicated runtime shared by one database and its channel manager
pub struct Executor {
    runtime: Option<Runtime>,
    handle: Handle,
    queue: mpsc::UnboundedSender<Job>,
}

impl Executor {
    pub fn new() -> DbkitResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name(THREAD_NAME)
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let (queue, jobs) = mpsc::unbounded_channel();
        runtime.spawn(drain(jobs));

        Ok(Self {
            runtime: Some(runtime),
            handle,
            queue,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Start `fut` immediately, concurrently with everything else
    pub fn spawn<T, F>(&self, op: impl Into<String>, fut: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: Future<Output = DbkitResult<T>> + Send + 'static,
    {
        PendingOp {
            op: op.into(),
            state: State::Spawned(self.handle.spawn(fut.in_current_span())),
        }
    }

    /// Queue `fut` behind every operation submitted before it
    ///
    /// A panic inside `fut` fails this operation only; the queue keeps going.
    pub fn submit<T, F>(&self, op: impl Into<String>, fut: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: Future<Output = DbkitResult<T>> + Send + 'static,
    {
        let op = op.into();
        let (tx, rx) = oneshot::channel();
        let (abort, registration) = AbortHandle::new_pair();
        let done = Arc::new(AtomicBool::new(false));

        let label = op.clone();
        let finished = done.clone();
        let job = async move {
            let guarded = AssertUnwindSafe(Abortable::new(fut, registration));
            let result = match guarded.catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(_aborted)) => Err(DbkitError::TaskCancelled(label)),
                Err(_panic) => Err(DbkitError::TaskFailed(format!("{}: task panicked", label))),
            };
            finished.store(true, Ordering::Release);
            // Nobody listening means the caller detached
            let _ = tx.send(result);
        }
        .in_current_span()
        .boxed();

        if self.queue.send(job).is_err() {
            let err = DbkitError::TaskFailed(format!("{}: executor stopped", op));
            return PendingOp::ready(op, Err(err));
        }
        PendingOp {
            op,
            state: State::Queued(Queued {
                result: rx,
                abort,
                done,
            }),
        }
    }

    /// Run `fut` on the runtime and block the calling thread until it ends
    pub fn block_on<T, F>(&self, op: impl Into<String>, fut: F) -> DbkitResult<T>
    where
        T: Send + 'static,
        F: Future<Output = DbkitResult<T>> + Send + 'static,
    {
        self.spawn(op, fut).wait()
    }
}

async fn drain(mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        job.await;
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("running", &self.runtime.is_some())
            .finish()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; background shutdown does not
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct Queued<T> {
    result: oneshot::Receiver<DbkitResult<T>>,
    abort: AbortHandle,
    done: Arc<AtomicBool>,
}

enum State<T> {
    Spawned(JoinHandle<DbkitResult<T>>),
    Queued(Queued<T>),
    Ready(Option<DbkitResult<T>>),
}

/// Handle to an operation that has been started or queued
///
/// Dropping the handle detaches the operation; it still runs to completion.
#[must_use = "dropping a PendingOp detaches the operation; call detach() to make that explicit"]
pub struct PendingOp<T> {
    op: String,
    state: State<T>,
}

impl<T> PendingOp<T> {
    /// Already-completed operation, used when a call fails before any I/O
    pub fn ready(op: impl Into<String>, result: DbkitResult<T>) -> Self {
        Self {
            op: op.into(),
            state: State::Ready(Some(result)),
        }
    }

    /// Short description of the operation, e.g. `GET user:1`
    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            State::Spawned(handle) => handle.is_finished(),
            State::Queued(queued) => queued.done.load(Ordering::Acquire),
            State::Ready(_) => true,
        }
    }

    /// Let the operation finish on its own; the result is discarded
    pub fn detach(self) {}

    /// Stop local work for this operation
    ///
    /// A queued operation is skipped when its turn comes. A command already
    /// written to the server still executes there.
    pub fn cancel(self) {
        match &self.state {
            State::Spawned(handle) => handle.abort(),
            State::Queued(queued) => queued.abort.abort(),
            State::Ready(_) => {},
        }
    }

    /// Block the current thread until the operation completes
    pub fn wait(self) -> DbkitResult<T> {
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| futures::executor::block_on(self))
            },
            _ => futures::executor::block_on(self),
        }
    }
}

impl<T> Unpin for PendingOp<T> {}

impl<T> Future for PendingOp<T> {
    type Output = DbkitResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Spawned(handle) => match Pin::new(handle).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(e)) => Poll::Ready(Err(join_error(&this.op, e))),
            },
            State::Queued(queued) => match Pin::new(&mut queued.result).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // Sender dropped without a result: cancelled or runtime gone
                Poll::Ready(Err(_)) if queued.abort.is_aborted() => {
                    Poll::Ready(Err(DbkitError::TaskCancelled(this.op.clone())))
                },
                Poll::Ready(Err(_)) => Poll::Ready(Err(DbkitError::TaskFailed(format!(
                    "{}: executor stopped",
                    this.op
                )))),
            },
            State::Ready(slot) => Poll::Ready(slot.take().unwrap_or_else(|| {
                Err(DbkitError::internal(format!(
                    "{} polled after completion",
                    this.op
                )))
            })),
        }
    }
}

impl<T> std::fmt::Debug for PendingOp<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOp")
            .field("op", &self.op)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn join_error(op: &str, e: JoinError) -> DbkitError {
    if e.is_cancelled() {
        DbkitError::TaskCancelled(op.to_string())
    } else {
        DbkitError::TaskFailed(format!("{}: task panicked", op))
    }
}
