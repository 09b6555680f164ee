//! Fixed-size worker pool with per-worker state
//!
//! Each worker is a named OS thread. On startup it runs the pool's
//! initializer exactly once and keeps the returned state for the rest of its
//! life; every work call receives that state by reference. This is how each
//! worker holds one long-lived store handle instead of acquiring it per item.
//!
//! ```text
//!  items ──▶ dispatcher ──chunks──▶ [bounded job queue] ──▶ worker 0 (state)
//!                                                      ├──▶ worker 1 (state)
//!                                                      └──▶ worker N (state)
//!                                                               │
//!  caller ◀──────────── results in arrival order ◀──────────────┘
//! ```
//!
//! Panics inside the work function are caught per item and come back as
//! [`TaskPanic`] together with the item; they never take a worker down.

pub mod runtime;

pub use runtime::{configure_runtime, runtime_settings, RuntimeSettings};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::any::Any;
use std::iter::FusedIterator;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info_span, trace, warn};

use crate::error::PoolError;

type Job<S> = Box<dyn FnOnce(&S) + Send + 'static>;

type ReadySignal = (usize, Result<(), String>);

/// A work function panicked while processing `item`.
///
/// The item is handed back so the caller can still attribute the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanic<T> {
    pub item: T,
    pub message: String,
}

impl<T> std::fmt::Display for TaskPanic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work function panicked: {}", self.message)
    }
}

impl<T: std::fmt::Debug> std::error::Error for TaskPanic<T> {}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Pool of long-lived workers, each owning a value of `S`.
///
/// Dropping the pool closes the job queue and joins every worker.
pub struct WorkerPool<S> {
    job_tx: Option<Sender<Job<S>>>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
}

impl<S: 'static> WorkerPool<S> {
    /// Spawn `pool_size` workers, each running `init_fn(init_args)` once.
    ///
    /// Returns only after every worker has finished initializing, so nothing
    /// the caller does afterwards can race the initializers. If any
    /// initializer fails the pool is torn down and the first failure is
    /// returned.
    pub fn start<A, F, E>(pool_size: usize, init_fn: F, init_args: A) -> Result<Self, PoolError>
    where
        A: Clone + Send + 'static,
        F: Fn(A) -> Result<S, E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        if pool_size == 0 {
            return Err(PoolError::EmptyPool);
        }

        let settings = runtime_settings();
        let init_fn = Arc::new(init_fn);
        // A couple of chunks queued per worker keeps workers busy without
        // draining the item source ahead of them.
        let (job_tx, job_rx) = bounded::<Job<S>>(pool_size * 2);
        let (ready_tx, ready_rx) = bounded::<ReadySignal>(pool_size);

        let mut pool = Self {
            job_tx: Some(job_tx),
            workers: Vec::with_capacity(pool_size),
            size: pool_size,
        };

        for worker_id in 0..pool_size {
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", settings.thread_name_prefix, worker_id));
            if let Some(stack_size) = settings.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let init_fn = Arc::clone(&init_fn);
            let init_args = init_args.clone();
            let jobs = job_rx.clone();
            let ready = ready_tx.clone();

            match builder.spawn(move || worker_main(worker_id, init_fn.as_ref(), init_args, jobs, ready))
            {
                Ok(handle) => pool.workers.push(handle),
                Err(source) => {
                    pool.shutdown();
                    return Err(PoolError::Spawn {
                        worker: worker_id,
                        source,
                    });
                },
            }
        }
        drop(ready_tx);
        drop(job_rx);

        for _ in 0..pool_size {
            match ready_rx.recv() {
                Ok((_, Ok(()))) => {},
                Ok((worker, Err(message))) => {
                    pool.shutdown();
                    return Err(PoolError::WorkerInit { worker, message });
                },
                Err(_) => {
                    pool.shutdown();
                    return Err(PoolError::Closed);
                },
            }
        }

        debug!(pool_size, "Worker pool ready");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work_fn` over `items` on the pool.
    ///
    /// Items are pulled lazily and sent to workers `chunk_size` at a time.
    /// The returned iterator yields one result per item, in the order workers
    /// finish them, and ends once every dispatched item has a result.
    pub fn map_unordered<T, R, F, I>(
        &self,
        work_fn: F,
        items: I,
        chunk_size: usize,
    ) -> Result<Unordered<T, R>, PoolError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(&S, &T) -> R + Send + Sync + 'static,
    {
        if chunk_size == 0 {
            return Err(PoolError::EmptyChunk);
        }
        let job_tx = self.job_tx.clone().ok_or(PoolError::Closed)?;

        let work_fn = Arc::new(work_fn);
        let (result_tx, result_rx) = unbounded::<Result<R, TaskPanic<T>>>();
        let items = items.into_iter().fuse();

        let dispatcher = thread::Builder::new()
            .name(format!("{}-dispatch", runtime_settings().thread_name_prefix))
            .spawn(move || dispatch(items, chunk_size, job_tx, work_fn, result_tx))
            .map_err(PoolError::DispatcherSpawn)?;

        Ok(Unordered {
            results: result_rx,
            dispatcher: Some(dispatcher),
            submitted: None,
            received: 0,
        })
    }

}

impl<S> WorkerPool<S> {
    /// Close the job queue and wait for every worker to exit
    pub fn join(mut self) {
        self.shutdown();
    }

    /// Number of worker threads not yet joined
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    fn shutdown(&mut self) {
        drop(self.job_tx.take());
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(worker = %name, "Worker thread terminated abnormally");
            }
        }
    }
}

impl<S> Drop for WorkerPool<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main<S, A, F, E>(
    worker_id: usize,
    init_fn: &F,
    init_args: A,
    jobs: Receiver<Job<S>>,
    ready: Sender<ReadySignal>,
) where
    F: Fn(A) -> Result<S, E>,
    E: std::fmt::Display,
{
    let span = info_span!("worker", worker_id);
    let _entered = span.enter();

    let state = match panic::catch_unwind(AssertUnwindSafe(|| init_fn(init_args))) {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => {
            let _ = ready.send((worker_id, Err(e.to_string())));
            return;
        },
        Err(payload) => {
            let _ = ready.send((worker_id, Err(panic_message(payload.as_ref()))));
            return;
        },
    };
    if ready.send((worker_id, Ok(()))).is_err() {
        return;
    }
    drop(ready);

    let mut chunks = 0u64;
    for job in jobs.iter() {
        job(&state);
        chunks += 1;
    }
    debug!(chunks, "Worker exiting");
}

fn dispatch<S, T, R, F, It>(
    mut items: It,
    chunk_size: usize,
    job_tx: Sender<Job<S>>,
    work_fn: Arc<F>,
    result_tx: Sender<Result<R, TaskPanic<T>>>,
) -> u64
where
    S: 'static,
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(&S, &T) -> R + Send + Sync + 'static,
    It: Iterator<Item = T>,
{
    let mut submitted = 0u64;
    loop {
        let chunk: Vec<T> = items.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let len = chunk.len() as u64;

        let work_fn = Arc::clone(&work_fn);
        let results = result_tx.clone();
        let job: Job<S> = Box::new(move |state: &S| {
            for item in chunk {
                let result = panic::catch_unwind(AssertUnwindSafe(|| work_fn(state, &item)))
                    .map_err(|payload| TaskPanic {
                        item,
                        message: panic_message(payload.as_ref()),
                    });
                // A dropped receiver only means nobody is listening any more
                let _ = results.send(result);
            }
        });

        if job_tx.send(job).is_err() {
            warn!(submitted, "Worker pool closed during dispatch");
            break;
        }
        submitted += len;
        trace!(submitted, "Dispatched chunk");
    }
    submitted
}

/// Results of [`WorkerPool::map_unordered`], in arrival order
pub struct Unordered<T, R> {
    results: Receiver<Result<R, TaskPanic<T>>>,
    dispatcher: Option<JoinHandle<u64>>,
    submitted: Option<u64>,
    received: u64,
}

impl<T, R> Unordered<T, R> {
    /// Results yielded so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Items handed to workers; known once the iterator is exhausted
    pub fn submitted(&self) -> Option<u64> {
        self.submitted
    }

    fn finish_dispatch(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            match handle.join() {
                Ok(submitted) => self.submitted = Some(submitted),
                Err(_) => warn!("Dispatcher terminated abnormally"),
            }
        }
    }
}

impl<T, R> Iterator for Unordered<T, R> {
    type Item = Result<R, TaskPanic<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.results.recv() {
            Ok(result) => {
                self.received += 1;
                Some(result)
            },
            Err(_) => {
                self.finish_dispatch();
                None
            },
        }
    }
}

impl<T, R> FusedIterator for Unordered<T, R> {}
