//! Bounded pool of analysis workers with a FIFO overflow queue.
//!
//! Each worker is a dedicated thread owning one [`Kernel`]. A submission
//! claims an idle worker or waits in the queue; a worker finishing a task
//! pulls the oldest queued task before it is marked idle, so no worker sits
//! idle while work is queued.

use super::{Kernel, SpectrogramKernel, WorkerRequest, WorkerResponse};
use crate::dsp::SampleChunk;
use crate::dsp::spectrogram::SpectrogramOptions;
use crate::error::{PipelineError, Result};
use async_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Upper bound on pooled workers; each one holds its own FFT scratch space.
pub const MAX_WORKERS: usize = 4;
const FALLBACK_PARALLELISM: usize = 4;
const WORKER_THREAD_PREFIX: &str = "shengpu-worker";

struct Task {
    sequence: u64,
    request: WorkerRequest,
    reply: Sender<WorkerResponse>,
}

struct WorkerSlot {
    busy: bool,
    jobs: Sender<Task>,
}

struct PoolState {
    slots: Vec<WorkerSlot>,
    queue: VecDeque<Task>,
    next_sequence: u64,
}

impl PoolState {
    /// Marks `worker` idle unless queued work is waiting, in which case the
    /// oldest task is handed straight back to it.
    fn release(&mut self, worker: usize) -> Option<Task> {
        if let Some(task) = self.queue.pop_front() {
            return Some(task);
        }
        if let Some(slot) = self.slots.get_mut(worker) {
            slot.busy = false;
        }
        None
    }
}

/// Result handle for one submitted chunk.
#[derive(Debug)]
pub struct PendingAnalysis {
    sequence: u64,
    receiver: Receiver<WorkerResponse>,
}

impl PendingAnalysis {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Non-blocking poll for the cooperative control loop.
    pub fn try_take(&self) -> Option<WorkerResponse> {
        match self.receiver.try_recv() {
            Ok(response) => Some(response),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(PipelineError::Disconnected)),
        }
    }

    pub fn wait(self) -> WorkerResponse {
        self.receiver
            .recv_blocking()
            .unwrap_or(Err(PipelineError::Disconnected))
    }

    pub async fn recv(self) -> WorkerResponse {
        self.receiver
            .recv()
            .await
            .unwrap_or(Err(PipelineError::Disconnected))
    }
}

pub struct Dispatcher {
    state: Arc<Mutex<PoolState>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.worker_count())
            .field("busy", &self.busy_count())
            .field("queued", &self.queued_count())
            .finish()
    }
}

impl Dispatcher {
    /// Spawns `min(available parallelism, max_workers)` spectrogram workers.
    pub fn initialize(max_workers: usize, options: &SpectrogramOptions) -> Result<Self> {
        let available = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(FALLBACK_PARALLELISM);
        let count = available.min(max_workers);
        if count == 0 {
            return Err(PipelineError::ResourceExhaustion(format!(
                "no workers available (parallelism {available}, cap {max_workers})"
            )));
        }
        info!("[pool] starting {count} workers (parallelism {available}, cap {max_workers})");
        Self::with_kernels((0..count).map(|_| SpectrogramKernel::preloaded(options)))
    }

    pub fn with_kernels<K, I>(kernels: I) -> Result<Self>
    where
        K: Kernel,
        I: IntoIterator<Item = K>,
    {
        let state = Arc::new(Mutex::new(PoolState {
            slots: Vec::new(),
            queue: VecDeque::new(),
            next_sequence: 0,
        }));
        let mut workers = Vec::new();

        for (id, kernel) in kernels.into_iter().enumerate() {
            let (jobs, inbox) = async_channel::unbounded();
            let worker_state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(format!("{WORKER_THREAD_PREFIX}-{id}"))
                .spawn(move || worker_loop(id, kernel, inbox, worker_state))
                .map_err(|err| {
                    PipelineError::ResourceExhaustion(format!("failed to spawn worker {id}: {err}"))
                })?;
            state.lock().slots.push(WorkerSlot { busy: false, jobs });
            workers.push(handle);
        }

        if workers.is_empty() {
            return Err(PipelineError::ResourceExhaustion(
                "worker pool needs at least one kernel".into(),
            ));
        }

        Ok(Self { state, workers })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn busy_count(&self) -> usize {
        self.state.lock().slots.iter().filter(|slot| slot.busy).count()
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Queues `chunk` for analysis. The chunk's sample buffer is moved into
    /// the worker and comes back in the response.
    pub fn submit(&self, chunk: SampleChunk, options: SpectrogramOptions) -> PendingAnalysis {
        self.submit_request(WorkerRequest::compute(chunk, options))
    }

    pub fn submit_request(&self, request: WorkerRequest) -> PendingAnalysis {
        let (reply, receiver) = async_channel::bounded(1);
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let task = Task {
            sequence,
            request,
            reply,
        };

        match state.slots.iter().position(|slot| !slot.busy) {
            Some(worker) => {
                let slot = &mut state.slots[worker];
                slot.busy = true;
                if let Err(err) = slot.jobs.try_send(task) {
                    slot.busy = false;
                    let task = err.into_inner();
                    error!("[pool] worker {worker} is gone; failing task {sequence}");
                    let _ = task.reply.try_send(Err(PipelineError::WorkerFault {
                        worker,
                        reason: "worker thread is not running".into(),
                    }));
                } else {
                    debug!("[pool] task {sequence} dispatched to worker {worker}");
                }
            }
            None => {
                debug!(
                    "[pool] task {sequence} queued behind {} pending",
                    state.queue.len()
                );
                state.queue.push_back(task);
            }
        }

        PendingAnalysis { sequence, receiver }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            for task in state.queue.drain(..) {
                let _ = task.reply.try_send(Err(PipelineError::Disconnected));
            }
            for slot in &state.slots {
                slot.jobs.close();
            }
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("[pool] worker thread exited abnormally");
            }
        }
    }
}

fn worker_loop<K: Kernel>(id: usize, mut kernel: K, inbox: Receiver<Task>, state: Arc<Mutex<PoolState>>) {
    while let Ok(mut task) = inbox.recv_blocking() {
        loop {
            let Task {
                sequence,
                request,
                reply,
            } = task;
            let response = run_task(id, &mut kernel, sequence, request);
            let next = state.lock().release(id);
            if reply.try_send(response).is_err() {
                debug!("[pool] result for task {sequence} dropped; caller went away");
            }
            match next {
                Some(queued) => task = queued,
                None => break,
            }
        }
    }
    debug!("[pool] worker {id} shutting down");
}

fn run_task<K: Kernel>(id: usize, kernel: &mut K, sequence: u64, request: WorkerRequest) -> WorkerResponse {
    match panic::catch_unwind(AssertUnwindSafe(|| kernel.handle(request))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => {
            warn!("[pool] task {sequence} failed on worker {id}: {err}");
            Err(err)
        }
        Err(payload) => {
            kernel.recover();
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            error!("[pool] worker {id} faulted on task {sequence}: {reason}");
            Err(PipelineError::WorkerFault { worker: id, reason })
        }
    }
}
