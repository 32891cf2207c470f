//! Reservation center: a fixed pool of workers behind a bounded queue
//!
//! Callers build a [`ReservationRequest`], hand it to
//! [`ReservationCenter::enqueue`], and await the one-shot receiver that came
//! with it. Any free worker pulls the request and passes it to the
//! [`ReservationHandler`], which answers exactly once.
//!
//! # Lifecycle
//!
//! - `Idle`: created, no workers; enqueue fails with `CenterNotInitialized`
//! - `Running`: workers pulling from the queue
//! - `Stopped`: workers gone; enqueue fails with `CenterStopped`
//!
//! Stopping does not drain the queue. A worker finishes the request it has
//! already pulled, then exits; requests still queued at that point are
//! answered with `CenterStopped`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{BookId, MemberId, Reservation};

/// Default number of queued requests before `enqueue` waits
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default worker count
pub const DEFAULT_WORKERS: usize = 5;

// =============================================================================
// Request / response protocol
// =============================================================================

/// Outcome delivered to the caller of a reservation
pub type ReservationOutcome = Result<Reservation>;

/// One reservation attempt, carrying the slot its answer goes to
#[derive(Debug)]
pub struct ReservationRequest {
    /// Correlates log lines for this request across tasks
    pub id: Uuid,
    pub book_id: BookId,
    pub member_id: MemberId,
    respond_to: oneshot::Sender<ReservationOutcome>,
}

impl ReservationRequest {
    /// Create a request and the receiver its single answer arrives on
    pub fn new(
        book_id: BookId,
        member_id: MemberId,
    ) -> (Self, oneshot::Receiver<ReservationOutcome>) {
        let (respond_to, response) = oneshot::channel();
        let request = Self {
            id: Uuid::new_v4(),
            book_id,
            member_id,
            respond_to,
        };
        (request, response)
    }

    /// Deliver the answer, consuming the request
    ///
    /// Returns `false` if the caller stopped waiting.
    pub fn respond(self, outcome: ReservationOutcome) -> bool {
        let delivered = self.respond_to.send(outcome).is_ok();
        if !delivered {
            tracing::warn!(
                request = %self.id,
                book = self.book_id,
                member = self.member_id,
                "reservation caller went away before the answer"
            );
        }
        delivered
    }
}

/// Processes one request; invoked by a worker
pub trait ReservationHandler: Send + Sync + 'static {
    fn handle(&self, request: ReservationRequest);
}

impl<F> ReservationHandler for F
where
    F: Fn(ReservationRequest) + Send + Sync + 'static,
{
    fn handle(&self, request: ReservationRequest) {
        self(request)
    }
}

// =============================================================================
// Center
// =============================================================================

/// Counters kept by the center
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CenterStats {
    /// Requests a worker pulled off the queue
    pub processed: u64,
    /// Requests still queued at shutdown, answered with `CenterStopped`
    pub rejected_on_stop: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    rejected_on_stop: AtomicU64,
}

type Queue = Arc<tokio::sync::Mutex<mpsc::Receiver<ReservationRequest>>>;

enum CenterState {
    Idle,
    Running(Running),
    Stopped,
}

struct Running {
    sender: mpsc::Sender<ReservationRequest>,
    queue: Queue,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// Fixed-size worker pool consuming a bounded request queue
pub struct ReservationCenter {
    worker_count: usize,
    capacity: usize,
    handler: Arc<dyn ReservationHandler>,
    state: Mutex<CenterState>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for ReservationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationCenter")
            .field("worker_count", &self.worker_count)
            .field("capacity", &self.capacity)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ReservationCenter {
    /// Create an idle center; zero workers or capacity are raised to one
    pub fn new(worker_count: usize, capacity: usize, handler: Arc<dyn ReservationHandler>) -> Self {
        Self {
            worker_count: worker_count.max(1),
            capacity: capacity.max(1),
            handler,
            state: Mutex::new(CenterState::Idle),
            counters: Arc::new(Counters::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CenterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state(), CenterState::Running(_))
    }

    pub fn stats(&self) -> CenterStats {
        CenterStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            rejected_on_stop: self.counters.rejected_on_stop.load(Ordering::Relaxed),
        }
    }

    /// Launch the workers
    ///
    /// Must be called from within a tokio runtime. Starting a running
    /// center is a no-op; a stopped center cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::OperationFailed("reservation center needs a tokio runtime".to_string())
        })?;

        let mut state = self.state();
        match *state {
            CenterState::Running(_) => return Ok(()),
            CenterState::Stopped => return Err(Error::CenterStopped),
            CenterState::Idle => {}
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let queue: Queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let (shutdown, _) = watch::channel(false);

        let workers = (0..self.worker_count)
            .map(|index| {
                runtime.spawn(run_worker(
                    index,
                    Arc::clone(&queue),
                    Arc::clone(&self.handler),
                    shutdown.subscribe(),
                    Arc::clone(&self.counters),
                ))
            })
            .collect();

        *state = CenterState::Running(Running {
            sender,
            queue,
            shutdown,
            workers,
        });
        tracing::info!(
            workers = self.worker_count,
            capacity = self.capacity,
            "reservation center started"
        );
        Ok(())
    }

    /// Queue a request, waiting for room if the queue is full
    pub async fn enqueue(&self, request: ReservationRequest) -> Result<()> {
        let sender = self.sender()?;

        tracing::debug!(
            request = %request.id,
            book = request.book_id,
            member = request.member_id,
            "reservation queued"
        );
        sender.send(request).await.map_err(|_| Error::CenterStopped)
    }

    fn sender(&self) -> Result<mpsc::Sender<ReservationRequest>> {
        match &*self.state() {
            CenterState::Idle => Err(Error::CenterNotInitialized),
            CenterState::Stopped => Err(Error::CenterStopped),
            CenterState::Running(running) => Ok(running.sender.clone()),
        }
    }

    /// Signal every worker to exit and wait until they have
    ///
    /// Requests still in the queue are answered with `CenterStopped`.
    /// Calling this more than once is harmless.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, CenterState::Stopped) {
                CenterState::Running(running) => running,
                CenterState::Idle | CenterState::Stopped => return,
            }
        };

        let Running {
            sender,
            queue,
            shutdown,
            workers,
        } = running;

        let _ = shutdown.send(true);
        drop(sender);

        for worker in workers {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "reservation worker ended abnormally");
            }
        }

        let mut receiver = queue.lock().await;
        receiver.close();
        let mut rejected = 0u64;
        while let Ok(request) = receiver.try_recv() {
            request.respond(Err(Error::CenterStopped));
            rejected += 1;
        }
        self.counters
            .rejected_on_stop
            .fetch_add(rejected, Ordering::Relaxed);

        tracing::info!(rejected, "reservation center stopped");
    }
}

async fn run_worker(
    index: usize,
    queue: Queue,
    handler: Arc<dyn ReservationHandler>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    tracing::debug!(worker = index, "reservation worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let request = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            request = next_request(&queue) => request,
        };
        let Some(request) = request else {
            break;
        };

        tracing::debug!(
            worker = index,
            request = %request.id,
            book = request.book_id,
            member = request.member_id,
            "processing reservation"
        );
        counters.processed.fetch_add(1, Ordering::Relaxed);
        handler.handle(request);
    }

    tracing::debug!(worker = index, "reservation worker exiting");
}

async fn next_request(queue: &Queue) -> Option<ReservationRequest> {
    queue.lock().await.recv().await
}
