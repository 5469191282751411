//! Render Worker
//!
//! A single thread owns the GPU: callers talk to it through channels. The
//! request inbox is latest-wins — submitting while a render is in flight
//! supersedes anything not yet started, and the in-flight render observes
//! the change through its generation token and stops at the next kernel
//! boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::data::{Project, RenderElement};
use crate::engine::{Engine, RenderImage};
use crate::errors::{FlareError, Result};
use crate::storage::Storage;

/// Cooperative cancellation: a render is stale once a newer generation
/// was submitted.
#[derive(Clone)]
pub struct CancelToken {
    submitted: Arc<AtomicU64>,
    generation: u64,
}

impl CancelToken {
    /// A token that never cancels.
    #[must_use]
    pub fn none() -> Self {
        Self {
            submitted: Arc::new(AtomicU64::new(0)),
            generation: 0,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.submitted.load(Ordering::Acquire) != self.generation
    }

    /// Errors with [`FlareError::Cancelled`] when superseded.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FlareError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Completed,
    Cancelled,
    Failed,
}

pub enum EngineEvent {
    ImageRendered(RenderImage),
    Progress { generation: u64, progress: f32 },
    Finished {
        generation: u64,
        status: RenderStatus,
        message: Option<String>,
    },
}

pub struct RenderRequest {
    pub project: Project,
    pub elements: Vec<RenderElement>,
}

pub struct RenderWorker {
    requests: flume::Sender<(u64, RenderRequest)>,
    events: flume::Receiver<EngineEvent>,
    submitted: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Starts the worker thread. The compute context is created lazily on
    /// the worker from the first request's device string.
    #[must_use]
    pub fn spawn(storage: Storage) -> Self {
        let (request_tx, request_rx) = flume::unbounded::<(u64, RenderRequest)>();
        let (event_tx, event_rx) = flume::unbounded();
        let submitted = Arc::new(AtomicU64::new(0));

        let worker_submitted = Arc::clone(&submitted);
        let handle = std::thread::Builder::new()
            .name("lensflare-render".into())
            .spawn(move || worker_loop(&request_rx, &event_tx, &worker_submitted, storage))
            .expect("failed to spawn render worker");

        Self {
            requests: request_tx,
            events: event_rx,
            submitted,
            handle: Some(handle),
        }
    }

    /// Submits a render, superseding any unserviced request. Returns the
    /// request's generation.
    pub fn submit(&self, request: RenderRequest) -> u64 {
        let generation = self.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        self.requests.send((generation, request)).ok();
        generation
    }

    #[must_use]
    pub fn events(&self) -> &flume::Receiver<EngineEvent> {
        &self.events
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        // closing the channel ends the loop
        let (tx, _rx) = flume::unbounded();
        self.requests = tx;
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn worker_loop(
    requests: &flume::Receiver<(u64, RenderRequest)>,
    events: &flume::Sender<EngineEvent>,
    submitted: &Arc<AtomicU64>,
    storage: Storage,
) {
    let mut engine: Option<Engine> = None;
    let mut device = String::new();
    let storage = Arc::new(storage);

    while let Ok(next) = requests.recv() {
        // latest wins: drain everything already queued, reporting each
        // superseded request as cancelled
        let (generation, request) = {
            let mut latest = next;
            while let Ok(newer) = requests.try_recv() {
                events
                    .send(EngineEvent::Finished {
                        generation: latest.0,
                        status: RenderStatus::Cancelled,
                        message: None,
                    })
                    .ok();
                latest = newer;
            }
            latest
        };

        if generation != submitted.load(Ordering::Acquire) {
            events
                .send(EngineEvent::Finished {
                    generation,
                    status: RenderStatus::Cancelled,
                    message: None,
                })
                .ok();
            continue;
        }

        // device change: drain the queue, destroy the context, rebuild
        if engine.is_some() && device != request.project.render.device {
            engine = None;
        }
        if engine.is_none() {
            device = request.project.render.device.clone();
            match Engine::new(&device, Arc::clone(&storage)) {
                Ok(built) => engine = Some(built),
                Err(e) => {
                    log::error!("{e}");
                    events
                        .send(EngineEvent::Finished {
                            generation,
                            status: RenderStatus::Failed,
                            message: Some(e.to_string()),
                        })
                        .ok();
                    continue;
                }
            }
        }
        let engine_ref = engine.as_mut().expect("engine initialized above");

        let token = CancelToken {
            submitted: Arc::clone(submitted),
            generation,
        };
        let result = engine_ref.render(
            &request.project,
            &request.elements,
            &token,
            &mut |image| {
                events.send(EngineEvent::ImageRendered(image)).ok();
            },
            &mut |progress| {
                events
                    .send(EngineEvent::Progress {
                        generation,
                        progress,
                    })
                    .ok();
            },
        );

        let (status, message) = match result {
            Ok(()) => (RenderStatus::Completed, None),
            Err(FlareError::Cancelled) => (RenderStatus::Cancelled, None),
            Err(e) => {
                log::error!("{e}");
                if e.is_fatal() {
                    engine = None;
                }
                (RenderStatus::Failed, Some(e.to_string()))
            }
        };
        events
            .send(EngineEvent::Finished {
                generation,
                status,
                message,
            })
            .ok();
    }
}
