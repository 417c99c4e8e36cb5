//! Per-camera detection thread
//!
//! Each pin camera gets one thread fed through a rendezvous channel, so at
//! most one frame is classified at a time. Every job reads the station
//! configuration through an `ArcSwap` snapshot; replacing the store while a
//! job runs never changes the parameters that job sees.

use arc_swap::ArcSwap;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::camera::CameraIdentity;
use crate::config::Config;
use crate::error::{PinError, Result};
use crate::pipeline::{offline_with_sink, DetectionContext, DetectionSink};

/// A frame to inspect and who asked for it
#[derive(Debug, Clone)]
pub struct Job {
    pub frame: RgbImage,
    pub part: String,
    pub user: Option<String>,
}

/// Frame counters of one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub inspected: AtomicU64,
    pub passed: AtomicU64,
    /// Frames rejected by `try_submit` while a detection was running
    pub dropped: AtomicU64,
    /// Jobs skipped for missing parameters, reference or a shape mismatch
    pub skipped: AtomicU64,
}

pub struct CameraWorker {
    camera: CameraIdentity,
    sender: Option<SyncSender<Job>>,
    handle: Option<JoinHandle<Result<()>>>,
    stats: Arc<WorkerStats>,
}

impl CameraWorker {
    /// Start the detection thread for `camera`, reporting into `sink`.
    pub fn spawn<S>(
        camera: CameraIdentity,
        store: Arc<ArcSwap<Config>>,
        sink: S,
    ) -> std::io::Result<Self>
    where
        S: DetectionSink + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(0);
        let stats = Arc::new(WorkerStats::default());

        let thread_camera = camera.clone();
        let thread_stats = stats.clone();
        let handle = std::thread::Builder::new()
            .name(format!("pins-{}", camera.serial_number))
            .spawn(move || run_worker(thread_camera, store, receiver, sink, thread_stats))?;

        info!(
            "Started worker for camera {} ({} {} {})",
            camera.serial_number, camera.line, camera.location, camera.side
        );

        Ok(Self {
            camera,
            sender: Some(sender),
            handle: Some(handle),
            stats,
        })
    }

    pub fn camera(&self) -> &CameraIdentity {
        &self.camera
    }

    /// Counters shared with the thread; still readable after `shutdown`
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Hand a frame over only if the worker is idle.
    ///
    /// Returns `Ok(false)` when a detection is still running and the frame
    /// was dropped.
    ///
    /// A worker that has stopped is joined and the error that stopped it
    /// is returned.
    pub fn try_submit(&mut self, job: Job) -> Result<bool> {
        let outcome = self.sender()?.try_send(job);
        match outcome {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Camera {} busy, frame dropped", self.camera.serial_number);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(self.reap()),
        }
    }

    /// Hand a frame over, waiting until the worker is ready for it.
    ///
    /// A worker that has stopped is joined and the error that stopped it
    /// is returned.
    pub fn submit(&mut self, job: Job) -> Result<()> {
        if self.sender()?.send(job).is_err() {
            return Err(self.reap());
        }
        Ok(())
    }

    /// Close the queue and wait for the thread to finish.
    ///
    /// Returns the error that stopped the worker, if any.
    pub fn shutdown(mut self) -> Result<()> {
        self.sender.take();
        self.join()
    }

    /// Error of a worker whose thread has already left its loop
    fn reap(&mut self) -> PinError {
        self.sender.take();
        match self.join() {
            Err(e) => e,
            Ok(()) => self.stopped(),
        }
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!("Worker thread for camera {} panicked", self.camera.serial_number);
                Err(self.stopped())
            }
        }
    }

    fn sender(&self) -> Result<&SyncSender<Job>> {
        self.sender.as_ref().ok_or_else(|| self.stopped())
    }

    fn stopped(&self) -> PinError {
        PinError::WorkerStopped {
            camera: self.camera.serial_number.clone(),
        }
    }
}

fn run_worker<S: DetectionSink>(
    camera: CameraIdentity,
    store: Arc<ArcSwap<Config>>,
    receiver: Receiver<Job>,
    mut sink: S,
    stats: Arc<WorkerStats>,
) -> Result<()> {
    for job in receiver {
        let config = store.load();

        let Some(params) = config.parameters_for(&camera, &job.part) else {
            warn!("No parameters for part {} on camera {}", job.part, camera.serial_number);
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        let Some(reference) = config.reference_for(&job.part, &camera.line) else {
            warn!("No reference for part {} on line {}", job.part, camera.line);
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        let context = DetectionContext {
            part: job.part.clone(),
            line: camera.line.clone(),
            location: camera.location.clone(),
            side: camera.side,
            reference_side: config.teach.reference_side,
            user: job.user.clone(),
        };

        match offline_with_sink(&job.frame, params, reference, &context, &mut sink) {
            Ok(detection) => {
                stats.inspected.fetch_add(1, Ordering::Relaxed);
                if detection.passed {
                    stats.passed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(PinError::Sink(e)) => {
                error!("Sink failed for camera {}: {}", camera.serial_number, e);
                return Err(PinError::Sink(e));
            }
            Err(e) => {
                warn!("Detection skipped on camera {}: {}", camera.serial_number, e);
                stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    info!(
        "Worker for camera {} stopped after {} detections",
        camera.serial_number,
        stats.inspected.load(Ordering::Relaxed)
    );
    Ok(())
}
