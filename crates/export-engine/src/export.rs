//! Caller-facing export session.
//!
//! Three ways to run the same export:
//!
//! - [`ExportSession::export`] awaits the final status.
//! - [`ExportSession::export_progress`] returns a [`ProgressStream`] of
//!   progress events ending with completion or an error.
//! - [`ExportSession::export_with_handlers`] reports through a progress
//!   callback and a completion callback.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use vexport_common::time::MediaTime;
use vexport_media_core::MediaEngine;

use crate::config::ExportConfiguration;
use crate::error::{ExportError, ExportResult};
use crate::pump::{ProgressHandler, RenderHandler};
use crate::session::{Callbacks, Command, CompletionHandler, ExportWorker, SessionSnapshot};
use crate::status::ExportStatus;

/// One item of a [`ProgressStream`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportEvent {
    /// Progress fraction in `[0, 1]`.
    Progress(f32),
    /// The export finished; this is the last item.
    Completed(ExportStatus),
}

/// The export currently owning the session's destination.
struct ActiveExport {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

/// Exports one configured source to one destination.
///
/// A session runs at most one export at a time. Starting another export
/// cancels the one in flight.
pub struct ExportSession {
    engine: Arc<dyn MediaEngine>,
    config: ExportConfiguration,
    render: Option<RenderHandler>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    active: Mutex<Option<ActiveExport>>,
}

impl ExportSession {
    pub fn new(engine: Arc<dyn MediaEngine>, config: ExportConfiguration) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            engine,
            config,
            render: None,
            snapshot: Arc::new(snapshot),
            active: Mutex::new(None),
        }
    }

    pub fn configuration(&self) -> &ExportConfiguration {
        &self.config
    }

    /// Render every video frame through `handler` instead of passing source
    /// frames to the encoder.
    pub fn set_render_handler(&mut self, handler: RenderHandler) {
        self.render = Some(handler);
    }

    /// Run the export and wait for its final status.
    pub async fn export(&self) -> ExportResult<ExportStatus> {
        let (tx, rx) = oneshot::channel();
        self.start(
            None,
            Box::new(move |result: ExportResult<ExportStatus>| {
                let _ = tx.send(result);
            }),
        );
        rx.await
            .unwrap_or_else(|_| Err(ExportError::setup("export stopped without completing")))
    }

    /// Run the export and stream its progress.
    ///
    /// Dropping the stream before its last item cancels the export.
    pub fn export_progress(&self) -> ProgressStream {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let progress: ProgressHandler = Arc::new(move |fraction: f32| {
            let _ = progress_tx.send(fraction);
        });
        let commands = self.start(
            Some(progress),
            Box::new(move |result: ExportResult<ExportStatus>| {
                let _ = completion_tx.send(result);
            }),
        );
        ProgressStream {
            progress: progress_rx,
            completion: completion_rx,
            commands,
            done: false,
        }
    }

    /// Run the export, reporting through callbacks.
    ///
    /// `completion` is invoked exactly once, from the export task.
    pub fn export_with_handlers(
        &self,
        progress: Option<ProgressHandler>,
        completion: impl FnOnce(ExportResult<ExportStatus>) + Send + 'static,
    ) {
        self.start(progress, Box::new(completion));
    }

    /// Ask the running export, if any, to stop.
    ///
    /// The export ends as [`ExportError::Cancelled`] and its partial output is
    /// removed. Does nothing once the export has finished.
    pub fn cancel(&self) {
        if let Some(active) = self.lock_active().as_ref() {
            let _ = active.commands.send(Command::Cancel);
        }
    }

    /// Status of the current or last export.
    pub fn status(&self) -> ExportStatus {
        self.snapshot.borrow().status
    }

    /// Progress of the current or last export, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.snapshot.borrow().progress
    }

    /// Last video presentation time handled, relative to the export start.
    pub fn last_presentation_time(&self) -> MediaTime {
        self.snapshot.borrow().last_presentation_time
    }

    /// Watch the session snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    fn start(
        &self,
        progress: Option<ProgressHandler>,
        completion: CompletionHandler,
    ) -> mpsc::UnboundedSender<Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut active = self.lock_active();

        // The new export waits for the replaced one to release the destination.
        let previous = active.take().and_then(|previous| {
            if !previous.commands.is_closed() {
                tracing::warn!("Export already running on this session, cancelling it");
                let _ = previous.commands.send(Command::Cancel);
            }
            previous.task
        });

        let mut generation = 0;
        self.snapshot.send_modify(|snapshot| {
            generation = snapshot.generation + 1;
            *snapshot = SessionSnapshot {
                generation,
                ..SessionSnapshot::default()
            };
        });

        let worker = ExportWorker::new(
            self.engine.clone(),
            self.config.clone(),
            Callbacks {
                progress,
                render: self.render.clone(),
                completion,
            },
            rx,
            self.snapshot.clone(),
            generation,
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(worker.run(previous));
                *active = Some(ActiveExport {
                    commands: tx.clone(),
                    task: Some(task),
                });
            }
            Err(_) => {
                *active = Some(ActiveExport {
                    commands: tx.clone(),
                    task: None,
                });
                drop(active);
                worker.fail_without_runtime();
            }
        }
        tx
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveExport>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Progress events of one export, ending with its outcome.
pub struct ProgressStream {
    progress: mpsc::UnboundedReceiver<f32>,
    completion: oneshot::Receiver<ExportResult<ExportStatus>>,
    commands: mpsc::UnboundedSender<Command>,
    done: bool,
}

impl ProgressStream {
    /// Cancel the export behind this stream.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

impl Stream for ProgressStream {
    type Item = ExportResult<ExportEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        if let Poll::Ready(Some(fraction)) = this.progress.poll_recv(cx) {
            return Poll::Ready(Some(Ok(ExportEvent::Progress(fraction))));
        }

        match Pin::new(&mut this.completion).poll(cx) {
            Poll::Ready(outcome) => {
                this.done = true;
                Poll::Ready(match outcome {
                    Ok(Ok(status)) => Some(Ok(ExportEvent::Completed(status))),
                    Ok(Err(err)) => Some(Err(err)),
                    Err(_) => None,
                })
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.commands.send(Command::Cancel);
        }
    }
}
