//! Export session state machine.
//!
//! Each export runs on its own tokio task, which exclusively owns the
//! reader, the writer, both track endpoints and the caller callbacks.
//! Callers talk to it through a command channel and observe it through a
//! watch channel carrying [`SessionSnapshot`].
//!
//! ```text
//! Idle -> Setup -> Pumping -> Finishing -> Completed
//!            \        \           \------> Failed
//!             \        \-----------------> Cancelled
//!              \-------------------------> Failed (setup)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vexport_common::time::MediaTime;
use vexport_media_core::{
    Asset, AssetReader, AssetWriter, EngineError, MediaEngine, MediaType, PixelBufferAdaptor,
    ReaderOutputSpec, ReaderStatus, WriterInput, WriterStatus,
};

use crate::config::{ExportConfiguration, ValidatedExport};
use crate::error::{ExportError, ExportResult};
use crate::join::{JoinStep, JoinSummary, PumpJoin, TrackCompletion};
use crate::pump::{
    pump_while_ready, ProgressHandler, ProgressTracker, PumpContext, PumpOutcome, RenderHandler,
    TrackEndpoint,
};
use crate::status::{resolve, ExportStatus, FinalState};
use crate::transform::build_video_composition;

/// Receives the final outcome of an export, once.
pub type CompletionHandler = Box<dyn FnOnce(ExportResult<ExportStatus>) + Send>;

/// Requests sent to a running export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Cancel,
}

/// Observable state of the most recent export on a session.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SessionSnapshot {
    pub status: ExportStatus,
    pub progress: f32,
    /// Last video presentation time, relative to the export start.
    pub last_presentation_time: MediaTime,
    pub(crate) generation: u64,
}

/// Caller hooks for one export.
pub(crate) struct Callbacks {
    pub progress: Option<ProgressHandler>,
    pub render: Option<RenderHandler>,
    pub completion: CompletionHandler,
}

/// Mutable state owned by the export task.
struct SessionState {
    reader: Option<Box<dyn AssetReader>>,
    writer: Option<Box<dyn AssetWriter>>,
    adaptor: Option<Box<dyn PixelBufferAdaptor>>,
    video: Option<TrackEndpoint>,
    audio: Option<TrackEndpoint>,
    progress: ProgressTracker,
    last_presentation_time: MediaTime,
    output_path: Option<PathBuf>,
    render: Option<RenderHandler>,
    completion: Option<CompletionHandler>,
}

impl SessionState {
    fn new(callbacks: Callbacks) -> Self {
        Self {
            reader: None,
            writer: None,
            adaptor: None,
            video: None,
            audio: None,
            progress: ProgressTracker::new(MediaTime::ZERO, 0.0, callbacks.progress),
            last_presentation_time: MediaTime::ZERO,
            output_path: None,
            render: callbacks.render,
            completion: Some(callbacks.completion),
        }
    }

    /// Drop every engine handle and callback.
    fn clear(&mut self) {
        self.video = None;
        self.audio = None;
        self.adaptor = None;
        self.reader = None;
        self.writer = None;
        self.render = None;
        self.completion = None;
        self.progress = ProgressTracker::idle();
    }

    /// Cancel whichever of reader and writer is still active.
    fn cancel_engine(&mut self) {
        if let Some(reader) = self.reader.as_mut() {
            if reader.status() == ReaderStatus::Reading {
                reader.cancel_reading();
            }
        }
        if let Some(writer) = self.writer.as_mut() {
            if writer.status() == WriterStatus::Writing {
                writer.cancel_writing();
            }
        }
    }

    fn writer_status(&self) -> ExportStatus {
        self.writer
            .as_ref()
            .map_or(ExportStatus::Unknown, |w| ExportStatus::from(w.status()))
    }
}

/// How the pumping phase ended.
enum PumpEnd {
    Joined(JoinSummary),
    Cancelled,
}

/// What woke the worker.
enum Wake {
    Command(Command),
    Ready(MediaType),
}

/// The task driving one export.
pub(crate) struct ExportWorker {
    engine: Arc<dyn MediaEngine>,
    config: ExportConfiguration,
    state: SessionState,
    commands: Option<mpsc::UnboundedReceiver<Command>>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    generation: u64,
    cancel_requested: bool,
}

impl ExportWorker {
    pub(crate) fn new(
        engine: Arc<dyn MediaEngine>,
        config: ExportConfiguration,
        callbacks: Callbacks,
        commands: mpsc::UnboundedReceiver<Command>,
        snapshot: Arc<watch::Sender<SessionSnapshot>>,
        generation: u64,
    ) -> Self {
        Self {
            engine,
            config,
            state: SessionState::new(callbacks),
            commands: Some(commands),
            snapshot,
            generation,
            cancel_requested: false,
        }
    }

    /// Run the export to completion and deliver the outcome.
    ///
    /// `previous` is the task of the export this one replaced; it must have
    /// finished, including removing its partial output, before setup begins.
    pub(crate) async fn run(mut self, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                tracing::warn!(error = %e, "Replaced export task did not finish cleanly");
            }
        }
        if self.take_pending_cancel() {
            tracing::info!("Export cancelled before setup");
            self.cancel_requested = true;
            self.complete(Err(ExportError::Cancelled));
            return;
        }

        tracing::info!(
            engine = self.engine.name(),
            output = ?self.config.output_path,
            "Starting export"
        );

        let join = match self.setup() {
            Ok(join) => join,
            Err(err) => {
                tracing::warn!(error = %err, "Export setup failed");
                self.complete(Err(err));
                return;
            }
        };

        self.publish(|s| s.status = ExportStatus::Exporting);
        let end = self.pump(join).await;
        let result = self.finish(end).await;
        self.complete(result);
    }

    /// Only used when no runtime is available to run the worker.
    pub(crate) fn fail_without_runtime(mut self) {
        self.complete(Err(ExportError::setup("no tokio runtime to run the export")));
    }

    fn take_pending_cancel(&mut self) -> bool {
        matches!(
            self.commands.as_mut().map(|commands| commands.try_recv()),
            Some(Ok(Command::Cancel))
        )
    }

    fn setup(&mut self) -> ExportResult<PumpJoin> {
        let validated = self.config.validate()?;
        let asset = validated.asset.clone();

        let mut reader = self.engine.create_reader(asset.clone())?;
        let mut writer = self
            .engine
            .create_writer(&validated.output_path, validated.container)?;
        self.state.output_path = Some(validated.output_path.clone());

        reader.set_time_range(self.config.time_range);
        writer.set_should_optimize_for_network_use(self.config.optimize_for_network_use);
        writer.set_metadata(self.config.metadata.clone());

        self.state.reader = Some(reader);
        self.state.writer = Some(writer);

        self.state.video = self.wire_video(&validated)?;
        self.state.audio = self.wire_audio(asset.as_ref())?;
        if self.state.video.is_none() && self.state.audio.is_none() {
            return Err(ExportError::setup("source has no audio or video tracks"));
        }

        let (Some(reader), Some(writer)) = (self.state.reader.as_mut(), self.state.writer.as_mut())
        else {
            return Err(ExportError::setup("engine handles missing"));
        };
        if !reader.start_reading() {
            return Err(start_failure("reader", reader.error()));
        }
        if !writer.start_writing() {
            return Err(start_failure("writer", writer.error()));
        }
        writer.start_session(self.config.time_range.start);

        self.state.progress.restart(
            self.config.time_range.start,
            nominal_duration_seconds(&self.config, asset.as_ref()),
        );

        tracing::info!(
            video = self.state.video.is_some(),
            audio = self.state.audio.is_some(),
            rendering = self.state.adaptor.is_some(),
            "Export pipeline ready"
        );
        Ok(PumpJoin::new(
            self.state.video.is_some(),
            self.state.audio.is_some(),
        ))
    }

    fn wire_video(&mut self, validated: &ValidatedExport) -> ExportResult<Option<TrackEndpoint>> {
        let tracks = validated.asset.tracks(MediaType::Video);
        let Some(first) = tracks.first() else {
            return Ok(None);
        };
        let (Some(reader), Some(writer)) = (self.state.reader.as_mut(), self.state.writer.as_mut())
        else {
            return Ok(None);
        };

        let composition = match &self.config.video_composition {
            Some(composition) => composition.clone(),
            None => {
                let plan = build_video_composition(
                    first,
                    validated.asset.duration(),
                    &validated.video_output_settings,
                    validated.target_size,
                )?;
                tracing::debug!(
                    render_size = ?plan.geometry.render_size,
                    rotation = plan.geometry.rotation_degrees,
                    frame_rate = plan.frame_rate,
                    "Computed video composition"
                );
                plan.composition
            }
        };

        let output = reader
            .add_output(ReaderOutputSpec {
                media_type: MediaType::Video,
                tracks,
                settings: self.config.video_input_settings.clone(),
                video_composition: Some(composition),
                audio_mix: None,
                always_copies_sample_data: false,
            })?
            .ok_or_else(|| ExportError::setup("reader cannot add a video output"))?;

        if !writer.can_apply_output_settings(&validated.video_output_settings, MediaType::Video) {
            return Err(ExportError::setup(
                "writer cannot apply the video output settings",
            ));
        }
        let mut input = writer
            .add_input(
                MediaType::Video,
                Some(validated.video_output_settings.clone()),
            )?
            .ok_or_else(|| ExportError::setup("writer cannot add a video input"))?;
        input.set_expects_real_time_data(self.config.expects_real_time_data);

        if self.state.render.is_some() {
            self.state.adaptor = input.pixel_buffer_adaptor(self.config.video_input_settings.as_ref());
        }
        Ok(Some(TrackEndpoint::new(output, input)))
    }

    fn wire_audio(&mut self, asset: &dyn Asset) -> ExportResult<Option<TrackEndpoint>> {
        let tracks = asset.tracks(MediaType::Audio);
        if tracks.is_empty() {
            return Ok(None);
        }
        let (Some(reader), Some(writer)) = (self.state.reader.as_mut(), self.state.writer.as_mut())
        else {
            return Ok(None);
        };

        let Some(output) = reader.add_output(ReaderOutputSpec {
            media_type: MediaType::Audio,
            tracks,
            settings: None,
            video_composition: None,
            audio_mix: self.config.audio_mix.clone(),
            always_copies_sample_data: false,
        })?
        else {
            return Err(ExportError::setup("reader cannot add an audio output"));
        };
        let mut input: Box<dyn WriterInput> = writer
            .add_input(MediaType::Audio, self.config.audio_output_settings.clone())?
            .ok_or_else(|| ExportError::setup("writer cannot add an audio input"))?;
        input.set_expects_real_time_data(self.config.expects_real_time_data);
        Ok(Some(TrackEndpoint::new(output, input)))
    }

    async fn pump(&mut self, mut join: PumpJoin) -> PumpEnd {
        // Tracks take turns being polled first so an always-ready input
        // cannot starve the other one.
        let mut audio_first = false;
        loop {
            let wake = {
                let video = self
                    .state
                    .video
                    .as_ref()
                    .filter(|_| !join.is_done(MediaType::Video))
                    .map(|e| e.input.as_ref());
                let audio = self
                    .state
                    .audio
                    .as_ref()
                    .filter(|_| !join.is_done(MediaType::Audio))
                    .map(|e| e.input.as_ref());
                let [(first_type, first), (second_type, second)] = if audio_first {
                    [(MediaType::Audio, audio), (MediaType::Video, video)]
                } else {
                    [(MediaType::Video, video), (MediaType::Audio, audio)]
                };
                tokio::select! {
                    biased;
                    command = next_command(&mut self.commands) => Wake::Command(command),
                    _ = wait_ready(first) => Wake::Ready(first_type),
                    _ = wait_ready(second) => Wake::Ready(second_type),
                }
            };

            let media_type = match wake {
                Wake::Command(Command::Cancel) => {
                    tracing::info!("Export cancelled while pumping");
                    self.cancel_requested = true;
                    self.state.cancel_engine();
                    return PumpEnd::Cancelled;
                }
                Wake::Ready(media_type) => media_type,
            };
            audio_first = media_type == MediaType::Video;

            let outcome = self.pump_track(media_type);
            self.publish_progress();

            let step = match outcome {
                PumpOutcome::Continue => {
                    tokio::task::yield_now().await;
                    continue;
                }
                PumpOutcome::Drained => join.report(media_type, TrackCompletion::Drained),
                PumpOutcome::Failed => {
                    tracing::warn!(track = %media_type, "Append rejected, stopping track");
                    join.report(media_type, TrackCompletion::Failed)
                }
            };

            match step {
                JoinStep::Pending => {}
                JoinStep::CancelCounterpart(other) => {
                    tracing::info!(track = %other, "Stopping counterpart track");
                    if let JoinStep::Joined(summary) =
                        join.report(other, TrackCompletion::Cancelled)
                    {
                        return PumpEnd::Joined(summary);
                    }
                }
                JoinStep::Joined(summary) => return PumpEnd::Joined(summary),
            }
        }
    }

    fn pump_track(&mut self, media_type: MediaType) -> PumpOutcome {
        let state = &mut self.state;
        let endpoint = match media_type {
            MediaType::Video => state.video.as_mut(),
            MediaType::Audio => state.audio.as_mut(),
        };
        let Some(endpoint) = endpoint else {
            return PumpOutcome::Drained;
        };
        let mut ctx = PumpContext {
            progress: &mut state.progress,
            render: state.render.as_ref(),
            adaptor: state.adaptor.as_mut(),
            last_presentation_time: &mut state.last_presentation_time,
        };
        tracing::debug!(track = %media_type, "Pump woke");
        pump_while_ready(endpoint, &mut ctx)
    }

    async fn finish(&mut self, end: PumpEnd) -> ExportResult<ExportStatus> {
        let pumps = match end {
            PumpEnd::Cancelled => None,
            PumpEnd::Joined(summary) => Some(summary),
        };

        if let Some(summary) = pumps {
            let reader_status = self.state.reader.as_ref().map(|r| r.status());
            let writer_status = self.state.writer.as_ref().map(|w| w.status());

            if writer_status == Some(WriterStatus::Failed) {
                tracing::warn!("Writer failed, cancelling reader");
                self.state.cancel_engine();
            } else if reader_status == Some(ReaderStatus::Failed) {
                tracing::warn!("Reader failed, cancelling writer");
                self.state.cancel_engine();
            } else if summary.any_failed() {
                tracing::warn!("Track pump failed, cancelling reader and writer");
                self.state.cancel_engine();
            } else if let Some(writer) = self.state.writer.as_mut() {
                tracing::info!("Finishing export");
                let cancelled = tokio::select! {
                    biased;
                    _ = next_command(&mut self.commands) => true,
                    _ = writer.finish_writing() => false,
                };
                if cancelled {
                    tracing::info!("Export cancelled while finishing");
                    self.cancel_requested = true;
                    self.state.cancel_engine();
                }
            }
        }

        resolve(&FinalState {
            cancel_requested: self.cancel_requested,
            reader: self.state.reader.as_ref().map(|r| (r.status(), r.error())),
            writer: self.state.writer.as_ref().map(|w| (w.status(), w.error())),
            pumps,
        })
    }

    /// Deliver the outcome, once, and release the session state.
    fn complete(&mut self, result: ExportResult<ExportStatus>) {
        let wrote = self.state.writer.is_some();
        let status = match &result {
            Ok(_) => {
                self.state.progress.complete();
                self.state.writer_status()
            }
            Err(err) => {
                self.state.cancel_engine();
                self.remove_partial_output();
                if !wrote {
                    ExportStatus::Unknown
                } else if err.is_cancelled() {
                    ExportStatus::Cancelled
                } else {
                    ExportStatus::Failed
                }
            }
        };

        let progress = self.state.progress.fraction();
        let last = self.state.last_presentation_time;
        self.publish(|s| {
            s.status = status;
            s.progress = progress;
            s.last_presentation_time = last;
        });

        match &result {
            Ok(status) => tracing::info!(?status, "Export finished"),
            Err(err) => tracing::info!(error = %err, "Export ended without output"),
        }
        if let Some(completion) = self.state.completion.take() {
            completion(result);
        }
        self.state.clear();
    }

    fn remove_partial_output(&self) {
        let Some(path) = &self.state.output_path else {
            return;
        };
        if !path.exists() {
            return;
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove partial output"
            ),
        }
    }

    fn publish_progress(&self) {
        let progress = self.state.progress.fraction();
        let last = self.state.last_presentation_time;
        self.publish(|s| {
            s.progress = progress;
            s.last_presentation_time = last;
        });
    }

    /// Update the snapshot unless a newer export on the session replaced it.
    fn publish(&self, update: impl FnOnce(&mut SessionSnapshot)) {
        let generation = self.generation;
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }
            update(snapshot);
            true
        });
    }
}

fn start_failure(side: &str, error: Option<EngineError>) -> ExportError {
    match error {
        Some(error) => ExportError::setup(format!("{side} failed to start: {error}")),
        None => ExportError::setup(format!("{side} failed to start")),
    }
}

/// Seconds of source covered by the export.
///
/// A bounded range gives its own duration; an unbounded one runs from its
/// start to the end of the asset.
fn nominal_duration_seconds(config: &ExportConfiguration, asset: &dyn Asset) -> f64 {
    let range = config.time_range;
    let seconds = if range.duration.is_numeric() {
        range.duration.seconds()
    } else {
        (asset.duration() - range.start).seconds()
    };
    if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    }
}

/// Next command, or never once every sender is gone.
async fn next_command(commands: &mut Option<mpsc::UnboundedReceiver<Command>>) -> Command {
    if let Some(receiver) = commands.as_mut() {
        if let Some(command) = receiver.recv().await {
            return command;
        }
        *commands = None;
    }
    std::future::pending().await
}

/// Resolves when `input` can take more data; never for an absent input.
async fn wait_ready(input: Option<&dyn WriterInput>) {
    match input {
        Some(input) => input.ready_for_more_data().await,
        None => std::future::pending().await,
    }
}
