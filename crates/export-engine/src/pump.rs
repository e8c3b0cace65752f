//! Per-track sample pump.
//!
//! A pump moves samples from one reader output to one writer input while the
//! input reports it is ready for more data. Video samples drive progress and,
//! when a render handler and pixel buffer adaptor are configured, are handed
//! to the caller for rendering into a fresh buffer before being appended.

use std::sync::Arc;

use vexport_common::time::MediaTime;
use vexport_media_core::{MediaType, PixelBuffer, PixelBufferAdaptor, ReaderOutput, WriterInput};

/// Receives the export progress fraction in `[0, 1]`.
pub type ProgressHandler = Arc<dyn Fn(f32) + Send + Sync>;

/// Renders a source frame into a destination buffer at a presentation time
/// relative to the export start.
pub type RenderHandler = Arc<dyn Fn(&PixelBuffer, MediaTime, &mut PixelBuffer) + Send + Sync>;

/// Samples moved per wake before the worker yields.
pub const MAX_BATCH: usize = 64;

/// Result of one pump step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// A sample was appended.
    Continue,
    /// The source is exhausted and the input was marked finished.
    Drained,
    /// An append was rejected.
    Failed,
}

/// A reader output paired with the writer input it feeds.
pub struct TrackEndpoint {
    pub media_type: MediaType,
    pub output: Box<dyn ReaderOutput>,
    pub input: Box<dyn WriterInput>,
}

impl TrackEndpoint {
    pub fn new(output: Box<dyn ReaderOutput>, input: Box<dyn WriterInput>) -> Self {
        Self {
            media_type: input.media_type(),
            output,
            input,
        }
    }
}

impl std::fmt::Debug for TrackEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackEndpoint")
            .field("media_type", &self.media_type)
            .finish_non_exhaustive()
    }
}

/// Monotonic progress over a nominal duration.
pub struct ProgressTracker {
    start: MediaTime,
    duration_seconds: f64,
    fraction: f32,
    handler: Option<ProgressHandler>,
}

impl ProgressTracker {
    pub fn new(start: MediaTime, duration_seconds: f64, handler: Option<ProgressHandler>) -> Self {
        Self {
            start,
            duration_seconds,
            fraction: 0.0,
            handler,
        }
    }

    /// Tracker that reports nothing, for sessions without an export in flight.
    pub fn idle() -> Self {
        Self::new(MediaTime::ZERO, 0.0, None)
    }

    /// Track a new range from zero, keeping the handler.
    pub fn restart(&mut self, start: MediaTime, duration_seconds: f64) {
        self.start = start;
        self.duration_seconds = duration_seconds;
        self.fraction = 0.0;
    }

    pub fn start(&self) -> MediaTime {
        self.start
    }

    pub fn fraction(&self) -> f32 {
        self.fraction
    }

    /// Record a video presentation time and notify the handler.
    ///
    /// A zero duration reports `1.0`. The fraction never decreases.
    pub fn observe(&mut self, elapsed: MediaTime) -> f32 {
        let candidate = if self.duration_seconds <= 0.0 {
            1.0
        } else {
            (elapsed.seconds() / self.duration_seconds) as f32
        };
        if !candidate.is_nan() {
            self.fraction = self.fraction.max(candidate.clamp(0.0, 1.0));
        }
        self.notify();
        self.fraction
    }

    /// Pin progress at exactly `1.0` and notify.
    pub fn complete(&mut self) {
        self.fraction = 1.0;
        self.notify();
    }

    fn notify(&self) {
        if let Some(handler) = &self.handler {
            handler(self.fraction);
        }
    }
}

/// Session state the pump reads and updates.
pub struct PumpContext<'a> {
    pub progress: &'a mut ProgressTracker,
    pub render: Option<&'a RenderHandler>,
    pub adaptor: Option<&'a mut Box<dyn PixelBufferAdaptor>>,
    pub last_presentation_time: &'a mut MediaTime,
}

/// Move at most one sample from `endpoint.output` to `endpoint.input`.
pub fn pump_once(endpoint: &mut TrackEndpoint, ctx: &mut PumpContext<'_>) -> PumpOutcome {
    let Some(sample) = endpoint.output.copy_next_sample() else {
        endpoint.input.mark_as_finished();
        tracing::debug!(track = %endpoint.media_type, "Track drained");
        return PumpOutcome::Drained;
    };

    if endpoint.media_type == MediaType::Video {
        let elapsed = sample.presentation_time - ctx.progress.start();
        *ctx.last_presentation_time = elapsed;
        ctx.progress.observe(elapsed);

        if let (Some(render), Some(adaptor), Some(source)) =
            (ctx.render, ctx.adaptor.as_deref_mut(), sample.image.as_ref())
        {
            if let Some(mut destination) = adaptor.create_pixel_buffer() {
                render(source, elapsed, &mut destination);
                return if adaptor.append(destination, elapsed) {
                    PumpOutcome::Continue
                } else {
                    PumpOutcome::Failed
                };
            }
            tracing::debug!("Pixel buffer pool exhausted, appending source frame");
        }
    }

    if endpoint.input.append(sample) {
        PumpOutcome::Continue
    } else {
        PumpOutcome::Failed
    }
}

/// Pump while the input is ready, up to [`MAX_BATCH`] samples.
///
/// Returns [`PumpOutcome::Continue`] when the input stopped being ready or the
/// batch limit was reached.
pub fn pump_while_ready(endpoint: &mut TrackEndpoint, ctx: &mut PumpContext<'_>) -> PumpOutcome {
    let mut moved = 0;
    while moved < MAX_BATCH && endpoint.input.is_ready_for_more_data() {
        match pump_once(endpoint, ctx) {
            PumpOutcome::Continue => moved += 1,
            terminal => return terminal,
        }
    }
    PumpOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vexport_media_core::{PixelFormat, Sample, Settings};

    #[derive(Default)]
    struct Log {
        appended: Vec<(MediaTime, bool)>,
        finished: bool,
    }

    struct VecOutput {
        media_type: MediaType,
        samples: std::vec::IntoIter<Sample>,
    }

    impl ReaderOutput for VecOutput {
        fn media_type(&self) -> MediaType {
            self.media_type
        }

        fn copy_next_sample(&mut self) -> Option<Sample> {
            self.samples.next()
        }
    }

    struct LogInput {
        media_type: MediaType,
        log: Arc<Mutex<Log>>,
        reject_after: usize,
    }

    #[async_trait::async_trait]
    impl WriterInput for LogInput {
        fn media_type(&self) -> MediaType {
            self.media_type
        }

        fn is_ready_for_more_data(&self) -> bool {
            !self.log.lock().unwrap().finished
        }

        async fn ready_for_more_data(&self) {}

        fn append(&mut self, sample: Sample) -> bool {
            let mut log = self.log.lock().unwrap();
            if log.appended.len() >= self.reject_after {
                return false;
            }
            log.appended.push((sample.presentation_time, false));
            true
        }

        fn mark_as_finished(&mut self) {
            self.log.lock().unwrap().finished = true;
        }

        fn set_expects_real_time_data(&mut self, _expects: bool) {}

        fn pixel_buffer_adaptor(
            &self,
            _attributes: Option<&Settings>,
        ) -> Option<Box<dyn PixelBufferAdaptor>> {
            None
        }
    }

    struct LogAdaptor {
        log: Arc<Mutex<Log>>,
        pool: usize,
    }

    impl PixelBufferAdaptor for LogAdaptor {
        fn create_pixel_buffer(&mut self) -> Option<PixelBuffer> {
            if self.pool == 0 {
                return None;
            }
            self.pool -= 1;
            Some(PixelBuffer::new(2, 2, PixelFormat::Bgra32))
        }

        fn append(&mut self, buffer: PixelBuffer, presentation_time: MediaTime) -> bool {
            assert!(buffer.data.iter().all(|b| *b == 0xAB));
            self.log
                .lock()
                .unwrap()
                .appended
                .push((presentation_time, true));
            true
        }
    }

    fn video_samples(count: i64) -> Vec<Sample> {
        (0..count)
            .map(|i| {
                Sample::video(
                    MediaTime::new(i, 10),
                    MediaTime::new(1, 10),
                    PixelBuffer::new(2, 2, PixelFormat::Bgra32),
                )
            })
            .collect()
    }

    fn endpoint(samples: Vec<Sample>, log: &Arc<Mutex<Log>>, reject_after: usize) -> TrackEndpoint {
        TrackEndpoint::new(
            Box::new(VecOutput {
                media_type: MediaType::Video,
                samples: samples.into_iter(),
            }),
            Box::new(LogInput {
                media_type: MediaType::Video,
                log: log.clone(),
                reject_after,
            }),
        )
    }

    #[test]
    fn test_pump_appends_in_order_then_drains() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut endpoint = endpoint(video_samples(5), &log, usize::MAX);
        let mut progress = ProgressTracker::new(MediaTime::ZERO, 0.5, None);
        let mut last = MediaTime::INVALID;
        let mut ctx = PumpContext {
            progress: &mut progress,
            render: None,
            adaptor: None,
            last_presentation_time: &mut last,
        };

        assert_eq!(pump_while_ready(&mut endpoint, &mut ctx), PumpOutcome::Drained);
        let log = log.lock().unwrap();
        assert!(log.finished);
        let times: Vec<_> = log.appended.iter().map(|(t, _)| *t).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(times.len(), 5);
        assert_eq!(last, MediaTime::new(4, 10));
        assert!((progress.fraction() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_rejected_append_fails_pump() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut endpoint = endpoint(video_samples(5), &log, 2);
        let mut progress = ProgressTracker::idle();
        let mut last = MediaTime::INVALID;
        let mut ctx = PumpContext {
            progress: &mut progress,
            render: None,
            adaptor: None,
            last_presentation_time: &mut last,
        };
        assert_eq!(pump_while_ready(&mut endpoint, &mut ctx), PumpOutcome::Failed);
        assert_eq!(log.lock().unwrap().appended.len(), 2);
    }

    #[test]
    fn test_render_path_falls_back_when_pool_is_empty() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut endpoint = endpoint(video_samples(3), &log, usize::MAX);
        let render: RenderHandler =
            Arc::new(|_source: &PixelBuffer, _at: MediaTime, destination: &mut PixelBuffer| {
                destination.fill(0xAB)
            });
        let mut adaptor: Box<dyn PixelBufferAdaptor> = Box::new(LogAdaptor {
            log: log.clone(),
            pool: 2,
        });
        let mut progress = ProgressTracker::new(MediaTime::ZERO, 1.0, None);
        let mut last = MediaTime::INVALID;
        let mut ctx = PumpContext {
            progress: &mut progress,
            render: Some(&render),
            adaptor: Some(&mut adaptor),
            last_presentation_time: &mut last,
        };

        assert_eq!(pump_while_ready(&mut endpoint, &mut ctx), PumpOutcome::Drained);
        let rendered: Vec<_> = log.lock().unwrap().appended.iter().map(|(_, r)| *r).collect();
        assert_eq!(rendered, vec![true, true, false]);
    }

    #[test]
    fn test_batch_limit_returns_control() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut endpoint = endpoint(video_samples(MAX_BATCH as i64 + 10), &log, usize::MAX);
        let mut progress = ProgressTracker::idle();
        let mut last = MediaTime::INVALID;
        let mut ctx = PumpContext {
            progress: &mut progress,
            render: None,
            adaptor: None,
            last_presentation_time: &mut last,
        };
        assert_eq!(pump_while_ready(&mut endpoint, &mut ctx), PumpOutcome::Continue);
        assert_eq!(log.lock().unwrap().appended.len(), MAX_BATCH);
        assert_eq!(pump_while_ready(&mut endpoint, &mut ctx), PumpOutcome::Drained);
    }

    #[test]
    fn test_progress_is_offset_by_range_start() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ProgressHandler = Arc::new(move |p: f32| sink.lock().unwrap().push(p));
        let mut tracker = ProgressTracker::new(MediaTime::new(10, 1), 4.0, Some(handler));

        tracker.observe(MediaTime::new(12, 1) - MediaTime::new(10, 1));
        tracker.observe(MediaTime::new(11, 1) - MediaTime::new(10, 1));
        tracker.complete();

        assert_eq!(*seen.lock().unwrap(), vec![0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_zero_duration_reports_complete() {
        let mut tracker = ProgressTracker::new(MediaTime::ZERO, 0.0, None);
        assert_eq!(tracker.observe(MediaTime::ZERO), 1.0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_progress_is_monotonic_and_bounded(
                duration in 0.001f64..10_000.0,
                ticks in proptest::collection::vec(-1_000i64..2_000_000, 1..64),
            ) {
                let mut tracker = ProgressTracker::new(MediaTime::ZERO, duration, None);
                let mut previous = 0.0f32;
                for tick in ticks {
                    let fraction = tracker.observe(MediaTime::new(tick, 600));
                    prop_assert!((0.0..=1.0).contains(&fraction));
                    prop_assert!(fraction >= previous);
                    previous = fraction;
                }
            }
        }
    }
}
