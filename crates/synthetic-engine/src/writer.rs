//! Synthetic writer: appends one JSON line per sample to the destination file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vexport_common::error::VexportResult;
use vexport_common::time::MediaTime;
use vexport_media_core::{
    keys, AssetWriter, ContainerType, EngineError, MediaType, MetadataItem, PixelBuffer,
    PixelBufferAdaptor, PixelFormat, Sample, Settings, WriterInput, WriterStatus,
};

use crate::container::{ContainerRecord, TrackHeader};
use crate::engine::{Backpressure, SyntheticEngineConfig};

const ERROR_DOMAIN: &str = "synthetic.writer";

#[derive(Debug)]
struct InputState {
    header: TrackHeader,
    appended: usize,
    since_ready: usize,
    ready: bool,
    finished: bool,
}

#[derive(Debug)]
struct WriterShared {
    status: WriterStatus,
    error: Option<EngineError>,
    file: Option<BufWriter<File>>,
    inputs: Vec<InputState>,
}

type SharedWriter = Arc<Mutex<WriterShared>>;

fn lock(shared: &SharedWriter) -> MutexGuard<'_, WriterShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WriterShared {
    fn fail(&mut self, code: i64, message: impl Into<String>) {
        self.status = WriterStatus::Failed;
        self.error = Some(EngineError::new(ERROR_DOMAIN, code, message));
        self.file = None;
    }

    fn write_record(&mut self, record: &ContainerRecord) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                self.fail(-11861, format!("cannot encode record: {e}"));
                return false;
            }
        };
        if let Err(e) = writeln!(file, "{line}") {
            self.fail(-11800, format!("write failed: {e}"));
            return false;
        }
        true
    }

    /// Shared append path for inputs and pixel buffer adaptors.
    fn append(
        &mut self,
        index: usize,
        backpressure: &Backpressure,
        fail_after: Option<usize>,
        record: ContainerRecord,
    ) -> bool {
        if self.status != WriterStatus::Writing {
            return false;
        }
        let Some(input) = self.inputs.get(index) else {
            return false;
        };
        if input.finished {
            return false;
        }
        if fail_after.is_some_and(|limit| input.appended >= limit) {
            let media_type = input.header.media_type;
            self.fail(-11847, format!("{media_type} encoder rejected sample"));
            return false;
        }
        if !self.write_record(&record) {
            return false;
        }

        let input = &mut self.inputs[index];
        input.appended += 1;
        input.since_ready += 1;
        if backpressure.burst > 0 && input.since_ready >= backpressure.burst {
            input.ready = false;
        }
        true
    }
}

/// Writer producing a JSON-lines container (see [`crate::container`]).
pub struct SyntheticWriter {
    path: PathBuf,
    container: ContainerType,
    config: SyntheticEngineConfig,
    metadata: Vec<MetadataItem>,
    optimize_for_network_use: bool,
    shared: SharedWriter,
}

impl SyntheticWriter {
    pub fn new(path: PathBuf, container: ContainerType, config: SyntheticEngineConfig) -> Self {
        Self {
            path,
            container,
            config,
            metadata: Vec::new(),
            optimize_for_network_use: false,
            shared: Arc::new(Mutex::new(WriterShared {
                status: WriterStatus::Unknown,
                error: None,
                file: None,
                inputs: Vec::new(),
            })),
        }
    }
}

#[async_trait::async_trait]
impl AssetWriter for SyntheticWriter {
    fn can_apply_output_settings(&self, settings: &Settings, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Video => {
                !self.config.writer_faults.reject_video_settings && settings.dimensions().is_some()
            }
            MediaType::Audio => true,
        }
    }

    fn add_input(
        &mut self,
        media_type: MediaType,
        settings: Option<Settings>,
    ) -> VexportResult<Option<Box<dyn WriterInput>>> {
        let mut shared = lock(&self.shared);
        if shared.status != WriterStatus::Unknown {
            return Ok(None);
        }
        if shared.inputs.iter().any(|i| i.header.media_type == media_type) {
            return Ok(None);
        }
        if media_type == MediaType::Video
            && !settings
                .as_ref()
                .is_some_and(|s| self.can_apply_output_settings(s, media_type))
        {
            return Ok(None);
        }

        let index = shared.inputs.len();
        shared.inputs.push(InputState {
            header: TrackHeader {
                media_type,
                settings: settings.clone(),
                expects_real_time_data: false,
            },
            appended: 0,
            since_ready: 0,
            ready: true,
            finished: false,
        });
        let fail_after = match self.config.writer_faults.fail_append_after {
            Some((faulty, count)) if faulty == media_type => Some(count),
            _ => None,
        };

        Ok(Some(Box::new(SyntheticWriterInput {
            index,
            media_type,
            settings,
            shared: self.shared.clone(),
            backpressure: self.config.backpressure.clone(),
            fail_after,
            exhaust_pool: self.config.writer_faults.exhaust_pixel_buffer_pool,
        })))
    }

    fn set_metadata(&mut self, items: Vec<MetadataItem>) {
        self.metadata = items;
    }

    fn set_should_optimize_for_network_use(&mut self, optimize: bool) {
        self.optimize_for_network_use = optimize;
    }

    fn start_writing(&mut self) -> bool {
        let mut shared = lock(&self.shared);
        if shared.status != WriterStatus::Unknown {
            return false;
        }
        if self.config.writer_faults.fail_on_start {
            shared.fail(-11800, "cannot start writing");
            return false;
        }
        let file = match File::create(&self.path) {
            Ok(file) => file,
            Err(e) => {
                shared.fail(-11800, format!("cannot create {}: {e}", self.path.display()));
                return false;
            }
        };
        shared.file = Some(BufWriter::new(file));
        shared.status = WriterStatus::Writing;

        let header = ContainerRecord::Header {
            container: self.container,
            optimize_for_network_use: self.optimize_for_network_use,
            metadata: self.metadata.clone(),
            tracks: shared.inputs.iter().map(|i| i.header.clone()).collect(),
        };
        shared.write_record(&header)
    }

    fn start_session(&mut self, at: MediaTime) {
        let mut shared = lock(&self.shared);
        if shared.status == WriterStatus::Writing {
            shared.write_record(&ContainerRecord::Session { start: at });
        }
    }

    async fn finish_writing(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.status != WriterStatus::Writing {
            return;
        }
        for input in shared.inputs.iter_mut() {
            input.finished = true;
        }
        let count = |media_type: MediaType| -> usize {
            shared
                .inputs
                .iter()
                .filter(|i| i.header.media_type == media_type)
                .map(|i| i.appended)
                .sum()
        };
        let trailer = ContainerRecord::Trailer {
            finished_at: chrono::Utc::now().to_rfc3339(),
            video_samples: count(MediaType::Video),
            audio_samples: count(MediaType::Audio),
        };
        if !shared.write_record(&trailer) {
            return;
        }
        let flushed = shared.file.take().map(|mut file| file.flush());
        match flushed {
            Some(Err(e)) => shared.fail(-11800, format!("flush failed: {e}")),
            _ => shared.status = WriterStatus::Completed,
        }
    }

    fn status(&self) -> WriterStatus {
        lock(&self.shared).status
    }

    fn error(&self) -> Option<EngineError> {
        lock(&self.shared).error.clone()
    }

    fn cancel_writing(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.status == WriterStatus::Writing {
            shared.status = WriterStatus::Cancelled;
            if let Some(mut file) = shared.file.take() {
                let _ = file.flush();
            }
        }
    }
}

/// One input of a [`SyntheticWriter`].
pub struct SyntheticWriterInput {
    index: usize,
    media_type: MediaType,
    settings: Option<Settings>,
    shared: SharedWriter,
    backpressure: Backpressure,
    fail_after: Option<usize>,
    exhaust_pool: bool,
}

#[async_trait::async_trait]
impl WriterInput for SyntheticWriterInput {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn is_ready_for_more_data(&self) -> bool {
        let shared = lock(&self.shared);
        shared
            .inputs
            .get(self.index)
            .is_some_and(|i| i.ready && !i.finished)
    }

    async fn ready_for_more_data(&self) {
        if self.is_ready_for_more_data() {
            return;
        }
        match self.backpressure.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        let mut shared = lock(&self.shared);
        if let Some(input) = shared.inputs.get_mut(self.index) {
            input.ready = true;
            input.since_ready = 0;
        }
    }

    fn append(&mut self, sample: Sample) -> bool {
        let record = ContainerRecord::Sample {
            track: self.media_type,
            presentation_time: sample.presentation_time,
            duration: sample.duration,
            bytes: sample.byte_len(),
            rendered: false,
        };
        lock(&self.shared).append(self.index, &self.backpressure, self.fail_after, record)
    }

    fn mark_as_finished(&mut self) {
        if let Some(input) = lock(&self.shared).inputs.get_mut(self.index) {
            input.finished = true;
        }
    }

    fn set_expects_real_time_data(&mut self, expects: bool) {
        if let Some(input) = lock(&self.shared).inputs.get_mut(self.index) {
            input.header.expects_real_time_data = expects;
        }
    }

    fn pixel_buffer_adaptor(
        &self,
        attributes: Option<&Settings>,
    ) -> Option<Box<dyn PixelBufferAdaptor>> {
        if self.media_type != MediaType::Video {
            return None;
        }
        let (width, height) = attributes
            .and_then(|a| a.dimensions())
            .or_else(|| self.settings.as_ref().and_then(|s| s.dimensions()))
            .map(|size| (size.width as u32, size.height as u32))
            .unwrap_or((16, 9));
        let format = attributes
            .and_then(|a| a.get_str(keys::PIXEL_FORMAT))
            .and_then(PixelFormat::parse)
            .unwrap_or_default();
        Some(Box::new(SyntheticPixelBufferAdaptor {
            index: self.index,
            shared: self.shared.clone(),
            backpressure: self.backpressure.clone(),
            fail_after: self.fail_after,
            exhausted: self.exhaust_pool,
            width,
            height,
            format,
        }))
    }
}

/// Pixel buffer adaptor bound to a video [`SyntheticWriterInput`].
pub struct SyntheticPixelBufferAdaptor {
    index: usize,
    shared: SharedWriter,
    backpressure: Backpressure,
    fail_after: Option<usize>,
    exhausted: bool,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl PixelBufferAdaptor for SyntheticPixelBufferAdaptor {
    fn create_pixel_buffer(&mut self) -> Option<PixelBuffer> {
        if self.exhausted {
            return None;
        }
        Some(PixelBuffer::new(self.width, self.height, self.format))
    }

    fn append(&mut self, buffer: PixelBuffer, presentation_time: MediaTime) -> bool {
        let record = ContainerRecord::Sample {
            track: MediaType::Video,
            presentation_time,
            duration: MediaTime::INVALID,
            bytes: buffer.data.len(),
            rendered: true,
        };
        lock(&self.shared).append(self.index, &self.backpressure, self.fail_after, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerDump;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vexport_test_writer_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("out.mp4")
    }

    fn video_settings() -> Settings {
        Settings::new()
            .with(keys::CODEC, "h264")
            .with(keys::WIDTH, 64)
            .with(keys::HEIGHT, 36)
    }

    fn audio_sample(i: i64) -> Sample {
        Sample::audio(MediaTime::new(i * 1024, 44100), MediaTime::new(1024, 44100), vec![0; 8])
    }

    #[tokio::test]
    async fn test_writer_produces_finalized_container() {
        let path = temp_path("finalized");
        let mut writer =
            SyntheticWriter::new(path.clone(), ContainerType::Mp4, SyntheticEngineConfig::default());
        writer.set_metadata(vec![MetadataItem::new("title", "demo")]);
        let mut input = writer
            .add_input(MediaType::Audio, None)
            .unwrap()
            .unwrap();
        assert!(writer.start_writing());
        writer.start_session(MediaTime::ZERO);
        for i in 0..3 {
            assert!(input.append(audio_sample(i)));
        }
        input.mark_as_finished();
        writer.finish_writing().await;
        assert_eq!(writer.status(), WriterStatus::Completed);

        let dump = ContainerDump::read(&path).unwrap();
        assert!(dump.is_finalized());
        assert_eq!(dump.presentation_times(MediaType::Audio).len(), 3);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_video_input_requires_dimensions() {
        let path = temp_path("dimensions");
        let mut writer =
            SyntheticWriter::new(path.clone(), ContainerType::Mp4, SyntheticEngineConfig::default());
        assert!(!writer.can_apply_output_settings(&Settings::new(), MediaType::Video));
        assert!(writer
            .add_input(MediaType::Video, Some(Settings::new()))
            .unwrap()
            .is_none());
        assert!(writer
            .add_input(MediaType::Video, Some(video_settings()))
            .unwrap()
            .is_some());
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_backpressure_toggles_ready_flag() {
        let path = temp_path("backpressure");
        let mut config = SyntheticEngineConfig::default();
        config.backpressure.burst = 2;
        let mut writer = SyntheticWriter::new(path.clone(), ContainerType::Mp4, config);
        let mut input = writer
            .add_input(MediaType::Audio, None)
            .unwrap()
            .unwrap();
        assert!(writer.start_writing());

        assert!(input.is_ready_for_more_data());
        assert!(input.append(audio_sample(0)));
        assert!(input.append(audio_sample(1)));
        assert!(!input.is_ready_for_more_data());
        input.ready_for_more_data().await;
        assert!(input.is_ready_for_more_data());

        writer.cancel_writing();
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_append_fault_fails_writer() {
        let path = temp_path("fault");
        let mut config = SyntheticEngineConfig::default();
        config.writer_faults.fail_append_after = Some((MediaType::Audio, 1));
        let mut writer = SyntheticWriter::new(path.clone(), ContainerType::Mp4, config);
        let mut input = writer
            .add_input(MediaType::Audio, None)
            .unwrap()
            .unwrap();
        assert!(writer.start_writing());
        assert!(input.append(audio_sample(0)));
        assert!(!input.append(audio_sample(1)));
        assert_eq!(writer.status(), WriterStatus::Failed);
        assert!(writer.error().is_some());
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_adaptor_appends_rendered_buffers() {
        let path = temp_path("adaptor");
        let mut writer =
            SyntheticWriter::new(path.clone(), ContainerType::Mp4, SyntheticEngineConfig::default());
        let input = writer
            .add_input(MediaType::Video, Some(video_settings()))
            .unwrap()
            .unwrap();
        let mut adaptor = input.pixel_buffer_adaptor(None).unwrap();
        assert!(writer.start_writing());

        let buffer = adaptor.create_pixel_buffer().unwrap();
        assert_eq!((buffer.width, buffer.height), (64, 36));
        assert!(adaptor.append(buffer, MediaTime::new(0, 30)));
        writer.cancel_writing();
        assert_eq!(writer.status(), WriterStatus::Cancelled);

        let dump = ContainerDump::read(&path).unwrap();
        assert_eq!(dump.rendered_samples(), 1);
        assert!(!dump.is_finalized());
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
