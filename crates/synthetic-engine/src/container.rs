//! JSON-lines container written by the synthetic writer.
//!
//! Layout: one `header` line, one `session` line, one `sample` line per
//! appended sample in append order, and a `trailer` line once writing
//! finished. A file without a trailer was never finalized.

use std::path::Path;

use serde::{Deserialize, Serialize};
use vexport_common::error::VexportResult;
use vexport_common::time::MediaTime;
use vexport_media_core::{ContainerType, MediaType, MetadataItem, Settings};

/// Declared destination track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackHeader {
    pub media_type: MediaType,
    pub settings: Option<Settings>,
    pub expects_real_time_data: bool,
}

/// One line of the container file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum ContainerRecord {
    Header {
        container: ContainerType,
        optimize_for_network_use: bool,
        metadata: Vec<MetadataItem>,
        tracks: Vec<TrackHeader>,
    },
    Session {
        start: MediaTime,
    },
    Sample {
        track: MediaType,
        presentation_time: MediaTime,
        duration: MediaTime,
        bytes: usize,
        /// Appended through a pixel buffer adaptor rather than as a source sample.
        rendered: bool,
    },
    Trailer {
        finished_at: String,
        video_samples: usize,
        audio_samples: usize,
    },
}

/// Parsed container file.
#[derive(Debug, Clone, Default)]
pub struct ContainerDump {
    pub records: Vec<ContainerRecord>,
}

impl ContainerDump {
    /// Read and parse a container file.
    pub fn read(path: &Path) -> VexportResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let records = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<ContainerRecord>, _>>()?;
        Ok(Self { records })
    }

    /// Presentation times appended to `track`, in append order.
    pub fn presentation_times(&self, track: MediaType) -> Vec<MediaTime> {
        self.records
            .iter()
            .filter_map(|record| match record {
                ContainerRecord::Sample {
                    track: t,
                    presentation_time,
                    ..
                } if *t == track => Some(*presentation_time),
                _ => None,
            })
            .collect()
    }

    /// Number of samples appended through a pixel buffer adaptor.
    pub fn rendered_samples(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, ContainerRecord::Sample { rendered: true, .. }))
            .count()
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.records.last(), Some(ContainerRecord::Trailer { .. }))
    }

    pub fn header(&self) -> Option<&ContainerRecord> {
        self.records
            .iter()
            .find(|r| matches!(r, ContainerRecord::Header { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_reads_records_in_order() {
        let dir = std::env::temp_dir().join("vexport_test_container_dump");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.mp4");

        let records = [
            ContainerRecord::Session {
                start: MediaTime::ZERO,
            },
            ContainerRecord::Sample {
                track: MediaType::Video,
                presentation_time: MediaTime::new(0, 30),
                duration: MediaTime::new(1, 30),
                bytes: 64,
                rendered: true,
            },
            ContainerRecord::Sample {
                track: MediaType::Audio,
                presentation_time: MediaTime::new(0, 44100),
                duration: MediaTime::new(1024, 44100),
                bytes: 4096,
                rendered: false,
            },
            ContainerRecord::Trailer {
                finished_at: "2026-01-01T00:00:00Z".to_string(),
                video_samples: 1,
                audio_samples: 1,
            },
        ];
        let body = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&path, body).unwrap();

        let dump = ContainerDump::read(&path).unwrap();
        assert!(dump.is_finalized());
        assert_eq!(dump.presentation_times(MediaType::Video).len(), 1);
        assert_eq!(dump.rendered_samples(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
