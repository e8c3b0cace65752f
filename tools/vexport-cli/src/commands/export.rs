//! Export a generated source through the export session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use kurbo::Size;
use vexport_common::config::AppConfig;
use vexport_common::time::MediaTime;
use vexport_export_engine::{ExportConfiguration, ExportEvent, ExportSession};
use vexport_media_core::{keys, ContainerType, MediaType, MetadataItem, Settings};
use vexport_synthetic_engine::{
    ContainerDump, Rotation, SyntheticAsset, SyntheticEngine, SyntheticEngineConfig,
};

const CREATION_DATE_KEY: &str = "creation_date";

pub struct ExportArgs {
    pub output: PathBuf,
    pub job: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    pub duration: f64,
    pub rotate: i32,
    pub source_width: u32,
    pub source_height: u32,
    pub source_fps: f32,
    pub audio: bool,
    pub fail_after: Option<usize>,
}

pub async fn run(app_config: &AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    let rotation = Rotation::from_degrees(args.rotate)
        .with_context(|| format!("Unsupported rotation: {}. Use: 0, 90, 180, 270", args.rotate))?;
    if !(args.duration.is_finite() && args.duration >= 0.0) {
        anyhow::bail!("Duration must be a non-negative number of seconds");
    }

    let natural = Size::new(args.source_width as f64, args.source_height as f64);
    let mut asset = SyntheticAsset::new(MediaTime::from_seconds(args.duration, 600))
        .with_video_track(natural, args.source_fps, rotation);
    if args.audio {
        asset = asset.with_audio_track();
    }
    let asset = Arc::new(asset);

    let mut config = match &args.job {
        Some(job) => {
            let content = std::fs::read_to_string(job)
                .with_context(|| format!("Failed to read job {}", job.display()))?;
            let config: ExportConfiguration = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse job {}", job.display()))?;
            config
                .with_asset(asset)
                .with_output_path(args.output.clone())
        }
        None => {
            ExportConfiguration::from_defaults(asset, args.output.clone(), &app_config.export)
        }
    };
    apply_overrides(&mut config, &args);
    if config.container.is_none() {
        config.container = args
            .output
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ContainerType::parse);
    }
    if !config.metadata.iter().any(|item| item.key == CREATION_DATE_KEY) {
        config.metadata.push(MetadataItem::new(
            CREATION_DATE_KEY,
            chrono::Utc::now().to_rfc3339(),
        ));
    }

    let mut engine_config = SyntheticEngineConfig::default();
    if let Some(count) = args.fail_after {
        engine_config.writer_faults.fail_append_after = Some((MediaType::Video, count));
    }

    println!("Exporting synthetic source");
    println!(
        "  Source: {}x{} @ {} fps, rotated {} degrees, {:.2}s{}",
        args.source_width,
        args.source_height,
        args.source_fps,
        args.rotate,
        args.duration,
        if args.audio { ", with audio" } else { "" }
    );
    if let Some(size) = config.video_output_settings.as_ref().and_then(Settings::dimensions) {
        println!("  Resolution: {}x{}", size.width, size.height);
    }
    println!("  Output: {}", args.output.display());

    let session = ExportSession::new(Arc::new(SyntheticEngine::new(engine_config)), config);
    let mut stream = session.export_progress();
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(Ok(ExportEvent::Progress(fraction))) => {
                    print!("\r  Progress: {:.1}%  ", fraction * 100.0);
                    std::io::stdout().flush().ok();
                }
                Some(Ok(ExportEvent::Completed(status))) => {
                    println!("\nExport finished ({status:?}): {}", args.output.display());
                    print_summary(&args.output);
                    return Ok(());
                }
                Some(Err(e)) => {
                    println!();
                    return Err(anyhow::anyhow!("Export failed: {e}"));
                }
                None => {
                    println!();
                    return Err(anyhow::anyhow!("Export stopped without a result"));
                }
            },
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                match signal {
                    Ok(()) => {
                        tracing::info!("Interrupted, cancelling export");
                        stream.cancel();
                    }
                    Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {e}"),
                }
            }
        }
    }
}

/// Fold command-line overrides into the video settings.
fn apply_overrides(config: &mut ExportConfiguration, args: &ExportArgs) {
    if args.width.is_none() && args.height.is_none() && args.fps.is_none() {
        return;
    }
    let settings = config.video_output_settings.get_or_insert_with(Settings::new);
    if let Some(width) = args.width {
        settings.insert(keys::WIDTH, width);
    }
    if let Some(height) = args.height {
        settings.insert(keys::HEIGHT, height);
    }
    if let Some(fps) = args.fps {
        settings.insert(keys::FRAME_RATE, fps as f64);
        // The compression property takes precedence, so keep it in step.
        if let Some(mut compression) = settings.get_nested(keys::COMPRESSION_PROPERTIES) {
            if compression.contains_key(keys::AVERAGE_NON_DROPPABLE_FRAME_RATE) {
                compression.insert(keys::AVERAGE_NON_DROPPABLE_FRAME_RATE, fps as f64);
                settings.insert(keys::COMPRESSION_PROPERTIES, compression.into_value());
            }
        }
    }
}

fn print_summary(path: &std::path::Path) {
    match ContainerDump::read(path) {
        Ok(dump) => {
            println!(
                "  Samples: {} video, {} audio{}",
                dump.presentation_times(MediaType::Video).len(),
                dump.presentation_times(MediaType::Audio).len(),
                if dump.is_finalized() { "" } else { " (not finalized)" }
            );
        }
        Err(e) => tracing::warn!("Cannot read back {}: {e}", path.display()),
    }
}
