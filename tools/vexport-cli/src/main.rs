//! vexport CLI
//!
//! Usage:
//!   vexport export --output <PATH>   Export a synthetic source
//!   vexport plan                     Show the orientation/letterbox transform
//!   vexport config                   Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vexport_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "vexport",
    about = "Transcode media sources into finished containers",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a generated source to a container file
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// JSON export job; command-line options override its settings
        #[arg(long)]
        job: Option<PathBuf>,

        /// Output width (defaults to the configured width)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (defaults to the configured height)
        #[arg(long)]
        height: Option<u32>,

        /// Encode frame rate (defaults to the source frame rate)
        #[arg(long)]
        fps: Option<f32>,

        /// Source duration in seconds
        #[arg(long, default_value = "2.0")]
        duration: f64,

        /// Source rotation in degrees: 0, 90, 180 or 270
        #[arg(long, default_value = "0")]
        rotate: i32,

        /// Source width
        #[arg(long, default_value = "1920")]
        source_width: u32,

        /// Source height
        #[arg(long, default_value = "1080")]
        source_height: u32,

        /// Source frame rate
        #[arg(long, default_value = "30")]
        source_fps: f32,

        /// Export without an audio track
        #[arg(long)]
        no_audio: bool,

        /// Make the writer fail after this many video samples
        #[arg(long)]
        fail_after: Option<usize>,
    },

    /// Print the render size and transform for a source orientation
    Plan {
        /// Source width
        #[arg(long, default_value = "1920")]
        source_width: u32,

        /// Source height
        #[arg(long, default_value = "1080")]
        source_height: u32,

        /// Source rotation in degrees: 0, 90, 180 or 270
        #[arg(long, default_value = "0")]
        rotate: i32,

        /// Output width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Output height
        #[arg(long, default_value = "1080")]
        height: u32,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load();

    // Initialize logging
    let mut logging = app_config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    vexport_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            output,
            job,
            width,
            height,
            fps,
            duration,
            rotate,
            source_width,
            source_height,
            source_fps,
            no_audio,
            fail_after,
        } => {
            commands::export::run(
                &app_config,
                commands::export::ExportArgs {
                    output,
                    job,
                    width,
                    height,
                    fps,
                    duration,
                    rotate,
                    source_width,
                    source_height,
                    source_fps,
                    audio: !no_audio,
                    fail_after,
                },
            )
            .await
        }
        Commands::Plan {
            source_width,
            source_height,
            rotate,
            width,
            height,
        } => commands::plan::run(source_width, source_height, rotate, width, height),
        Commands::Config => commands::config::run(&app_config),
    }
}
