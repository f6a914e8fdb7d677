use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dubsplit::config::{AudioFormat, Config};
use dubsplit::job::Session;
use dubsplit::pipeline;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "dubsplit")]
#[command(version, about = "Split narration into lip-sync sized segments")]
#[command(
    long_about = "Transcribe an audio file, cut it at sentence boundaries into segments no longer than a maximum duration, and package them for batch lip-sync generation. Run without a subcommand for the interactive wizard."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Transcribe and split an audio file
    Segment {
        /// Input audio file
        input: PathBuf,

        /// Directory for the segment archive (defaults to the input's directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Max segment duration in seconds (10-300)
        #[arg(short = 'd', long)]
        max_duration: Option<f64>,

        /// Segment format: mp3, wav
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Split using a transcript already on disk
    Split {
        /// Input audio file
        input: PathBuf,

        /// Transcript JSON (segments, chunks or SRT text)
        #[arg(short, long)]
        transcript: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short = 'd', long)]
        max_duration: Option<f64>,

        #[arg(short, long)]
        format: Option<String>,
    },

    /// Continue a job interrupted by a restart
    Resume {
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Retry a failed job
    Retry {
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Show the stored job
    Status,

    /// Forget the stored job and upload batch
    Clear,

    /// Hold the upload batch before its next segment
    Pause,

    /// Let a paused upload batch continue
    Unpause,

    /// Download generated videos in batch order
    Download {
        /// Observed request URLs, oldest first, one per line
        #[arg(long, conflicts_with = "elements")]
        urls: Option<PathBuf>,

        /// Page snapshot of video elements as JSON
        #[arg(long)]
        elements: Option<PathBuf>,

        /// Number of segments in the batch; only the newest this many videos are fetched
        #[arg(short = 'n', long)]
        count: Option<usize>,

        #[arg(short, long, default_value = "videos")]
        output: PathBuf,
    },

    /// Concatenate downloaded videos into one MP4
    Combine {
        dir: PathBuf,

        #[arg(short, long, default_value = "combined.mp4")]
        output: PathBuf,
    },

    /// Trim downloaded videos to their segment durations
    Trim {
        dir: PathBuf,

        #[arg(short, long, default_value = "trimmed_videos.zip")]
        output: PathBuf,
    },

    /// Trim downloaded videos and concatenate them into one MP4
    TrimCombine {
        dir: PathBuf,

        #[arg(short, long, default_value = "combined_trimmed.mp4")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "dubsplit=debug" } else { "dubsplit=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn cancellation_on_ctrlc() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }
    token
}

fn output_dir_for(input: &Path, output: Option<PathBuf>) -> PathBuf {
    output.unwrap_or_else(|| {
        input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

fn apply_overrides(
    config: &mut Config,
    max_duration: Option<f64>,
    format: Option<String>,
) -> Result<()> {
    if let Some(d) = max_duration {
        config.max_segment_duration = d;
    }
    if let Some(f) = format {
        config.audio_format = f.parse::<AudioFormat>().map_err(|e| anyhow::anyhow!(e))?;
    }
    config
        .validate_duration()
        .context("Configuration validation failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let Some(command) = cli.command else {
        let wizard = dubsplit::interactive::run_interactive_wizard()?;
        let result = pipeline::run_segmentation(
            &wizard.input,
            &wizard.output_dir,
            &wizard.config,
            cancellation_on_ctrlc(),
            true,
        )
        .await?;
        pipeline::print_summary(&result);
        return Ok(());
    };

    let mut config = Config::load().context("Failed to load configuration")?;

    match command {
        Command::Segment {
            input,
            output,
            max_duration,
            format,
        } => {
            if !input.exists() {
                anyhow::bail!("Input file not found: {}", input.display());
            }
            apply_overrides(&mut config, max_duration, format)?;
            config.validate().context("Configuration validation failed")?;

            let output_dir = output_dir_for(&input, output);
            info!("Input:        {}", input.display());
            info!("Output dir:   {}", output_dir.display());
            info!("Max duration: {}s", config.max_segment_duration);
            info!("Format:       {}", config.audio_format);

            let result = pipeline::run_segmentation(
                &input,
                &output_dir,
                &config,
                cancellation_on_ctrlc(),
                true,
            )
            .await?;
            pipeline::print_summary(&result);
        }

        Command::Split {
            input,
            transcript,
            output,
            max_duration,
            format,
        } => {
            apply_overrides(&mut config, max_duration, format)?;
            let output_dir = output_dir_for(&input, output);
            let result = pipeline::run_offline_split(
                &input,
                &transcript,
                &output_dir,
                config.max_segment_duration,
                config.audio_format,
                true,
            )
            .await?;
            pipeline::print_offline_summary(&result);
        }

        Command::Resume { output } => {
            match pipeline::resume_job(&output, &config, cancellation_on_ctrlc(), true).await? {
                Some(result) => pipeline::print_summary(&result),
                None => println!("Nothing to resume."),
            }
        }

        Command::Retry { output } => {
            let result =
                pipeline::retry_job(&output, &config, cancellation_on_ctrlc(), true).await?;
            pipeline::print_summary(&result);
        }

        Command::Status => {
            let session = Session::open_dir(config.session_dir())?;
            let job = session.load_job().await?;
            pipeline::print_status(job.as_ref(), session.is_paused().await?);
            if let Some(upload) = session.load_upload().await? {
                println!(
                    "  Upload batch: {}/{} ({})",
                    upload.current_index,
                    upload.total,
                    if upload.is_active { "active" } else { "finished" }
                );
            }
        }

        Command::Clear => {
            let session = Session::open_dir(config.session_dir())?;
            session.clear_job().await?;
            session.clear_upload().await?;
            println!("Cleared stored job and upload batch.");
        }

        Command::Pause => {
            Session::open_dir(config.session_dir())?
                .set_paused(true)
                .await?;
            println!("Upload batch paused.");
        }

        Command::Unpause => {
            Session::open_dir(config.session_dir())?
                .set_paused(false)
                .await?;
            println!("Upload batch resumed.");
        }

        Command::Download {
            urls,
            elements,
            count,
            output,
        } => {
            let report = pipeline::run_download(
                urls.as_deref(),
                elements.as_deref(),
                count,
                &output,
                true,
            )
            .await?;
            println!(
                "Downloaded {} videos to {}",
                report.written.len(),
                output.display()
            );
            for failed in &report.failed {
                println!("  ✗ {}: {}", failed.file_name, failed.message);
            }
        }

        Command::Combine { dir, output } => {
            let path = pipeline::run_combine(&dir, &output, &config)
                .await
                .context("Combining videos failed")?;
            println!("Wrote {}", path.display());
        }

        Command::Trim { dir, output } => {
            let path = pipeline::run_trim(&dir, &output, &config)
                .await
                .context("Trimming videos failed")?;
            println!("Wrote {}", path.display());
        }

        Command::TrimCombine { dir, output } => {
            let path = pipeline::run_trim_and_combine(&dir, &output, &config)
                .await
                .context("Trimming and combining videos failed")?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
