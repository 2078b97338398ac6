use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "geotag", version, about = "Tag JPEG photos with positions from a GPX track")]
struct Cli {
    /// Photo files, directories or ZIP archives
    #[arg(required = true)]
    photos: Vec<PathBuf>,

    /// GPX track recorded alongside the photos
    #[arg(short, long)]
    track: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Hours the camera clock is ahead of UTC
    #[arg(long, default_value_t = geotag_core::DEFAULT_OFFSET_HOURS,
          allow_negative_numbers = true, value_parser = parse_offset)]
    input_offset: i32,

    /// Photo timestamps are already UTC (same as --input-offset 0)
    #[arg(long, conflicts_with = "input_offset")]
    utc: bool,

    /// Hours added to the track time when rewriting timestamps
    #[arg(long, default_value_t = geotag_core::DEFAULT_OFFSET_HOURS,
          allow_negative_numbers = true, value_parser = parse_offset)]
    output_offset: i32,

    /// Replace the photo's date/time fields with the matched track time
    #[arg(long)]
    rewrite_timestamp: bool,

    /// Bundle the photos into geotagged_images.zip instead of separate files
    #[arg(long)]
    zip: bool,

    /// Do not write geotags.geojson
    #[arg(long)]
    no_geojson: bool,

    /// Overwrite existing files in the output directory
    #[arg(long)]
    force: bool,
}

fn parse_offset(s: &str) -> Result<i32, String> {
    let hours: i32 = s.parse().map_err(|e| format!("{e}"))?;
    geotag_core::timezone::validate_offset(hours)
}

/// Lines printed after a run: every skipped or failed photo, then the totals.
fn summary_lines(result: &geotag_core::ProcessResult, elapsed_secs: f64) -> Vec<String> {
    let mut lines = result.warnings.clone();
    lines.push(format!(
        "Done! {} geotagged, {} skipped, {} failed ({:.2}s)",
        result.processed, result.skipped, result.failed, elapsed_secs
    ));
    lines
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geotag=info,geotag_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let options = geotag_core::ProcessOptions {
        track: cli.track,
        inputs: cli.photos,
        output: cli.output,
        input_offset_hours: cli.input_offset,
        photos_in_utc: cli.utc,
        output_offset_hours: cli.output_offset,
        rewrite_timestamp: cli.rewrite_timestamp,
        zip_output: cli.zip,
        geojson: !cli.no_geojson,
        force: cli.force,
    };
    tracing::debug!(?options, "starting run");

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {prefix} {msg}")?);
    let current_stage = Mutex::new(String::new());

    let result = geotag_core::process(&options, &|stage, current, total, message| {
        let mut seen = current_stage.lock().unwrap_or_else(|e| e.into_inner());
        if *seen != stage {
            *seen = stage.to_string();
            pb.reset();
            pb.set_prefix(stage.to_string());
        }
        pb.set_length(total);
        pb.set_position((current + 1).min(total));
        pb.set_message(message.to_string());
    });
    pb.finish_and_clear();
    let result = result?;

    for line in summary_lines(&result, t_total.elapsed().as_secs_f64()) {
        eprintln!("{line}");
    }

    Ok(())
}
