use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};

use cwa_epochs::{
    process_cwa_path, Calibration, EpochAlignment, ProcessConfig,
};

#[derive(Debug, Parser)]
#[command(name = "cwa-epochs", author, version)]
#[command(about = "Summarize an AX3 .CWA accelerometer recording into epoch CSV rows")]
struct Opt {
    /// Input .CWA filename
    input: PathBuf,

    /// Destination CSV (default: <input stem>Epoch.csv next to the input)
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Print percent progress while decoding
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    verbose: bool,

    /// Seconds per epoch
    #[arg(long, default_value_t = 5)]
    epoch_period: u32,

    /// strftime pattern for the Time column
    #[arg(long, default_value = "%Y-%m-%d %H:%M:%S%.3f")]
    time_format: String,

    /// Low-pass the activity metric before truncation
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    filter: bool,

    /// Align the first epoch to the whole minute
    #[arg(long)]
    start_epoch_whole_minute: bool,

    /// Align the first epoch to the whole second
    #[arg(long)]
    start_epoch_whole_second: bool,

    /// Write only stationary epochs, with per-axis means (forces a 10 s
    /// epoch)
    #[arg(long)]
    get_stationary_bouts: bool,

    /// Per-axis standard-deviation threshold for a stationary epoch, g
    #[arg(long, default_value_t = 0.013)]
    stationary_std: f64,

    #[arg(long, default_value_t = 0.0)]
    x_intercept: f64,
    #[arg(long, default_value_t = 0.0)]
    y_intercept: f64,
    #[arg(long, default_value_t = 0.0)]
    z_intercept: f64,
    #[arg(long, default_value_t = 1.0)]
    x_slope: f64,
    #[arg(long, default_value_t = 1.0)]
    y_slope: f64,
    #[arg(long, default_value_t = 1.0)]
    z_slope: f64,
    #[arg(long, default_value_t = 0.0)]
    x_temp: f64,
    #[arg(long, default_value_t = 0.0)]
    y_temp: f64,
    #[arg(long, default_value_t = 0.0)]
    z_temp: f64,

    /// Temperature the calibration was estimated around, °C
    #[arg(long, default_value_t = 0.0)]
    mean_temp: f64,

    /// Sensor full-scale range in g
    #[arg(long, default_value_t = 8.0)]
    range: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    let alignment = if opt.start_epoch_whole_minute {
        EpochAlignment::WholeMinute
    } else if opt.start_epoch_whole_second {
        EpochAlignment::WholeSecond
    } else {
        EpochAlignment::None
    };

    let cfg = ProcessConfig {
        epoch_period_secs: if opt.get_stationary_bouts {
            10
        } else {
            opt.epoch_period
        },
        time_format: opt.time_format.clone(),
        filter: opt.filter,
        stationary_bouts: opt.get_stationary_bouts,
        stationary_std: opt.stationary_std,
        calibration: Calibration {
            intercept: [opt.x_intercept, opt.y_intercept, opt.z_intercept],
            slope: [opt.x_slope, opt.y_slope, opt.z_slope],
            temp_coef: [opt.x_temp, opt.y_temp, opt.z_temp],
            mean_temp: opt.mean_temp,
            range: opt.range,
        },
        alignment,
        precise_time: true,
        verbose: opt.verbose,
    };

    let (out_path, summary) =
        process_cwa_path(&opt.input, opt.output_file.as_deref(), &cfg)
            .with_context(|| format!("Processing {}", opt.input.display()))?;

    log::debug!(
        "{} sectors ({} data, {} bad)",
        summary.sectors,
        summary.data_blocks,
        summary.bad_blocks
    );
    println!(
        "{}: {} epochs from {} data sectors",
        out_path.display(),
        summary.rows_written,
        summary.data_blocks
    );
    Ok(())
}
