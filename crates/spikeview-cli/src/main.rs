use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use serde::Serialize;
use spikeview_lib::{
    backend::convert_to_mmap,
    error::{ErrorReport, SpikeError},
    navigate::Direction,
    window::{ChannelWindow, DetectMode, DetectionInput, WindowOptions},
    DatasetRegistry, FilterKind, Session, ViewerConfig,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::ExitCode,
};

#[derive(Parser)]
#[command(
    name = "spikeview",
    version,
    about = "Browse multi-channel spike recordings from the command line"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "SPIKEVIEW_CONFIG")]
    config: Option<PathBuf>,
    /// Override the datasets folder (labels and mapping live inside it)
    #[arg(long, global = true)]
    datasets_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FilterArg {
    None,
    Highpass,
    Lowpass,
    Bandpass,
}

impl From<FilterArg> for FilterKind {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::None => FilterKind::None,
            FilterArg::Highpass => FilterKind::Highpass,
            FilterArg::Lowpass => FilterKind::Lowpass,
            FilterArg::Bandpass => FilterKind::Bandpass,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DetectArg {
    None,
    Threshold,
    Precomputed,
}

impl From<DetectArg> for DetectMode {
    fn from(arg: DetectArg) -> Self {
        match arg {
            DetectArg::None => DetectMode::None,
            DetectArg::Threshold => DetectMode::Threshold,
            DetectArg::Precomputed => DetectMode::Precomputed,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DetectOnArg {
    Raw,
    Filtered,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DirectionArg {
    Next,
    Prev,
}

#[derive(Subcommand)]
enum Commands {
    /// List known datasets
    Datasets,
    /// Open a dataset and print its shape, backend and label summary
    Info {
        #[arg(long)]
        dataset: String,
    },
    /// Serve a time window for a set of channels
    Window {
        #[arg(long)]
        dataset: String,
        /// Comma separated, 0-based channel indices
        #[arg(long, value_delimiter = ',', required = true)]
        channels: Vec<usize>,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long, default_value_t = 20_000)]
        end: usize,
        #[arg(long, default_value = "none")]
        filter: FilterArg,
        #[arg(long, default_value = "none")]
        detect: DetectArg,
        #[arg(long, allow_hyphen_values = true)]
        threshold: Option<f64>,
        /// Detect upward excursions instead of downward ones
        #[arg(long)]
        invert: bool,
        #[arg(long, default_value = "filtered")]
        detect_on: DetectOnArg,
        #[arg(long)]
        restore_baseline: bool,
        /// Write one row per sample to this CSV file instead of printing JSON
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Jump to the next or previous precomputed spike
    Navigate {
        #[arg(long)]
        dataset: String,
        #[arg(long, value_delimiter = ',', required = true)]
        channels: Vec<usize>,
        #[arg(long)]
        from: usize,
        #[arg(long, default_value = "next")]
        direction: DirectionArg,
    },
    /// Waveform around one spike
    Preview {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        channel: usize,
        #[arg(long)]
        spike_time: usize,
        #[arg(long, default_value_t = 30)]
        half_window: usize,
        #[arg(long, default_value = "highpass")]
        filter: FilterArg,
    },
    /// Manage dataset to label file mappings
    Labels {
        #[command(subcommand)]
        command: LabelCommands,
    },
    /// Write the memory-mapped sample/shape pair next to a recording
    Convert {
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(Subcommand)]
enum LabelCommands {
    /// Print all mappings
    List,
    /// Map a dataset to a file inside the labels folder
    Add {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        file: String,
    },
    /// Drop the mapping of a dataset
    Remove {
        #[arg(long)]
        dataset: String,
    },
    /// Pair unmapped datasets with label files by name
    Auto,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_json(&err));
            ExitCode::FAILURE
        }
    }
}

/// Structured error line for stderr.
fn error_json(err: &anyhow::Error) -> String {
    let value = match err.downcast_ref::<SpikeError>() {
        Some(spike) => serde_json::to_value(ErrorReport::from(spike)),
        None => Ok(serde_json::json!({ "kind": "other", "message": format!("{err:#}") })),
    };
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|_| format!("{err:#}"))
}

fn load_config(cli: &Cli) -> Result<ViewerConfig> {
    let mut cfg = match &cli.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    if let Some(dir) = &cli.datasets_dir {
        let rooted = ViewerConfig::with_datasets_dir(dir);
        cfg.datasets_dir = rooted.datasets_dir;
        cfg.labels_dir = rooted.labels_dir;
        cfg.mapping_path = rooted.mapping_path;
    }
    debug!("datasets folder: {}", cfg.datasets_dir.display());
    Ok(cfg)
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli)?;
    match cli.command {
        Commands::Datasets => {
            let registry = DatasetRegistry::open(cfg)?;
            print_json(&registry.list_datasets())?;
        }
        Commands::Info { dataset } => {
            let registry = DatasetRegistry::open(cfg)?;
            let descriptor = registry.activate(&dataset)?;
            print_json(&descriptor.info())?;
        }
        Commands::Window {
            dataset,
            channels,
            start,
            end,
            filter,
            detect,
            threshold,
            invert,
            detect_on,
            restore_baseline,
            csv,
        } => {
            let opts = WindowOptions {
                filter: filter.into(),
                detect: detect.into(),
                threshold,
                invert,
                detect_on: match detect_on {
                    DetectOnArg::Raw => DetectionInput::Raw,
                    DetectOnArg::Filtered => DetectionInput::Filtered,
                },
                restore_baseline,
            };
            let session = open_session(cfg, &dataset)?;
            let windows = session.get_window(&channels, start, end, &opts)?;
            match csv {
                Some(path) => {
                    let rows = write_window_csv(&path, &windows)?;
                    print_json(&serde_json::json!({ "rows": rows, "path": path.display().to_string() }))?;
                }
                None => print_json(&windows)?,
            }
        }
        Commands::Navigate {
            dataset,
            channels,
            from,
            direction,
        } => {
            let direction = match direction {
                DirectionArg::Next => Direction::Next,
                DirectionArg::Prev => Direction::Prev,
            };
            let session = open_session(cfg, &dataset)?;
            print_json(&session.navigate(from, direction, &channels)?)?;
        }
        Commands::Preview {
            dataset,
            channel,
            spike_time,
            half_window,
            filter,
        } => {
            let session = open_session(cfg, &dataset)?;
            print_json(&session.spike_waveform(channel, spike_time, half_window, filter.into())?)?;
        }
        Commands::Labels { command } => cmd_labels(cfg, command)?,
        Commands::Convert { input } => {
            let (samples, shape) = convert_to_mmap(&input, &cfg)
                .with_context(|| format!("converting {}", input.display()))?;
            print_json(&serde_json::json!({
                "samples": samples.display().to_string(),
                "shape": shape.display().to_string(),
            }))?;
        }
    }
    Ok(())
}

fn open_session(cfg: ViewerConfig, dataset: &str) -> Result<Session> {
    let registry = DatasetRegistry::open(cfg)?;
    registry.activate(dataset)?;
    Ok(registry.session()?)
}

fn cmd_labels(cfg: ViewerConfig, command: LabelCommands) -> Result<()> {
    let registry = DatasetRegistry::open(cfg)?;
    match command {
        LabelCommands::List => print_json(&registry.label_mappings())?,
        LabelCommands::Add { dataset, file } => {
            registry.add_label_mapping(&dataset, &file)?;
            print_json(&registry.label_mappings())?;
        }
        LabelCommands::Remove { dataset } => {
            registry.remove_label_mapping(&dataset)?;
            print_json(&registry.label_mappings())?;
        }
        LabelCommands::Auto => {
            let found: BTreeMap<String, String> =
                registry.auto_detect_mappings()?.into_iter().collect();
            print_json(&found)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[derive(Serialize)]
struct SampleRow {
    channel: usize,
    sample: usize,
    raw: i16,
    filtered: Option<f64>,
    spike: Option<bool>,
}

fn write_window_csv(path: &Path, windows: &BTreeMap<usize, ChannelWindow>) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut rows = 0;
    for window in windows.values() {
        for (offset, &raw) in window.raw.iter().enumerate() {
            writer.serialize(SampleRow {
                channel: window.channel,
                sample: window.start + offset,
                raw,
                filtered: window.filtered.as_ref().map(|f| f[offset]),
                spike: window.spike_flags.as_ref().map(|f| f[offset]),
            })?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}
