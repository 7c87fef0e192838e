//! Training dashboard binary.
//!
//! Usage:
//!   train-dashboard [OPTIONS]
//!   train-dashboard submit [PARAMS]
//!
//! Examples:
//!   # Watch a local training server
//!   train-dashboard
//!
//!   # Remote server, log-scaled heatmaps, plain text output
//!   train-dashboard --ws-url wss://trainer.lan/ws/metrics --log-scale --plain
//!
//!   # Start a job without opening the TUI
//!   train-dashboard submit --num-steps 500 --train-sentence "The cat sat"
//!
//! Endpoints default to `TRAIN_DASHBOARD_WS_URL` / `TRAIN_DASHBOARD_API_BASE`
//! when set; flags take precedence.

use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use training_dashboard::client::{TrainingClient, TrainingParams};
use training_dashboard::config::DashboardConfig;
use training_dashboard::dashboard;
use training_dashboard::form::ParamForm;

const DEFAULT_FILTER: &str = "training_dashboard=info";

#[derive(Parser)]
#[command(name = "train-dashboard")]
#[command(about = "Live loss curve and attention heatmaps for a running training server")]
#[command(version)]
struct Args {
    /// WebSocket endpoint streaming training updates
    #[arg(long)]
    ws_url: Option<String>,

    /// Base URL of the training API
    #[arg(long)]
    api_base: Option<String>,

    /// Largest heatmap dimension before downsampling
    #[arg(long, default_value = "64")]
    max_dim: usize,

    /// Refresh interval in milliseconds
    #[arg(long, default_value = "100")]
    refresh_ms: u64,

    /// Start with log-scaled heatmap colours
    #[arg(long)]
    log_scale: bool,

    /// Log file used while the TUI is active
    #[arg(long, default_value = "train-dashboard.log")]
    log_file: PathBuf,

    /// Print updates as text instead of drawing the TUI
    #[arg(long)]
    plain: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a training job and print its id
    Submit(SubmitArgs),
}

#[derive(ClapArgs)]
struct SubmitArgs {
    #[arg(long, default_value = "30522")]
    vocab_size: u64,

    #[arg(long, default_value = "128")]
    embed_size: u64,

    #[arg(long, default_value = "8")]
    num_heads: u64,

    #[arg(long, default_value = "100")]
    num_steps: u64,

    #[arg(long, default_value = "Hello world")]
    train_sentence: String,

    #[arg(long, default_value = "Goodbye world")]
    pair_sentence: String,
}

impl From<SubmitArgs> for TrainingParams {
    fn from(args: SubmitArgs) -> Self {
        Self {
            vocab_size: args.vocab_size,
            embed_size: args.embed_size,
            num_heads: args.num_heads,
            num_steps: args.num_steps,
            train_sentence: args.train_sentence,
            pair_sentence: args.pair_sentence,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log to stderr; used when nothing draws over the terminal.
fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Log to the configured file so the TUI is not overwritten.
fn init_file_logging(config: &DashboardConfig) -> anyhow::Result<()> {
    if let Some(file) = config.open_log_file()? {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = DashboardConfig::from_env()
        .with_max_heatmap_dim(args.max_dim)
        .with_refresh_ms(args.refresh_ms)
        .with_log_scale(args.log_scale)
        .with_log_file(Some(args.log_file));
    if let Some(url) = args.ws_url {
        config = config.with_ws_url(url);
    }
    if let Some(base) = args.api_base {
        config = config.with_api_base(base);
    }
    config.validate()?;

    match args.command {
        Some(Commands::Submit(submit)) => {
            init_stderr_logging();
            let mut form = ParamForm::from_params(&submit.into());
            let params = match form.validate() {
                Ok(params) => params,
                Err(errors) => {
                    for (field, msg) in &errors {
                        eprintln!("{}: {}", field.label(), msg);
                    }
                    anyhow::bail!("invalid training parameters");
                }
            };
            let job_id = TrainingClient::new(&config.api_base).submit(&params)?;
            println!("{}", job_id);
            Ok(())
        }
        None if args.plain => {
            init_stderr_logging();
            Ok(dashboard::run_plain(config)?)
        }
        None => {
            init_file_logging(&config)?;
            Ok(dashboard::run(config)?)
        }
    }
}
