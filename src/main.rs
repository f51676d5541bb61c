use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridq::{
    extract_policy, save_policy, BoundaryMode, Grid, HistoryObserver, TracingObserver,
    TrainingConfig,
};

#[derive(Parser)]
#[command(name = "gridq")]
#[command(version, about = "Q-learning agent for grid navigation with checkpoints", long_about = None)]
struct Cli {
    /// Learning rate
    #[arg(short, long)]
    alpha: f64,

    /// Discount factor
    #[arg(short, long)]
    gamma: f64,

    /// Exploration rate
    #[arg(short, long)]
    epsilon: f64,

    /// Grid file
    #[arg(short, long)]
    input: PathBuf,

    /// Number of training episodes
    #[arg(short = 'n', long)]
    episodes: usize,

    /// Random seed; runs with the same seed learn the same policy
    #[arg(short, long)]
    seed: Option<u64>,

    /// Where to write the learned policy
    #[arg(short, long, default_value = "pi.txt")]
    output: PathBuf,

    /// Optional CSV file with one row per training episode
    #[arg(long)]
    history: Option<PathBuf>,

    /// Treat index -1 as out of bounds
    #[arg(long)]
    strict_bounds: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8, log_file: Option<&PathBuf>) -> Result<()> {
    let level = match verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_ref())?;
    info!("gridq started");

    let config = TrainingConfig {
        alpha: cli.alpha,
        gamma: cli.gamma,
        epsilon: cli.epsilon,
        episodes: cli.episodes,
        seed: cli.seed,
        boundary: if cli.strict_bounds {
            BoundaryMode::Strict
        } else {
            BoundaryMode::Legacy
        },
        ..TrainingConfig::default()
    };
    for name in config.unconventional_parameters() {
        warn!(parameter = name, "Learning parameter outside (0, 1]");
    }

    let grid = Grid::load(&cli.input)
        .with_context(|| format!("failed to load grid from {}", cli.input.display()))?;
    let mut agent = config.build_agent(grid)?;

    let history = cli.history.as_ref().map(|_| HistoryObserver::new());
    let mut observers = (TracingObserver, history);
    let report = agent.train_with(config.episodes, &mut observers)?;
    println!(
        "Trained {} episodes: {} reached the goal, {} got lost, {:.2} mean reward",
        report.episodes,
        report.goals,
        report.losses,
        report.mean_reward()
    );

    if let (Some(path), (_, Some(history))) = (&cli.history, &observers) {
        history
            .save(path)
            .with_context(|| format!("failed to write history to {}", path.display()))?;
    }

    let policy = extract_policy(agent.grid(), agent.q_table());
    save_policy(&cli.output, &policy)?;
    info!(path = %cli.output.display(), entries = policy.len(), "Policy written");

    Ok(())
}
