use clap::{Parser, Subcommand};
use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};
use sweep_runner::{
    config::{ConfigErrors, SweepConfig},
    driver::Driver,
    executors::{Executors, Host},
    manager::CombinationManager,
    space::ParameterSpace,
    stats::{StatsConfig, StatsManager},
    sweep::Sweeper,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run parameter sweeps over a pool of hosts")]
struct Cli {
    /// increase log verbosity, can be repeated
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every pending combination of the sweep
    Run {
        /// sweep definition (YAML)
        config: PathBuf,
        /// comma separated host addresses, replaces `hosts` of the config
        #[arg(long, value_delimiter = ',')]
        hosts: Option<Vec<String>>,
        /// file recording resolved combinations, replaces `test.state_file` of the config
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Validate the sweep definition and print the size of the parameter space
    Check {
        /// sweep definition (YAML)
        config: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_thread_names(true)
        .init();
}

fn load(path: &Path) -> Result<(SweepConfig, ParameterSpace), ConfigErrors> {
    let config = SweepConfig::load(path)?;
    let space = ParameterSpace::from_config(&config.datasets, &config.experiment)?;

    Ok((config, space))
}

fn check(path: PathBuf) -> ExitCode {
    let (config, space) = match load(&path) {
        Ok(loaded) => loaded,
        Err(error) => {
            error!("Failed to load {}: {error}", path.to_string_lossy());

            return ExitCode::FAILURE;
        }
    };

    let preflight = config.preflight_checks();

    info!("Dataset configurations: {}", space.datasets().len());
    for (idx, dataset) in space.datasets().iter().enumerate() {
        info!("  {idx}: {dataset}");
    }
    info!("Dataset parameters: {:?}", space.ds_parameters());
    info!("Experiment parameters: {:?}", space.xp_parameters());
    info!(
        "Number of parameters combinations {}, Number of repetitions {}",
        space.len(),
        config.test.num_repetitions
    );

    match preflight {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");

            ExitCode::FAILURE
        }
    }
}

fn run(path: PathBuf, hosts: Option<Vec<String>>, state: Option<PathBuf>) -> ExitCode {
    let (mut config, space) = match load(&path) {
        Ok(loaded) => loaded,
        Err(error) => {
            error!("Failed to load {}: {error}", path.to_string_lossy());

            return ExitCode::FAILURE;
        }
    };

    if let Some(hosts) = hosts {
        config.hosts = hosts;
    }
    if let Some(state) = state {
        config.test.state_file = Some(state);
    }

    if let Err(error) = config.preflight_checks() {
        error!("{error}");

        return ExitCode::FAILURE;
    }

    let Some(num_repetitions) = NonZeroU32::new(config.test.num_repetitions) else {
        return ExitCode::FAILURE;
    };

    let space = Arc::new(space);
    let combinations = space.combinations();
    let sweeper = match config.test.state_file.clone() {
        Some(state_file) => match Sweeper::with_state_file(combinations, state_file) {
            Ok(sweeper) => sweeper,
            Err(error) => {
                error!("Failed to restore sweep state: {error}");

                return ExitCode::FAILURE;
            }
        },
        None => Sweeper::new(combinations),
    };

    info!("Dataset configurations: {:?}", space.datasets());
    info!("Dataset parameters: {:?}", space.ds_parameters());
    info!("Experiment parameters: {:?}", space.xp_parameters());
    info!(
        "Number of parameters combinations {}, Number of repetitions {}",
        sweeper.remaining(),
        num_repetitions
    );

    // without a working statistics sink nothing can be recorded, so this aborts the sweep
    let stats = Arc::new(StatsManager::new(StatsConfig::from(&config.test)));
    let (ds_names, xp_names) = (space.ds_parameter_names(), space.xp_parameter_names());
    // a sweep with a state file appends to the summaries of its earlier runs
    let first_comb_id = if config.test.state_file.is_some() {
        stats.resume(&ds_names, &xp_names)
    } else {
        stats.initialize(&ds_names, &xp_names).map(|()| 0)
    };
    let first_comb_id = match first_comb_id {
        Ok(first_comb_id) => first_comb_id,
        Err(error) => {
            error!("Failed to initialize statistics: {error}");

            return ExitCode::FAILURE;
        }
    };

    let manager = Arc::new(
        CombinationManager::new(space.clone(), sweeper, num_repetitions)
            .with_first_comb_id(first_comb_id),
    );
    let executor = match Executors::load(&config.executor, &config.test) {
        Ok(executor) => Arc::new(executor),
        Err(error) => {
            error!("Failed to set up executor: {error}");

            return ExitCode::FAILURE;
        }
    };
    let driver = Driver::new(manager, stats, executor, config.test.artifacts.clone());

    match driver.run(config.hosts.iter().map(Host::new).collect()) {
        Ok(summary) => {
            info!(
                done = summary.counts.done,
                cancelled = summary.counts.cancelled,
                workers = summary.reports.len(),
                "Sweep done"
            );

            ExitCode::SUCCESS
        }
        Err(error) => {
            error!("Sweep failed: {error}");

            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            hosts,
            state,
        } => run(config, hosts, state),
        Commands::Check { config } => check(config),
    }
}
