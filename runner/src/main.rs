use clap::{ArgAction, Args, Parser, Subcommand};
use paramsweep_runner::{
    config::{ConfigErrors, RunnerConfig},
    database::{sample, ParameterRecord, TableAdapters, TableStore},
    executors::local::LocalExecutor,
    sync::{Coordinator, FileSticky, StickyStore},
};
use std::{
    error::Error,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paramsweep", version)]
#[command(about = "Claim parameter sets from a shared sweep table and record their outcome")]
struct Cli {
    /// Runner config (YAML)
    #[arg(short, long, default_value = "paramsweep.yaml")]
    config: PathBuf,

    /// Raise the log level, can be repeated. `RUST_LOG` takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim, run and report parameter sets until none are left
    Run {
        /// Stop after this many claims, overrides `num-of-runs` of the sticky state
        #[arg(long)]
        max_runs: Option<u64>,
    },
    /// Claim a single parameter set and print it
    Claim,
    /// Set the status of a parameter set
    Status { id: String, status: String },
    /// Mark a parameter set as successful
    Success { id: String },
    /// Mark a parameter set as failed
    Fail {
        id: String,
        #[arg(default_value = "")]
        message: String,
    },
    /// Print the whole sweep table
    List,
    /// Manage the worker local sticky state file
    #[command(subcommand)]
    Sticky(StickyCommands),
    /// Write the sample sweep table, `.db` and `.sqlite` paths create a SQLite table
    Sample(SampleArgs),
}

#[derive(Subcommand)]
enum StickyCommands {
    /// Write a fresh sticky state file
    Create {
        path: PathBuf,
        /// Defaults to the host name
        #[arg(long)]
        performed_by: Option<String>,
    },
    /// Forget the outstanding `last-test`
    Reset { path: PathBuf },
}

#[derive(Args)]
struct SampleArgs {
    path: PathBuf,
    #[arg(long, default_value_t = ',')]
    delimiter: char,
}

const UNKNOWN_ID: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match dispatch(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");

            let mut source = e.source();
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }

            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: &Cli) -> Result<ExitCode, Box<dyn Error>> {
    match cli.command {
        Commands::Sticky(ref command) => sticky(command),
        Commands::Sample(ref args) => write_sample(args),
        Commands::Run { max_runs } => run(&cli.config, max_runs),
        Commands::Claim => {
            let mut coordinator = coordinator(&load_config(&cli.config)?)?;

            match coordinator.claim_next()? {
                Some(record) => print_record(&record)?,
                None => println!("no work"),
            }

            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { ref id, ref status } => {
            let mut coordinator = coordinator(&load_config(&cli.config)?)?;
            reported(id, coordinator.update_status(id, status)?)
        }
        Commands::Success { ref id } => {
            let mut coordinator = coordinator(&load_config(&cli.config)?)?;
            reported(id, coordinator.mark_successful(id)?)
        }
        Commands::Fail {
            ref id,
            ref message,
        } => {
            let mut coordinator = coordinator(&load_config(&cli.config)?)?;
            reported(id, coordinator.mark_failed(id, message)?)
        }
        Commands::List => {
            let config = load_config(&cli.config)?;
            let table = connect(&config)?;
            println!("{}", serde_yaml::to_string(&table.get_table()?)?);

            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &Path) -> Result<RunnerConfig, ConfigErrors> {
    let config = RunnerConfig::load(path)?;

    if config.preflight_checks() {
        return Err(ConfigErrors::FailedPreflight);
    }

    Ok(config)
}

fn connect(config: &RunnerConfig) -> Result<TableAdapters, Box<dyn Error>> {
    let mut table = TableAdapters::load(&config.table)?;

    if !table.connect()? {
        return Err(format!("Sweep table {:?} is not usable", config.table).into());
    }

    Ok(table)
}

fn coordinator(config: &RunnerConfig) -> Result<Coordinator<TableAdapters>, Box<dyn Error>> {
    let table = connect(config)?;
    let sticky = match config.sticky {
        Some(ref path) => Some(Box::new(FileSticky::open(path)?) as Box<dyn StickyStore>),
        None => None,
    };

    Ok(Coordinator::new(table, sticky))
}

fn run(config_path: &Path, max_runs: Option<u64>) -> Result<ExitCode, Box<dyn Error>> {
    let config = load_config(config_path)?;
    let Some(ref executor) = config.executor else {
        return Err("Config has no executor section, nothing to run".into());
    };

    let mut coordinator = coordinator(&config)?;
    if max_runs.is_some() {
        coordinator = coordinator.with_max_runs(max_runs);
    }

    let summary = LocalExecutor::load(executor.clone()).execute(&mut coordinator)?;
    info!(
        claimed = summary.claimed,
        successful = summary.successful,
        failed = summary.failed,
        "Worker loop finished"
    );

    Ok(ExitCode::SUCCESS)
}

fn reported(id: &str, record: Option<ParameterRecord>) -> Result<ExitCode, Box<dyn Error>> {
    match record {
        Some(record) => {
            print_record(&record)?;

            Ok(ExitCode::SUCCESS)
        }
        None => {
            error!(id = id, "No parameter set with this id");

            Ok(ExitCode::from(UNKNOWN_ID))
        }
    }
}

fn print_record(record: &ParameterRecord) -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(record)?);

    Ok(())
}

fn sticky(command: &StickyCommands) -> Result<ExitCode, Box<dyn Error>> {
    match command {
        StickyCommands::Create { path, performed_by } => {
            let performed_by = match performed_by {
                Some(name) => Some(name.clone()),
                None => match nix::unistd::gethostname() {
                    Ok(host) => Some(host.to_string_lossy().into_owned()),
                    Err(e) => {
                        warn!("Failed to determine host name, leaving performed-by empty: {e}");
                        None
                    }
                },
            };

            FileSticky::create(path, performed_by.as_deref())?;
        }
        StickyCommands::Reset { path } => FileSticky::open(path)?.reset()?,
    }

    Ok(ExitCode::SUCCESS)
}

fn write_sample(args: &SampleArgs) -> Result<ExitCode, Box<dyn Error>> {
    let is_sqlite = matches!(
        args.path.extension().and_then(|extension| extension.to_str()),
        Some("db" | "sqlite")
    );

    if is_sqlite {
        #[cfg(feature = "sqlite")]
        {
            sample::sample_sqlite(&args.path, "parameters")?.close()?;

            return Ok(ExitCode::SUCCESS);
        }

        #[cfg(not(feature = "sqlite"))]
        return Err("Built without SQLite support".into());
    }

    if !args.delimiter.is_ascii() {
        return Err(format!("Delimiter {:?} is not a single ASCII character", args.delimiter).into());
    }

    sample::sample_table(&args.path, args.delimiter as u8)?;

    Ok(ExitCode::SUCCESS)
}
