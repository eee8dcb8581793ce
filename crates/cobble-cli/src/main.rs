use clap::{Parser, Subcommand, ValueEnum};
use cobble_build::{BuildError, CancelFlag};
use cobble_package::IfExists;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cobble")]
#[command(about = "A package-aware build tool for compiled languages", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (RUST_LOG overrides this)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a project
    Build(commands::build::BuildArgs),
    /// Manage packages and repositories
    Pkg {
        #[command(subcommand)]
        command: PkgCommands,
    },
}

#[derive(Subcommand)]
enum PkgCommands {
    /// List the contents of the local package cache
    Ls,
    /// Obtain packages and place them in the local cache
    Get {
        /// Packages to obtain, as name@version
        ids: Vec<String>,
    },
    /// Import source distribution directories into the local cache
    Import {
        /// Directories containing a package.json5
        paths: Vec<PathBuf>,
        /// What to do when the package is already cached
        #[arg(long, value_enum, default_value_t = IfExistsArg::Fail)]
        if_exists: IfExistsArg,
    },
    /// Manage remote package repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Register a remote repository by URL
    Add {
        url: String,
        /// Do not pull the repository contents immediately
        #[arg(long)]
        no_update: bool,
    },
    /// Remove a remote repository and its packages
    Rm { name: String },
    /// Synchronize the package database with all remotes
    Update,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IfExistsArg {
    Fail,
    Ignore,
    Replace,
}

impl From<IfExistsArg> for IfExists {
    fn from(arg: IfExistsArg) -> Self {
        match arg {
            IfExistsArg::Fail => IfExists::Fail,
            IfExistsArg::Ignore => IfExists::Ignore,
            IfExistsArg::Replace => IfExists::Replace,
        }
    }
}

const EXIT_USER_ERROR: u8 = 1;
const EXIT_CANCELLED: u8 = 2;
const EXIT_INVARIANT: u8 = 42;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.set()) {
            tracing::warn!("failed to install the interrupt handler: {e}");
        }
    }

    match std::panic::catch_unwind(AssertUnwindSafe(|| run(cli, cancel))) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            report_error(&err);
            ExitCode::from(exit_code_for(&err))
        }
        Err(_) => {
            tracing::error!("an internal invariant was violated. THIS IS A BUG!");
            ExitCode::from(EXIT_INVARIANT)
        }
    }
}

fn run(cli: Cli, cancel: CancelFlag) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build(args) => commands::build::run(args, cancel),
        Commands::Pkg { command } => match command {
            PkgCommands::Ls => commands::pkg::ls(),
            PkgCommands::Get { ids } => commands::pkg::get(&ids),
            PkgCommands::Import { paths, if_exists } => {
                commands::pkg::import(&paths, if_exists.into())
            }
            PkgCommands::Repo { command } => match command {
                RepoCommands::Add { url, no_update } => commands::repo::add(&url, no_update),
                RepoCommands::Rm { name } => commands::repo::rm(&name),
                RepoCommands::Update => commands::repo::update(),
            },
        },
    }
}

fn report_error(err: &anyhow::Error) {
    tracing::error!("{err}");
    for cause in err.chain().skip(1) {
        tracing::error!("  caused by: {cause}");
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if matches!(cause.downcast_ref::<BuildError>(), Some(BuildError::Cancelled)) {
            return EXIT_CANCELLED;
        }
    }
    EXIT_USER_ERROR
}

fn init_tracing(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
