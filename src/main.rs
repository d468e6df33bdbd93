use anyhow::Result;
use clap::Parser;
use log::warn;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use tooldeck::commands::{self, PackageRequest, RepoAddRequest};
use tooldeck::config::{CONFIG_ENV, Config};
use tooldeck::runtime::{RealRuntime, SystemCommandRunner};

/// tooldeck - install security tools from third-party APT repositories
///
/// Tools are grouped into numbered categories. Select categories with
/// `--categories` using `0`/`all` or a comma separated list of IDs, or name
/// packages directly.
///
/// Examples:
///   tooldeck categories
///   tooldeck install --categories 1,3
///   tooldeck install nmap sqlmap
///   tooldeck repo add kali --refresh
#[derive(Parser, Debug)]
#[command(author, version = env!("TOOLDECK_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: /etc/tooldeck/config.toml)
    #[arg(long, short = 'c', env = CONFIG_ENV, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Packages processed at once (overrides the config file)
    #[arg(long, short = 'j', value_name = "N", global = true)]
    parallelism: Option<usize>,

    /// More log output; repeat for debug logs
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List tool categories
    Categories,

    /// List the tools of the selected categories
    Tools {
        /// `0`/`all` or category IDs such as `1,3`
        #[arg(default_value = "all")]
        selection: String,
    },

    /// Install tools
    Install(PackageArgs),

    /// Remove tools
    Remove {
        #[command(flatten)]
        packages: PackageArgs,

        /// Run `apt-get autoremove` afterwards
        #[arg(long)]
        purge_dependencies: bool,
    },

    /// Upgrade tools; every installed package when none are given
    Update {
        #[command(flatten)]
        packages: PackageArgs,

        /// Run `apt-get update` first
        #[arg(long)]
        refresh: bool,
    },

    /// Show which tools are installed
    Status(PackageArgs),

    /// Show past operations
    History {
        /// Number of records to show
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },

    /// Manage package repositories
    #[command(subcommand)]
    Repo(RepoCommands),
}

#[derive(clap::Args, Debug)]
struct PackageArgs {
    /// Category selection: `0`/`all` or IDs such as `1,3`
    #[arg(long, short = 's', value_name = "IDS")]
    categories: Option<String>,

    /// Package names
    #[arg(value_name = "PACKAGE")]
    packages: Vec<String>,
}

impl From<PackageArgs> for PackageRequest {
    fn from(args: PackageArgs) -> Self {
        PackageRequest {
            categories: args.categories,
            packages: args.packages,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum RepoCommands {
    /// Add a known repository by name, or a custom one with --url
    Add(RepoAddArgs),

    /// Remove a repository and its key if no other repository uses it
    Remove {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List configured repositories
    List,

    /// List repositories that can be added by name
    Available,

    /// Refresh the package index
    Refresh,
}

#[derive(clap::Args, Debug)]
struct RepoAddArgs {
    /// Repository name (default: kali)
    #[arg(value_name = "NAME")]
    name: Option<String>,

    /// Archive URL of a custom repository
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Suite, e.g. `stable`
    #[arg(long, value_name = "SUITE", requires = "url")]
    distribution: Option<String>,

    /// Components, e.g. `main contrib`
    #[arg(long = "component", value_name = "COMPONENT", requires = "url")]
    components: Vec<String>,

    /// URL of the signing key
    #[arg(long, value_name = "URL", requires = "url", conflicts_with = "key_id")]
    key_url: Option<String>,

    /// Signing key ID to fetch from a keyserver
    #[arg(long, value_name = "ID", requires = "url")]
    key_id: Option<String>,

    /// Keyserver for --key-id
    #[arg(long, value_name = "HOST", requires = "key_id")]
    keyserver: Option<String>,

    /// Expected key fingerprint
    #[arg(long, value_name = "FPR", requires = "url")]
    fingerprint: Option<String>,

    /// Refresh the package index afterwards
    #[arg(long)]
    refresh: bool,
}

impl From<RepoAddArgs> for RepoAddRequest {
    fn from(args: RepoAddArgs) -> Self {
        RepoAddRequest {
            name: args.name,
            url: args.url,
            distribution: args.distribution,
            components: args.components,
            key_url: args.key_url,
            key_id: args.key_id,
            keyserver: args.keyserver,
            fingerprint: args.fingerprint,
            refresh: args.refresh,
        }
    }
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Cancels `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing packages already in progress");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(cli.verbose)))
        .init();

    let runtime = RealRuntime;
    let runner = SystemCommandRunner;
    let mut config = Config::load(&runtime, cli.config.as_deref())?;
    if cli.parallelism.is_some() {
        config.parallelism = cli.parallelism;
    }

    let cancel = CancellationToken::new();
    match cli.command {
        Commands::Categories => commands::categories(&runtime, &config)?,
        Commands::Tools { selection } => commands::tools(&runtime, &config, &selection)?,
        Commands::Install(args) => {
            cancel_on_interrupt(cancel.clone());
            commands::install(&runtime, &runner, &config, &args.into(), cancel).await?
        }
        Commands::Remove {
            packages,
            purge_dependencies,
        } => {
            cancel_on_interrupt(cancel.clone());
            commands::remove(
                &runtime,
                &runner,
                &config,
                &packages.into(),
                purge_dependencies,
                cancel,
            )
            .await?
        }
        Commands::Update { packages, refresh } => {
            cancel_on_interrupt(cancel.clone());
            commands::update(&runtime, &runner, &config, &packages.into(), refresh, cancel).await?
        }
        Commands::Status(args) => {
            commands::status(&runtime, &runner, &config, &args.into()).await?
        }
        Commands::History { limit } => commands::history(&runtime, &config, limit)?,
        Commands::Repo(repo) => match repo {
            RepoCommands::Add(args) => {
                commands::repo_add(&runtime, &runner, &config, &args.into()).await?
            }
            RepoCommands::Remove { name } => {
                commands::repo_remove(&runtime, &runner, &config, &name)?
            }
            RepoCommands::List => commands::repo_list(&runtime, &runner, &config)?,
            RepoCommands::Available => commands::repo_available(&runtime, &runner, &config)?,
            RepoCommands::Refresh => commands::repo_refresh(&runtime, &runner, &config).await?,
        },
    }
    Ok(())
}
