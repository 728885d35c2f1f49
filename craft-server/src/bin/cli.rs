use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Generator, Shell};
use craft_server::cli::{self, commands::*, CliResult};
use std::{
    io,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "craft",
    version,
    about = "Infini-Craft: combine and split game symbols with LoRA-adapted language models",
    long_about = "Serves memoized combine (/add) and split (/split) operations backed by a \
                  text-generation server with per-operation LoRA adapters."
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set the verbosity level (can be repeated for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Use JSON output format
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CRAFT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve(ServeCommand),

    /// Combine two symbols into one
    Add(AddCommand),

    /// Split one symbol into two
    Split(SplitCommand),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Show current configuration
    Show,

    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Get a configuration value
    Get {
        /// Configuration key to get, e.g. server.port
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set
        value: String,
    },
}

fn print_completions<G: Generator>(gen: G, cmd: &mut clap::Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Config errors surface later through `run`; logging falls back to defaults.
    let logging = cli::config::load_config(cli.config.as_deref())
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Err(e) = cli::logging::init_logging(
        cli.verbose,
        cli.quiet,
        cli.json || logging.json_format,
        &logging.level,
    ) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        e.print_error();
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve(cmd) => {
            cli::commands::serve::execute(cmd, cli::config::load_config(config_path)?).await
        }
        Commands::Add(cmd) => {
            cli::commands::query::add(cmd, cli::config::load_config(config_path)?).await
        }
        Commands::Split(cmd) => {
            cli::commands::query::split(cmd, cli::config::load_config(config_path)?).await
        }
        Commands::Config { subcommand } => handle_config(subcommand, config_path),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            print_completions(shell, &mut cmd);
            Ok(())
        }
    }
}

fn handle_config(subcommand: ConfigSubcommand, config_path: Option<&Path>) -> CliResult<()> {
    match subcommand {
        ConfigSubcommand::Show => cli::config::show_config(&cli::config::load_config(config_path)?),
        ConfigSubcommand::Init { force } => cli::config::init_config(config_path, force),
        ConfigSubcommand::Get { key } => {
            cli::config::get_config_value(&cli::config::load_config(config_path)?, &key)
        }
        ConfigSubcommand::Set { key, value } => {
            cli::config::set_config_value(config_path, &key, &value)
        }
    }
}
