use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mmcore::paths::BaseDirs;

mod driver;

use driver::Driver;

#[derive(Parser)]
#[command(name = "mod-manager")]
#[command(
    author,
    version,
    about = "Activate per-game mod sets through an overlay mount"
)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the active (or given) mod set over the game directory
    Activate {
        /// Game ID; omit to activate every configured game
        game: Option<String>,
        /// Mod set to activate; an empty string disables all layering
        #[arg(long)]
        set: Option<String>,
        /// Force a writable overlay
        #[arg(long)]
        writable: bool,
    },

    /// Restore the original game directory layout
    Deactivate {
        /// Game ID; omit to deactivate every configured game
        game: Option<String>,
    },

    /// Activate, run a command inside the mounted view, deactivate
    Wrap {
        /// Game ID
        game: String,
        /// Mod set to activate; an empty string disables all layering
        #[arg(long)]
        set: Option<String>,
        /// Force a writable overlay
        #[arg(long)]
        writable: bool,
        /// Command to run, after `--`
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Capture an interactive install session as a new mod folder
    Setup {
        /// Game ID
        game: String,
        /// Name of the mod folder to create
        #[arg(value_name = "MOD")]
        mod_id: String,
        /// Override the configured game directory for this invocation
        #[arg(long)]
        path: Option<PathBuf>,
        /// Mod set to mount below the setup layer
        #[arg(long)]
        set: Option<String>,
    },

    /// Open the per-game configuration in $EDITOR
    Edit {
        /// Game ID
        game: String,
        /// Game directory to seed a fresh configuration with
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let driver = Driver::new(BaseDirs::new());
    let failures = match cli.command {
        Commands::Activate {
            game,
            set,
            writable,
        } => driver.activate(game.as_deref(), set.as_deref(), writable)?,
        Commands::Deactivate { game } => driver.deactivate(game.as_deref())?,
        Commands::Wrap {
            game,
            set,
            writable,
            command,
        } => {
            driver.wrap(&game, set.as_deref(), writable, command)?;
            0
        }
        Commands::Setup {
            game,
            mod_id,
            path,
            set,
        } => {
            driver.setup(&game, &mod_id, path.as_deref(), set.as_deref())?;
            0
        }
        Commands::Edit { game, path } => {
            driver.edit(&game, path.as_deref())?;
            0
        }
    };

    if failures > 0 {
        tracing::error!("{failures} game(s) failed");
        std::process::exit(1);
    }
    Ok(())
}
