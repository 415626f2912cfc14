//! LMS session core - command-line front end for the session cache, daemon and auth orchestrator.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use session_config_and_utils::{init_logging, Config, Paths};

/// LMS session command-line interface.
#[derive(Parser)]
#[command(name = "lms-session")]
#[command(about = "Inspect and drive the LMS client session core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, store and logs. Defaults to ~/.lms-session
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the session core and print state changes until Ctrl-C
    Run,
    /// Print an inspection report
    Status,
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "LMS_PASSWORD")]
        password: String,
    },
    /// Print the authorize URL for a third-party provider
    OauthUrl {
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "http://localhost:3000/auth/callback")]
        redirect_to: String,
    },
    /// Complete an OAuth redirect
    OauthCallback {
        /// Full redirect URL including query or fragment
        url: String,
    },
    /// Refresh the current session now
    Refresh,
    /// Sign out locally and at the provider
    SignOut,
    /// Drop the cached session without contacting the provider
    Clear,
    /// Write an inspection report to a file
    Export {
        /// Output path. Defaults to the exports directory
        path: Option<PathBuf>,
    },
    /// Check that the identity provider answers
    Ping,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level, &paths);

    let core = app::SessionCore::build(&config, &paths)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app::run(&core).await?,
        Commands::Status => app::status(&core).await?,
        Commands::Login { email, password } => app::login(&core, &email, &password).await?,
        Commands::OauthUrl {
            provider,
            redirect_to,
        } => app::oauth_url(&core, &provider, &redirect_to)?,
        Commands::OauthCallback { url } => app::oauth_callback(&core, &url).await?,
        Commands::Refresh => app::refresh(&core).await?,
        Commands::SignOut => app::sign_out(&core).await?,
        Commands::Clear => app::clear(&core),
        Commands::Export { path } => app::export(&core, &paths, path).await?,
        Commands::Ping => app::ping(&core).await?,
    }

    Ok(())
}
