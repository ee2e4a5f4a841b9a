pub mod account;
pub mod backend;
pub mod report;
pub mod track;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, level_filters::LevelFilter};

use crate::{
    config::AppConfig,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, LOG_PREFIX},
    },
};

use self::{
    account::{process_create_user_command, process_login_command, process_logout_command},
    backend::Backend,
    report::{process_dashboard_command, process_history_command, process_today_command},
    track::{process_track_command, TrackCommand},
};

#[derive(Parser, Debug)]
#[command(name = "realcon-tracker", version, long_about = None)]
#[command(about = "Tracks your location through the day and summarizes it", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print logs to the console")]
    log: bool,
    #[arg(long, global = true, help = "Log level, for example debug or trace")]
    log_filter: Option<LevelFilter>,
    #[arg(
        long,
        global = true,
        help = "Keep everything in the local store even if a backend is configured"
    )]
    offline: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Sign in to the backend")]
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    #[command(about = "Sign out and forget the saved session")]
    Logout {},
    #[command(about = "Track your location until ctrl-c")]
    Track {
        #[command(flatten)]
        command: TrackCommand,
    },
    #[command(about = "Show your most recent locations")]
    History {},
    #[command(about = "Show time spent and locations visited today")]
    Today {},
    #[command(about = "Show what every user did today")]
    Dashboard {
        #[arg(long, help = "Keep the dashboard open and refresh it on every new location")]
        watch: bool,
    },
    #[command(about = "Create a user. Requires an administrator session")]
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: String,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = match args.dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            dir
        }
        None => create_application_default_path()?,
    };

    let logging_level = match (args.log_filter, args.log) {
        (Some(level), _) => Some(level),
        (None, true) => Some(LevelFilter::DEBUG),
        (None, false) => None,
    };
    enable_logging(LOG_PREFIX, &dir, logging_level, args.log)?;

    let config = AppConfig::load(&dir)?.with_env(|name| std::env::var(name).ok());
    debug!("Running with {config:?} in {dir:?}");
    let backend = Backend::connect(&config, &dir, args.offline)?;

    match args.commands {
        Commands::Login { email, password } => {
            process_login_command(&backend, &email, &password).await
        }
        Commands::Logout {} => process_logout_command(&backend).await,
        Commands::Track { command } => process_track_command(&backend, &config, command).await,
        Commands::History {} => process_history_command(&backend).await,
        Commands::Today {} => process_today_command(&backend).await,
        Commands::Dashboard { watch } => process_dashboard_command(&backend, watch).await,
        Commands::CreateUser {
            email,
            password,
            full_name,
        } => process_create_user_command(&backend, email, password, full_name).await,
    }
}
