use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use relsync_lib::commands;
use relsync_lib::config::SyncConfig;
use relsync_lib::daemon::{SyncDaemon, DEFAULT_INTERVAL};
use relsync_lib::db::SyncDb;
use relsync_lib::error::SyncError;
use relsync_lib::sync::{SyncEngine, SyncService};

#[derive(Parser, Debug)]
#[command(name = "relsync", version, about = "Contacts, calendar and mail sync for relationship follow-ups")]
struct Cli {
    /// Database path (default: $RELSYNC_HOME/relsync.db)
    #[arg(long, global = true, env = "RELSYNC_DB")]
    db: Option<PathBuf>,

    /// OAuth token file (default: $RELSYNC_HOME/google/token.json)
    #[arg(long, global = true, env = "RELSYNC_TOKEN")]
    token: Option<PathBuf>,

    #[command(subcommand)]
    command: TopCommand,
}

#[derive(Subcommand, Debug)]
enum TopCommand {
    /// Import from Google Contacts, Calendar and Gmail
    Sync(SyncArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Runs every service once when omitted
    #[command(subcommand)]
    command: Option<SyncCommand>,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Scan the long initial window instead of resuming from the cursor
    #[arg(long)]
    initial: bool,
}

#[derive(Subcommand, Debug)]
enum SyncCommand {
    /// Authorize access to your Google account
    Init,
    /// Import the Google Contacts directory
    Contacts(ImportArgs),
    /// Import meetings from Google Calendar
    Calendar(ImportArgs),
    /// Import high-signal Gmail correspondence
    Gmail(ImportArgs),
    /// Return a stuck service to idle (the cursor is kept)
    Reset {
        /// contacts, calendar, gmail or all
        service: String,
    },
    /// Show per-service sync state
    Status,
    /// Sync on a fixed interval until interrupted
    Daemon {
        /// Minimum 5m
        #[arg(long, default_value = DEFAULT_INTERVAL)]
        interval: String,
        /// Comma-separated services or "all"
        #[arg(long, default_value = "all")]
        services: String,
    },
    /// Set how often to follow up with a contact
    Cadence {
        /// Contact id, email or exact name
        contact: String,
        #[arg(long)]
        days: Option<i64>,
        /// weak, medium or strong
        #[arg(long)]
        strength: Option<String>,
    },
    /// Contacts most overdue for a follow-up
    Followups {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &SyncError) {
    eprintln!("error: {}", err);
    eprintln!("  {}", err.recovery_suggestion());
}

async fn run(cli: Cli) -> Result<ExitCode, SyncError> {
    let config = SyncConfig::load(cli.db, cli.token)?;
    let TopCommand::Sync(sync) = cli.command;

    match sync.command {
        None => run_all(config).await,
        Some(SyncCommand::Init) => {
            let email = commands::init(&config).await?;
            println!("Connected {}. Token saved to {}", email, config.token_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Some(SyncCommand::Contacts(args)) => run_one(config, SyncService::Contacts, args.initial).await,
        Some(SyncCommand::Calendar(args)) => run_one(config, SyncService::Calendar, args.initial).await,
        Some(SyncCommand::Gmail(args)) => run_one(config, SyncService::Gmail, args.initial).await,
        Some(SyncCommand::Reset { service }) => {
            let db = SyncDb::open_at(&config.db_path)?;
            let reset = commands::reset(&db, &service)?;
            if reset.is_empty() {
                println!("Nothing to reset.");
            }
            for service in reset {
                println!("{}: reset to idle", service);
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(SyncCommand::Status) => {
            let db = SyncDb::open_at(&config.db_path)?;
            println!("Google account: {}", commands::account_summary(&config.token_path));
            print!("{}", commands::format_status(&commands::status(&db)?));
            Ok(ExitCode::SUCCESS)
        }
        Some(SyncCommand::Daemon { interval, services }) => {
            // Bad arguments are fatal before anything connects.
            let daemon = SyncDaemon::from_args(&interval, &services)?;
            let engine = SyncEngine::connect(config)?;
            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());
            daemon.run(&engine, cancel).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(SyncCommand::Cadence {
            contact,
            days,
            strength,
        }) => {
            let db = SyncDb::open_at(&config.db_path)?;
            let (contact, cadence) =
                commands::set_cadence(&db, &contact, days, strength.as_deref(), config.now())?;
            println!(
                "{}: every {} days ({}), priority {:.1}",
                contact.name, cadence.cadence_days, cadence.relationship_strength, cadence.priority_score
            );
            Ok(ExitCode::SUCCESS)
        }
        Some(SyncCommand::Followups { limit }) => {
            let db = SyncDb::open_at(&config.db_path)?;
            print!("{}", commands::format_followups(&commands::followups(&db, limit)?));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_one(config: SyncConfig, service: SyncService, initial: bool) -> Result<ExitCode, SyncError> {
    let engine = SyncEngine::connect(config)?;
    let report = engine.run_service(service, initial).await?;
    println!("{}", report.summary());
    Ok(ExitCode::SUCCESS)
}

async fn run_all(config: SyncConfig) -> Result<ExitCode, SyncError> {
    let engine = SyncEngine::connect(config)?;
    let mut failed = 0;
    for (service, result) in engine.run_all(false).await {
        match result {
            Ok(report) => println!("PASS {}", report.summary()),
            Err(err) => {
                failed += 1;
                println!("FAIL {}: {}", service, err);
                println!("     {}", err.recovery_suggestion());
            }
        }
    }
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("daemon: failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    log::warn!("daemon: failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => log::info!("daemon: interrupt received, finishing the current service"),
            _ = terminate => log::info!("daemon: SIGTERM received, finishing the current service"),
        }
        cancel.cancel();
    });
}
