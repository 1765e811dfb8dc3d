pub mod configure;
pub mod daemon_path;
pub mod process;
pub mod status;
pub mod watch;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use process::{kill_previous_servers, restart_server};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        create_scheduler,
        scheduler::{ManualSendResult, SchedulerConfig},
        start_daemon,
        storage::usage_store::UsageStore,
    },
    utils::{
        dir::resolve_application_path,
        logging::{enable_logging, CLI_PREFIX},
        time::DayKey,
    },
};

use self::{configure::ConfigureCommand, daemon_path::to_daemon_path};

#[derive(Parser, Debug)]
#[command(name = "Sitetime", version, long_about = None)]
#[command(about = "Tracks time spent on websites and emails daily usage reports", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application")]
    Init {},
    #[command(
        about = "Run the scheduler directly in current console. Used for debugging"
    )]
    Serve {
        #[arg(long = "tick-seconds", default_value_t = 60)]
        tick_seconds: u64,
    },
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Record time spent on a site")]
    Add {
        #[arg(long)]
        site: String,
        #[arg(long, help = "Elapsed time in milliseconds")]
        ms: u64,
        #[arg(long, help = "Day as YYYY-MM-DD. Defaults to today")]
        day: Option<DayKey>,
    },
    #[command(
        about = "Read tab events from stdin. Each line is either `focus <url>`, `focus` or `blur`"
    )]
    Watch {},
    #[command(about = "Show usage and report delivery of the last 7 days")]
    Status {},
    #[command(about = "Send every report that hasn't been delivered yet, including failed ones")]
    SendPending {},
    #[command(about = "Send today's usage as a test email")]
    TestEmail {},
    #[command(about = "Configure where reports are delivered")]
    Configure {
        #[command(flatten)]
        command: ConfigureCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();
    let app_dir = resolve_application_path(args.dir)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    let current_exe = std::env::current_exe()?;
    match args.commands {
        Commands::Init {} => restart_server(&to_daemon_path(current_exe), &app_dir),
        Commands::Stop {} => {
            kill_previous_servers(&to_daemon_path(current_exe));
            Ok(())
        }
        Commands::Serve { tick_seconds } => {
            let config = SchedulerConfig {
                tick_interval: std::time::Duration::from_secs(tick_seconds),
                ..Default::default()
            };
            start_daemon(app_dir, config).await
        }
        Commands::Add { site, ms, day } => {
            let scheduler = create_scheduler(&app_dir, SchedulerConfig::default())?;
            match day {
                Some(day) => scheduler.store().add_time(day, &site, ms).await,
                None => scheduler.add_time(&site, ms).await,
            }
        }
        Commands::Watch {} => {
            let scheduler = Arc::new(create_scheduler(&app_dir, SchedulerConfig::default())?);
            watch::watch_stdin(scheduler).await
        }
        Commands::Status {} => status::print_status(&app_dir).await,
        Commands::SendPending {} => {
            let scheduler = create_scheduler(&app_dir, SchedulerConfig::default())?;
            report_result("Pending reports sent", scheduler.send_pending_reports_now().await)
        }
        Commands::TestEmail {} => {
            let scheduler = create_scheduler(&app_dir, SchedulerConfig::default())?;
            report_result("Test email sent", scheduler.send_test_report().await)
        }
        Commands::Configure { command } => configure::process_configure_command(&app_dir, command).await,
    }
}

fn report_result(success_message: &str, result: ManualSendResult) -> Result<()> {
    if result.success {
        println!("{success_message}");
        Ok(())
    } else {
        Err(anyhow!(
            "{}",
            result.error.unwrap_or_else(|| "Unknown error".into())
        ))
    }
}
