// This runs daemon on windows without creating a console. Disable during development to see
// stdout.
#![windows_subsystem = "windows"]

use std::{env::args, time::Duration};

use anyhow::Result;
use clap::Parser;
use sitetime::{
    daemon::{args::DaemonArgs, scheduler::SchedulerConfig, start_daemon},
    utils::{
        dir::resolve_application_path,
        logging::{enable_logging, DAEMON_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() -> Result<()> {
    run_service(args().collect::<Vec<_>>())
}

fn run_service(command_args: Vec<String>) -> Result<()> {
    let args = DaemonArgs::parse_from(&command_args);

    if !args.force {
        #[cfg(feature = "win")]
        {
            let mut command_args = command_args;
            println!("Starting detached process");
            use std::os::windows::process::CommandExt;
            use windows::Win32::System::Threading::DETACHED_PROCESS;

            command_args.push("--force".into());
            let process_name = std::env::current_exe()?;
            let mut command = std::process::Command::new(process_name);
            command.args(command_args.into_iter().skip(1));
            command.creation_flags(DETACHED_PROCESS.0);
            command.stdin(std::process::Stdio::null());
            command.stdout(std::process::Stdio::null());
            command.stderr(std::process::Stdio::null());
            #[allow(clippy::zombie_processes)]
            command.spawn()?;
            println!("Created daemon");
            return Ok(());
        }
        #[cfg(unix)]
        {
            use daemonize::Daemonize;

            let daemonize = Daemonize::new()
                .stdout(daemonize::Stdio::devnull())
                .stderr(daemonize::Stdio::devnull())
                // stdin defaults to /dev/null in daemonize 0.5
                .execute();
            match daemonize {
                daemonize::Outcome::Parent(parent) => {
                    parent?;
                    println!("Created daemon");
                    return Ok(());
                }
                daemonize::Outcome::Child(child) => {
                    child?;
                }
            }
        }
    }

    run(args)
}

fn run(args: DaemonArgs) -> Result<()> {
    let app_dir = resolve_application_path(args.dir)?;
    enable_logging(DAEMON_PREFIX, &app_dir, args.log, args.log_console)?;
    let config = SchedulerConfig {
        tick_interval: Duration::from_secs(args.tick_seconds),
        ..Default::default()
    };
    single_thread_runtime()?.block_on(start_daemon(app_dir, config))?;
    Ok(())
}
