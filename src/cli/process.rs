use std::{path::Path, process::Stdio};

use anyhow::Result;
use sysinfo::{get_current_pid, Signal, System};
use tracing::{info, warn};

/// Stops every other process started from the `name` executable.
pub fn kill_previous_servers(name: &Path) {
    let system = System::new_all();
    let current_id = match get_current_pid() {
        Ok(v) => v,
        Err(e) => {
            warn!("Can't determine current process {e}");
            return;
        }
    };
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            info!("Stopping daemon {pid}");
            // This will forcefully terminate the process on Windows.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
        }
    }
}

/// Shuts down the running daemon and starts a new one over `app_dir`. The daemon binary detaches
/// itself, so this only waits for the spawn.
pub fn restart_server(daemon_path: &Path, app_dir: &Path) -> Result<()> {
    kill_previous_servers(daemon_path);
    let mut command = std::process::Command::new(daemon_path);
    command.arg("--dir").arg(app_dir);

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    println!("Spawning");
    #[allow(clippy::zombie_processes)]
    let _ = command.spawn()?;
    println!("Success");
    Ok(())
}
