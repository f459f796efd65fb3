use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as imp;

#[cfg(not(unix))]
mod fallback;
#[cfg(not(unix))]
use fallback as imp;

/// Create a platform-appropriate shell command: `sh -c <command>` on Unix.
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Configure the command to run in its own process group so the whole tree
/// can be signalled at once.
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Send a cooperative terminate signal to the process group rooted at `pid`.
/// Does not wait for the group to exit.
pub fn request_terminate(pid: u32) {
    imp::request_terminate(pid)
}

/// Unconditionally kill the process group rooted at `pid`.
pub fn force_kill(pid: u32) {
    imp::force_kill(pid)
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Best-effort identification of the process currently bound to a TCP port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    imp::identify_port_owner(port)
}
