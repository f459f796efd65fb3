//! Minimal non-Unix implementation. Process-group signalling is not
//! available; termination relies on the supervisor holding the child handle
//! and calling `Child::kill` during teardown.

use tokio::process::Command;

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

pub fn configure_process_group(_cmd: &mut Command) {}

pub fn request_terminate(_pid: u32) {}

pub fn force_kill(_pid: u32) {}

pub fn is_process_alive(_pid: u32) -> bool {
    false
}

pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}
