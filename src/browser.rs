//! Open the served site in the default browser.

use std::io;
use std::process::{Command, Stdio};

/// Platform command that opens `url`
pub fn opener_command(url: &str) -> Command {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        // The empty string is the window title `start` expects first
        cmd.args(["/C", "start", ""]);
        cmd
    } else {
        Command::new("xdg-open")
    };
    command.arg(url);
    command
}

/// Launch the browser without waiting for it
pub fn open_in_browser(url: &str) -> io::Result<()> {
    tracing::debug!(url, "opening browser");
    opener_command(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}
