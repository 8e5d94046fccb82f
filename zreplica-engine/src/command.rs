///! External command execution
///!
///! Every collaborator (qm, zfs, ssh) reports failure only through its exit
///! status, so they all funnel through here.

use tokio::process::Command;
use tracing::debug;
use zreplica_common::{Error, Result};

/// Render a command line for logs and error messages
pub(crate) fn describe(cmd: &Command) -> String {
    let std_cmd = cmd.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a command to completion and return its stdout.
/// A non-zero exit status becomes `Error::Command` carrying stderr.
pub(crate) async fn run(cmd: &mut Command) -> Result<String> {
    let command = describe(cmd);
    debug!(command = %command, "Running command");

    let output = cmd.output().await.map_err(|e| {
        Error::System(format!("Failed to execute `{}`: {}", command, e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::Command {
            command,
            message: if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            },
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
