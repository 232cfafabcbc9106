//! Pipe transport: an agent subprocess with stdin/stdout as the channel.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Error, Result};

use super::FrameStream;

/// Spawn an agent subprocess and capture its stdio as a PDU channel.
///
/// The child's lifetime is tied to the connection: it is killed when the
/// returned handle is dropped or the connection closes.
pub async fn spawn_agent(
    executable: &Path,
    args: &[String],
    pid: u32,
) -> Result<(FrameStream, Child)> {
    let mut child = Command::new(executable)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            executable: executable.display().to_string(),
            source,
        })?;

    debug!(
        executable = %executable.display(),
        child_pid = child.id(),
        "agent subprocess started"
    );

    let stdin = child.stdin.take().ok_or_else(|| Error::Protocol {
        message: "agent subprocess has no stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| Error::Protocol {
        message: "agent subprocess has no stdout".into(),
    })?;

    Ok((
        FrameStream::new(Box::new(stdout), Box::new(stdin), pid),
        child,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let result = spawn_agent(Path::new("/nonexistent/pmlink-no-such-agent"), &[], 1).await;
        match result {
            Err(Error::Spawn { executable, .. }) => {
                assert!(executable.contains("pmlink-no-such-agent"));
            }
            other => panic!("expected spawn error, got {:?}", other.map(|_| ())),
        }
    }
}
