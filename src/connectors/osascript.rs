use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use super::{ConnectorError, ConnectorResult};

/// Escapes a value for embedding inside an AppleScript string literal.
/// Backslashes go first so the quote escapes are not doubled.
pub(crate) fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Runs one AppleScript, bounded by `timeout`. Returns trimmed stdout.
pub(crate) async fn run(script: &str, timeout: Duration) -> ConnectorResult<String> {
    let child = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Err(_) => {
            warn!("osascript timed out after {:?}", timeout);
            Err(ConnectorError::Timeout("AppleScript timed out".to_string()))
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ConnectorError::Unavailable("osascript".to_string()))
        }
        Ok(Err(e)) => Err(ConnectorError::Failed(e.to_string())),
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Ok(Ok(output)) => Err(ConnectorError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
    }
}
