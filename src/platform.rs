use crate::error::NexusError;
use std::ffi::OsStr;
use std::process::ExitStatus;
use tokio::process::Command;

fn ensure_command_success(status: ExitStatus, command_label: &str) -> Result<(), NexusError> {
    if status.success() {
        Ok(())
    } else {
        Err(NexusError::Subprocess(format!(
            "{command_label} failed with status {status}"
        )))
    }
}

/// Hand a path or URL to the desktop's default handler.
#[cfg(target_os = "macos")]
pub async fn open_with_default_handler(target: &OsStr) -> Result<(), NexusError> {
    let status = Command::new("open")
        .arg(target)
        .status()
        .await
        .map_err(|e| NexusError::Subprocess(format!("failed to run open: {e}")))?;
    ensure_command_success(status, "open")
}

#[cfg(all(unix, not(target_os = "macos")))]
pub async fn open_with_default_handler(target: &OsStr) -> Result<(), NexusError> {
    let status = Command::new("xdg-open")
        .arg(target)
        .status()
        .await
        .map_err(|e| NexusError::Subprocess(format!("failed to run xdg-open: {e}")))?;
    ensure_command_success(status, "xdg-open")
}

#[cfg(target_os = "windows")]
pub async fn open_with_default_handler(target: &OsStr) -> Result<(), NexusError> {
    let status = Command::new("cmd")
        .arg("/C")
        .arg("start")
        .arg("")
        .arg(target)
        .status()
        .await
        .map_err(|e| NexusError::Subprocess(format!("failed to run start: {e}")))?;
    ensure_command_success(status, "start")
}

#[cfg(not(any(unix, target_os = "windows")))]
pub async fn open_with_default_handler(_target: &OsStr) -> Result<(), NexusError> {
    Err(NexusError::Subprocess(
        "opening files is not supported on this platform".to_string(),
    ))
}
