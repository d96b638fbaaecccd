//! Runtime control socket.
//!
//! Clients connect to a Unix domain socket and write one JSON object per
//! line, e.g. `{"command":"advance"}`. A client may also write a single
//! object and close the connection without a trailing newline.

use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::ControlCommand;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Request {
    command: String,
}

/// Map a request line to a command. `None` for unknown commands.
pub fn parse_request(line: &str) -> Result<Option<ControlCommand>> {
    let request: Request = serde_json::from_str(line.trim()).context("malformed control request")?;
    Ok(match request.command.as_str() {
        "advance" | "next" => Some(ControlCommand::Advance),
        _ => None,
    })
}

/// Accept connections on `path` until `cancel` fires. The socket file is
/// removed on the way out.
pub async fn run(
    path: PathBuf,
    control: mpsc::Sender<ControlCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    remove_stale(&path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    info!(path = %path.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let control = control.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve(stream, control, cancel).await {
                            warn!(error = %err, "control connection failed");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "control socket accept failed"),
            },
        }
    }

    drop(listener);
    remove_stale(&path)?;
    debug!(path = %path.display(), "control socket removed");
    Ok(())
}

async fn serve(
    stream: UnixStream,
    control: mpsc::Sender<ControlCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_request(&line) {
            Ok(Some(command)) => {
                info!(?command, "control command received");
                if control.send(command).await.is_err() {
                    debug!("presentation loop gone; dropping control connection");
                    return Ok(());
                }
            }
            Ok(None) => warn!(request = %line.trim(), "unknown control command"),
            Err(err) => warn!(error = %err, "ignoring control request"),
        }
    }
}

/// Remove a leftover socket at `path`. Anything else there is left alone.
fn remove_stale(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("inspecting {}", path.display()));
        }
    };
    if !meta.file_type().is_socket() {
        bail!(
            "{} exists and is not a socket; refusing to replace it",
            path.display()
        );
    }
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("removing stale control socket {}", path.display()))
        }
    }
}
