//! CLI commands

use std::ffi::OsStr;
use std::fmt::Display;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{Error, Result};

pub mod app;
pub mod ingress;
pub mod ports;
pub mod secret;
pub mod setup;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Run `command` to completion, streaming stdout lines at info and stderr
/// lines at warn. A non-zero exit status is an error.
pub(crate) async fn run_streamed(mut command: Command, label: &str) -> Result<()> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| Error::command_failed(format!("failed to start {label}: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err) = tokio::join!(
        forward_lines(stdout, |line| info!("{line}")),
        forward_lines(stderr, |line| warn!("{line}")),
    );
    out?;
    err?;

    let status = child.wait().await?;
    if !status.success() {
        return Err(Error::command_failed(format!("{label} failed with {status}")));
    }
    Ok(())
}

async fn forward_lines<R>(reader: Option<R>, emit: impl Fn(&str)) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        emit(&line);
    }
    Ok(())
}

/// Human readable command line for logs and errors.
pub(crate) fn describe<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    std::iter::once(program.to_string())
        .chain(
            args.into_iter()
                .map(|a| a.as_ref().to_string_lossy().into_owned()),
        )
        .collect::<Vec<_>>()
        .join(" ")
}
