//! Operator console.
//!
//! Lines typed on the console are sent to the peripheral through UART TX.
//! `exit` ends the run.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::binding::CharacteristicBinding;
use crate::error::Result;

/// Command word that ends the run.
pub const EXIT_COMMAND: &str = "exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Close the session and stop.
    Exit,
    /// Send these bytes through TX.
    Forward(Vec<u8>),
    /// Nothing to do.
    Empty,
}

impl ConsoleCommand {
    /// Parse a line. A trailing line terminator is ignored; everything else
    /// is forwarded as typed.
    pub fn parse(line: &str) -> Self {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            Self::Empty
        } else if line.trim() == EXIT_COMMAND {
            Self::Exit
        } else {
            Self::Forward(line.as_bytes().to_vec())
        }
    }
}

/// Why the console stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator typed `exit`.
    ExitRequested,
    /// The input closed.
    EndOfInput,
    /// The session is shutting down.
    Cancelled,
}

/// Read lines from `reader` and forward them through `tx`.
///
/// Lines the peripheral cannot take (too long, write failed) are reported
/// and skipped. Fatal errors such as a closed session end the console.
pub async fn run_console<R>(
    reader: R,
    tx: &CharacteristicBinding,
    cancel: CancellationToken,
) -> Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    debug!("Console reading input");

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ConsoleExit::Cancelled),
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            debug!("Console input closed");
            return Ok(ConsoleExit::EndOfInput);
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Exit => {
                info!("Exit requested from console");
                return Ok(ConsoleExit::ExitRequested);
            }
            ConsoleCommand::Empty => {}
            ConsoleCommand::Forward(bytes) => match tx.write(&bytes).await {
                Ok(()) => info!("Sent: {}", line),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Not sent: {}", e),
            },
        }
    }
}
