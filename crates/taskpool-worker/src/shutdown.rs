//! Shutdown requests from the coordinator.
//!
//! The coordinator writes `{"command":"shutdown"}` to the worker's stdin
//! and closes it. Either the command or end of input cancels the token.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskpool_core::WorkerCommand;

/// Watch `input` for a shutdown command and cancel `token` when it arrives.
pub fn listen_for_shutdown<R>(input: R, token: CancellationToken) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(input).lines();
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                next = lines.next_line() => match next {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match WorkerCommand::parse(&line) {
                        Ok(WorkerCommand::Shutdown) => {
                            info!("Shutdown requested");
                            break;
                        }
                        Err(e) => warn!(error = %e, line = %line, "Ignoring unknown command"),
                    },
                    Ok(None) => {
                        info!("Control input closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Control input failed, shutting down");
                        break;
                    }
                },
            }
        }
        token.cancel();
    })
}
