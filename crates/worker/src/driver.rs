//! Line-oriented driver
//!
//! Reads one command per input line and writes one JSON response per output
//! line:
//!
//! - a JSON object is a [`RequestEnvelope`] to run to completion
//! - `cancel <identifier>` requests cancellation
//! - `status <identifier>` reports the current status
//!
//! Submissions run concurrently; their results are written as they finish,
//! so responses may arrive out of input order.

use std::sync::Arc;

use actflow_durable::{
    EngineError, ErrorKind, RequestEnvelope, RequestIdentifier, ResultEnvelope, StatusReport,
    WorkflowEngine,
};
use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Submit(RequestEnvelope),
    Cancel(RequestIdentifier),
    Status(RequestIdentifier),
}

impl Command {
    /// Parse one input line; `None` for blank lines
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.starts_with('{') {
            return Some(
                serde_json::from_str(line)
                    .map(Command::Submit)
                    .map_err(|e| format!("malformed request envelope: {}", e)),
            );
        }

        let (verb, argument) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let argument = argument.trim();
        let parsed = match (verb, argument) {
            (_, "") => Err(format!("missing identifier in '{}'", line)),
            ("cancel", id) => Ok(Command::Cancel(RequestIdentifier::from(id))),
            ("status", id) => Ok(Command::Status(RequestIdentifier::from(id))),
            (other, _) => Err(format!("unknown command '{}'", other)),
        };
        Some(parsed)
    }
}

/// One output line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Result {
        identifier: RequestIdentifier,
        result: ResultEnvelope,
    },
    Status(StatusReport),
    Cancel {
        identifier: RequestIdentifier,
        accepted: bool,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        identifier: Option<RequestIdentifier>,
        kind: ErrorKind,
        message: String,
    },
}

impl Response {
    fn from_error(identifier: Option<RequestIdentifier>, err: &EngineError) -> Self {
        Self::Error {
            identifier,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Serve commands from `input` until it is exhausted
///
/// Returns once every submission read has settled and its response is
/// written.
pub async fn run<R, W>(engine: Arc<WorkflowEngine>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

    let reader = read_commands(engine, input, tx);
    let writer = async {
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_vec(&response).context("failed to encode response")?;
            line.push(b'\n');
            output
                .write_all(&line)
                .await
                .context("failed to write response")?;
            output.flush().await.context("failed to flush output")?;
        }
        Ok::<_, anyhow::Error>(())
    };

    let (read_result, write_result) = tokio::join!(reader, writer);
    read_result?;
    write_result
}

async fn read_commands<R>(
    engine: Arc<WorkflowEngine>,
    input: R,
    tx: mpsc::UnboundedSender<Response>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut submissions = JoinSet::new();

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        while let Some(joined) = submissions.try_join_next() {
            log_join_error(joined);
        }

        let command = match Command::parse(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(message)) => {
                warn!(%message, "rejected input line");
                let _ = tx.send(Response::Error {
                    identifier: None,
                    kind: ErrorKind::ValidationError,
                    message,
                });
                continue;
            }
        };

        match command {
            Command::Submit(envelope) => {
                let engine = engine.clone();
                let tx = tx.clone();
                submissions.spawn(async move {
                    let identifier = envelope.identifier.clone();
                    let response = match engine.submit_and_wait(envelope).await {
                        Ok(result) => Response::Result {
                            identifier,
                            result,
                        },
                        Err(err) => {
                            let identifier = (!identifier.is_blank()).then_some(identifier);
                            Response::from_error(identifier, &err)
                        }
                    };
                    let _ = tx.send(response);
                });
            }
            Command::Cancel(identifier) => {
                let response = match engine.cancel(&identifier).await {
                    Ok(accepted) => Response::Cancel {
                        identifier,
                        accepted,
                    },
                    Err(err) => Response::from_error(Some(identifier), &err),
                };
                let _ = tx.send(response);
            }
            Command::Status(identifier) => {
                let response = match engine.status(&identifier).await {
                    Ok(report) => Response::Status(report),
                    Err(err) => Response::from_error(Some(identifier), &err),
                };
                let _ = tx.send(response);
            }
        }
    }

    debug!(pending = submissions.len(), "input closed, waiting for submissions");
    while let Some(joined) = submissions.join_next().await {
        log_join_error(joined);
    }
    info!("all submissions settled");
    Ok(())
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "submission task failed");
    }
}
