//! Line-oriented console: JSON commands (or a few shorthand words) on stdin,
//! JSON broadcasts on stdout.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tv_core::protocol::{Broadcast, Command, Message};

use crate::core::SessionEvent;

/// Parse one input line.  Full JSON commands take precedence over shorthand.
pub fn parse_line(line: &str) -> anyhow::Result<Command> {
    let line = line.trim();
    if line.starts_with('{') {
        return match Message::decode_line(line)? {
            Message::Command(cmd) => Ok(cmd),
            Message::Broadcast(_) => anyhow::bail!("expected a command, got a broadcast"),
        };
    }

    let mut words = line.split_whitespace();
    let word = words.next().unwrap_or_default();
    let mut number = || -> anyhow::Result<usize> {
        let arg = words
            .next()
            .ok_or_else(|| anyhow::anyhow!("`{}` needs a number", word))?;
        Ok(arg.parse()?)
    };
    let cmd = match word {
        "next" | "n" => Command::Next,
        "prev" | "p" => Command::Prev,
        "random" | "r" => Command::Random,
        "stop" => Command::Stop,
        "quit" | "q" => Command::Quit,
        "state" => Command::GetState,
        "refresh" => Command::Refresh,
        "import" => Command::Import { source: None },
        "tune" => Command::Tune { id: number()? },
        "cat" => Command::SelectCategory { index: number()? },
        "ch" => Command::SelectChannel { id: number()? },
        "like" => Command::ToggleLike { id: number()? },
        "find" => Command::Search {
            query: line["find".len()..].trim().to_string(),
        },
        other => anyhow::bail!("unknown command: {}", other),
    };
    Ok(cmd)
}

/// Read stdin until EOF, forwarding commands into the session loop.
pub fn start_reader(event_tx: mpsc::Sender<SessionEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Console: stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("Console: read error: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(cmd) => {
                    if event_tx.send(SessionEvent::Command(cmd)).await.is_err() {
                        return;
                    }
                }
                Err(e) => eprintln!("{e:#}"),
            }
        }
        let _ = event_tx.send(SessionEvent::Shutdown).await;
    })
}

/// Print every broadcast as one JSON line on stdout.
pub fn start_writer(mut broadcast_rx: broadcast::Receiver<Broadcast>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            let msg = match broadcast_rx.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Console: missed {} broadcast messages", n);
                    continue;
                }
                Err(_) => break,
            };
            let Ok(line) = Message::Broadcast(msg).encode_line() else {
                continue;
            };
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    })
}
