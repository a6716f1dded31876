//! Line-oriented control channel
//!
//! A Unix-domain socket at the configured path accepts `CFG <section>
//! <key> <value>` lines and answers `OK` or `ERR:<reason>`. Commands are
//! forwarded to the dispatcher, which is the only place configuration is
//! ever mutated.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

use crate::reflector::Event;

type Events = mpsc::UnboundedSender<Event>;

/// Serve the control channel until the process stops
pub async fn serve(path: PathBuf, events: Events) {
    // A stale socket file from a previous run would make the bind fail
    let _ = std::fs::remove_file(&path);
    let listener = match UnixListener::bind(&path) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "control channel bind failed");
            return;
        }
    };
    tracing::info!(path = %path.display(), "control channel listening");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(stream, events.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "control channel accept failed");
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, events: Events) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if events
            .send(Event::Command {
                line: line.to_string(),
                reply: reply_tx,
            })
            .is_err()
        {
            return;
        }
        let reply = match reply_rx.await {
            Ok(Ok(())) => "OK\n".to_string(),
            Ok(Err(reason)) => format!("ERR:{reason}\n"),
            Err(_) => return,
        };
        if write_half.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn commands_get_line_replies() {
        let path = std::env::temp_dir().join(format!("reflector-ctrl-{}", std::process::id()));

        // Fake dispatcher: CFG lines succeed, everything else fails
        let (events, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Event::Command { line, reply } = event {
                    let result = if line.starts_with("CFG ") {
                        Ok(())
                    } else {
                        Err("Unknown command".to_string())
                    };
                    let _ = reply.send(result);
                }
            }
        });
        tokio::spawn(serve(path.clone(), events));

        // The listener comes up asynchronously
        let stream = loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut replies = BufReader::new(read_half).lines();

        write_half
            .write_all(b"CFG GLOBAL SQL_TIMEOUT 5\nREBOOT\n")
            .await
            .unwrap();

        assert_eq!(replies.next_line().await.unwrap().unwrap(), "OK");
        assert_eq!(
            replies.next_line().await.unwrap().unwrap(),
            "ERR:Unknown command"
        );

        let _ = std::fs::remove_file(&path);
    }
}
