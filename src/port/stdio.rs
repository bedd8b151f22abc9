use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mqtt::error::BridgeError;
use crate::mqtt::message_manager::InboundMessage;

/// Forwards every JSON line from `reader` to the bridge as a command.
///
/// Lines that are not JSON are logged and skipped. Returns the number of
/// forwarded commands once the reader is exhausted or `cancel` fires.
pub async fn read_commands<R>(
    reader: R,
    outbound: mpsc::Sender<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<usize, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            info!("Command input closed");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(command) => {
                outbound
                    .send(command)
                    .await
                    .map_err(|e| BridgeError::ChannelClosed(format!("outbound: {}", e)))?;
                forwarded += 1;
            }
            Err(e) => warn!("Skipping command line that is not JSON ({}): {}", e, line),
        }
    }

    Ok(forwarded)
}

/// Writes every inbound message to `writer` as one JSON line.
pub async fn write_messages<W>(
    mut writer: W,
    mut inbound: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) -> Result<usize, BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = inbound.recv() => msg,
        };

        let Some(msg) = msg else {
            debug!("Inbound channel closed");
            break;
        };

        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        written += 1;
    }

    Ok(written)
}

/// Runs both directions of the port on stdin/stdout.
pub fn spawn(
    outbound: mpsc::Sender<serde_json::Value>,
    inbound: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) -> (
    JoinHandle<Result<usize, BridgeError>>,
    JoinHandle<Result<usize, BridgeError>>,
) {
    let reader = tokio::spawn(read_commands(
        BufReader::new(tokio::io::stdin()),
        outbound,
        cancel.clone(),
    ));
    let writer = tokio::spawn(write_messages(tokio::io::stdout(), inbound, cancel));
    (reader, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn json_lines_become_commands() {
        let input = b"{\"action\":\"spectateGame\",\"name\":\"1\"}\n\n  \n{\"action\":\"other\"}\n";
        let (tx, mut rx) = mpsc::channel(8);

        let forwarded = read_commands(&input[..], tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(forwarded, 2);
        assert_eq!(
            rx.recv().await.unwrap(),
            json!({"action": "spectateGame", "name": "1"})
        );
        assert_eq!(rx.recv().await.unwrap(), json!({"action": "other"}));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn broken_lines_are_skipped() {
        let input = b"not json\n{\"action\":\"spectateGame\",\"name\":\"2\"}\n";
        let (tx, mut rx) = mpsc::channel(8);

        let forwarded = read_commands(&input[..], tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(forwarded, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            json!({"action": "spectateGame", "name": "2"})
        );
    }

    #[tokio::test]
    async fn closed_bridge_side_is_reported() {
        let input = b"{\"action\":\"spectateGame\",\"name\":\"1\"}\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = read_commands(&input[..], tx, CancellationToken::new()).await;

        assert!(matches!(result, Err(BridgeError::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn messages_are_written_as_json_lines() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(InboundMessage::new("traze/games", json!([])))
            .await
            .unwrap();
        tx.send(InboundMessage::new("traze/1/players", json!([{"id": 1}])))
            .await
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let written = write_messages(&mut out, rx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 2);
        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({"topic": "traze/games", "payload": []}),
                json!({"topic": "traze/1/players", "payload": [{"id": 1}]}),
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_the_writer() {
        let (_tx, rx) = mpsc::channel::<InboundMessage>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let written = write_messages(Vec::new(), rx, cancel).await.unwrap();

        assert_eq!(written, 0);
    }
}
