//! Line-delimited JSON over stdin/stdout.
//!
//! Each line is one [`Message`] envelope. Lines longer than
//! [`MAX_MESSAGE_SIZE`] are discarded and reported with an error envelope.

use std::io;

use ota_handler::Sender;
use ota_protocol::constants::MAX_MESSAGE_SIZE;
use ota_protocol::{ErrorKind, Message};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete,
    TooLong,
    Eof,
}

#[derive(Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: String,
}

fn append(buf: &mut Vec<u8>, overflow: &mut bool, bytes: &[u8], limit: usize) {
    if *overflow {
        return;
    }
    if buf.len() + bytes.len() > limit {
        *overflow = true;
        buf.clear();
    } else {
        buf.extend_from_slice(bytes);
    }
}

/// Reads one line into `buf` without ever holding more than `limit` bytes.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut overflow = false;
    loop {
        let (used, found) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(if overflow {
                    Line::TooLong
                } else if buf.is_empty() {
                    Line::Eof
                } else {
                    Line::Complete
                });
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    append(buf, &mut overflow, &available[..i], limit);
                    (i + 1, true)
                }
                None => {
                    append(buf, &mut overflow, available, limit);
                    (available.len(), false)
                }
            }
        };
        reader.consume(used);
        if found {
            return Ok(if overflow { Line::TooLong } else { Line::Complete });
        }
    }
}

/// Reads envelopes from `reader` into `inbound` until EOF or cancellation.
///
/// Malformed lines are answered through `replies` with a `bad_request` error
/// carrying whatever message id could be recovered.
pub async fn read_messages<R>(
    reader: R,
    inbound: mpsc::Sender<Message>,
    replies: Sender,
    cancel: CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = next_line(&mut reader, &mut buf, MAX_MESSAGE_SIZE) => line?,
        };

        match line {
            Line::Eof => {
                debug!("input closed");
                break;
            }
            Line::TooLong => {
                warn!(limit = MAX_MESSAGE_SIZE, "message exceeds max size, discarded");
                let err = Message::error(
                    "",
                    ErrorKind::LimitExceeded,
                    format!("message exceeds {MAX_MESSAGE_SIZE} bytes"),
                );
                if replies.send_msg(err).await.is_err() {
                    break;
                }
                continue;
            }
            Line::Complete => {}
        }

        let text = buf.trim_ascii();
        if text.is_empty() {
            continue;
        }

        match serde_json::from_slice::<Message>(text) {
            Ok(msg) => {
                if inbound.send(msg).await.is_err() {
                    debug!("dispatcher gone, stopping reader");
                    break;
                }
            }
            Err(e) => {
                let id = serde_json::from_slice::<IdOnly>(text)
                    .map(|m| m.id)
                    .unwrap_or_default();
                warn!(id = %id, error = %e, "invalid message");
                let err = Message::error(id, ErrorKind::BadRequest, format!("invalid message: {e}"));
                if replies.send_msg(err).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Writes outbound envelopes to `writer`, one per line, until every sender
/// is dropped.
pub async fn write_messages<W>(writer: W, mut outbound: mpsc::Receiver<Message>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(msg) = outbound.recv().await {
        let mut line = serde_json::to_vec(&msg)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        // Flush once the burst is written.
        if outbound.is_empty() {
            writer.flush().await?;
        }
    }
    writer.flush().await
}
