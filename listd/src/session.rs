//! One accepted connection.
//!
//! A session registers itself with the dispatcher, then runs two loops over the
//! split socket: the read loop on its own task, the write loop on the task that
//! accepted the connection. Either loop reports failure by asking the
//! dispatcher to deregister the session; the write loop ends when the
//! dispatcher drops the outbound sender. The socket is released once, when the
//! write loop has returned and the read task has been stopped.

use std::net::SocketAddr;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver},
};
use tracing::{debug, info, warn};

use crate::{
    codec::{Message, Tokeniser},
    dispatcher::{DispatcherHandle, Registration},
    registry::SessionId,
};

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: DispatcherHandle,
    max_line_length: usize,
) {
    let id = dispatcher.next_session_id();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let registration = Registration {
        id,
        peer,
        outbound: outbound_tx,
    };
    if let Err(err) = dispatcher.register(registration) {
        warn!(session = %id, %peer, error = %err, "could not register connection");
        return;
    }

    let (reader, writer) = stream.into_split();
    let tokeniser = Tokeniser::with_max_line_length(max_line_length);
    let reader_task = tokio::spawn(read_loop(
        id,
        peer,
        BufReader::new(reader),
        tokeniser,
        dispatcher.clone(),
    ));

    write_loop(id, peer, writer, outbound_rx, &dispatcher).await;

    reader_task.abort();
    let _ = reader_task.await;
    debug!(session = %id, %peer, "socket released");
}

/// Reads newline-terminated chunks and submits every message they complete.
///
/// Malformed or oversized lines are logged and dropped; the connection stays
/// up. A single read never buffers more than the tokeniser's line limit. Ends
/// on EOF or a read error, after queueing the session's deregistration.
pub async fn read_loop<R>(
    id: SessionId,
    peer: SocketAddr,
    mut reader: R,
    mut tokeniser: Tokeniser,
    dispatcher: DispatcherHandle,
) where
    R: AsyncBufRead + Unpin,
{
    let chunk_limit = tokeniser.max_line_length() as u64;
    let mut chunk = Vec::new();

    loop {
        chunk.clear();
        match (&mut reader).take(chunk_limit).read_until(b'\n', &mut chunk).await {
            Ok(0) => {
                if tokeniser.has_partial() {
                    debug!(session = %id, %peer, "discarding unterminated line");
                }
                info!(session = %id, %peer, "peer closed connection");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(session = %id, %peer, error = ?err, "error reading from client");
                break;
            }
        }

        for message in decode(id, peer, &mut tokeniser, &chunk) {
            if dispatcher.submit(message).await.is_err() {
                debug!(session = %id, %peer, "dispatcher gone, stopping reads");
                return;
            }
        }
    }

    dispatcher.deregister(id);
}

fn decode(id: SessionId, peer: SocketAddr, tokeniser: &mut Tokeniser, chunk: &[u8]) -> Vec<Message> {
    tokeniser
        .feed(chunk)
        .into_iter()
        .filter_map(|line| match line.and_then(Message::from_line) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(session = %id, %peer, error = %err, "dropping malformed line");
                None
            }
        })
        .collect()
}

/// Writes queued messages until the outbound channel closes.
///
/// Encoding failures skip the message. A write failure queues deregistration
/// and ends the loop; the channel itself is only ever closed by the registry.
pub async fn write_loop<W>(
    id: SessionId,
    peer: SocketAddr,
    mut writer: W,
    mut outbound: UnboundedReceiver<Message>,
    dispatcher: &DispatcherHandle,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let encoded = match message.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(session = %id, %peer, error = %err, %message, "skipping unencodable message");
                continue;
            }
        };

        if let Err(err) = write_frame(&mut writer, &encoded).await {
            warn!(session = %id, %peer, error = ?err, "error writing to client");
            dispatcher.deregister(id);
            return;
        }
    }

    debug!(session = %id, %peer, "outbound channel closed");
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
