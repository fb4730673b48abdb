//! The per-connection event loop (§4.6, C6): reads tagged command lines
//! off one accepted socket, drains any literal a command carries, dispatches
//! through the verb table, and fans out committed changes this connection
//! is subscribed to as untagged lines.
//!
//! Modeled as a single `tokio::select!` loop rather than the extract's
//! reentrant "recursively process the next line while `canReadLine()`"
//! shape (Design Notes §9): reading the next command and receiving the
//! next queued notification are just two branches of the same loop, so
//! there is never a call to the frame reader nested inside another.

use std::sync::Arc;

use pimd_core::ConnectionId;
use pimd_notify::{ChangeBus, ChangeEvent};
use pimd_storage::DataStore;
use pimd_wire::{CommandLine, FrameReader, FrameWriter, Hello, ResponseLine, ResponseStatus, WireError};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{info, instrument, warn};

use crate::context::HandlerContext;
use crate::error::{ErrorDisposition, ServerError};
use crate::parts::{stream_literal, StreamedPart, DEFAULT_EXTERNALIZATION_THRESHOLD};
use crate::response::ResponseQueue;
use crate::verb_table::{build_verb_table, VerbTable};

/// Everything the loop needs that does not change for the lifetime of the
/// connection: the shared storage engine, the change bus it subscribes its
/// own receiver from, and the greeting fields.
pub struct ConnectionConfig {
    pub store: Arc<DataStore>,
    pub bus: ChangeBus,
    pub server_name: Arc<str>,
    pub generation: u64,
    pub external_payload_threshold: u64,
}

/// Runs one client connection to completion. Returns once the client
/// disconnects (clean EOF) or a protocol-level error forces the socket
/// closed (§4.6 "fatal connection errors").
#[instrument(skip_all, fields(connection = %connection_id))]
pub async fn run_connection<S>(connection_id: ConnectionId, stream: S, config: ConnectionConfig)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(BufReader::new(read_half));
    let mut writer = FrameWriter::new(write_half);

    let hello = Hello::new(config.server_name.to_string(), config.generation);
    if let Err(err) = writer.write_hello(&hello).await {
        warn!(%err, "failed to write greeting, dropping connection");
        return;
    }

    let table = build_verb_table();
    let mut ctx = HandlerContext::new(connection_id, config.store, config.external_payload_threshold);
    let mut responses = ResponseQueue::new();
    let mut change_rx = config.bus.subscribe();

    info!("connection established");

    loop {
        tokio::select! {
            biased;

            command = reader.read_command_line() => {
                match command {
                    Ok(cmd) => {
                        if !handle_command(&mut reader, &mut writer, &table, &mut ctx, &mut responses, cmd).await {
                            break;
                        }
                    }
                    Err(WireError::Eof) => {
                        info!("client closed connection");
                        break;
                    }
                    Err(err) => {
                        warn!(%err, "protocol error, closing connection");
                        break;
                    }
                }
            }

            event = change_rx.recv() => {
                match event {
                    Ok(event) => forward_event(&mut writer, &mut ctx, &mut responses, event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connection missed notifications, client cache may need a full refetch");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Handles one fully-read command line: drains its literal (if any),
/// dispatches to the registered handler, writes the tagged response, and
/// replays anything queued while the handler was running. Returns `false`
/// when the connection must close.
async fn handle_command<R, W>(
    reader: &mut FrameReader<BufReader<R>>,
    writer: &mut FrameWriter<W>,
    table: &VerbTable,
    ctx: &mut HandlerContext,
    responses: &mut ResponseQueue,
    cmd: CommandLine,
) -> bool
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    responses.suspend();
    let tag = cmd.tag;

    if let Some(declared_size) = cmd.literal_len() {
        let part_name = cmd
            .args
            .get("literalPart")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("PLD:RFC822");
        let mut literal = reader.literal_reader(declared_size);
        match stream_literal(&mut literal, declared_size, DEFAULT_EXTERNALIZATION_THRESHOLD).await {
            Ok(StreamedPart::Inline(bytes)) | Ok(StreamedPart::Large(bytes)) => {
                ctx.set_pending_literal((Arc::from(part_name), bytes));
            }
            Err(err) => {
                let line = ResponseLine::tagged(tag, ResponseStatus::Bad, err.to_string());
                let _ = writer.write_response(&line).await;
                return true;
            }
        }
    }

    let outcome = match table.get(cmd.verb) {
        Some(handler) => handler(ctx, cmd).await,
        None => Err(ServerError::WrongState { verb: "<unregistered>", state: ctx.state.label() }),
    };

    let (response, close, succeeded) = match outcome {
        Ok(value) => (ResponseLine::tagged(tag, ResponseStatus::Ok, value.to_string()), false, true),
        Err(err) => {
            let close = err.disposition() == ErrorDisposition::CloseConnection;
            (ResponseLine::tagged(tag, ResponseStatus::No, err.to_string()), close, false)
        }
    };
    ctx.finish_command(succeeded);

    if writer.write_response(&response).await.is_err() {
        return false;
    }
    for queued in responses.resume() {
        if writer.write_response(&queued).await.is_err() {
            return false;
        }
    }
    !close
}

/// Forwards one committed change as an untagged line if this connection's
/// subscription matches it (§4.10 step 1's server-side mirror: a
/// connection with nothing subscribed gets nothing written). While a
/// handler is mid-command, the line is queued instead (§4.6 response
/// continuations).
async fn forward_event<W>(writer: &mut FrameWriter<W>, ctx: &mut HandlerContext, responses: &mut ResponseQueue, event: ChangeEvent)
where
    W: AsyncWrite + Unpin,
{
    if matches!(event, ChangeEvent::TransactionCommitted | ChangeEvent::TransactionRolledBack) {
        return;
    }
    if !ctx.subscription.matches(&event) {
        return;
    }
    let line = ResponseLine::untagged(describe_event(&event));
    if let Some(line) = responses.offer(line) {
        let _ = writer.write_response(&line).await;
    }
}

fn describe_event(event: &ChangeEvent) -> String {
    match event {
        ChangeEvent::ItemAdded(item) => format!("ItemAdded {}", item.id),
        ChangeEvent::ItemChanged { item, .. } => format!("ItemChanged {}", item.id),
        ChangeEvent::ItemsRemoved(entries) => {
            format!("ItemsRemoved {}", entries.iter().map(|e| e.id.to_string()).collect::<Vec<_>>().join(","))
        }
        ChangeEvent::ItemsFlagsChanged { items, .. } => {
            format!("ItemsFlagsChanged {}", items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(","))
        }
        ChangeEvent::CollectionAdded(collection) => format!("CollectionAdded {}", collection.id),
        ChangeEvent::CollectionChanged { collection, .. } => format!("CollectionChanged {}", collection.id),
        ChangeEvent::CollectionsRemoved(entries) => {
            format!("CollectionsRemoved {}", entries.iter().map(|e| e.id.to_string()).collect::<Vec<_>>().join(","))
        }
        ChangeEvent::TransactionCommitted | ChangeEvent::TransactionRolledBack => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::io::duplex;

    async fn fresh_store() -> (Arc<DataStore>, ChangeBus, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let driver = pimd_query::SqliteDriver::new(pool);
        let bus = ChangeBus::new(32);
        let store = DataStore::initialize(driver, bus.clone(), dir.path().to_path_buf()).await.unwrap();
        (Arc::new(store), bus, dir)
    }

    fn next_connection_id() -> ConnectionId {
        pimd_core::ConnectionIdGenerator::new().next()
    }

    #[tokio::test]
    async fn login_then_reply_arrives_tagged_ok() {
        let (store, bus, _dir) = fresh_store().await;
        let (mut client, server) = duplex(4096);
        let config = ConnectionConfig {
            store,
            bus,
            server_name: Arc::from("pimd"),
            generation: 1,
            external_payload_threshold: 4096,
        };
        let handle = tokio::spawn(run_connection(next_connection_id(), server, config));

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("HELLO"));

        client.write_all(b"1 LOGIN {\"sessionId\":\"abc\"}\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("1 OK"));

        drop(client);
        let _ = handle.await;
    }
}
