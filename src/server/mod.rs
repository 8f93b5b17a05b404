//! Line-delimited JSON transport over TCP
//!
//! Each connection gets its own [`ConsumerSession`]. Requests on a
//! connection are answered in order; a long-polling `receive` is cancelled
//! when the client disconnects or the server shuts down.

mod protocol;

pub use protocol::{Envelope, Request, Response, ServerError};

use crate::broker::Broker;
use crate::queue::{LeaseId, MessageId};
use crate::session::ConsumerSession;
use protocol::{decode_body, millis, parse_id, DeliveryView, OutcomeView};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;

/// Requests buffered per connection while an earlier one is in progress
const PIPELINE_DEPTH: usize = 32;

/// Transport settings, usually taken from the `[server]` config section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub listen_addr: String,
    /// Re-check period for lapsed leases during a long poll
    pub poll_interval: Duration,
    /// Upper bound applied to client-requested wait timeouts
    pub max_wait: Duration,
    pub max_line_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7450".to_string(),
            poll_interval: crate::session::DEFAULT_POLL_INTERVAL,
            max_wait: Duration::from_secs(20),
            max_line_bytes: 1024 * 1024,
        }
    }
}

pub struct Server {
    broker: Arc<Broker>,
    settings: Arc<ServerSettings>,
}

impl Server {
    pub fn new(broker: Arc<Broker>, settings: ServerSettings) -> Self {
        Self {
            broker,
            settings: Arc::new(settings),
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn serve(self, shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        let listener = TcpListener::bind(&self.settings.listen_addr).await?;
        self.run(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` fires
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        log::info!("Listening on {}", listener.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            log::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let broker = Arc::clone(&self.broker);
                    let settings = Arc::clone(&self.settings);
                    let shutdown = shutdown.resubscribe();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, broker, settings, shutdown).await {
                            log::debug!("Connection {} ended with error: {}", peer, e);
                        }
                    });
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        log::warn!("Connection task failed: {}", e);
                    }
                }
            }
        }

        log::info!(
            "Shutting down, waiting for {} connections",
            connections.len()
        );
        while connections.join_next().await.is_some() {}
        log::info!("Server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: Arc<Broker>,
    settings: Arc<ServerSettings>,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()> {
    log::debug!("Connection opened from {}", peer);
    let (reader, mut writer) = stream.into_split();

    let (lines_tx, mut lines_rx) = mpsc::channel(PIPELINE_DEPTH);
    let (closed_tx, closed_rx) = watch::channel(false);
    let reader_task = tokio::spawn(read_lines(reader, settings.max_line_bytes, lines_tx, closed_tx));

    let session = ConsumerSession::new(format!("conn-{}", peer), Arc::downgrade(&broker))
        .with_poll_interval(settings.poll_interval);
    let mut connection = Connection {
        broker,
        session,
        settings,
        shutdown: shutdown.resubscribe(),
        closed: closed_rx,
    };

    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => break,
            line = lines_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let (response, fatal) = match line {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => (connection.respond(&text).await, false),
            Err(e) => {
                let fatal = !matches!(e, ServerError::LineTooLong { .. });
                (Response::failure(None, &e), fatal)
            }
        };

        let mut encoded = serde_json::to_vec(&response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;

        if fatal {
            break;
        }
    }

    reader_task.abort();
    log::debug!("Connection closed from {}", peer);
    Ok(())
}

/// Forward request lines until EOF or a read error
///
/// Lines are read ahead of the dispatcher, up to `PIPELINE_DEPTH` beyond
/// what the channel holds, so a disconnect behind a long poll is still seen
/// and flagged on `closed`. An oversized line is discarded up to its newline
/// and reported in its place, so the connection stays usable.
async fn read_lines<R: AsyncRead + Unpin>(
    mut reader: R,
    max_line_bytes: usize,
    lines: mpsc::Sender<Result<String, ServerError>>,
    closed: watch::Sender<bool>,
) {
    let mut framer = LineFramer::new(max_line_bytes);
    let mut backlog = VecDeque::new();
    let mut reading = true;

    loop {
        let has_room = reading && backlog.len() < PIPELINE_DEPTH;
        tokio::select! {
            permit = lines.reserve(), if !backlog.is_empty() => match permit {
                Ok(permit) => {
                    if let Some(item) = backlog.pop_front() {
                        permit.send(item);
                    }
                }
                Err(_) => break,
            },
            chunk = read_chunk(&mut reader), if has_room => {
                match chunk {
                    Ok(bytes) if bytes.is_empty() => {
                        framer.finish(&mut backlog);
                        reading = false;
                        let _ = closed.send(true);
                    }
                    Ok(bytes) => framer.push(&bytes, &mut backlog),
                    Err(e) => {
                        log::debug!("Read failed: {}", e);
                        backlog.push_back(Err(ServerError::BadRequest(e.to_string())));
                        reading = false;
                    }
                }
                if framer.failed {
                    reading = false;
                }
            }
            else => break,
        }
    }

    let _ = closed.send(true);
}

const READ_CHUNK: usize = 8 * 1024;

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; READ_CHUNK];
    let n = reader.read(&mut chunk).await?;
    chunk.truncate(n);
    Ok(chunk)
}

/// Splits raw socket bytes into newline-terminated request lines
struct LineFramer {
    max_line_bytes: usize,
    partial: Vec<u8>,
    discarding: bool,
    /// Set after a line that is not UTF-8; nothing after it is framed
    failed: bool,
}

type Framed = VecDeque<Result<String, ServerError>>;

impl LineFramer {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            partial: Vec::new(),
            discarding: false,
            failed: false,
        }
    }

    fn push(&mut self, mut bytes: &[u8], out: &mut Framed) {
        while !bytes.is_empty() && !self.failed {
            let Some(end) = bytes.iter().position(|b| *b == b'\n') else {
                if !self.discarding {
                    self.partial.extend_from_slice(bytes);
                    if self.partial.len() > self.max_line_bytes {
                        self.reject_partial(out);
                    }
                }
                return;
            };

            let (line, rest) = bytes.split_at(end + 1);
            bytes = rest;
            if self.discarding {
                self.discarding = false;
                continue;
            }

            self.partial.extend_from_slice(line);
            if self.partial.len() - 1 > self.max_line_bytes {
                self.partial.clear();
                out.push_back(Err(self.too_long()));
            } else {
                self.emit(out);
            }
        }
    }

    /// Flush an unterminated last line at EOF
    fn finish(&mut self, out: &mut Framed) {
        if !self.discarding && !self.failed && !self.partial.is_empty() {
            self.emit(out);
        }
    }

    fn emit(&mut self, out: &mut Framed) {
        match String::from_utf8(std::mem::take(&mut self.partial)) {
            Ok(line) => out.push_back(Ok(line)),
            Err(e) => {
                self.failed = true;
                out.push_back(Err(ServerError::BadRequest(e.to_string())));
            }
        }
    }

    fn reject_partial(&mut self, out: &mut Framed) {
        self.partial.clear();
        self.discarding = true;
        out.push_back(Err(self.too_long()));
    }

    fn too_long(&self) -> ServerError {
        ServerError::LineTooLong {
            limit: self.max_line_bytes,
        }
    }
}

struct Connection {
    broker: Arc<Broker>,
    session: ConsumerSession,
    settings: Arc<ServerSettings>,
    shutdown: broadcast::Receiver<()>,
    closed: watch::Receiver<bool>,
}

impl Connection {
    async fn respond(&mut self, line: &str) -> Response {
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => return Response::failure(None, &ServerError::BadRequest(e.to_string())),
        };

        match self.dispatch(envelope.request).await {
            Ok(result) => Response::success(envelope.id, result),
            Err(e) => {
                log::debug!("Request failed: {}", e);
                Response::failure(envelope.id, &e)
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<Value, ServerError> {
        let broker = &self.broker;

        let result = match request {
            Request::Ping => json!({ "pong": true }),
            Request::Publish { topic, body } => {
                let outcomes: Vec<OutcomeView> = broker
                    .publish(&topic, &decode_body(&body)?)?
                    .into_iter()
                    .map(OutcomeView::from)
                    .collect();
                json!({ "outcomes": outcomes })
            }
            Request::Send { queue, body } => {
                let message = broker.send(&queue, decode_body(&body)?)?;
                json!({ "message_id": message.id.to_string() })
            }
            Request::Receive {
                queue,
                max_messages,
                wait_seconds,
            } => {
                let wait = Duration::from_secs(wait_seconds).min(self.settings.max_wait);
                let mut shutdown = self.shutdown.resubscribe();
                let mut closed = self.closed.clone();
                let cancel = async move {
                    tokio::select! {
                        _ = shutdown.recv() => {}
                        _ = closed.wait_for(|closed| *closed) => {}
                    }
                };

                let deliveries = self
                    .session
                    .receive_until(&queue, max_messages, wait, cancel)
                    .await?;
                let now = self.broker.clock().now();
                let messages: Vec<DeliveryView> = deliveries
                    .iter()
                    .map(|delivery| DeliveryView::new(delivery, now))
                    .collect();
                json!({ "messages": messages })
            }
            Request::Acknowledge {
                queue,
                message_id,
                lease_id,
            } => {
                let (message_id, lease_id) = parse_lease(&message_id, &lease_id)?;
                self.session.acknowledge(&queue, message_id, lease_id)?;
                json!({})
            }
            Request::ExtendVisibility {
                queue,
                message_id,
                lease_id,
                timeout_seconds,
            } => {
                let (message_id, lease_id) = parse_lease(&message_id, &lease_id)?;
                let lease = self.session.extend_visibility(
                    &queue,
                    message_id,
                    lease_id,
                    Duration::from_secs(timeout_seconds),
                )?;
                let remaining = lease.remaining(self.broker.clock().now());
                json!({ "lease_id": lease.lease_id.to_string(), "visibility_remaining_ms": millis(remaining) })
            }
            Request::Release {
                queue,
                message_id,
                lease_id,
            } => {
                let (message_id, lease_id) = parse_lease(&message_id, &lease_id)?;
                self.session.release(&queue, message_id, lease_id)?;
                json!({})
            }
            Request::CreateQueue(declaration) => {
                broker.create_queue(&declaration.name, declaration.queue_config())?;
                json!({ "queue": declaration.name })
            }
            Request::UpdateQueue(declaration) => {
                broker.update_queue(&declaration.name, declaration.queue_config())?;
                json!({ "queue": declaration.name })
            }
            Request::DeleteQueue { queue } => {
                broker.delete_queue(&queue)?;
                json!({})
            }
            Request::PurgeQueue { queue } => {
                json!({ "removed": broker.purge_queue(&queue)? })
            }
            Request::CreateTopic { topic } => {
                broker.create_topic(&topic)?;
                json!({ "topic": topic })
            }
            Request::DeleteTopic { topic } => {
                broker.delete_topic(&topic)?;
                json!({})
            }
            Request::Subscribe { topic, queue } => {
                let subscription_id = broker.subscribe(&topic, &queue)?;
                json!({ "subscription_id": subscription_id.to_string() })
            }
            Request::Unsubscribe {
                topic,
                subscription_id,
            } => {
                let subscription_id = parse_id("subscription_id", &subscription_id)?;
                json!({ "removed": broker.unsubscribe(&topic, subscription_id)? })
            }
            Request::QueueStats { queue } => json!(broker.queue_stats(&queue)?),
            Request::ListQueues => json!({ "queues": broker.queue_summaries()? }),
            Request::ListTopics => json!({ "topics": broker.topic_summaries()? }),
        };

        Ok(result)
    }
}

fn parse_lease(message_id: &str, lease_id: &str) -> Result<(MessageId, LeaseId), ServerError> {
    Ok((
        parse_id("message_id", message_id)?,
        parse_id("lease_id", lease_id)?,
    ))
}
