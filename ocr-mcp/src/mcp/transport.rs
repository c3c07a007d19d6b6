//! Newline-delimited JSON framing between a byte stream pair and the rmcp service.
//!
//! Every frame is parsed here before rmcp sees it. Frames that are not valid
//! JSON-RPC are answered directly (-32700, -32600, -32601, -32602) and the
//! session keeps going. One writer task owns the output, so frames are never
//! interleaved. If the output fails the input side stops too, and the write
//! error is reported by [`Link::finish`].

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::channel::mpsc as rmcp_channel;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{OcrMcpError, Result};

/// How long the writer gets to drain once the service has stopped.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Request methods rmcp understands; a bad frame naming one of these has bad params.
const CLIENT_METHODS: &[&str] = &[
    "initialize",
    "ping",
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/templates/list",
    "resources/read",
    "resources/subscribe",
    "resources/unsubscribe",
    "prompts/list",
    "prompts/get",
    "completion/complete",
    "logging/setLevel",
];

pub(crate) type Outgoing = rmcp_channel::UnboundedSender<ServerJsonRpcMessage>;
pub(crate) type Incoming = BoxStream<'static, ClientJsonRpcMessage>;

/// Requests read but not yet answered, keyed by their serialized id.
#[derive(Default)]
struct Pending {
    ids: Mutex<HashSet<String>>,
    idle: Notify,
}

impl Pending {
    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, id: String) {
        self.ids().insert(id);
    }

    fn finish(&self, id: &str) {
        let mut ids = self.ids();
        ids.remove(id);
        if ids.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn len(&self) -> usize {
        self.ids().len()
    }

    /// Wait until every request has been answered, or until `stop` fires.
    async fn wait_idle(&self, stop: &CancellationToken) {
        loop {
            let idle = self.idle.notified();
            if self.len() == 0 {
                return;
            }
            tokio::select! {
                _ = idle => {}
                _ = stop.cancelled() => return,
            }
        }
    }
}

#[derive(Default)]
struct LinkStatus {
    input_closed: AtomicBool,
    read_error: Mutex<Option<io::Error>>,
}

impl LinkStatus {
    fn set_read_error(&self, error: io::Error) {
        *self.read_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    fn take_read_error(&self) -> Option<io::Error> {
        self.read_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// How the byte streams ended once the service is done with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkEnd {
    pub input_closed: bool,
}

/// Handle on the writer task and the shared read status.
pub(crate) struct Link {
    writer: JoinHandle<io::Result<()>>,
    status: Arc<LinkStatus>,
}

impl Link {
    /// Let the writer drain, then report the first I/O failure of either side.
    ///
    /// A writer that does not finish within the grace period is left to run
    /// rather than aborted, so a frame is never cut in half.
    pub(crate) async fn finish(self) -> Result<LinkEnd> {
        match tokio::time::timeout(FLUSH_GRACE, self.writer).await {
            Ok(Ok(written)) => written?,
            Ok(Err(e)) => error!(error = %e, "Writer task failed"),
            Err(_) => warn!("Output did not drain in time"),
        }

        if let Some(e) = self.status.take_read_error() {
            return Err(e.into());
        }

        Ok(LinkEnd {
            input_closed: self.status.input_closed.load(Ordering::SeqCst),
        })
    }
}

/// Split `reader`/`writer` into the sink and stream rmcp serves over.
///
/// The stream ends on end of input once every request read so far has been
/// answered, on a read error, when the output fails, or when `shutdown` fires.
pub(crate) fn line_delimited<R, W>(
    reader: R,
    writer: W,
    shutdown: &CancellationToken,
) -> ((Outgoing, Incoming), Link)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing, messages) = rmcp_channel::unbounded();
    let (replies_tx, replies) = mpsc::unbounded_channel();
    let pending = Arc::new(Pending::default());
    let status = Arc::new(LinkStatus::default());
    let stop = shutdown.child_token();

    let writer_stop = stop.clone();
    let writer_pending = Arc::clone(&pending);
    let writer = tokio::spawn(async move {
        let written = write_frames(writer, messages, replies, &writer_pending).await;
        if let Err(e) = &written {
            error!(error = %e, "Failed to write to output");
        }
        writer_stop.cancel();
        written
    });

    let inbound = Inbound {
        reader: BufReader::new(reader),
        replies: replies_tx,
        pending,
        status: Arc::clone(&status),
        stop,
    };
    let incoming = stream::unfold(inbound, |mut inbound| async move {
        let message = inbound.next_message().await?;
        Some((message, inbound))
    })
    .boxed();

    ((outgoing, incoming), Link { writer, status })
}

struct Inbound<R> {
    reader: BufReader<R>,
    replies: mpsc::UnboundedSender<Value>,
    pending: Arc<Pending>,
    status: Arc<LinkStatus>,
    stop: CancellationToken,
}

impl<R: AsyncRead + Unpin> Inbound<R> {
    async fn next_message(&mut self) -> Option<ClientJsonRpcMessage> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                _ = self.stop.cancelled() => return None,
                read = self.reader.read_until(b'\n', &mut line) => read,
            };

            match read {
                Ok(0) => {
                    debug!(in_flight = self.pending.len(), "Input closed, waiting for in-flight requests");
                    self.status.input_closed.store(true, Ordering::SeqCst);
                    self.pending.wait_idle(&self.stop).await;
                    return None;
                }
                Ok(_) => match decode_frame(&line) {
                    Frame::Message { message, track } => {
                        match track {
                            Track::Request(id) => self.pending.begin(id),
                            Track::Cancel(id) => self.pending.finish(&id),
                            Track::None => {}
                        }
                        return Some(message);
                    }
                    Frame::Reply(reply) => {
                        if self.replies.send(reply).is_err() {
                            debug!("Output closed, dropping error reply");
                        }
                    }
                    Frame::Skip => {}
                },
                Err(e) => {
                    error!(error = %e, "Failed to read from input");
                    self.status.set_read_error(e);
                    return None;
                }
            }
        }
    }
}

#[derive(Debug)]
enum Track {
    None,
    Request(String),
    Cancel(String),
}

#[derive(Debug)]
enum Frame {
    Message {
        message: ClientJsonRpcMessage,
        track: Track,
    },
    Reply(Value),
    Skip,
}

fn decode_frame(line: &[u8]) -> Frame {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Frame::Skip;
    }

    let value: Value = match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Received malformed frame");
            return Frame::Reply(error_frame(Value::Null, &OcrMcpError::Json(e)));
        }
    };

    let id = value.get("id").cloned();
    let method = value.get("method").and_then(Value::as_str).map(str::to_string);

    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Frame::Reply(error_frame(
            id.unwrap_or(Value::Null),
            &OcrMcpError::InvalidRequest("jsonrpc must be \"2.0\"".to_string()),
        ));
    }
    if let Some(bad) = id.as_ref().filter(|id| !id.is_string() && !id.is_number()) {
        debug!(id = %bad, "Rejecting request id");
        return Frame::Reply(error_frame(
            Value::Null,
            &OcrMcpError::InvalidRequest("id must be a string or a number".to_string()),
        ));
    }

    let track = match (&id, method.as_deref()) {
        (Some(id), Some(_)) => Track::Request(id.to_string()),
        (None, Some("notifications/cancelled")) => value
            .pointer("/params/requestId")
            .map(|id| Track::Cancel(id.to_string()))
            .unwrap_or(Track::None),
        _ => Track::None,
    };
    let is_response = value.get("result").is_some() || value.get("error").is_some();

    match serde_json::from_value::<ClientJsonRpcMessage>(value) {
        Ok(message) => Frame::Message { message, track },
        Err(e) => match (id, method) {
            (None, Some(method)) => {
                debug!(%method, error = %e, "Ignoring unsupported notification");
                Frame::Skip
            }
            (Some(id), Some(method)) if CLIENT_METHODS.contains(&method.as_str()) => {
                Frame::Reply(error_frame(
                    id,
                    &OcrMcpError::InvalidParameter {
                        name: "params".to_string(),
                        reason: e.to_string(),
                    },
                ))
            }
            (Some(id), Some(method)) => {
                Frame::Reply(error_frame(id, &OcrMcpError::MethodNotFound(method)))
            }
            (_, None) if is_response => {
                debug!(error = %e, "Ignoring unexpected response");
                Frame::Skip
            }
            (id, None) => Frame::Reply(error_frame(
                id.unwrap_or(Value::Null),
                &OcrMcpError::InvalidRequest("missing method".to_string()),
            )),
        },
    }
}

fn error_frame(id: Value, error: &OcrMcpError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.rpc_code(),
            "message": error.to_string()
        }
    })
}

async fn write_frames<W>(
    mut writer: W,
    mut messages: rmcp_channel::UnboundedReceiver<ServerJsonRpcMessage>,
    mut replies: mpsc::UnboundedReceiver<Value>,
    pending: &Pending,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            Some(message) = messages.next() => match serde_json::to_value(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "Failed to serialize response");
                    continue;
                }
            },
            Some(reply) = replies.recv() => reply,
            else => break,
        };

        let mut bytes = serde_json::to_vec(&frame)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;

        if frame.get("method").is_none() {
            if let Some(id) = frame.get("id") {
                pending.finish(&id.to_string());
            }
        }
    }
    writer.flush().await
}
