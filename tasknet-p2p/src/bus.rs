//! Message bus over a peer's control stream.
//!
//! A bus owns one framed stream and runs a single task that writes queued
//! envelopes and routes incoming ones. An incoming message goes to the first
//! of:
//!
//! 1. the pending [`MessageBus::request`] it replies to,
//! 2. an outstanding [`MessageBus::await_message`] for its kind,
//! 3. the handler registered for its kind,
//! 4. the per-kind inbox, where a later await picks it up.
//!
//! The inbox closes the gap between a remote sending a message and the
//! local side starting to await it. It is bounded; when full the oldest
//! message of that kind is dropped.
//!
//! The bus is tied to its connection's cancellation token: aborting the
//! connection closes the bus and fails every pending await with
//! [`P2pError::ConnectionClosed`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::DEFAULT_INBOX_CAPACITY;
use crate::error::{P2pError, P2pResult};
use crate::protocol::{Envelope, Message, MessageCodec, MessageKind};

/// Handler for one message kind. A returned message is sent back as a reply.
pub type MessageHandler = Arc<dyn Fn(Message) -> Option<Message> + Send + Sync>;

/// Bidirectional typed messaging over one stream.
///
/// Cheap to clone; clones share the stream.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    outgoing: mpsc::UnboundedSender<Envelope>,
    state: Mutex<BusState>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    inbox_capacity: usize,
}

#[derive(Default)]
struct BusState {
    waiters: HashMap<MessageKind, oneshot::Sender<Envelope>>,
    requests: HashMap<u64, oneshot::Sender<Envelope>>,
    handlers: HashMap<MessageKind, MessageHandler>,
    inbox: HashMap<MessageKind, VecDeque<Envelope>>,
    closed: bool,
}

impl MessageBus {
    /// Start a bus over `stream`, closed when `connection` is cancelled.
    pub fn new<S>(stream: S, connection: &CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_inbox_capacity(stream, connection, DEFAULT_INBOX_CAPACITY)
    }

    /// Start a bus with a custom per-kind inbox capacity.
    pub fn with_inbox_capacity<S>(
        stream: S,
        connection: &CancellationToken,
        inbox_capacity: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(BusInner {
            outgoing,
            state: Mutex::new(BusState::default()),
            next_id: AtomicU64::new(1),
            cancel: connection.child_token(),
            inbox_capacity: inbox_capacity.max(1),
        });

        let framed = Framed::new(stream, MessageCodec::new());
        tokio::spawn(run_bus(framed, outgoing_rx, inner.clone()));

        Self { inner }
    }

    /// Queue a message for sending.
    ///
    /// Fails with [`P2pError::ConnectionClosed`] once the bus is closed.
    pub fn send(&self, message: Message) -> P2pResult<()> {
        self.inner.push(None, message).map(|_| ())
    }

    /// Wait for the next message of `kind`.
    ///
    /// Returns a queued message immediately if one already arrived. Only one
    /// await per kind may be outstanding at a time.
    pub async fn await_message(&self, kind: MessageKind, timeout: Duration) -> P2pResult<Message> {
        let rx = {
            let mut state = self.inner.state.lock();
            if let Some(envelope) = state.inbox.get_mut(&kind).and_then(VecDeque::pop_front) {
                return Ok(envelope.message);
            }
            if state.closed {
                return Err(P2pError::ConnectionClosed);
            }
            if state.waiters.get(&kind).is_some_and(|tx| !tx.is_closed()) {
                return Err(P2pError::AwaitPending {
                    kind: kind.to_string(),
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.insert(kind, tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope.message),
            Ok(Err(_)) => Err(P2pError::ConnectionClosed),
            Err(_) => {
                self.inner.state.lock().waiters.remove(&kind);
                Err(P2pError::Timeout {
                    kind: kind.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Send a message and wait for the reply to it.
    pub async fn request(&self, message: Message, timeout: Duration) -> P2pResult<Message> {
        let kind = message.kind();
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(P2pError::ConnectionClosed);
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            state.requests.insert(id, tx);
            id
        };

        let envelope = Envelope {
            id,
            reply_to: None,
            message,
        };
        if self.inner.outgoing.send(envelope).is_err() {
            self.inner.state.lock().requests.remove(&id);
            return Err(P2pError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope.message),
            Ok(Err(_)) => Err(P2pError::ConnectionClosed),
            Err(_) => {
                self.inner.state.lock().requests.remove(&id);
                Err(P2pError::Timeout {
                    kind: format!("reply to {kind}"),
                    after: timeout,
                })
            }
        }
    }

    /// Register the handler for `kind`, replacing any previous one.
    ///
    /// Messages of that kind already waiting in the inbox are handed to it.
    pub fn handle<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(Message) -> Option<Message> + Send + Sync + 'static,
    {
        let queued = {
            let mut state = self.inner.state.lock();
            state.handlers.insert(kind, Arc::new(handler));
            state.inbox.remove(&kind).unwrap_or_default()
        };

        for envelope in queued {
            self.inner.dispatch(envelope);
        }
    }

    /// Close the bus and its stream.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.close();
    }

    /// Whether the bus has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled() || self.inner.state.lock().closed
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BusInner {
    fn push(&self, reply_to: Option<u64>, message: Message) -> P2pResult<u64> {
        if self.state.lock().closed {
            return Err(P2pError::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.outgoing
            .send(Envelope {
                id,
                reply_to,
                message,
            })
            .map_err(|_| P2pError::ConnectionClosed)?;
        Ok(id)
    }

    fn dispatch(&self, envelope: Envelope) {
        let kind = envelope.message.kind();
        let mut state = self.state.lock();

        if let Some(reply_to) = envelope.reply_to {
            if let Some(tx) = state.requests.remove(&reply_to) {
                let _ = tx.send(envelope);
                return;
            }
        }

        // A waiter whose await already timed out hands the envelope back.
        let envelope = match state.waiters.remove(&kind) {
            Some(tx) => match tx.send(envelope) {
                Ok(()) => return,
                Err(envelope) => envelope,
            },
            None => envelope,
        };

        if let Some(handler) = state.handlers.get(&kind).cloned() {
            drop(state);
            let Envelope { id, message, .. } = envelope;
            if let Some(reply) = handler(message) {
                if let Err(e) = self.push(Some(id), reply) {
                    debug!(kind = %kind, error = %e, "Dropping reply");
                }
            }
            return;
        }

        let queue = state.inbox.entry(kind).or_default();
        if queue.len() >= self.inbox_capacity {
            queue.pop_front();
            warn!(kind = %kind, "Bus inbox full, dropping oldest message");
        }
        queue.push_back(envelope);
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        // Dropping the senders wakes pending awaits with ConnectionClosed.
        state.waiters.clear();
        state.requests.clear();
        state.handlers.clear();
    }
}

async fn run_bus<S>(
    framed: Framed<S, MessageCodec>,
    mut outgoing: mpsc::UnboundedReceiver<Envelope>,
    inner: Arc<BusInner>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut source) = framed.split();

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                trace!("Bus cancelled");
                break;
            }

            envelope = outgoing.recv() => {
                let Some(envelope) = envelope else { break };
                if let Err(e) = sink.send(envelope).await {
                    debug!(error = %e, "Control stream write failed");
                    break;
                }
            }

            frame = source.next() => match frame {
                Some(Ok(envelope)) => inner.dispatch(envelope),
                Some(Err(e)) => {
                    debug!(error = %e, "Control stream read failed");
                    break;
                }
                None => {
                    trace!("Control stream closed by remote");
                    break;
                }
            },
        }
    }

    inner.close();
}
