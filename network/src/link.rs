//! Link supervision: the reliability wrapper around one logical connection.
//!
//! A supervisor owns the connect/reconnect lifecycle for its link, sends
//! heartbeat probes, counts missed acknowledgments, and drains the bounded
//! outbound queue. Link failures never propagate to callers; they surface
//! as `LinkEvent::Down` followed by reconnection on the backoff schedule.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info, warn};
use stage_core::{Error, LinkId};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::backoff::BackoffPolicy;
use crate::events::LinkEvent;
use crate::protocol::{self, WireMessage};
use crate::queue::OutboundQueue;
use crate::session::{SessionSnapshot, SessionTracker};

/// Per-link tunables. Defaults: 2 s heartbeats, 3 missed acks to trigger
/// reconnection, 256-message outbound queue.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub heartbeat_interval: std::time::Duration,
    pub missed_ack_threshold: u32,
    pub backoff: BackoffPolicy,
    pub queue_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: std::time::Duration::from_secs(2),
            missed_ack_threshold: 3,
            backoff: BackoffPolicy::default(),
            queue_capacity: 256,
        }
    }
}

/// Send half of an established connection.
#[async_trait]
pub trait SessionTx: Send {
    async fn send(&mut self, message: &WireMessage) -> Result<(), Error>;
}

/// Receive half of an established connection. Yields raw frames; decoding
/// happens in the supervisor so decode failures can surface as events.
#[async_trait]
pub trait SessionRx: Send {
    async fn recv(&mut self) -> Result<Vec<u8>, Error>;
}

/// Both halves of an established, handshaken connection.
pub struct SessionPair {
    pub tx: Box<dyn SessionTx>,
    pub rx: Box<dyn SessionRx>,
}

/// Connection factory for one link.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection and complete the application handshake.
    ///
    /// Must return `Ok` only after the remote acknowledged the handshake.
    /// A bare socket open is not a connection, and reconnection backoff
    /// resets only on this method's success.
    async fn connect(&self, link: LinkId) -> Result<SessionPair, Error>;
}

/// Cheap clonable sender into a link's outbound queue.
#[derive(Clone)]
pub struct LinkHandle {
    id: LinkId,
    queue: Arc<Mutex<OutboundQueue>>,
    notify: Arc<Notify>,
}

impl LinkHandle {
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Queue a message for delivery. Never blocks; if the queue is full the
    /// oldest entry is evicted in favor of this one.
    pub fn enqueue(&self, message: WireMessage) {
        let evicted = self.queue.lock().unwrap().push(message);
        if evicted.is_some() {
            debug!("link {}: queue overflow, evicted oldest message", self.id);
        }
        self.notify.notify_one();
    }
}

/// Owns the background tasks driving one link.
pub struct LinkSupervisor {
    id: LinkId,
    tracker: Arc<Mutex<SessionTracker>>,
    queue: Arc<Mutex<OutboundQueue>>,
    notify: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LinkSupervisor {
    /// Start supervising a link. The driver task begins connecting
    /// immediately and keeps the link alive until `shutdown`.
    pub fn spawn(
        id: LinkId,
        transport: Arc<dyn Transport>,
        config: LinkConfig,
        events: mpsc::Sender<LinkEvent>,
    ) -> Self {
        let tracker = Arc::new(Mutex::new(SessionTracker::new(
            config.backoff,
            config.missed_ack_threshold,
        )));
        let queue = Arc::new(Mutex::new(OutboundQueue::new(config.queue_capacity)));
        let notify = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(drive(
            id,
            transport,
            config,
            tracker.clone(),
            queue.clone(),
            notify.clone(),
            events,
            shutdown_rx,
        ));

        Self {
            id,
            tracker,
            queue,
            notify,
            shutdown,
            task,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            id: self.id,
            queue: self.queue.clone(),
            notify: self.notify.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tracker.lock().unwrap().snapshot()
    }

    /// Stop the link. Cancels any in-flight reconnection attempt and clears
    /// pending backoff timers.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.tracker.lock().unwrap().disconnected();
        self.task.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    id: LinkId,
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    tracker: Arc<Mutex<SessionTracker>>,
    queue: Arc<Mutex<OutboundQueue>>,
    notify: Arc<Notify>,
    events: mpsc::Sender<LinkEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tracker.lock().unwrap().begin_connect();

        let pair = tokio::select! {
            result = transport.connect(id) => result,
            _ = shutdown.changed() => break,
        };

        let pair = match pair {
            Ok(pair) => pair,
            Err(e) => {
                let delay = tracker.lock().unwrap().connect_failed();
                warn!("link {}: connect failed ({}), retrying in {:?}", id, e, delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = shutdown.changed() => break,
                }
            }
        };

        tracker.lock().unwrap().handshake_acked(Instant::now());
        info!("link {}: handshake acknowledged", id);
        let _ = events.send(LinkEvent::Up { link: id }).await;

        let SessionPair { mut tx, rx } = pair;

        // Flush the backlog in FIFO order before anything else.
        let reason = match flush_queue(tx.as_mut(), &queue).await {
            Err(e) => format!("flush failed: {}", e),
            Ok(()) => {
                connected_loop(
                    id,
                    &config,
                    tx.as_mut(),
                    rx,
                    &tracker,
                    &queue,
                    &notify,
                    &events,
                    &mut shutdown,
                )
                .await
            }
        };

        if *shutdown.borrow() {
            break;
        }

        let delay = tracker.lock().unwrap().connection_lost();
        warn!(
            "link {}: connection lost ({}), reconnecting in {:?}",
            id, reason, delay
        );
        let _ = events
            .send(LinkEvent::Down { link: id, reason })
            .await;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    tracker.lock().unwrap().disconnected();
    debug!("link {}: supervisor stopped", id);
}

#[allow(clippy::too_many_arguments)]
async fn connected_loop(
    id: LinkId,
    config: &LinkConfig,
    tx: &mut dyn SessionTx,
    rx: Box<dyn SessionRx>,
    tracker: &Arc<Mutex<SessionTracker>>,
    queue: &Arc<Mutex<OutboundQueue>>,
    notify: &Arc<Notify>,
    events: &mpsc::Sender<LinkEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> String {
    let (done_tx, mut done_rx) = oneshot::channel::<String>();
    let reader = tokio::spawn(read_loop(rx, id, tracker.clone(), events.clone(), done_tx));

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; consume it so probes start one
    // interval after connect.
    heartbeat.tick().await;

    let reason = loop {
        tokio::select! {
            _ = notify.notified() => {
                if let Err(e) = flush_queue(tx, queue).await {
                    break format!("send failed: {}", e);
                }
            }
            _ = heartbeat.tick() => {
                let expired = {
                    let mut session = tracker.lock().unwrap();
                    session.heartbeat_sent(Instant::now());
                    session.heartbeat_expired()
                };
                if expired {
                    break "missed heartbeat acks".to_string();
                }
                if let Err(e) = tx.send(&WireMessage::Ping { seq: None }).await {
                    break format!("heartbeat send failed: {}", e);
                }
            }
            result = &mut done_rx => {
                break result.unwrap_or_else(|_| "reader task stopped".to_string());
            }
            _ = shutdown.changed() => {
                break "link shutdown".to_string();
            }
        }
    };

    reader.abort();
    reason
}

async fn read_loop(
    mut rx: Box<dyn SessionRx>,
    id: LinkId,
    tracker: Arc<Mutex<SessionTracker>>,
    events: mpsc::Sender<LinkEvent>,
    done: oneshot::Sender<String>,
) {
    let reason = loop {
        match rx.recv().await {
            Ok(bytes) => match protocol::decode(&bytes) {
                Ok(WireMessage::Pong { .. }) => {
                    tracker.lock().unwrap().heartbeat_acked(Instant::now());
                }
                Ok(message) => {
                    if events
                        .send(LinkEvent::Inbound { link: id, message })
                        .await
                        .is_err()
                    {
                        break "router channel closed".to_string();
                    }
                }
                Err(error) => {
                    debug!("link {}: undecodable frame: {}", id, error);
                    if events
                        .send(LinkEvent::Malformed { link: id, error })
                        .await
                        .is_err()
                    {
                        break "router channel closed".to_string();
                    }
                }
            },
            Err(e) => break format!("receive failed: {}", e),
        }
    };
    let _ = done.send(reason);
}

/// Drain the outbound queue through the session, preserving FIFO order. A
/// failed send puts the message back at the head so nothing is reordered.
async fn flush_queue(
    tx: &mut dyn SessionTx,
    queue: &Arc<Mutex<OutboundQueue>>,
) -> Result<(), Error> {
    loop {
        let next = { queue.lock().unwrap().pop() };
        let Some(message) = next else {
            return Ok(());
        };
        if let Err(e) = tx.send(&message).await {
            queue.lock().unwrap().requeue_front(message);
            return Err(e);
        }
    }
}
