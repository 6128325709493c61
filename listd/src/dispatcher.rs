//! The serialized decision loop.
//!
//! One [`Dispatcher`] task owns the [`ClientRegistry`] and is the only code
//! that ever touches it. Everything else talks to it through the channels
//! behind a [`DispatcherHandle`]:
//!
//! - **register**: a new session and the sender half of its outbound queue
//! - **deregister**: a session whose read or write side failed
//! - **inbound**: parsed client messages, forwarded to the downstream processor
//! - **responses**: downstream output, broadcast to every registered session
//!
//! Events are handled one at a time. The select is biased so that pending
//! registrations are always taken before deregistrations; a session queues its
//! registration before either of its loops starts, so its removal can never
//! overtake it.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::{
    select,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    codec::Message,
    connector::Downstream,
    registry::{ClientRegistry, SessionId},
};

/// Request to add a session to the broadcast set.
#[derive(Debug)]
pub struct Registration {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub outbound: UnboundedSender<Message>,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("dispatcher is no longer running")]
pub struct DispatcherClosed;

/// Cloneable entry point into the dispatcher task.
#[derive(Clone)]
pub struct DispatcherHandle {
    inbound: mpsc::Sender<Message>,
    register: UnboundedSender<Registration>,
    deregister: UnboundedSender<SessionId>,
    next_id: Arc<AtomicU64>,
}

impl DispatcherHandle {
    /// Allocates a fresh session identity.
    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register(&self, registration: Registration) -> Result<(), DispatcherClosed> {
        self.register.send(registration).map_err(|_| DispatcherClosed)
    }

    /// Asks for `id` to be removed. Never blocks; safe to call more than once.
    pub fn deregister(&self, id: SessionId) {
        if self.deregister.send(id).is_err() {
            debug!(session = %id, "dispatcher gone, dropping deregistration");
        }
    }

    /// Hands a client message to the dispatcher, waiting for queue space.
    pub async fn submit(&self, message: Message) -> Result<(), DispatcherClosed> {
        self.inbound.send(message).await.map_err(|_| DispatcherClosed)
    }
}

pub struct Dispatcher {
    registry: ClientRegistry,
    inbound: mpsc::Receiver<Message>,
    register: UnboundedReceiver<Registration>,
    deregister: UnboundedReceiver<SessionId>,
    downstream: Downstream,
}

impl Dispatcher {
    /// Builds the dispatcher and the handle used to feed it.
    ///
    /// `inbound_capacity` bounds the shared client-message queue; when it is
    /// full every read loop waits.
    pub fn new(downstream: Downstream, inbound_capacity: usize) -> (Self, DispatcherHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (deregister_tx, deregister_rx) = mpsc::unbounded_channel();

        let dispatcher = Self {
            registry: ClientRegistry::new(),
            inbound: inbound_rx,
            register: register_rx,
            deregister: deregister_rx,
            downstream,
        };
        let handle = DispatcherHandle {
            inbound: inbound_tx,
            register: register_tx,
            deregister: deregister_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (dispatcher, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every input channel has closed.
    ///
    /// While a server is listening it holds a handle, so in practice this
    /// lives as long as the process.
    pub async fn run(mut self) {
        let mut responses_open = true;

        loop {
            select! {
                biased;
                Some(registration) = self.register.recv() => {
                    let Registration { id, peer, outbound } = registration;
                    self.registry.register(id, peer, outbound);
                }
                Some(id) = self.deregister.recv() => {
                    if !self.registry.deregister(id) {
                        debug!(session = %id, "ignoring removal of unknown session");
                    }
                }
                response = self.downstream.responses.recv(), if responses_open => match response {
                    Some(response) => self.handle_response(response),
                    None => {
                        warn!("downstream response channel closed");
                        responses_open = false;
                    }
                },
                Some(request) = self.inbound.recv() => self.handle_request(request).await,
                else => break,
            }
        }

        info!("dispatcher stopped");
    }

    async fn handle_request(&mut self, request: Message) {
        debug!(%request, "new request");
        if let Err(err) = self.downstream.requests.send(request).await {
            warn!(request = %err.0, "downstream request channel closed, dropping request");
        }
    }

    fn handle_response(&mut self, response: Message) {
        let delivered = self.registry.broadcast(&response);
        debug!(%response, delivered, "new response");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{
        connector::{self, Upstream},
        registry::{features_message, welcome_message},
    };

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().expect("valid addr")
    }

    fn start() -> (DispatcherHandle, Upstream, JoinHandle<()>) {
        let (downstream, upstream) = connector::channel(8);
        let (dispatcher, handle) = Dispatcher::new(downstream, 8);
        (handle, upstream, dispatcher.spawn())
    }

    fn connect(handle: &DispatcherHandle) -> (SessionId, UnboundedReceiver<Message>) {
        let id = handle.next_session_id();
        let (outbound, rx) = mpsc::unbounded_channel();
        handle
            .register(Registration { id, peer: peer(), outbound })
            .expect("dispatcher running");
        (id, rx)
    }

    async fn next(rx: &mut UnboundedReceiver<Message>) -> Option<Message> {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("message within timeout")
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let (handle, _upstream, _task) = start();
        let first = handle.next_session_id();
        let second = handle.clone().next_session_id();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn requests_are_forwarded_in_order() {
        let (handle, mut upstream, _task) = start();

        for word in ["A", "B", "C"] {
            handle
                .submit(Message::new("REQ").arg(word))
                .await
                .expect("submit");
        }

        for word in ["A", "B", "C"] {
            let forwarded = timeout(Duration::from_secs(1), upstream.requests.recv())
                .await
                .expect("forwarded within timeout");
            assert_eq!(forwarded, Some(Message::new("REQ").arg(word)));
        }
    }

    #[tokio::test]
    async fn responses_reach_all_sessions() {
        let (handle, upstream, _task) = start();
        let mut sessions: Vec<_> = (0..3).map(|_| connect(&handle)).collect();

        for (_, rx) in &mut sessions {
            assert_eq!(next(rx).await, Some(welcome_message()));
            assert_eq!(next(rx).await, Some(features_message()));
        }

        let response = Message::new("RES").arg("X");
        upstream.responses.send(response.clone()).expect("send response");

        for (_, rx) in &mut sessions {
            assert_eq!(next(rx).await, Some(response.clone()));
        }
    }

    #[tokio::test]
    async fn greeting_precedes_inflight_broadcasts() {
        let (handle, upstream, _task) = start();
        let (_, mut existing) = connect(&handle);

        for n in 0..50 {
            upstream
                .responses
                .send(Message::new("RES").arg(n.to_string()))
                .expect("send response");
        }
        let (_, mut newcomer) = connect(&handle);

        assert_eq!(next(&mut newcomer).await, Some(welcome_message()));
        assert_eq!(next(&mut newcomer).await, Some(features_message()));
        assert_eq!(next(&mut existing).await, Some(welcome_message()));
    }

    #[tokio::test]
    async fn deregistration_closes_outbound_and_tolerates_repeats() {
        let (handle, upstream, _task) = start();
        let (id, mut rx) = connect(&handle);
        let (_, mut other) = connect(&handle);

        handle.deregister(id);
        handle.deregister(id);
        upstream
            .responses
            .send(Message::new("RES").arg("after"))
            .expect("send response");

        assert_eq!(next(&mut rx).await, Some(welcome_message()));
        assert_eq!(next(&mut rx).await, Some(features_message()));
        assert_eq!(next(&mut rx).await, None);

        next(&mut other).await;
        next(&mut other).await;
        assert_eq!(next(&mut other).await, Some(Message::new("RES").arg("after")));
    }

    #[tokio::test]
    async fn stops_once_all_inputs_close() {
        let (downstream, upstream) = connector::channel(1);
        let (dispatcher, handle) = Dispatcher::new(downstream, 1);
        let task = dispatcher.spawn();

        drop(handle);
        drop(upstream);

        timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher should stop")
            .expect("dispatcher task should not panic");
    }
}
