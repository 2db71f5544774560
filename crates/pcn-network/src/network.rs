//! In-memory transport shared by all simulated nodes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use pcn_core::NetworkAddress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::NetworkError;
use crate::packet::{DeliveryOutcome, Packet, PacketId, PacketTrace};
use crate::socket::Socket;

/// Transport behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Probability in [0, 1] that a packet is silently lost.
    #[serde(default)]
    pub loss_probability: f64,
    /// Artificial one-way latency in milliseconds.
    #[serde(default)]
    pub delivery_delay_ms: u64,
    /// Seed for the loss generator; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Capacity of the packet trace broadcast channel.
    #[serde(default = "default_trace_capacity")]
    pub trace_capacity: usize,
}

fn default_trace_capacity() -> usize {
    1024
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_probability: 0.0,
            delivery_delay_ms: 0,
            seed: None,
            trace_capacity: default_trace_capacity(),
        }
    }
}

struct Inbox<M> {
    session: u64,
    sender: mpsc::UnboundedSender<Packet<M>>,
}

/// The simulated network: a registry of socket inboxes plus the table of
/// requests waiting for a response.
pub struct SimNetwork<M> {
    config: NetworkConfig,
    inboxes: DashMap<NetworkAddress, Inbox<M>>,
    pending: DashMap<PacketId, oneshot::Sender<Packet<M>>>,
    traces: broadcast::Sender<PacketTrace>,
    rng: Mutex<StdRng>,
    next_session: AtomicU64,
}

impl<M> SimNetwork<M>
where
    M: Serialize + Send + 'static,
{
    pub fn new(config: NetworkConfig) -> Arc<Self> {
        let (traces, _) = broadcast::channel(config.trace_capacity.max(1));
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Arc::new(Self {
            config,
            inboxes: DashMap::new(),
            pending: DashMap::new(),
            traces,
            rng: Mutex::new(rng),
            next_session: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Open a socket at `address`.
    pub fn connect(self: &Arc<Self>, address: NetworkAddress) -> Result<SimSocket<M>, NetworkError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        match self.inboxes.entry(address.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(NetworkError::AddressInUse(address));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Inbox { session, sender });
            }
        }
        tracing::debug!(%address, "socket connected");
        Ok(SimSocket {
            address,
            session,
            network: Arc::clone(self),
            receiver: Mutex::new(Some(receiver)),
            closed: AtomicBool::new(false),
        })
    }

    /// Remove whatever socket listens at `address`. Returns true if one did.
    pub fn disconnect(&self, address: &NetworkAddress) -> bool {
        let removed = self.inboxes.remove(address).is_some();
        if removed {
            tracing::debug!(%address, "socket disconnected");
        }
        removed
    }

    pub fn is_connected(&self, address: &NetworkAddress) -> bool {
        self.inboxes.contains_key(address)
    }

    /// Observe every packet handed to the network.
    pub fn subscribe(&self) -> broadcast::Receiver<PacketTrace> {
        self.traces.subscribe()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn disconnect_session(&self, address: &NetworkAddress, session: u64) {
        if self
            .inboxes
            .remove_if(address, |_, inbox| inbox.session == session)
            .is_some()
        {
            tracing::debug!(%address, "socket closed");
        }
    }

    fn register_pending(&self, id: PacketId) -> oneshot::Receiver<Packet<M>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    fn cancel_pending(&self, id: &PacketId) {
        self.pending.remove(id);
    }

    fn trace(&self, packet: &Packet<M>, outcome: DeliveryOutcome) {
        if self.traces.receiver_count() > 0 {
            let _ = self.traces.send(PacketTrace::of(packet, outcome));
        }
    }

    fn lost(&self) -> bool {
        let p = self.config.loss_probability;
        p > 0.0 && self.rng.lock().gen::<f64>() < p
    }

    /// Hand a packet to the network.
    ///
    /// Fails fast only when nobody listens at the receiver; lost and delayed
    /// packets look like a successful send to the caller.
    fn send(self: &Arc<Self>, packet: Packet<M>) -> Result<(), NetworkError> {
        if !packet.is_response() && !self.inboxes.contains_key(&packet.receiver) {
            self.trace(&packet, DeliveryOutcome::Undeliverable);
            return Err(NetworkError::Undeliverable(packet.receiver));
        }
        if self.lost() {
            tracing::trace!(id = %packet.id, receiver = %packet.receiver, "packet lost");
            self.trace(&packet, DeliveryOutcome::Dropped);
            return Ok(());
        }
        if self.config.delivery_delay_ms > 0 {
            let network = Arc::clone(self);
            let delay = Duration::from_millis(self.config.delivery_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = network.deliver(packet) {
                    tracing::debug!(error = %e, "delayed packet not delivered");
                }
            });
            return Ok(());
        }
        self.deliver(packet)
    }

    fn deliver(&self, packet: Packet<M>) -> Result<(), NetworkError> {
        if let Some(request_id) = packet.responding_to {
            return match self.pending.remove(&request_id) {
                Some((_, waiter)) => {
                    self.trace(&packet, DeliveryOutcome::Delivered);
                    let _ = waiter.send(packet);
                    Ok(())
                }
                None => {
                    tracing::debug!(%request_id, sender = %packet.sender, "late response discarded");
                    self.trace(&packet, DeliveryOutcome::Late);
                    Ok(())
                }
            };
        }
        let receiver = packet.receiver.clone();
        let Some(inbox) = self.inboxes.get(&receiver) else {
            self.trace(&packet, DeliveryOutcome::Undeliverable);
            return Err(NetworkError::Undeliverable(receiver));
        };
        self.trace(&packet, DeliveryOutcome::Delivered);
        inbox
            .sender
            .send(packet)
            .map_err(|_| NetworkError::Undeliverable(receiver))
    }
}

/// A socket bound to one address of a [`SimNetwork`].
pub struct SimSocket<M> {
    address: NetworkAddress,
    session: u64,
    network: Arc<SimNetwork<M>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Packet<M>>>>,
    closed: AtomicBool,
}

impl<M> SimSocket<M>
where
    M: Serialize + Send + 'static,
{
    fn ensure_open(&self) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::SocketClosed(self.address.clone()));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<M> Socket<M> for SimSocket<M>
where
    M: Serialize + Send + Sync + 'static,
{
    fn address(&self) -> &NetworkAddress {
        &self.address
    }

    async fn notify(&self, receiver: &NetworkAddress, payload: M) -> Result<(), NetworkError> {
        self.ensure_open()?;
        let packet = Packet::new(self.address.clone(), receiver.clone(), payload);
        self.network.send(packet)
    }

    async fn request(
        &self,
        receiver: &NetworkAddress,
        payload: M,
        timeout: Duration,
    ) -> Result<M, NetworkError> {
        self.ensure_open()?;
        let packet = Packet::new(self.address.clone(), receiver.clone(), payload);
        let id = packet.id;
        let response = self.network.register_pending(id);
        if let Err(e) = self.network.send(packet) {
            self.network.cancel_pending(&id);
            return Err(e);
        }
        let unanswered = || NetworkError::RequestUnanswered {
            receiver: receiver.clone(),
            id,
            timeout_ms: timeout.as_millis() as u64,
        };
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(packet)) => Ok(packet.payload),
            Ok(Err(_)) => Err(unanswered()),
            Err(_) => {
                self.network.cancel_pending(&id);
                Err(unanswered())
            }
        }
    }

    async fn respond(
        &self,
        receiver: &NetworkAddress,
        request_id: PacketId,
        payload: M,
    ) -> Result<(), NetworkError> {
        self.ensure_open()?;
        let packet = Packet::response(self.address.clone(), receiver.clone(), request_id, payload);
        self.network.send(packet)
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Packet<M>>> {
        self.receiver.lock().take()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network.disconnect_session(&self.address, self.session);
        }
    }
}

impl<M> Drop for SimSocket<M> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network
                .inboxes
                .remove_if(&self.address, |_, inbox| inbox.session == self.session);
        }
    }
}
