//! Broadcast hub: the seam between the trading worker and the observer
//! context. The worker publishes DomainEvents through a bounded, non-blocking
//! channel; the hub task owns the observer registry, the latest snapshots for
//! late joiners, and the running balance.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::events::{balance_wire, DomainEvent, SequenceSnapshot, StatusSnapshot};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub type ClientId = u64;

/// Cloneable publish handle held by the trading worker. `publish` never
/// blocks: on overflow the event is dropped, since every event is superseded
/// by the next snapshot.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<DomainEvent>,
}

impl EventBus {
    pub fn publish(&self, event: DomainEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log(
                    Level::Warn,
                    Domain::Broadcast,
                    "event_dropped",
                    obj(&[("reason", v_str("channel_full"))]),
                );
            }
            Err(TrySendError::Closed(_)) => {
                // Hub gone (headless drain finished or shutdown in progress).
            }
        }
    }
}

pub fn event_channel(capacity: usize) -> (EventBus, mpsc::Receiver<DomainEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventBus { tx }, rx)
}

pub enum HubControl {
    Register {
        id: ClientId,
        tx: mpsc::UnboundedSender<Message>,
    },
    Unregister {
        id: ClientId,
    },
}

/// Handle used by the observer transport to manage the registry.
#[derive(Clone)]
pub struct HubHandle {
    control: mpsc::UnboundedSender<HubControl>,
}

impl HubHandle {
    pub fn register(&self, id: ClientId, tx: mpsc::UnboundedSender<Message>) {
        let _ = self.control.send(HubControl::Register { id, tx });
    }

    pub fn unregister(&self, id: ClientId) {
        let _ = self.control.send(HubControl::Unregister { id });
    }
}

pub fn control_channel() -> (HubHandle, mpsc::UnboundedReceiver<HubControl>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HubHandle { control: tx }, rx)
}

pub struct BroadcastHub {
    events: mpsc::Receiver<DomainEvent>,
    control: mpsc::UnboundedReceiver<HubControl>,
    shutdown: broadcast::Receiver<()>,
    clients: HashMap<ClientId, mpsc::UnboundedSender<Message>>,
    last_status: StatusSnapshot,
    last_sequence: SequenceSnapshot,
    balance: f64,
}

impl BroadcastHub {
    pub fn new(
        initial_status: StatusSnapshot,
        starting_balance: f64,
        events: mpsc::Receiver<DomainEvent>,
        control: mpsc::UnboundedReceiver<HubControl>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            events,
            control,
            shutdown,
            clients: HashMap::new(),
            last_status: initial_status,
            last_sequence: SequenceSnapshot {
                sequence: Vec::new(),
                current_trade_index: 0,
            },
            balance: starting_balance,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                evt = self.events.recv() => match evt {
                    Some(evt) => self.on_event(evt),
                    None => break,
                },
                ctl = self.control.recv() => match ctl {
                    Some(HubControl::Register { id, tx }) => self.on_register(id, tx),
                    Some(HubControl::Unregister { id }) => {
                        self.clients.remove(&id);
                    }
                    None => break,
                },
                _ = self.shutdown.recv() => break,
            }
        }
        for (_, tx) in self.clients.drain() {
            let _ = tx.send(Message::Close(None));
        }
        log(Level::Info, Domain::Broadcast, "hub_stopped", obj(&[]));
    }

    fn on_event(&mut self, event: DomainEvent) {
        match &event {
            DomainEvent::StatusChanged(s) => self.last_status = s.clone(),
            DomainEvent::SequenceChanged(s) => self.last_sequence = s.clone(),
            DomainEvent::TradeSettled(t) => {
                // trade_update first, then the balance delta it implies.
                self.broadcast(event.to_wire());
                self.balance += t.profit;
                self.broadcast(balance_wire(self.balance, t.profit));
                return;
            }
            DomainEvent::Log { .. } => {}
        }
        self.broadcast(event.to_wire());
    }

    /// Late joiners get the current snapshot before any live event: status,
    /// sequence, then a welcome log.
    fn on_register(&mut self, id: ClientId, tx: mpsc::UnboundedSender<Message>) {
        let welcome = DomainEvent::Log {
            message: "Connected to trading bot server".to_string(),
            level: crate::events::LogLevel::Success,
        };
        let snapshot = [
            DomainEvent::StatusChanged(self.last_status.clone()).to_wire(),
            DomainEvent::SequenceChanged(self.last_sequence.clone()).to_wire(),
            welcome.to_wire(),
        ];
        for wire in snapshot {
            if tx.send(Message::Text(wire.to_string())).is_err() {
                return; // client went away before registration completed
            }
        }
        self.clients.insert(id, tx);
        log(
            Level::Info,
            Domain::Broadcast,
            "observer_registered",
            obj(&[("client_id", v_num(id as f64))]),
        );
    }

    /// Deliver one wire message to every registered observer. A client whose
    /// channel is gone is dropped; the rest are unaffected.
    fn broadcast(&mut self, wire: Value) {
        if self.clients.is_empty() {
            return;
        }
        let text = wire.to_string();
        let before = self.clients.len();
        self.clients
            .retain(|_, tx| tx.send(Message::Text(text.clone())).is_ok());
        let dropped = before - self.clients.len();
        if dropped > 0 {
            log(
                Level::Warn,
                Domain::Broadcast,
                "observer_dropped",
                obj(&[("count", v_num(dropped as f64))]),
            );
        }
    }
}
