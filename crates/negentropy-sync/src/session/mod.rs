//! Per-peer session orchestrator (§4.H): state machine, role selection,
//! JSON envelope dispatch, and the post-reconciliation fetch phase.
//!
//! Grounded on `bluetooth_reconciliation.py`'s `BluetoothReconciliation`
//! (the `on_read_response`/`on_write_request`/`on_read_request` callback
//! triad) and `enostr::negentropy::NegentropySync` for the Rust-idiomatic
//! shape of a protocol-driving state machine.

pub mod envelope;

use hashbrown::HashMap;
use uuid::Uuid;

use crate::config::Config;
use crate::content_store::ContentStore;
use crate::engine::Negentropy;
use crate::error::{EngineError, Error};
use crate::item::Id;
use crate::storage::Storage;
use crate::transport::ble::{BleTransport, PeerEvent};
use envelope::{sub_id_for_addr, Envelope, IdFilters};

/// One peer session's lifecycle (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Discovered,
    Connecting,
    RoleSelected(Role),
    NegOpen,
    Reconciling,
    Fetching,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Role selection by UUID comparison (§4.H): the side with the greater
/// UUID initiates. Total ordering on UUIDs breaks symmetry without
/// coordination.
pub fn select_role(local_uuid: Uuid, remote_uuid: Uuid) -> Role {
    if remote_uuid > local_uuid {
        Role::Client
    } else {
        Role::Server
    }
}

/// Per-peer session state (§3 "Session state"). Created on first
/// advertisement sighting, destroyed on disconnect after pending
/// operations drain.
pub struct PeerSession {
    pub addr: String,
    pub sub_id: String,
    pub state: State,
    /// The non-initiator's prepared reply, stashed until the next read
    /// request drains it (mirrors `device_reconciliation` in the original
    /// source).
    pending_reconciliation: Option<String>,
    /// Ids this side still owes the peer (mirrors `device_send_ids` on the
    /// server path).
    send_ids: Vec<Id>,
    /// Ids this side still wants from the peer (client path).
    need_ids: Vec<Id>,
    engine: Option<Negentropy>,
}

impl PeerSession {
    fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            sub_id: sub_id_for_addr(addr),
            state: State::Discovered,
            pending_reconciliation: None,
            send_ids: Vec::new(),
            need_ids: Vec::new(),
            engine: None,
        }
    }
}

/// Drives every connected peer's session over a [`BleTransport`] and a
/// [`ContentStore`]. Owns one [`PeerSession`] per address (indexed by
/// MAC), matching spec.md §3's ownership rule.
pub struct Orchestrator<T, S> {
    transport: T,
    store: S,
    config: Config,
    local_uuid: Uuid,
    sessions: HashMap<String, PeerSession>,
}

impl<T: BleTransport, S: ContentStore> Orchestrator<T, S> {
    pub fn new(transport: T, store: S, config: Config, local_uuid: Uuid) -> Self {
        Self {
            transport,
            store,
            config,
            local_uuid,
            sessions: HashMap::new(),
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// A peer advertisement was sighted (§4.H "On device discovery").
    /// Connects and, if we are the client, opens the reconciliation round.
    pub async fn on_discovered(&mut self, addr: &str, remote_uuid: Uuid) -> Result<(), Error> {
        if self.sessions.contains_key(addr) {
            return Ok(());
        }
        let role = select_role(self.local_uuid, remote_uuid);
        let mut session = PeerSession::new(addr);
        session.state = State::Connecting;
        tracing::info!(%addr, ?role, "peer discovered");

        self.transport
            .connect(addr)
            .await
            .map_err(Error::Transport)?;
        session.state = State::RoleSelected(role);

        if role == Role::Client {
            let mut engine = Negentropy::new(self.sealed_storage()?, self.config.frame_size_limit)
                .map_err(Error::Engine)?;
            let init_msg = engine.initiate().map_err(Error::Engine)?;
            session.engine = Some(engine);

            let envelope = Envelope::NegOpen {
                sub_id: session.sub_id.clone(),
                filters: "{}".to_string(),
                init_msg,
            };
            session.state = State::NegOpen;
            self.transport
                .write_message(addr, envelope.to_json().as_bytes())
                .await
                .map_err(Error::Transport)?;
        }

        self.sessions.insert(addr.to_string(), session);
        Ok(())
    }

    fn sealed_storage(&self) -> Result<Storage, Error> {
        let mut storage = Storage::new();
        for item in self.store.items() {
            storage.insert(item).map_err(Error::Storage)?;
        }
        storage.seal().map_err(Error::Storage)?;
        Ok(storage)
    }

    /// Drain pending transport events and dispatch each to its session.
    /// Call this in the per-peer inbound processing loop (§5).
    pub async fn poll(&mut self) -> Result<(), Error> {
        let events = self.transport.poll_events();
        for event in events {
            match event {
                PeerEvent::Connected { .. } => {}
                PeerEvent::Disconnected { addr } => self.close_session(&addr),
                PeerEvent::ReadResponse { addr, message } => {
                    self.on_read_response(&addr, &message).await?
                }
                PeerEvent::WriteSuccess { addr } => {
                    // §11.3: write-success-drives-read pairing.
                    self.transport
                        .read_message(&addr)
                        .await
                        .map_err(Error::Transport)?;
                }
            }
        }
        Ok(())
    }

    /// Client path: handle a `NEG-MSG`/`NEG-ERR`/`NEG-CLOSE`/`EVENT`/`EOSE`
    /// notification. Server path: handle a `NEG-OPEN`/`REQ`/`EVENT` write
    /// request — both directions arrive through the same `ReadResponse`
    /// event in this abstraction; a real GATT server distinguishes writes
    /// from reads at the characteristic level.
    async fn on_read_response(&mut self, addr: &str, message: &[u8]) -> Result<(), Error> {
        let envelope = match Envelope::parse(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(%addr, error = %e, "dropping malformed envelope");
                return Ok(());
            }
        };

        match envelope {
            Envelope::NegOpen { init_msg, .. } => self.handle_neg_open(addr, &init_msg).await,
            Envelope::NegMsg { hex, .. } => self.handle_neg_msg(addr, &hex).await,
            Envelope::NegErr { reason, .. } => {
                tracing::warn!(%addr, %reason, "peer sent NEG-ERR");
                self.close_session(addr);
                Ok(())
            }
            Envelope::NegClose { .. } => {
                self.close_session(addr);
                Ok(())
            }
            Envelope::Req { filters, .. } => self.handle_req(addr, &filters).await,
            Envelope::Event { event_json, .. } => self.handle_event(addr, &event_json).await,
            Envelope::Eose { .. } => self.handle_eose(addr).await,
        }
    }

    /// Server path (§4.H "Server path"): stash a fresh reconciliation
    /// reply for the next read request to drain.
    async fn handle_neg_open(&mut self, addr: &str, init_msg: &str) -> Result<(), Error> {
        let storage = self.sealed_storage()?;
        let mut engine =
            Negentropy::new(storage, self.config.frame_size_limit).map_err(Error::Engine)?;
        let reply = engine.reconcile(init_msg);

        let Some(session) = self.sessions.get_mut(addr) else {
            return Ok(());
        };
        match reply {
            Ok(reply) => {
                session.pending_reconciliation = Some(reply);
                session.state = State::Reconciling;
                tracing::debug!(%addr, "reconciliation reply stored");
            }
            Err(e) => tracing::warn!(%addr, error = %e, "bad NEG-OPEN init message"),
        }
        Ok(())
    }

    /// Client path (§4.H "Client path"): advance the initiator engine one
    /// round, request any newly-discovered missing ids, continue or finish.
    async fn handle_neg_msg(&mut self, addr: &str, hex: &str) -> Result<(), Error> {
        let reply = {
            let Some(session) = self.sessions.get_mut(addr) else {
                tracing::warn!(%addr, "NEG-MSG with no active session");
                return Ok(());
            };
            let Some(engine) = session.engine.as_mut() else {
                tracing::warn!(%addr, "NEG-MSG with no active engine");
                return Ok(());
            };
            engine.reconcile_with_ids(hex)
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(EngineError::UnsupportedVersion(version)) => {
                tracing::warn!(%addr, version, "peer advertised unsupported protocol version");
                self.close_session(addr);
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "reconciliation failed");
                self.close_session(addr);
                return Ok(());
            }
        };

        let (need_ids, sub_id) = {
            let Some(session) = self.sessions.get_mut(addr) else {
                return Ok(());
            };
            session.need_ids.extend(reply.need);
            (session.need_ids.clone(), session.sub_id.clone())
        };

        if let Some(next) = reply.next_message {
            let envelope = Envelope::NegMsg {
                sub_id: sub_id.clone(),
                hex: next,
            };
            self.transport
                .write_message(addr, envelope.to_json().as_bytes())
                .await
                .map_err(Error::Transport)?;
        } else {
            tracing::info!(%addr, "client reconciliation converged");
            let close = Envelope::NegClose {
                sub_id: sub_id.clone(),
            };
            self.transport
                .write_message(addr, close.to_json().as_bytes())
                .await
                .map_err(Error::Transport)?;
            if let Some(session) = self.sessions.get_mut(addr) {
                session.state = State::Fetching;
            }
        }

        let filters = IdFilters {
            ids: need_ids.iter().map(|id| id.to_hex()).collect(),
        };
        let req = Envelope::Req {
            sub_id,
            filters: filters.to_json(),
        };
        self.transport
            .write_message(addr, req.to_json().as_bytes())
            .await
            .map_err(Error::Transport)?;

        Ok(())
    }

    /// Server path: record ids the peer wants fetched.
    async fn handle_req(&mut self, addr: &str, filters_json: &str) -> Result<(), Error> {
        let filters = match IdFilters::from_json(filters_json) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%addr, error = %e, "malformed REQ filters");
                return Ok(());
            }
        };
        let ids: Vec<Id> = filters
            .ids
            .iter()
            .filter_map(|hex| Id::from_hex(hex).ok())
            .collect();
        tracing::debug!(%addr, count = ids.len(), "peer requested events");

        if let Some(session) = self.sessions.get_mut(addr) {
            session.send_ids = ids;
        }
        Ok(())
    }

    /// Client path: hand a received event to the content store.
    async fn handle_event(&mut self, addr: &str, event_json: &str) -> Result<(), Error> {
        self.store.store_event(event_json);
        tracing::debug!(%addr, "stored peer event");
        Ok(())
    }

    /// Client path: peer has no more events — send our own EOSE and close.
    async fn handle_eose(&mut self, addr: &str) -> Result<(), Error> {
        let Some(sub_id) = self.sessions.get(addr).map(|s| s.sub_id.clone()) else {
            return Ok(());
        };
        let eose = Envelope::Eose { sub_id };
        self.transport
            .write_message(addr, eose.to_json().as_bytes())
            .await
            .map_err(Error::Transport)?;
        tracing::info!(%addr, "fetch phase complete");
        self.close_session(addr);
        Ok(())
    }

    /// Server path (§4.H "On each read request"): prefer pending
    /// reconciliation over event delivery; once `send_ids` drains, reply
    /// `EOSE`.
    pub async fn on_read_request(&mut self, addr: &str) -> Result<(), Error> {
        let pending = self
            .sessions
            .get_mut(addr)
            .and_then(|s| s.pending_reconciliation.take());
        if let Some(reconciliation) = pending {
            let sub_id = self.sub_id_of(addr)?;
            let envelope = Envelope::NegMsg {
                sub_id,
                hex: reconciliation,
            };
            self.transport
                .write_message(addr, envelope.to_json().as_bytes())
                .await
                .map_err(Error::Transport)?;
            return Ok(());
        }

        let popped = self.sessions.get_mut(addr).and_then(|s| s.send_ids.pop());
        if let Some(id) = popped {
            let event_json = self.store.fetch_event(&id).unwrap_or_default();
            let sub_id = self.sub_id_of(addr)?;
            let envelope = Envelope::Event { sub_id, event_json };
            self.transport
                .write_message(addr, envelope.to_json().as_bytes())
                .await
                .map_err(Error::Transport)?;
            return Ok(());
        }

        let sub_id = self.sub_id_of(addr)?;
        let eose = Envelope::Eose { sub_id };
        self.transport
            .write_message(addr, eose.to_json().as_bytes())
            .await
            .map_err(Error::Transport)?;
        Ok(())
    }

    fn sub_id_of(&self, addr: &str) -> Result<String, Error> {
        self.sessions
            .get(addr)
            .map(|s| s.sub_id.clone())
            .ok_or_else(|| Error::Envelope(format!("no session for peer {addr}")))
    }

    fn close_session(&mut self, addr: &str) {
        if self.sessions.remove(addr).is_some() {
            tracing::info!(%addr, "session closed");
        }
    }

    pub fn state_of(&self, addr: &str) -> Option<State> {
        self.sessions.get(addr).map(|s| s.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::InMemoryContentStore;
    use crate::item::Item;
    use crate::transport::ble::InMemoryBleTransport;

    #[test]
    fn role_selection_picks_client_for_greater_remote_uuid() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        assert_eq!(select_role(low, high), Role::Client);
        assert_eq!(select_role(high, low), Role::Server);
    }

    #[tokio::test]
    async fn client_opens_neg_open_on_discovery() {
        let mut transport = InMemoryBleTransport::new();
        transport.link("aa:aa", "bb:bb");
        let mut orchestrator = Orchestrator::new(
            transport,
            InMemoryContentStore::new(),
            Config::default(),
            Uuid::from_u128(1),
        );

        orchestrator
            .on_discovered("aa:aa", Uuid::from_u128(2))
            .await
            .unwrap();

        assert_eq!(orchestrator.state_of("aa:aa"), Some(State::NegOpen));
    }

    #[tokio::test]
    async fn server_does_not_open_on_discovery() {
        let mut transport = InMemoryBleTransport::new();
        transport.link("aa:aa", "bb:bb");
        let mut orchestrator = Orchestrator::new(
            transport,
            InMemoryContentStore::new(),
            Config::default(),
            Uuid::from_u128(2),
        );

        orchestrator
            .on_discovered("aa:aa", Uuid::from_u128(1))
            .await
            .unwrap();

        assert_eq!(
            orchestrator.state_of("aa:aa"),
            Some(State::RoleSelected(Role::Server))
        );
    }

    #[tokio::test]
    async fn disconnect_drops_the_session() {
        let mut transport = InMemoryBleTransport::new();
        transport.link("aa:aa", "bb:bb");
        let mut orchestrator = Orchestrator::new(
            transport,
            InMemoryContentStore::new(),
            Config::default(),
            Uuid::from_u128(1),
        );
        orchestrator
            .on_discovered("aa:aa", Uuid::from_u128(2))
            .await
            .unwrap();
        assert!(orchestrator.state_of("aa:aa").is_some());

        orchestrator.close_session("aa:aa");
        assert!(orchestrator.state_of("aa:aa").is_none());
    }

    #[test]
    fn storage_from_store_items_seals_cleanly() {
        let mut store = InMemoryContentStore::new();
        store.insert(Item::new(1, Id::new([1u8; 32])));
        let orchestrator = Orchestrator::new(
            InMemoryBleTransport::new(),
            store,
            Config::default(),
            Uuid::from_u128(1),
        );
        assert_eq!(orchestrator.sealed_storage().unwrap().size().unwrap(), 1);
    }

    #[tokio::test]
    async fn convergence_sends_neg_close_before_req_and_enters_fetching() {
        let mut transport = InMemoryBleTransport::new();
        transport.link("aa:aa", "bb:bb");
        let mut orchestrator = Orchestrator::new(
            transport,
            InMemoryContentStore::new(),
            Config::default(),
            Uuid::from_u128(1),
        );

        orchestrator
            .on_discovered("aa:aa", Uuid::from_u128(2))
            .await
            .unwrap();
        // "bb:bb" is the peer side reading what "aa:aa" wrote; it needs its
        // own connected-state for read_message to succeed in this harness.
        orchestrator.transport_mut().connect("bb:bb").await.unwrap();
        orchestrator.transport_mut().poll_events();

        // Drain the NEG-OPEN write so it doesn't get counted below.
        orchestrator.transport_mut().read_message("bb:bb").await.unwrap();
        orchestrator.transport_mut().poll_events();

        // Play the (empty-storage) server side by hand, producing the
        // single reconcile reply that converges an already-empty client.
        let mut empty_storage = Storage::new();
        empty_storage.seal().unwrap();
        let mut server_engine = Negentropy::new(empty_storage, 0).unwrap();
        let server_reply = server_engine.reconcile("61").unwrap();

        orchestrator
            .handle_neg_msg("aa:aa", &server_reply)
            .await
            .unwrap();

        assert_eq!(orchestrator.state_of("aa:aa"), Some(State::Fetching));

        orchestrator.transport_mut().read_message("bb:bb").await.unwrap();
        let events = orchestrator.transport_mut().poll_events();
        let messages: Vec<Vec<u8>> = events
            .into_iter()
            .filter_map(|e| match e {
                PeerEvent::ReadResponse { addr, message } if addr == "bb:bb" => Some(message),
                _ => None,
            })
            .collect();

        assert_eq!(messages.len(), 2, "expected a NEG-CLOSE then a REQ");
        assert!(matches!(
            Envelope::parse(&messages[0]).unwrap(),
            Envelope::NegClose { .. }
        ));
        assert!(matches!(
            Envelope::parse(&messages[1]).unwrap(),
            Envelope::Req { .. }
        ));
    }
}
