//! The orchestrator: one task, one event stream, exclusive ownership of
//! the chain state. Peers feed it; it feeds peers back.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use arca_base::Hash32;
use arca_config::Settings;
use arca_mempool::SeenCache;
use arca_p2p::{DriverConfig, NetDriver, NetEvent, NetMessage, PeerCommand, PeerEvent};
use arca_safebox::{SerializedBlock, SignatureVerifier, StateError, Tx};
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{genesis_public, AdmitError, Chain, SharedChain};
use crate::event::ChainEvent;
use crate::storage::Storage;

/// Out-of-order blocks buffered while the gap fills.
const MAX_PENDING_BLOCKS: usize = 32;
/// Per-peer relay memory, in operation hashes.
const SEEN_OPS_PER_PEER: usize = 1024;

const NET_CHAN_SIZE: usize = 1024;
const EVENT_CHAN_SIZE: usize = 256;

struct PeerEntry {
    remote_height: u32,
    remote_safebox_hash: Hash32,
    seen: SeenCache,
}

impl PeerEntry {
    fn new() -> Self {
        Self {
            remote_height: 0,
            remote_safebox_hash: [0; 32],
            seen: SeenCache::new(SEEN_OPS_PER_PEER),
        }
    }
}

struct PendingBlock {
    block: SerializedBlock,
    from: SocketAddr,
    should_broadcast: bool,
}

/// Cheap cloneable surface for embedders: inject operations and blocks,
/// read the tip, subscribe to chain events.
#[derive(Clone)]
pub struct NodeHandle {
    chain: Arc<RwLock<Chain>>,
    driver: NetDriver<SharedChain>,
    events: broadcast::Sender<ChainEvent>,
}

impl NodeHandle {
    pub fn height(&self) -> u32 {
        self.chain.read().height()
    }

    pub fn safebox_hash(&self) -> Hash32 {
        self.chain.read().safebox_hash()
    }

    pub fn peer_count(&self) -> usize {
        self.driver.peer_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn chain(&self) -> &Arc<RwLock<Chain>> {
        &self.chain
    }

    /// Pool a locally submitted operation and announce it to every peer.
    pub fn broadcast_tx(&self, tx: Tx) -> Result<Hash32, AdmitError> {
        let hash = self.chain.write().admit_tx(tx.clone())?;
        self.driver.broadcast(None, PeerCommand::BroadcastTx(tx));
        Ok(hash)
    }

    /// Apply a locally produced block and announce it to every peer.
    pub fn broadcast_block(&self, block: &SerializedBlock) -> Result<u32, StateError> {
        let index = self.chain.write().try_apply(block)?;
        let _ = self.events.send(ChainEvent::BlockAccepted { index, peer: None });
        self.driver
            .broadcast(None, PeerCommand::BroadcastBlock(block.clone()));
        Ok(index)
    }

    pub fn connect(&self, peer: SocketAddr) {
        self.driver.connect(peer);
    }
}

pub struct Node {
    settings: Settings,
    chain: Arc<RwLock<Chain>>,
    driver: NetDriver<SharedChain>,
    net_rx: mpsc::Receiver<NetMessage>,
    peers: HashMap<SocketAddr, PeerEntry>,
    pending_blocks: BTreeMap<u32, PendingBlock>,
    syncing_with: Option<SocketAddr>,
    events: broadcast::Sender<ChainEvent>,
}

impl Node {
    pub fn new(
        settings: Settings,
        verifier: Arc<dyn SignatureVerifier>,
        storage: Box<dyn Storage>,
        nonce: Vec<u8>,
    ) -> Self {
        let chain = Arc::new(RwLock::new(Chain::new(
            verifier,
            storage,
            genesis_public(),
            settings.mempool_capacity,
        )));

        let (net_tx, net_rx) = mpsc::channel(NET_CHAN_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHAN_SIZE);

        let server_port = settings
            .listen
            .map(|addr| addr.port())
            .unwrap_or_else(|| settings.network.default_port());

        let driver = NetDriver::new(
            DriverConfig {
                magic: settings.magic(),
                max_peers: settings.max_peers,
                server_port,
                user_agent: settings.user_agent.clone(),
                blocks_per_request: settings.blocks_per_request,
            },
            nonce,
            Arc::new(SharedChain(chain.clone())),
            net_tx,
        );

        Self {
            settings,
            chain,
            driver,
            net_rx,
            peers: HashMap::new(),
            pending_blocks: BTreeMap::new(),
            syncing_with: None,
            events,
        }
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            chain: self.chain.clone(),
            driver: self.driver.clone(),
            events: self.events.clone(),
        }
    }

    /// Bring up the listener and initial dials, then serialize every
    /// peer event through this single loop until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        if let Some(listen) = self.settings.listen {
            self.driver.listen(listen, cancel.clone());
        }
        for peer in &self.settings.peers {
            match peer.parse::<SocketAddr>() {
                Ok(addr) => self.driver.connect(addr),
                Err(_) => warn!(peer = %peer, "unresolvable peer address, skipping"),
            }
        }

        info!(height = self.chain.read().height(), "node running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = self.net_rx.recv() => match message {
                    Some(message) => self.on_message(message),
                    None => break,
                },
            }
        }
    }

    fn on_message(&mut self, message: NetMessage) {
        let peer = message.peer;
        match message.event {
            NetEvent::Accepted | NetEvent::Connected => {
                info!(peer = %peer, "peer connected");
                self.peers.insert(peer, PeerEntry::new());
            }
            NetEvent::NotConnected => {
                debug!(peer = %peer, "dial failed");
            }
            NetEvent::Disconnected { reason } => {
                self.peers.remove(&peer);
                if self.syncing_with == Some(peer) {
                    self.syncing_with = None;
                }
                info!(peer = %peer, reason = ?reason, "peer dropped");
                let _ = self.events.send(ChainEvent::PeerDropped { peer, reason });
                self.maybe_sync();
            }
            NetEvent::Peer(event) => self.on_peer_event(peer, event),
        }
    }

    fn on_peer_event(&mut self, peer: SocketAddr, event: PeerEvent) {
        match event {
            PeerEvent::PeerUpdate(endpoint) => {
                // Address-book maintenance happens outside the core.
                debug!(peer = %peer, address = %endpoint.address, port = endpoint.port, "peer gossip");
            }
            PeerEvent::StateUpdate {
                height,
                prev_safebox_hash,
            } => {
                if let Some(entry) = self.peers.get_mut(&peer) {
                    entry.remote_height = height;
                    entry.remote_safebox_hash = prev_safebox_hash;
                }
                self.maybe_sync();
            }
            PeerEvent::NewBlock {
                block,
                should_broadcast,
            } => self.on_new_block(peer, block, should_broadcast),
            PeerEvent::NewOperation(tx) => self.on_new_operation(peer, tx),
            PeerEvent::SyncDone => {
                if self.syncing_with == Some(peer) {
                    self.syncing_with = None;
                }
                // Still behind? Grab the next batch.
                self.maybe_sync();
            }
        }
    }

    /// Pick the best peer to catch up from; one download at a time.
    fn maybe_sync(&mut self) {
        if self.syncing_with.is_some() {
            return;
        }

        let our_height = self.chain.read().height();
        let best = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.remote_height > our_height)
            .max_by_key(|(_, entry)| entry.remote_height)
            .map(|(addr, entry)| (*addr, entry.remote_height, entry.remote_safebox_hash));

        if let Some((addr, remote_height, remote_hash)) = best {
            let from = our_height + 1;
            let command = PeerCommand::StartBlocksDownload {
                from,
                to: remote_height,
            };
            if self.driver.command(&addr, command) {
                info!(
                    peer = %addr,
                    from,
                    to = remote_height,
                    remote_safebox = %hex::encode(&remote_hash[..8]),
                    "syncing"
                );
                self.syncing_with = Some(addr);
            }
        }
    }

    fn on_new_block(&mut self, peer: SocketAddr, block: SerializedBlock, should_broadcast: bool) {
        let index = block.header.index;
        let next = self.chain.read().height() + 1;

        if index < next {
            debug!(peer = %peer, index, "stale block ignored");
            return;
        }
        if index > next {
            if self.pending_blocks.len() < MAX_PENDING_BLOCKS {
                debug!(peer = %peer, index, expected = next, "buffering out-of-order block");
                self.pending_blocks.insert(
                    index,
                    PendingBlock {
                        block,
                        from: peer,
                        should_broadcast,
                    },
                );
            } else {
                debug!(peer = %peer, index, "pending buffer full, block dropped");
            }
            return;
        }

        self.apply_chain(Some(peer), block, should_broadcast);
    }

    /// Apply one block, then drain any buffered successors it unblocks.
    fn apply_chain(
        &mut self,
        mut origin: Option<SocketAddr>,
        mut block: SerializedBlock,
        mut should_broadcast: bool,
    ) {
        loop {
            let index = block.header.index;
            match self.chain.write().try_apply(&block) {
                Ok(applied) => {
                    info!(index = applied, "block accepted");
                    let _ = self.events.send(ChainEvent::BlockAccepted {
                        index: applied,
                        peer: origin,
                    });
                    if should_broadcast {
                        self.driver
                            .broadcast(origin, PeerCommand::BroadcastBlock(block.clone()));
                    }
                }
                Err(err) => {
                    warn!(index, error = %err, "block rejected");
                    let _ = self.events.send(ChainEvent::BlockRejected {
                        index,
                        reason: err.to_string(),
                    });
                    return;
                }
            }

            let next = self.chain.read().height() + 1;
            match self.pending_blocks.remove(&next) {
                Some(pending) => {
                    origin = Some(pending.from);
                    block = pending.block;
                    should_broadcast = pending.should_broadcast;
                }
                None => return,
            }
        }
    }

    fn on_new_operation(&mut self, peer: SocketAddr, tx: Tx) {
        let hash = tx.hash();
        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.seen.note(hash);
        }

        if self.chain.read().mempool().contains(&hash) {
            return;
        }

        match self.chain.write().admit_tx(tx.clone()) {
            Ok(hash) => {
                debug!(peer = %peer, op = %hex::encode(&hash[..8]), "operation pooled");
                for (addr, entry) in self.peers.iter_mut() {
                    if *addr == peer || entry.seen.contains(&hash) {
                        continue;
                    }
                    if self
                        .driver
                        .command(addr, PeerCommand::BroadcastTx(tx.clone()))
                    {
                        entry.seen.note(hash);
                    }
                }
            }
            Err(err) => {
                // Invalid operations are dropped quietly; only blocks
                // carrying them are worth a rejection.
                debug!(peer = %peer, error = %err, "operation rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use arca_safebox::{PermissiveVerifier, Signature, Transfer};

    fn test_node() -> Node {
        let mut settings = Settings::default_for_network(arca_config::NetworkType::Private);
        settings.peers = vec![];
        Node::new(
            settings,
            Arc::new(PermissiveVerifier),
            Box::new(MemoryStorage::new()),
            vec![0x42; 16],
        )
    }

    fn peer_addr(n: u8) -> SocketAddr {
        format!("10.0.0.{n}:4004").parse().unwrap()
    }

    /// Mines valid successive blocks on a twin chain so tests can feed
    /// them to the node under test in any order.
    fn mine(count: u32) -> Vec<SerializedBlock> {
        let mut twin = Chain::new(
            Arc::new(PermissiveVerifier),
            Box::new(MemoryStorage::new()),
            genesis_public(),
            64,
        );
        (0..count)
            .map(|_| {
                let serialized = twin.pending_block().serialize();
                twin.try_apply(&serialized).unwrap();
                serialized
            })
            .collect()
    }

    fn transfer(op_id: u32) -> Tx {
        Tx::Transfer(Transfer {
            source: 0,
            op_id,
            dest: 1,
            amount: 10,
            fee: 1,
            payload: vec![],
            source_public: genesis_public(),
            signature: Signature {
                r: vec![1],
                s: vec![2],
            },
        })
    }

    #[tokio::test]
    async fn out_of_order_blocks_buffer_then_apply_in_order() {
        let mut node = test_node();
        let handle = node.handle();
        let mut events = handle.subscribe();
        let blocks = mine(2);
        let peer = peer_addr(1);

        node.on_message(NetMessage {
            peer,
            event: NetEvent::Accepted,
        });

        // Block 2 first: buffered, nothing applied.
        node.on_peer_event(
            peer,
            PeerEvent::NewBlock {
                block: blocks[1].clone(),
                should_broadcast: false,
            },
        );
        assert_eq!(handle.height(), 0);

        // The gap block arrives; both apply, in order.
        node.on_peer_event(
            peer,
            PeerEvent::NewBlock {
                block: blocks[0].clone(),
                should_broadcast: false,
            },
        );
        assert_eq!(handle.height(), 2);

        let first = events.try_recv().unwrap();
        let second = events.try_recv().unwrap();
        assert!(matches!(first, ChainEvent::BlockAccepted { index: 1, .. }));
        assert!(matches!(second, ChainEvent::BlockAccepted { index: 2, .. }));
    }

    #[tokio::test]
    async fn invalid_block_emits_rejection_and_keeps_state() {
        let mut node = test_node();
        let handle = node.handle();
        let mut events = handle.subscribe();
        let peer = peer_addr(1);

        let mut blocks = mine(1);
        blocks[0].header.fee = 777; // declared fee no longer matches

        node.on_message(NetMessage {
            peer,
            event: NetEvent::Accepted,
        });
        node.on_peer_event(
            peer,
            PeerEvent::NewBlock {
                block: blocks[0].clone(),
                should_broadcast: true,
            },
        );

        assert_eq!(handle.height(), 0);
        assert!(matches!(
            events.try_recv().unwrap(),
            ChainEvent::BlockRejected { index: 1, .. }
        ));
        // The peer stays in the roster.
        assert!(node.peers.contains_key(&peer));
    }

    #[tokio::test]
    async fn stale_operation_is_dropped_silently() {
        let mut node = test_node();
        let peer = peer_addr(1);
        node.on_message(NetMessage {
            peer,
            event: NetEvent::Accepted,
        });

        // op_id 0 is always stale (expected 1).
        node.on_peer_event(peer, PeerEvent::NewOperation(transfer(0)));

        assert!(node.chain.read().mempool().is_empty());
        assert!(node.peers.contains_key(&peer));
    }

    #[tokio::test]
    async fn valid_operation_lands_in_mempool_once() {
        let mut node = test_node();
        let peer = peer_addr(1);
        node.on_message(NetMessage {
            peer,
            event: NetEvent::Accepted,
        });

        node.on_peer_event(peer, PeerEvent::NewOperation(transfer(1)));
        assert_eq!(node.chain.read().mempool().len(), 1);

        // The same operation again is a no-op.
        node.on_peer_event(peer, PeerEvent::NewOperation(transfer(1)));
        assert_eq!(node.chain.read().mempool().len(), 1);
    }

    #[tokio::test]
    async fn peer_disconnect_clears_sync_state() {
        let mut node = test_node();
        let peer = peer_addr(1);
        node.on_message(NetMessage {
            peer,
            event: NetEvent::Connected,
        });
        node.syncing_with = Some(peer);

        node.on_message(NetMessage {
            peer,
            event: NetEvent::Disconnected {
                reason: Some("protocol violation".into()),
            },
        });
        assert!(node.syncing_with.is_none());
        assert!(node.peers.is_empty());
    }

    #[tokio::test]
    async fn handle_broadcast_block_applies_locally() {
        let node = test_node();
        let handle = node.handle();
        let blocks = mine(1);

        let index = handle.broadcast_block(&blocks[0]).unwrap();
        assert_eq!(index, 1);
        assert_eq!(handle.height(), 1);
        // Re-broadcasting the same block is a duplicate.
        assert!(matches!(
            handle.broadcast_block(&blocks[0]).unwrap_err(),
            StateError::DuplicateBlock(1)
        ));
    }
}
