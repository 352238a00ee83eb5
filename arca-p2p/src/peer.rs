//! Per-peer protocol state machine.
//!
//! Sans-io: frames in, frames and events out. The driver owns the socket
//! and the clock; this type owns the handshake, the sync download and
//! the live notification handling.

use std::sync::Arc;
use std::time::Instant;

use arca_base::{ArcaDecode, ArcaEncode, CodecError, Hash32};
use arca_safebox::{SerializedBlock, SerializedBlockHeader, Tx};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::engine::{ProtocolEngine, ResponseHandler};
use crate::error::ProtocolError;
use crate::frame::{result_code, Frame, OpCode, RpcKind};
use crate::packets::{
    PacketError, PacketGetBlocksRequest, PacketGetBlocksResponse, PacketHello, PacketNewBlock,
    PacketNewOperations, PeerEndpoint,
};

/// Blocks served per `getblocks` request.
pub const BLOCKS_PER_REQUEST: u32 = 100;

/// Read access to the local chain, as much as a peer ever needs: the
/// pending header for hello and serialized blocks for `getblocks`.
pub trait ChainView: Send + Sync {
    fn pending_header(&self) -> SerializedBlockHeader;
    fn serialized_block(&self, index: u32) -> Option<SerializedBlock>;
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub server_port: u16,
    pub user_agent: String,
    pub blocks_per_request: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            server_port: 0,
            user_agent: "arca".into(),
            blocks_per_request: BLOCKS_PER_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Handshaking,
    Live,
    Syncing,
    Closed,
}

/// What a peer tells the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Address gossip from the peer's hello.
    PeerUpdate(PeerEndpoint),
    /// The peer's chain tip, recorded at handshake.
    StateUpdate {
        height: u32,
        prev_safebox_hash: Hash32,
    },
    NewBlock {
        block: SerializedBlock,
        should_broadcast: bool,
    },
    NewOperation(Tx),
    /// A blocks download finished (successfully or not).
    SyncDone,
}

/// Frames to write and events to deliver, in order.
#[derive(Debug, Default)]
pub struct PeerOutput {
    pub frames: Vec<Frame>,
    pub events: Vec<PeerEvent>,
}

impl PeerOutput {
    fn frame(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            events: Vec::new(),
        }
    }
}

enum HelloFailure {
    Undecodable(CodecError),
    Loopback,
}

pub struct PeerConnection<C> {
    chain: Arc<C>,
    config: PeerConfig,
    nonce: Vec<u8>,
    engine: ProtocolEngine,
    state: PeerState,
    remote_height: u32,
    remote_safebox_hash: Hash32,
    unix_time: u32,
}

impl<C: ChainView> PeerConnection<C> {
    pub fn new(nonce: Vec<u8>, chain: Arc<C>, config: PeerConfig) -> Self {
        Self {
            chain,
            config,
            nonce,
            engine: ProtocolEngine::default(),
            state: PeerState::Handshaking,
            remote_height: 0,
            remote_safebox_hash: [0; 32],
            unix_time: 0,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Remote tip as of the last hello.
    pub fn remote_state(&self) -> (u32, Hash32) {
        (self.remote_height, self.remote_safebox_hash)
    }

    /// Kick off the connection. Outgoing sides speak first.
    pub fn on_open(&mut self, outgoing: bool, now: Instant, unix_time: u32) -> PeerOutput {
        self.unix_time = unix_time;
        if !outgoing {
            return PeerOutput::default();
        }

        let payload = Bytes::from(self.hello_packet().to_wire());
        let frame = self
            .engine
            .request(now, OpCode::Hello, payload, ResponseHandler::Hello);
        PeerOutput::frame(frame)
    }

    /// One complete frame from the wire. A returned error is fatal to
    /// the connection.
    pub fn on_frame(&mut self, frame: Frame, _now: Instant) -> Result<PeerOutput, ProtocolError> {
        match frame.kind {
            RpcKind::Request => self.on_request(frame),
            RpcKind::Response => self.on_response(frame),
            RpcKind::Notification => self.on_notification(frame),
        }
    }

    /// Periodic sweep: response timeouts.
    pub fn on_tick(&mut self, now: Instant, unix_time: u32) -> Result<PeerOutput, ProtocolError> {
        self.unix_time = unix_time;
        let mut output = PeerOutput::default();
        for handler in self.engine.expire(now) {
            match handler {
                // No hello in time: the peer never became usable.
                ResponseHandler::Hello => return Err(ProtocolError::HandshakeTimeout),
                ResponseHandler::GetBlocks => {
                    self.state = PeerState::Live;
                    output.events.push(PeerEvent::SyncDone);
                }
                ResponseHandler::Discard => {}
            }
        }
        Ok(output)
    }

    /// Ask the peer for blocks `[from, to]`. The responder caps the
    /// span; we just record that a download is in flight.
    pub fn start_blocks_download(&mut self, from: u32, to: u32, now: Instant) -> PeerOutput {
        let packet = PacketGetBlocksRequest {
            from_index: from,
            to_index: to,
        };
        self.state = PeerState::Syncing;
        let frame = self.engine.request(
            now,
            OpCode::GetBlocks,
            Bytes::from(packet.to_wire()),
            ResponseHandler::GetBlocks,
        );
        PeerOutput::frame(frame)
    }

    /// Fire-and-forget block announcement.
    pub fn broadcast_block(&self, block: SerializedBlock) -> Frame {
        let packet = PacketNewBlock { block };
        self.engine
            .notification(OpCode::NewBlock, Bytes::from(packet.to_wire()))
    }

    /// Fire-and-forget operation relay.
    pub fn broadcast_tx(&self, tx: Tx) -> Frame {
        let packet = PacketNewOperations {
            operations: vec![tx],
        };
        self.engine
            .notification(OpCode::NewOperations, Bytes::from(packet.to_wire()))
    }

    /// Tear down: every pending request resolves to its `None` outcome.
    pub fn close(&mut self) -> Vec<PeerEvent> {
        let mut events = Vec::new();
        for handler in self.engine.cancel_all() {
            if handler == ResponseHandler::GetBlocks {
                events.push(PeerEvent::SyncDone);
            }
        }
        self.state = PeerState::Closed;
        events
    }

    fn hello_packet(&self) -> PacketHello {
        PacketHello {
            server_port: self.config.server_port,
            nonce: self.nonce.clone(),
            block: self.chain.pending_header(),
            peers: Vec::new(),
            user_agent: self.config.user_agent.clone(),
            timestamp: self.unix_time,
        }
    }

    fn on_request(&mut self, frame: Frame) -> Result<PeerOutput, ProtocolError> {
        let Some(opcode) = frame.opcode() else {
            return Err(ProtocolError::InvalidOpcode(frame.operation));
        };

        let mut output = PeerOutput::default();
        let (result, payload) = match opcode {
            OpCode::Hello => match self.process_hello(&frame.payload, &mut output.events) {
                Ok(()) => (
                    result_code::SUCCESS,
                    Bytes::from(self.hello_packet().to_wire()),
                ),
                Err(HelloFailure::Loopback) => return Err(ProtocolError::Loopback),
                Err(HelloFailure::Undecodable(err)) => {
                    debug!(error = %err, "undecodable hello request");
                    (result_code::INVALID_DATA_BUFFER_INFO, Bytes::new())
                }
            },
            OpCode::Error => {
                self.process_error_report(&frame.payload);
                (result_code::SUCCESS, Bytes::new())
            }
            // Accepted for protocol completeness; nothing to serve yet.
            OpCode::Message | OpCode::GetHeaders => (result_code::SUCCESS, Bytes::new()),
            OpCode::GetBlocks => match self.serve_blocks(&frame.payload) {
                Ok(response) => (result_code::SUCCESS, response),
                Err(err) => {
                    debug!(error = %err, "undecodable getblocks request");
                    (result_code::INVALID_DATA_BUFFER_INFO, Bytes::new())
                }
            },
            // Broadcasts normally travel as notifications, but a peer
            // may push them as requests; same handling, empty ack.
            OpCode::NewBlock => {
                self.process_new_block(&frame.payload, &mut output.events);
                (result_code::SUCCESS, Bytes::new())
            }
            OpCode::NewOperations => {
                self.process_new_operations(&frame.payload, &mut output.events);
                (result_code::SUCCESS, Bytes::new())
            }
        };

        output.frames.push(Frame::response(
            frame.operation,
            frame.request_id,
            result,
            payload,
        ));
        Ok(output)
    }

    fn on_response(&mut self, frame: Frame) -> Result<PeerOutput, ProtocolError> {
        let handler = self.engine.take_response(&frame)?;
        let mut output = PeerOutput::default();

        match handler {
            ResponseHandler::Hello => {
                if frame.result != result_code::SUCCESS {
                    return Err(ProtocolError::HandshakeRejected(frame.result));
                }
                match self.process_hello(&frame.payload, &mut output.events) {
                    Ok(()) => {}
                    Err(HelloFailure::Loopback) => return Err(ProtocolError::Loopback),
                    Err(HelloFailure::Undecodable(err)) => {
                        return Err(ProtocolError::InvalidPayload(err))
                    }
                }
            }
            ResponseHandler::GetBlocks => {
                self.state = PeerState::Live;
                // Blocks we asked for that do not decode are a protocol
                // violation, unlike unsolicited garbage.
                let packet = PacketGetBlocksResponse::from_wire(&frame.payload)?;
                for block in packet.blocks {
                    output.events.push(PeerEvent::NewBlock {
                        block,
                        should_broadcast: false,
                    });
                }
                output.events.push(PeerEvent::SyncDone);
            }
            ResponseHandler::Discard => {}
        }

        Ok(output)
    }

    fn on_notification(&mut self, frame: Frame) -> Result<PeerOutput, ProtocolError> {
        let Some(opcode) = frame.opcode() else {
            return Err(ProtocolError::InvalidOpcode(frame.operation));
        };

        let mut output = PeerOutput::default();
        match opcode {
            OpCode::NewBlock => self.process_new_block(&frame.payload, &mut output.events),
            OpCode::NewOperations => {
                self.process_new_operations(&frame.payload, &mut output.events)
            }
            OpCode::Error => self.process_error_report(&frame.payload),
            OpCode::Hello => match self.process_hello(&frame.payload, &mut output.events) {
                Ok(()) => {}
                Err(HelloFailure::Loopback) => return Err(ProtocolError::Loopback),
                Err(HelloFailure::Undecodable(err)) => {
                    debug!(error = %err, "undecodable hello notification");
                }
            },
            // Nothing to do without a response channel.
            OpCode::Message | OpCode::GetBlocks | OpCode::GetHeaders => {}
        }
        Ok(output)
    }

    fn process_hello(
        &mut self,
        payload: &[u8],
        events: &mut Vec<PeerEvent>,
    ) -> Result<(), HelloFailure> {
        let packet = PacketHello::from_wire(payload).map_err(HelloFailure::Undecodable)?;

        if packet.nonce == self.nonce {
            return Err(HelloFailure::Loopback);
        }

        let mut remote_hash = [0u8; 32];
        let len = packet.block.prev_safebox_hash.len().min(32);
        remote_hash[..len].copy_from_slice(&packet.block.prev_safebox_hash[..len]);

        // Hello carries the peer's *pending* header; its applied tip is
        // one block below the advertised index.
        let height = packet.block.index.saturating_sub(1);
        self.remote_height = height;
        self.remote_safebox_hash = remote_hash;
        if self.state == PeerState::Handshaking {
            self.state = PeerState::Live;
        }

        debug!(height, agent = %packet.user_agent, "hello exchanged");

        for peer in packet.peers {
            events.push(PeerEvent::PeerUpdate(peer));
        }
        events.push(PeerEvent::StateUpdate {
            height,
            prev_safebox_hash: remote_hash,
        });
        Ok(())
    }

    fn process_error_report(&self, payload: &[u8]) {
        match PacketError::from_wire(payload) {
            Ok(packet) => warn!(message = %packet.message, "peer reported error"),
            Err(err) => debug!(error = %err, "undecodable error report"),
        }
    }

    fn serve_blocks(&self, payload: &[u8]) -> Result<Bytes, CodecError> {
        let request = PacketGetBlocksRequest::from_wire(payload)?;
        let (from, to) = if request.from_index <= request.to_index {
            (request.from_index, request.to_index)
        } else {
            (request.to_index, request.from_index)
        };

        // Cap the span, then truncate at the first block we do not have.
        let count = (to - from).saturating_add(1).min(self.config.blocks_per_request);
        let mut blocks = Vec::new();
        for index in from..from.saturating_add(count) {
            match self.chain.serialized_block(index) {
                Some(block) => blocks.push(block),
                None => break,
            }
        }

        debug!(from, to, served = blocks.len(), "serving blocks");
        Ok(Bytes::from(PacketGetBlocksResponse { blocks }.to_wire()))
    }

    fn process_new_block(&self, payload: &[u8], events: &mut Vec<PeerEvent>) {
        match PacketNewBlock::from_wire(payload) {
            Ok(packet) => {
                debug!(index = packet.block.header.index, "new block announced");
                events.push(PeerEvent::NewBlock {
                    block: packet.block,
                    should_broadcast: true,
                });
            }
            Err(err) => debug!(error = %err, "undecodable newblock notification"),
        }
    }

    fn process_new_operations(&self, payload: &[u8], events: &mut Vec<PeerEvent>) {
        match PacketNewOperations::from_wire(payload) {
            Ok(packet) => {
                debug!(count = packet.operations.len(), "new operations announced");
                for tx in packet.operations {
                    events.push(PeerEvent::NewOperation(tx));
                }
            }
            Err(err) => debug!(error = %err, "undecodable newoperations notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_safebox::{Public, Signature, Transfer, Version};
    use std::time::Duration;

    struct StubChain {
        height: u32,
        blocks: Vec<SerializedBlock>,
    }

    fn header(index: u32) -> SerializedBlockHeader {
        SerializedBlockHeader {
            header_only: 3,
            version: Version { major: 1, minor: 1 },
            index,
            miner: Public::new(714, vec![1], vec![2]).to_wire(),
            reward: 500_000,
            fee: 0,
            time: 1_530_000_000,
            target: 0x1D00_FFFF,
            nonce: 0,
            payload: vec![],
            prev_safebox_hash: vec![0xAB; 32],
            operations_hash: vec![0; 32],
            pow: vec![],
        }
    }

    impl ChainView for StubChain {
        fn pending_header(&self) -> SerializedBlockHeader {
            header(self.height)
        }

        fn serialized_block(&self, index: u32) -> Option<SerializedBlock> {
            self.blocks.iter().find(|b| b.header.index == index).cloned()
        }
    }

    fn connection(height: u32, blocks: Vec<SerializedBlock>) -> PeerConnection<StubChain> {
        PeerConnection::new(
            vec![0x11; 16],
            Arc::new(StubChain { height, blocks }),
            PeerConfig::default(),
        )
    }

    fn hello_frame(kind: RpcKind, request_id: u32, nonce: Vec<u8>, height: u32) -> Frame {
        let packet = PacketHello {
            server_port: 4004,
            nonce,
            block: header(height),
            peers: vec![],
            user_agent: "test".into(),
            timestamp: 0,
        };
        Frame {
            kind,
            operation: OpCode::Hello as u16,
            request_id,
            result: result_code::SUCCESS,
            payload: Bytes::from(packet.to_wire()),
        }
    }

    #[test]
    fn outgoing_open_sends_hello_request() {
        let mut conn = connection(3, vec![]);
        let output = conn.on_open(true, Instant::now(), 100);
        assert_eq!(output.frames.len(), 1);
        assert_eq!(output.frames[0].kind, RpcKind::Request);
        assert_eq!(output.frames[0].opcode(), Some(OpCode::Hello));
        assert_eq!(conn.state(), PeerState::Handshaking);
    }

    #[test]
    fn incoming_hello_request_answers_with_ours() {
        let mut conn = connection(3, vec![]);
        conn.on_open(false, Instant::now(), 100);

        // The remote advertises pending index 41, so its tip is 40.
        let frame = hello_frame(RpcKind::Request, 9, vec![0x22; 16], 41);
        let output = conn.on_frame(frame, Instant::now()).unwrap();

        assert_eq!(conn.state(), PeerState::Live);
        assert_eq!(conn.remote_state().0, 40);
        assert!(output
            .events
            .iter()
            .any(|e| matches!(e, PeerEvent::StateUpdate { height: 40, .. })));

        let reply = &output.frames[0];
        assert_eq!(reply.kind, RpcKind::Response);
        assert_eq!(reply.request_id, 9);
        assert_eq!(reply.result, result_code::SUCCESS);
        let ours = PacketHello::from_wire(&reply.payload).unwrap();
        assert_eq!(ours.block.index, 3);
    }

    #[test]
    fn loopback_nonce_is_fatal() {
        let mut conn = connection(3, vec![]);
        let frame = hello_frame(RpcKind::Request, 1, vec![0x11; 16], 41);
        let err = conn.on_frame(frame, Instant::now()).unwrap_err();
        assert!(matches!(err, ProtocolError::Loopback));
    }

    #[test]
    fn undecodable_hello_gets_error_result_and_stays_open() {
        let mut conn = connection(3, vec![]);
        let frame = Frame {
            kind: RpcKind::Request,
            operation: OpCode::Hello as u16,
            request_id: 4,
            result: 0,
            payload: Bytes::from_static(&[0xFF]),
        };
        let output = conn.on_frame(frame, Instant::now()).unwrap();
        assert_eq!(
            output.frames[0].result,
            result_code::INVALID_DATA_BUFFER_INFO
        );
        assert_ne!(conn.state(), PeerState::Closed);
    }

    #[test]
    fn hello_response_completes_handshake() {
        let mut conn = connection(3, vec![]);
        let now = Instant::now();
        let open = conn.on_open(true, now, 100);
        let request_id = open.frames[0].request_id;

        let response = hello_frame(RpcKind::Response, request_id, vec![0x22; 16], 12);
        let output = conn.on_frame(response, now).unwrap();
        assert_eq!(conn.state(), PeerState::Live);
        assert!(output
            .events
            .iter()
            .any(|e| matches!(e, PeerEvent::StateUpdate { height: 11, .. })));
    }

    #[test]
    fn unmatched_response_is_fatal() {
        let mut conn = connection(3, vec![]);
        let frame = Frame::response(OpCode::Hello as u16, 77, result_code::SUCCESS, Bytes::new());
        let err = conn.on_frame(frame, Instant::now()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnmatchedResponse(77)));
    }

    #[test]
    fn serves_at_most_the_request_cap() {
        let blocks: Vec<SerializedBlock> = (0..150)
            .map(|i| SerializedBlock {
                header: header(i),
                operations: vec![],
            })
            .collect();
        let mut conn = connection(150, blocks);

        let request = Frame::request(
            OpCode::GetBlocks,
            5,
            Bytes::from(
                PacketGetBlocksRequest {
                    from_index: 0,
                    to_index: 500,
                }
                .to_wire(),
            ),
        );
        let output = conn.on_frame(request, Instant::now()).unwrap();
        let response = PacketGetBlocksResponse::from_wire(&output.frames[0].payload).unwrap();
        assert_eq!(response.blocks.len(), 100);
        assert_eq!(response.blocks[0].header.index, 0);
        assert_eq!(response.blocks[99].header.index, 99);
    }

    #[test]
    fn block_gap_truncates_response() {
        // Blocks 1, 2 and 4: the response stops before the gap at 3.
        let blocks: Vec<SerializedBlock> = [1u32, 2, 4]
            .iter()
            .map(|&i| SerializedBlock {
                header: header(i),
                operations: vec![],
            })
            .collect();
        let mut conn = connection(4, blocks);

        let request = Frame::request(
            OpCode::GetBlocks,
            5,
            Bytes::from(
                PacketGetBlocksRequest {
                    from_index: 1,
                    to_index: 4,
                }
                .to_wire(),
            ),
        );
        let output = conn.on_frame(request, Instant::now()).unwrap();
        let response = PacketGetBlocksResponse::from_wire(&output.frames[0].payload).unwrap();
        assert_eq!(response.blocks.len(), 2);
    }

    #[test]
    fn download_emits_block_events_then_done() {
        let mut conn = connection(0, vec![]);
        let now = Instant::now();
        let request = conn.start_blocks_download(1, 2, now);
        assert_eq!(conn.state(), PeerState::Syncing);

        let response_packet = PacketGetBlocksResponse {
            blocks: vec![
                SerializedBlock {
                    header: header(1),
                    operations: vec![],
                },
                SerializedBlock {
                    header: header(2),
                    operations: vec![],
                },
            ],
        };
        let response = Frame::response(
            OpCode::GetBlocks as u16,
            request.frames[0].request_id,
            result_code::SUCCESS,
            Bytes::from(response_packet.to_wire()),
        );
        let output = conn.on_frame(response, now).unwrap();

        assert_eq!(conn.state(), PeerState::Live);
        assert_eq!(output.events.len(), 3);
        assert!(matches!(
            &output.events[0],
            PeerEvent::NewBlock {
                should_broadcast: false,
                ..
            }
        ));
        assert_eq!(output.events[2], PeerEvent::SyncDone);
    }

    #[test]
    fn undecodable_download_response_is_fatal() {
        let mut conn = connection(0, vec![]);
        let now = Instant::now();
        let request = conn.start_blocks_download(1, 2, now);

        let response = Frame::response(
            OpCode::GetBlocks as u16,
            request.frames[0].request_id,
            result_code::SUCCESS,
            Bytes::from_static(&[0xFF, 0xFF, 0xFF]),
        );
        let err = conn.on_frame(response, now).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload(_)));
    }

    #[test]
    fn download_timeout_reports_sync_done() {
        let mut conn = connection(0, vec![]);
        let start = Instant::now();
        conn.start_blocks_download(1, 2, start);

        let output = conn
            .on_tick(start + Duration::from_secs(31), 131)
            .unwrap();
        assert_eq!(output.events, vec![PeerEvent::SyncDone]);
        assert_eq!(conn.state(), PeerState::Live);
    }

    #[test]
    fn hello_timeout_is_fatal() {
        let mut conn = connection(0, vec![]);
        let start = Instant::now();
        conn.on_open(true, start, 100);

        let err = conn
            .on_tick(start + Duration::from_secs(31), 131)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeTimeout));
    }

    #[test]
    fn live_notifications_become_events() {
        let mut conn = connection(5, vec![]);

        let block_frame = Frame::notification(
            OpCode::NewBlock,
            Bytes::from(
                PacketNewBlock {
                    block: SerializedBlock {
                        header: header(6),
                        operations: vec![],
                    },
                }
                .to_wire(),
            ),
        );
        let output = conn.on_frame(block_frame, Instant::now()).unwrap();
        assert!(matches!(
            &output.events[0],
            PeerEvent::NewBlock {
                should_broadcast: true,
                ..
            }
        ));

        let tx = Tx::Transfer(Transfer {
            source: 0,
            op_id: 1,
            dest: 1,
            amount: 5,
            fee: 0,
            payload: vec![],
            source_public: Public::new(714, vec![1], vec![2]),
            signature: Signature {
                r: vec![1],
                s: vec![2],
            },
        });
        let ops_frame = Frame::notification(
            OpCode::NewOperations,
            Bytes::from(
                PacketNewOperations {
                    operations: vec![tx.clone()],
                }
                .to_wire(),
            ),
        );
        let output = conn.on_frame(ops_frame, Instant::now()).unwrap();
        assert_eq!(output.events, vec![PeerEvent::NewOperation(tx)]);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let mut conn = connection(0, vec![]);
        let frame = Frame {
            kind: RpcKind::Request,
            operation: 99,
            request_id: 1,
            result: 0,
            payload: Bytes::new(),
        };
        let err = conn.on_frame(frame, Instant::now()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidOpcode(99)));
    }

    #[test]
    fn close_cancels_pending_download() {
        let mut conn = connection(0, vec![]);
        conn.start_blocks_download(1, 5, Instant::now());
        let events = conn.close();
        assert_eq!(events, vec![PeerEvent::SyncDone]);
        assert_eq!(conn.state(), PeerState::Closed);
    }
}
