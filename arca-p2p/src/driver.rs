//! Tokio net driver: accepts and dials TCP peers, runs one reader task
//! and one writer task per connection, and forwards peer events to the
//! orchestrator over a single bounded channel.
//!
//! Backpressure is explicit end to end: the reader blocks on the event
//! channel, the writer drains a bounded outbound queue, and a full
//! outbound queue drops the broadcast rather than the connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arca_safebox::{SerializedBlock, Tx};
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::frame::{Frame, FrameCodec};
use crate::peer::{ChainView, PeerConfig, PeerConnection, PeerEvent};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

const OUTBOUND_QUEUE_SIZE: usize = 128;
const COMMAND_CHAN_SIZE: usize = 32;
const CLOSE_CHAN_SIZE: usize = 128;

/// Everything the driver needs to know about the network it serves.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub magic: u32,
    pub max_peers: usize,
    pub server_port: u16,
    pub user_agent: String,
    pub blocks_per_request: u32,
}

/// Orchestrator-to-peer instructions.
#[derive(Debug, Clone)]
pub enum PeerCommand {
    StartBlocksDownload { from: u32, to: u32 },
    BroadcastBlock(SerializedBlock),
    BroadcastTx(Tx),
}

/// One peer's control surface: a command queue plus a cancellation
/// guard. Dropping the handle tears the connection down.
#[derive(Clone)]
pub struct PeerHandle {
    cmd_tx: mpsc::Sender<PeerCommand>,
    _cancel: Arc<DropGuard>,
}

impl PeerHandle {
    /// Best-effort; a full queue drops the command.
    pub fn command(&self, command: PeerCommand) -> bool {
        self.cmd_tx.try_send(command).is_ok()
    }
}

/// Connection lifecycle and protocol events, tagged with the peer.
#[derive(Debug)]
pub struct NetMessage {
    pub peer: SocketAddr,
    pub event: NetEvent,
}

#[derive(Debug)]
pub enum NetEvent {
    Accepted,
    Connected,
    NotConnected,
    Disconnected { reason: Option<String> },
    Peer(PeerEvent),
}

type SharedHandles = Arc<Mutex<HashMap<SocketAddr, PeerHandle>>>;

pub struct NetDriver<C> {
    config: DriverConfig,
    nonce: Vec<u8>,
    chain: Arc<C>,
    handles: SharedHandles,
    net_tx: mpsc::Sender<NetMessage>,
    close_tx: mpsc::Sender<(SocketAddr, Option<String>)>,
}

impl<C> Clone for NetDriver<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            nonce: self.nonce.clone(),
            chain: self.chain.clone(),
            handles: self.handles.clone(),
            net_tx: self.net_tx.clone(),
            close_tx: self.close_tx.clone(),
        }
    }
}

impl<C: ChainView + 'static> NetDriver<C> {
    pub fn new(
        config: DriverConfig,
        nonce: Vec<u8>,
        chain: Arc<C>,
        net_tx: mpsc::Sender<NetMessage>,
    ) -> Self {
        let (close_tx, close_rx) = mpsc::channel(CLOSE_CHAN_SIZE);
        let handles: SharedHandles = Arc::new(Mutex::new(HashMap::new()));

        let driver = Self {
            config,
            nonce,
            chain,
            handles,
            net_tx,
            close_tx,
        };
        driver.on_closing(close_rx);
        driver
    }

    pub fn peer_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Send a command to one peer. False if the peer is gone or backed up.
    pub fn command(&self, peer: &SocketAddr, command: PeerCommand) -> bool {
        let handle = self.handles.lock().get(peer).cloned();
        handle.map(|h| h.command(command)).unwrap_or(false)
    }

    /// Fan a command out to every peer except `skip`.
    pub fn broadcast(&self, skip: Option<SocketAddr>, command: PeerCommand) -> usize {
        let handles: Vec<(SocketAddr, PeerHandle)> = self
            .handles
            .lock()
            .iter()
            .filter(|(addr, _)| Some(**addr) != skip)
            .map(|(addr, handle)| (*addr, handle.clone()))
            .collect();

        let mut sent = 0;
        for (addr, handle) in handles {
            if handle.command(command.clone()) {
                sent += 1;
            } else {
                debug!(peer = %addr, "outbound queue full, broadcast dropped");
            }
        }
        sent
    }

    pub fn remove(&self, peer: &SocketAddr) -> Option<PeerHandle> {
        self.handles.lock().remove(peer)
    }

    /// Accept loop on `listen`; runs until cancelled.
    pub fn listen(&self, listen: SocketAddr, cancel: CancellationToken) {
        let driver = self.clone();
        tokio::spawn(async move {
            let listener = match TcpListener::bind(listen).await {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(addr = %listen, error = %err, "listener bind failed");
                    return;
                }
            };
            info!(addr = %listen, "listening for peers");

            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            driver.on_established(peer, false, stream).await;
                        }
                        Err(err) => {
                            debug!(error = %err, "accept failed");
                        }
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    /// Dial one peer; emits `Connected` or `NotConnected`.
    pub fn connect(&self, peer: SocketAddr) {
        let driver = self.clone();
        tokio::spawn(async move {
            match timeout(DIAL_TIMEOUT, TcpStream::connect(peer)).await {
                Ok(Ok(stream)) => {
                    driver.on_established(peer, true, stream).await;
                }
                Ok(Err(err)) => {
                    debug!(peer = %peer, error = %err, "dial failed");
                    let _ = driver.send_event(peer, NetEvent::NotConnected).await;
                }
                Err(_) => {
                    debug!(peer = %peer, "dial timed out");
                    let _ = driver.send_event(peer, NetEvent::NotConnected).await;
                }
            }
        });
    }

    async fn on_established(&self, peer: SocketAddr, outgoing: bool, stream: TcpStream) {
        let canceler = CancellationToken::new();
        let cancelee = canceler.clone();

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHAN_SIZE);
        {
            let mut handles = self.handles.lock();
            if handles.len() >= self.config.max_peers {
                debug!(peer = %peer, "peer limit reached, dropping connection");
                return;
            }
            handles.insert(
                peer,
                PeerHandle {
                    cmd_tx,
                    _cancel: Arc::new(canceler.drop_guard()),
                },
            );
        }

        let event = if outgoing {
            NetEvent::Connected
        } else {
            NetEvent::Accepted
        };
        if self.send_event(peer, event).await.is_err() {
            self.remove(&peer);
            return;
        }

        let driver = self.clone();
        tokio::spawn(async move {
            driver.run_peer(peer, outgoing, stream, cmd_rx, cancelee).await;
        });
    }

    async fn run_peer(
        &self,
        peer: SocketAddr,
        outgoing: bool,
        stream: TcpStream,
        mut cmd_rx: mpsc::Receiver<PeerCommand>,
        cancel: CancellationToken,
    ) {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE_SIZE);
        spawn_writer(write_half, out_rx, self.config.magic);

        let mut frames = FramedRead::new(read_half, FrameCodec::new(self.config.magic));
        let mut conn = PeerConnection::new(
            self.nonce.clone(),
            self.chain.clone(),
            PeerConfig {
                server_port: self.config.server_port,
                user_agent: self.config.user_agent.clone(),
                blocks_per_request: self.config.blocks_per_request,
            },
        );
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        let output = conn.on_open(outgoing, Instant::now(), unix_now());
        if self.deliver(peer, output, &out_tx).await.is_err() {
            let _ = self.close_tx.send((peer, None)).await;
            return;
        }

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break None,

                incoming = frames.next() => match incoming {
                    Some(Ok(frame)) => match conn.on_frame(frame, Instant::now()) {
                        Ok(output) => {
                            if self.deliver(peer, output, &out_tx).await.is_err() {
                                break None;
                            }
                        }
                        Err(err) => {
                            warn!(peer = %peer, error = %err, "protocol violation");
                            break Some(err.to_string());
                        }
                    },
                    Some(Err(err)) => {
                        warn!(peer = %peer, error = %err, "stream error");
                        break Some(err.to_string());
                    }
                    None => break None,
                },

                command = cmd_rx.recv() => match command {
                    Some(command) => {
                        let output = self.on_command(&mut conn, command);
                        if self.deliver(peer, output, &out_tx).await.is_err() {
                            break None;
                        }
                    }
                    None => break None,
                },

                _ = sweep.tick() => match conn.on_tick(Instant::now(), unix_now()) {
                    Ok(output) => {
                        if self.deliver(peer, output, &out_tx).await.is_err() {
                            break None;
                        }
                    }
                    Err(err) => {
                        warn!(peer = %peer, error = %err, "peer timed out");
                        break Some(err.to_string());
                    }
                },
            }
        };

        // Cancelled downloads and the like still owe the orchestrator
        // their terminal events.
        for event in conn.close() {
            let _ = self.send_event(peer, NetEvent::Peer(event)).await;
        }
        let _ = self.close_tx.send((peer, reason)).await;
    }

    fn on_command(
        &self,
        conn: &mut PeerConnection<C>,
        command: PeerCommand,
    ) -> crate::peer::PeerOutput {
        match command {
            PeerCommand::StartBlocksDownload { from, to } => {
                conn.start_blocks_download(from, to, Instant::now())
            }
            PeerCommand::BroadcastBlock(block) => {
                crate::peer::PeerOutput {
                    frames: vec![conn.broadcast_block(block)],
                    events: Vec::new(),
                }
            }
            PeerCommand::BroadcastTx(tx) => crate::peer::PeerOutput {
                frames: vec![conn.broadcast_tx(tx)],
                events: Vec::new(),
            },
        }
    }

    async fn deliver(
        &self,
        peer: SocketAddr,
        output: crate::peer::PeerOutput,
        out_tx: &mpsc::Sender<Frame>,
    ) -> Result<(), ()> {
        for frame in output.frames {
            out_tx.send(frame).await.map_err(|_| ())?;
        }
        for event in output.events {
            self.send_event(peer, NetEvent::Peer(event)).await?;
        }
        Ok(())
    }

    async fn send_event(&self, peer: SocketAddr, event: NetEvent) -> Result<(), ()> {
        self.net_tx
            .send(NetMessage { peer, event })
            .await
            .map_err(|_| ())
    }

    fn on_closing(&self, mut close_rx: mpsc::Receiver<(SocketAddr, Option<String>)>) {
        let handles = self.handles.clone();
        let net_tx = self.net_tx.clone();
        tokio::spawn(async move {
            while let Some((peer, reason)) = close_rx.recv().await {
                let removed = handles.lock().remove(&peer);
                if removed.is_some() {
                    let _ = net_tx
                        .send(NetMessage {
                            peer,
                            event: NetEvent::Disconnected { reason },
                        })
                        .await;
                }
            }
        });
    }
}

fn spawn_writer(mut write_half: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Frame>, magic: u32) {
    tokio::spawn(async move {
        let mut codec = FrameCodec::new(magic);
        let mut buf = BytesMut::new();
        while let Some(frame) = out_rx.recv().await {
            buf.clear();
            if let Err(err) = codec.encode(frame, &mut buf) {
                debug!(error = %err, "frame encode failed");
                continue;
            }
            if write_half.write_all(&buf).await.is_err() {
                break;
            }
        }
        // Dropping the write half closes the socket; the reader task
        // observes EOF and runs the shared teardown.
    });
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
