//! Networking primitives.
//!
//! Goals:
//! - One reliable, ordered stream per client (TCP, length-prefixed JSON frames).
//! - Message types carrying exactly the fields the movement state machines need.
//! - A synchronous [`PacketSink`] seam so simulation code never awaits.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc,
};
use tracing::warn;

use crate::{
    math::{Direction, TilePos},
    world::{EntityId, EntityKind},
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are treated as a broken stream.
pub const MAX_FRAME_LEN: usize = 1 << 20;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
        name: String,
    },
    Welcome {
        client_id: ClientId,
        player: EntityId,
        position: TilePos,
        direction: Direction,
    },

    // ─── Client -> server movement ───
    MoveRequest {
        direction: u8,
        running: bool,
        sequence: u8,
        fast_walk_key: u32,
    },
    /// Asks the server to restate the player's authoritative position.
    ResyncRequest,
    VehicleMoveRequest {
        vehicle: EntityId,
        direction: u8,
        speed: u8,
    },

    // ─── Server -> client movement ───
    StepConfirm {
        sequence: u8,
    },
    StepDeny {
        sequence: u8,
        x: u16,
        y: u16,
        z: i8,
    },
    VehicleMove {
        vehicle: EntityId,
        speed: u8,
        moving_dir: u8,
        facing_dir: u8,
        x: u16,
        y: u16,
        z: i8,
        /// World positions of everything riding the vehicle after this move.
        #[serde(default)]
        riders: Vec<Rider>,
    },
    /// Authoritative player position (resync reply or teleport).
    PlayerPosition {
        x: u16,
        y: u16,
        z: i8,
        direction: u8,
    },

    // ─── Anti-automation keys ───
    /// Replaces the key pool, one key per slot.
    FastWalkKeys {
        keys: Vec<u32>,
    },
    AddFastWalkKey {
        key: u32,
    },

    // ─── Entity replication ───
    EntitySpawn(EntitySpawn),
    EntityDelete {
        id: EntityId,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// A passenger's world position carried in a vehicle move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rider {
    pub id: EntityId,
    pub position: TilePos,
}

/// Entity spawn packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpawn {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: TilePos,
    pub direction: Direction,
}

/// Synchronous outbound packet queue.
///
/// Simulation code pushes packets here; an I/O task owns the socket.
pub trait PacketSink {
    fn send_packet(&mut self, msg: NetMsg);
}

impl PacketSink for Vec<NetMsg> {
    fn send_packet(&mut self, msg: NetMsg) {
        self.push(msg);
    }
}

impl PacketSink for mpsc::UnboundedSender<NetMsg> {
    fn send_packet(&mut self, msg: NetMsg) {
        if let Err(e) = mpsc::UnboundedSender::send(self, msg) {
            warn!(msg = ?e.0, "Dropping packet, writer task has gone away");
        }
    }
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R>(r: &mut R) -> anyhow::Result<NetMsg>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame of {len} bytes exceeds limit");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    decode_from_bytes(&payload)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (FrameReader { half: r }, FrameWriter { half: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.half).await
    }

    /// Forwards every frame into `tx` until the stream closes or `tx` is dropped.
    pub async fn forward<T, F>(mut self, tx: mpsc::UnboundedSender<T>, wrap: F) -> anyhow::Result<()>
    where
        F: Fn(NetMsg) -> T,
    {
        loop {
            let msg = self.recv().await?;
            if tx.send(wrap(msg)).is_err() {
                return Ok(());
            }
        }
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }

    /// Writes everything received on `rx` until the channel closes.
    pub async fn drain(mut self, mut rx: mpsc::UnboundedReceiver<NetMsg>) -> anyhow::Result<()> {
        while let Some(msg) = rx.recv().await {
            self.send(&msg).await?;
        }
        Ok(())
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_move_without_riders_decodes() {
        let json = br#"{"VehicleMove":{"vehicle":9,"speed":3,"moving_dir":2,"facing_dir":2,"x":101,"y":100,"z":0}}"#;
        match decode_from_bytes(json).unwrap() {
            NetMsg::VehicleMove { vehicle, riders, x, .. } => {
                assert_eq!(vehicle, EntityId(9));
                assert_eq!(x, 101);
                assert!(riders.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn vec_sink_collects_in_order() {
        let mut sink: Vec<NetMsg> = Vec::new();
        sink.send_packet(NetMsg::ResyncRequest);
        sink.send_packet(NetMsg::StepConfirm { sequence: 4 });
        assert_eq!(
            sink,
            vec![NetMsg::ResyncRequest, NetMsg::StepConfirm { sequence: 4 }]
        );
    }

    #[tokio::test]
    async fn frames_survive_a_byte_stream() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let msg = NetMsg::StepDeny {
            sequence: 3,
            x: 10,
            y: 20,
            z: -5,
        };
        write_frame(&mut a, &msg).await.unwrap();
        write_frame(&mut a, &NetMsg::ResyncRequest).await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), msg);
        assert_eq!(read_frame(&mut b).await.unwrap(), NetMsg::ResyncRequest);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes())
            .await
            .unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }
}
