//! Per-server connections: buffered I/O state for one UDP or TCP socket.
//!
//! TCP carries DNS messages behind a two-byte length prefix. The receive
//! side runs the state machine `Idle -> ReadingLen -> ReadingBody ->
//! dispatch -> Idle`; the send side keeps a FIFO of pending writes with
//! the partial head staying head-of-line.

use crate::sockets::{SocketId, SocketOps, Transport};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

/// Receive-side state for a TCP stream.
#[derive(Clone, Debug, Eq, PartialEq)]
enum ReadState {
    /// Waiting for (part of) the two-byte length prefix.
    Len { have: usize, buf: [u8; 2] },

    /// Waiting for the rest of a `len`-byte message body.
    Body { len: usize, buf: BytesMut },
}

impl Default for ReadState {
    fn default() -> ReadState {
        ReadState::Len {
            have: 0,
            buf: [0; 2],
        }
    }
}

pub(crate) struct Connection {
    pub id: SocketId,
    pub transport: Transport,
    pub server_idx: usize,

    /// The peer we connected to; inbound UDP datagrams from anyone else
    /// are discarded.
    pub peer: SocketAddr,

    /// Generation of the server's TCP stream this connection belongs to.
    pub generation: u64,

    /// Queries sent over this socket, for `udp_max_queries` recycling.
    pub queries_sent: u32,

    /// Current socket interest, mirrored to the host via the
    /// socket-state hook whenever it changes.
    pub want_read: bool,
    pub want_write: bool,

    write_queue: VecDeque<Vec<u8>>,

    /// Bytes of the queue head already accepted by the kernel.
    write_offset: usize,

    read_state: ReadState,
}

impl Connection {
    pub fn new(
        id: SocketId,
        transport: Transport,
        server_idx: usize,
        peer: SocketAddr,
        generation: u64,
    ) -> Connection {
        Connection {
            id,
            transport,
            server_idx,
            peer,
            generation,
            queries_sent: 0,
            want_read: true,
            want_write: false,
            write_queue: VecDeque::new(),
            write_offset: 0,
            read_state: ReadState::default(),
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Queues a message for sending. TCP messages gain their length
    /// prefix here.
    pub fn push_write(&mut self, msg: &[u8]) {
        match self.transport {
            Transport::Udp => self.write_queue.push_back(msg.to_vec()),
            Transport::Tcp => {
                let mut framed = Vec::with_capacity(msg.len() + 2);
                framed.extend_from_slice(&(msg.len() as u16).to_be_bytes());
                framed.extend_from_slice(msg);
                self.write_queue.push_back(framed);
            }
        }
    }

    /// Drains as much of the write queue as the socket accepts. Returns
    /// `Ok(true)` when the queue is empty afterwards.
    pub fn flush(&mut self, ops: &mut dyn SocketOps) -> io::Result<bool> {
        while let Some(head) = self.write_queue.front() {
            match ops.send(self.id, &head[self.write_offset..]) {
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset >= head.len() {
                        self.write_queue.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }

    /// Feeds received TCP bytes through the framing state machine,
    /// returning each completed message body.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<Vec<u8>> {
        debug_assert_eq!(self.transport, Transport::Tcp);

        let mut frames = Vec::new();

        while !bytes.is_empty() {
            match &mut self.read_state {
                ReadState::Len { have, buf } => {
                    let take = bytes.len().min(2 - *have);
                    buf[*have..*have + take].copy_from_slice(&bytes[..take]);
                    *have += take;
                    bytes = &bytes[take..];

                    if *have == 2 {
                        let len = u16::from_be_bytes(*buf) as usize;
                        self.read_state = ReadState::Body {
                            len,
                            buf: BytesMut::with_capacity(len),
                        };
                    }
                }

                ReadState::Body { len, buf } => {
                    let take = bytes.len().min(*len - buf.len());
                    buf.extend_from_slice(&bytes[..take]);
                    bytes = &bytes[take..];

                    if buf.len() == *len {
                        frames.push(buf[..].to_vec());
                        self.read_state = ReadState::default();
                    }
                }
            }
        }

        frames
    }
}
