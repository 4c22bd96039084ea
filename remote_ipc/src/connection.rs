//! One multiplexed connection
//!
//! Each side keeps a table of the capabilities it exports, keyed by id. A
//! frame payload is one of:
//!
//! - `Invk target ncaps ref... data`: invoke export `target` with `data`.
//!   Each `ref` is `id << 1`, naming one of the receiver's own exports, or
//!   `id << 1 | 1`, naming a capability the sender just exported.
//! - `Drop id`: the sender released its last handle to export `id`.
//!
//! Every capability sent over a connection is exported under a fresh id,
//! except a proxy for one of the peer's exports, which travels home as a
//! receiver reference. Capabilities are never released while the state
//! borrow is held, since releasing one may send a frame of its own.

use crate::proxy::RemoteObj;
use crate::reactor::EventLoop;
use crate::transport::{self, Received};
use core_types::{ConnectionId, Errno};
use fs_view::{AsFsObj, Cap, CapMessage};
use ipc::{encode_frame, tag, Frame, FrameDecoder, FrameError, Message, WORD};
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const OP_INVOKE: u32 = tag(b"Invk");
pub const OP_DROP: u32 = tag(b"Drop");

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("Connection closed")]
    Closed,

    #[error("No open connections")]
    Idle,

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(#[from] Errno),
}

impl ConnError {
    /// The error code a failed call reports
    pub fn errno(&self) -> Errno {
        match self {
            ConnError::Transport(errno) => *errno,
            ConnError::Closed | ConnError::Idle => Errno::Canceled,
            ConnError::Frame(_) | ConnError::Protocol(_) => Errno::Io,
        }
    }
}

impl From<ConnError> for Errno {
    fn from(err: ConnError) -> Self {
        err.errno()
    }
}

struct ConnState {
    open: bool,
    decoder: FrameDecoder,
    exports: HashMap<u32, Cap>,
    next_export: u32,
    live_imports: usize,
}

pub struct Connection {
    id: ConnectionId,
    sock: OwnedFd,
    event_loop: Weak<EventLoop>,
    state: RefCell<ConnState>,
}

fn read_word(payload: &[u8], index: usize) -> Result<u32, ConnError> {
    let start = index * WORD;
    payload
        .get(start..start + WORD)
        .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ConnError::Protocol(format!("payload too short for word {index}")))
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_ne_bytes()).collect()
}

impl Connection {
    /// Wraps a connected stream socket; `exports` get ids `0..N`
    pub(crate) fn new(
        sock: OwnedFd,
        event_loop: Weak<EventLoop>,
        exports: Vec<Cap>,
    ) -> Result<Rc<Self>, ConnError> {
        transport::set_nonblocking(sock.as_fd())?;
        let next_export = exports.len() as u32;
        let conn = Rc::new(Self {
            id: ConnectionId::new(),
            sock,
            event_loop,
            state: RefCell::new(ConnState {
                open: true,
                decoder: FrameDecoder::new(),
                exports: (0..).zip(exports).collect(),
                next_export,
                live_imports: 0,
            }),
        });
        info!(conn = %conn.id, exports = next_export, "Connection opened");
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn export_count(&self) -> usize {
        self.state.borrow().exports.len()
    }

    pub fn import_count(&self) -> usize {
        self.state.borrow().live_imports
    }

    pub fn event_loop(&self) -> Option<Rc<EventLoop>> {
        self.event_loop.upgrade()
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    /// Creates a local proxy for the peer's export `id`
    pub(crate) fn import(self: &Rc<Self>, id: u32) -> Cap {
        self.state.borrow_mut().live_imports += 1;
        Rc::new(RemoteObj::new(self.clone(), id))
    }

    /// Sends `msg` to the peer's export `target` without waiting
    pub(crate) fn send_invoke(
        self: &Rc<Self>,
        target: u32,
        msg: CapMessage,
    ) -> Result<(), ConnError> {
        let Message { data, caps, fds } = msg;
        if !self.is_open() {
            return Err(ConnError::Closed);
        }

        let mut words = vec![OP_INVOKE, target, caps.len() as u32];
        // Proxies going home; released only after the frame is out
        let mut returning = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            for cap in caps {
                let home = cap
                    .as_any()
                    .downcast_ref::<RemoteObj>()
                    .filter(|remote| Rc::ptr_eq(remote.connection(), self))
                    .map(RemoteObj::id);
                match home {
                    Some(id) => {
                        words.push(id << 1);
                        returning.push(cap);
                    }
                    None => {
                        let id = state.next_export;
                        state.next_export += 1;
                        state.exports.insert(id, cap);
                        words.push(id << 1 | 1);
                    }
                }
            }
        }

        let mut payload = words_to_bytes(&words);
        payload.extend_from_slice(&data);
        let result = self.send_frame(&payload, &fds);
        drop(fds);
        drop(returning);
        result
    }

    /// Called when the last local handle to import `id` goes away
    pub(crate) fn release_import(&self, id: u32) {
        let idle = {
            let mut state = self.state.borrow_mut();
            if !state.open {
                return;
            }
            state.live_imports = state.live_imports.saturating_sub(1);
            state.exports.is_empty() && state.live_imports == 0
        };
        if self.send_frame(&words_to_bytes(&[OP_DROP, id]), &[]).is_ok() && idle {
            debug!(conn = %self.id, "No capabilities left in either direction");
            self.close();
        }
    }

    fn send_frame(&self, payload: &[u8], fds: &[OwnedFd]) -> Result<(), ConnError> {
        let frame = encode_frame(payload, fds.len())?;
        if let Err(err) = transport::send_all(self.sock.as_fd(), &frame, fds) {
            warn!(conn = %self.id, %err, "Send failed");
            self.close();
            return Err(err.into());
        }
        Ok(())
    }

    /// Reads whatever the socket has and dispatches every complete frame
    pub(crate) fn service(self: &Rc<Self>) {
        if !self.is_open() {
            return;
        }
        let mut peer_closed = false;
        match transport::recv_some(self.sock.as_fd()) {
            Ok(Received::Data { bytes, fds }) => {
                let mut state = self.state.borrow_mut();
                state.decoder.push_fds(fds);
                state.decoder.push_bytes(&bytes);
            }
            Ok(Received::WouldBlock) => {}
            Ok(Received::Closed) => peer_closed = true,
            Err(err) => {
                warn!(conn = %self.id, %err, "Receive failed");
                self.close();
                return;
            }
        }

        while self.is_open() {
            let next = self.state.borrow_mut().decoder.next_frame();
            let result = match next {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => break,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = result {
                error!(conn = %self.id, %err, "Closing connection after protocol error");
                self.close();
                return;
            }
        }

        if peer_closed {
            debug!(conn = %self.id, "Peer hung up");
            self.close();
        }
    }

    fn handle_frame(self: &Rc<Self>, frame: Frame) -> Result<(), ConnError> {
        let Frame { payload, fds } = frame;
        match read_word(&payload, 0)? {
            OP_INVOKE => self.handle_invoke(&payload, fds),
            OP_DROP => self.handle_drop(read_word(&payload, 1)?),
            op => Err(ConnError::Protocol(format!("unknown operation {op:#010x}"))),
        }
    }

    fn handle_invoke(self: &Rc<Self>, payload: &[u8], fds: Vec<OwnedFd>) -> Result<(), ConnError> {
        let target = read_word(payload, 1)?;
        let count = read_word(payload, 2)? as usize;
        let refs = (0..count)
            .map(|i| read_word(payload, 3 + i))
            .collect::<Result<Vec<_>, _>>()?;

        // Look everything up before creating any proxy, so a bad reference
        // leaves nothing to release
        let (obj, local) = {
            let state = self.state.borrow();
            let obj = state.exports.get(&target).cloned();
            let local: Option<Vec<Option<Cap>>> = refs
                .iter()
                .map(|r| match r & 1 {
                    0 => state.exports.get(&(r >> 1)).cloned().map(Some),
                    _ => Some(None),
                })
                .collect();
            (obj, local)
        };
        let obj = obj
            .ok_or_else(|| ConnError::Protocol(format!("invoke on unknown export {target}")))?;
        let local = local
            .ok_or_else(|| ConnError::Protocol("unknown export in capability list".into()))?;

        let caps: Vec<Cap> = refs
            .iter()
            .zip(local)
            .map(|(r, cap)| cap.unwrap_or_else(|| self.import(r >> 1)))
            .collect();
        let data = payload[(3 + count) * WORD..].to_vec();
        debug!(
            conn = %self.id,
            target,
            obj = obj.type_name(),
            caps = caps.len(),
            fds = fds.len(),
            "Invoke"
        );
        obj.invoke(CapMessage::new(data, caps, fds));
        Ok(())
    }

    fn handle_drop(&self, id: u32) -> Result<(), ConnError> {
        let (released, idle) = {
            let mut state = self.state.borrow_mut();
            let released = state.exports.remove(&id);
            (released, state.exports.is_empty() && state.live_imports == 0)
        };
        let released = released
            .ok_or_else(|| ConnError::Protocol(format!("drop of unknown export {id}")))?;
        debug!(conn = %self.id, id, obj = released.type_name(), "Export released by peer");
        drop(released);
        if idle {
            debug!(conn = %self.id, "No capabilities left in either direction");
            self.close();
        }
        Ok(())
    }

    /// Shuts the connection down
    ///
    /// Every export is released, which cancels the continuations of calls
    /// still waiting on this connection. Proxies that outlive the
    /// connection fail their operations.
    pub fn close(&self) {
        let (exports, decoder) = {
            let mut state = self.state.borrow_mut();
            if !state.open {
                return;
            }
            state.open = false;
            (mem::take(&mut state.exports), mem::take(&mut state.decoder))
        };
        unsafe {
            libc::shutdown(self.sock.as_raw_fd(), libc::SHUT_RDWR);
        }
        info!(conn = %self.id, exports = exports.len(), "Connection closed");
        drop(exports);
        drop(decoder);
    }
}
