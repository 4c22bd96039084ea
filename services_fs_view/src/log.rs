//! Request logging shared by a server and its forks

use core_types::{Errno, ServerId};
use fs_view::{CapMessage, FsObj};
use ipc::{tag, tag_name, Arg};
use std::cell::Cell;
use std::mem;
use std::rc::Rc;
use tracing::info;

/// `[line]`: writes one line to the log
pub const METHOD_LOG_LINE: u32 = tag(b"Logl");

pub struct LogSink {
    enabled: Cell<bool>,
    requests: Cell<u64>,
}

impl LogSink {
    pub fn new(enabled: bool) -> Rc<Self> {
        Rc::new(Self {
            enabled: Cell::new(enabled),
            requests: Cell::new(0),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    /// Requests seen by every server sharing this sink
    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn record(&self, server: ServerId, method: u32, path: Option<&[u8]>) {
        self.requests.set(self.requests.get() + 1);
        if self.enabled.get() {
            match path {
                Some(path) => info!(
                    %server,
                    method = %tag_name(method),
                    path = %String::from_utf8_lossy(path),
                    "Request"
                ),
                None => info!(%server, method = %tag_name(method), "Request"),
            }
        }
    }
}

/// Capability that writes client-supplied lines into the log
pub struct LogStream {
    sink: Rc<LogSink>,
    origin: ServerId,
}

impl LogStream {
    pub fn new(sink: Rc<LogSink>, origin: ServerId) -> Self {
        Self { sink, origin }
    }

    fn handle(&self, req: CapMessage) -> Result<CapMessage, Errno> {
        let mut msg = req.decode()?;
        if msg.method != METHOD_LOG_LINE {
            return Err(Errno::NoSys);
        }
        let args = mem::replace(&mut msg.args, Arg::empty());
        let line = args.as_tuple(1)?[0].as_bytes()?;
        if self.sink.is_enabled() {
            info!(
                target: "capsule::client",
                server = %self.origin,
                "{}",
                String::from_utf8_lossy(line).trim_end()
            );
        }
        Ok(CapMessage::ok_empty())
    }
}

impl FsObj for LogStream {
    fn type_name(&self) -> &'static str {
        "log_stream"
    }

    fn call(&self, req: CapMessage) -> CapMessage {
        CapMessage::reply(self.handle(req))
    }

    /// Lines may also be sent one-way
    fn invoke(&self, msg: CapMessage) {
        match msg.split_call() {
            Ok((cont, inner)) => cont.invoke(self.call(inner)),
            Err(msg) => {
                let _ = self.handle(msg);
            }
        }
    }
}

/// Writes `line` through a log stream capability
pub fn write_line(stream: &dyn FsObj, line: &[u8]) -> Result<(), Errno> {
    let req = CapMessage::request(
        METHOD_LOG_LINE,
        &Arg::Array(vec![Arg::str(line)]),
        Vec::new(),
        Vec::new(),
    );
    stream.call(req).into_reply().map(|_| ())
}
