//! Return continuations
//!
//! A call is an invoke that carries a single-use continuation as its
//! leading capability. Invoking the continuation hands the reply to the
//! waiting caller through a [`PendingReply`]. A continuation released
//! without being invoked leaves an `ECANCELED` failure instead, so the
//! caller never waits on a reply that cannot come.

use core_types::Errno;
use fs_view::{Cap, CapMessage, FsObj};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::warn;

type ReplySlot = Rc<RefCell<Option<CapMessage>>>;

/// The caller's side of a return continuation
pub struct PendingReply(ReplySlot);

impl PendingReply {
    pub fn is_ready(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub fn take(&self) -> Option<CapMessage> {
        self.0.borrow_mut().take()
    }
}

pub struct ReturnCont {
    slot: ReplySlot,
    fired: Cell<bool>,
}

impl ReturnCont {
    /// Creates a continuation and the handle its reply arrives through
    pub fn pair() -> (Cap, PendingReply) {
        let slot: ReplySlot = Rc::new(RefCell::new(None));
        let cont: Cap = Rc::new(Self {
            slot: slot.clone(),
            fired: Cell::new(false),
        });
        (cont, PendingReply(slot))
    }
}

impl FsObj for ReturnCont {
    fn type_name(&self) -> &'static str {
        "return_cont"
    }

    fn call(&self, _req: CapMessage) -> CapMessage {
        CapMessage::fail(Errno::NoSys)
    }

    fn invoke(&self, msg: CapMessage) {
        if self.fired.replace(true) {
            warn!(?msg, "Return continuation invoked twice, dropping reply");
            return;
        }
        *self.slot.borrow_mut() = Some(msg);
    }
}

impl Drop for ReturnCont {
    fn drop(&mut self) {
        if !self.fired.get() {
            *self.slot.borrow_mut() = Some(CapMessage::fail(Errno::Canceled));
        }
    }
}
