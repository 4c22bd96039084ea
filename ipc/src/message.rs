//! Messages: a payload plus its capability and descriptor side arrays
//!
//! Whoever holds a [`Message`] owns every capability and descriptor in it.
//! Passing a message on transfers that ownership. Decoding moves the side
//! arrays into [`Slots`], from which a handler claims the elements it needs;
//! whatever is left is released (capabilities dropped, descriptors closed)
//! exactly once when the decoded message goes out of scope, including when
//! the handler rejects the request half-way through.

use crate::codec::{self, Arg, CodecError, WORD};
use crate::method::{METHOD_CALL, METHOD_FAIL, METHOD_OK};
use core_types::Errno;
use std::fmt;
use std::os::fd::OwnedFd;

/// A payload with its side arrays
pub struct Message<C> {
    /// Method tag followed by an encoded argument tree
    pub data: Vec<u8>,
    pub caps: Vec<C>,
    pub fds: Vec<OwnedFd>,
}

impl<C> fmt::Debug for Message<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("bytes", &self.data.len())
            .field("caps", &self.caps.len())
            .field("fds", &self.fds.len())
            .finish()
    }
}

fn with_tag(tag: u32, args: &Arg) -> Vec<u8> {
    let mut data = tag.to_ne_bytes().to_vec();
    // Only trees larger than the addressable heap fail to encode; such a
    // message degrades to a malformed one, which the receiver rejects with EIO.
    if let Ok(body) = codec::encode(args) {
        data.extend_from_slice(&body);
    }
    data
}

impl<C> Message<C> {
    pub fn new(data: Vec<u8>, caps: Vec<C>, fds: Vec<OwnedFd>) -> Self {
        Self { data, caps, fds }
    }

    /// Builds a `{method tag, argument tree}` request
    pub fn request(method: u32, args: &Arg, caps: Vec<C>, fds: Vec<OwnedFd>) -> Self {
        Self::new(with_tag(method, args), caps, fds)
    }

    /// Builds an `{OK, result tree}` reply
    pub fn ok(result: &Arg, caps: Vec<C>, fds: Vec<OwnedFd>) -> Self {
        Self::request(METHOD_OK, result, caps, fds)
    }

    /// Builds an `{OK}` reply with an empty result
    pub fn ok_empty() -> Self {
        Self::ok(&Arg::empty(), Vec::new(), Vec::new())
    }

    /// Builds a `{FAIL, error code}` reply
    pub fn fail(errno: Errno) -> Self {
        Self::request(
            METHOD_FAIL,
            &Arg::int(errno.code()),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Builds a reply from an operation result
    pub fn reply(result: Result<Message<C>, Errno>) -> Self {
        result.unwrap_or_else(Self::fail)
    }

    /// Reads the leading method tag
    pub fn method(&self) -> Result<u32, CodecError> {
        let bytes = self.data.get(..WORD).ok_or(CodecError::Truncated)?;
        Ok(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Decodes the argument tree and moves the side arrays into slots
    ///
    /// On failure the message is consumed and every capability and
    /// descriptor it carried is released.
    pub fn decode(self) -> Result<Decoded<C>, CodecError> {
        let method = self.method()?;
        let args = codec::decode(&self.data[WORD..], self.caps.len(), self.fds.len())?;
        Ok(Decoded {
            method,
            args,
            caps: Slots::new(self.caps),
            fds: Slots::new(self.fds),
        })
    }

    /// Interprets this message as a reply
    ///
    /// `{OK, tree}` decodes to its contents, `{FAIL, code}` to the error code,
    /// and any other shape is a protocol error reported as `EIO`.
    pub fn into_reply(self) -> Result<Decoded<C>, Errno> {
        let decoded = self.decode()?;
        match decoded.method {
            METHOD_OK => Ok(decoded),
            METHOD_FAIL => {
                let code = decoded.args.as_int()?;
                Err(Errno::from_code(code as i32))
            }
            _ => Err(Errno::Io),
        }
    }

    /// Wraps a request for call semantics: `cont` becomes the leading
    /// capability and receives the reply
    pub fn wrap_call(mut self, cont: C) -> Self {
        let mut data = METHOD_CALL.to_ne_bytes().to_vec();
        data.append(&mut self.data);
        self.caps.insert(0, cont);
        Self::new(data, self.caps, self.fds)
    }

    /// Inverse of [`Message::wrap_call`]
    ///
    /// Returns the message unchanged when it is not a call.
    pub fn split_call(mut self) -> Result<(C, Self), Self> {
        if self.method() != Ok(METHOD_CALL) || self.caps.is_empty() {
            return Err(self);
        }
        let cont = self.caps.remove(0);
        let data = self.data.split_off(WORD);
        Ok((cont, Self::new(data, self.caps, self.fds)))
    }
}

/// A decoded message: method tag, argument tree, and owned side arrays
pub struct Decoded<C> {
    pub method: u32,
    pub args: Arg,
    pub caps: Slots<C>,
    pub fds: Slots<OwnedFd>,
}

impl<C> Decoded<C> {
    /// Claims the capability an argument refers to
    pub fn take_cap(&mut self, arg: &Arg) -> Result<C, CodecError> {
        self.caps.take(arg.as_cap()?)
    }

    /// Claims the descriptor an argument refers to
    pub fn take_fd(&mut self, arg: &Arg) -> Result<OwnedFd, CodecError> {
        self.fds.take(arg.as_fd()?)
    }
}

/// A side array whose elements can each be claimed once
///
/// Unclaimed elements are dropped with the slots.
pub struct Slots<T>(Vec<Option<T>>);

impl<T> Slots<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items.into_iter().map(Some).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Claims element `index`
    pub fn take(&mut self, index: u32) -> Result<T, CodecError> {
        self.0
            .get_mut(index as usize)
            .ok_or(CodecError::SlotIndex(index))?
            .take()
            .ok_or(CodecError::SlotTaken(index))
    }

    /// Number of elements not yet claimed
    pub fn remaining(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    type TestMessage = Message<Rc<u32>>;

    #[test]
    fn test_request_decode() {
        let cap = Rc::new(5u32);
        let msg = TestMessage::request(
            0x1234,
            &Arg::Array(vec![Arg::str("a"), Arg::Cap(0)]),
            vec![cap.clone()],
            Vec::new(),
        );
        let mut decoded = msg.decode().unwrap();
        assert_eq!(decoded.method, 0x1234);
        let items = decoded.args.as_tuple(2).unwrap().to_vec();
        let taken = decoded.take_cap(&items[1]).unwrap();
        assert!(Rc::ptr_eq(&taken, &cap));
        assert!(matches!(
            decoded.take_cap(&items[1]),
            Err(CodecError::SlotTaken(0))
        ));
    }

    #[test]
    fn test_unclaimed_caps_released_once() {
        let cap = Rc::new(1u32);
        let caps = vec![cap.clone(), cap.clone()];
        let msg = TestMessage::request(1, &Arg::empty(), caps, Vec::new());
        assert_eq!(Rc::strong_count(&cap), 3);
        let decoded = msg.decode().unwrap();
        assert_eq!(decoded.caps.remaining(), 2);
        drop(decoded);
        assert_eq!(Rc::strong_count(&cap), 1);
    }

    #[test]
    fn test_rejected_message_releases_caps() {
        let cap = Rc::new(1u32);
        let msg = TestMessage::new(vec![1, 2], vec![cap.clone()], Vec::new());
        assert!(msg.decode().is_err());
        assert_eq!(Rc::strong_count(&cap), 1);
    }

    #[test]
    fn test_reply_shapes() {
        let ok = TestMessage::ok(&Arg::int(9), Vec::new(), Vec::new());
        assert_eq!(ok.into_reply().unwrap().args, Arg::Int(9));

        let fail = TestMessage::fail(Errno::Loop);
        assert_eq!(fail.into_reply().err(), Some(Errno::Loop));

        let other = TestMessage::request(0x55, &Arg::empty(), Vec::new(), Vec::new());
        assert_eq!(other.into_reply().err(), Some(Errno::Io));
    }

    #[test]
    fn test_call_wrapping() {
        let cont = Rc::new(0u32);
        let arg = Rc::new(1u32);
        let msg = TestMessage::request(0x77, &Arg::Cap(0), vec![arg.clone()], Vec::new());
        let wrapped = msg.wrap_call(cont.clone());
        assert_eq!(wrapped.method(), Ok(METHOD_CALL));
        assert_eq!(wrapped.caps.len(), 2);

        let (got_cont, inner) = wrapped.split_call().unwrap();
        assert!(Rc::ptr_eq(&got_cont, &cont));
        assert_eq!(inner.method(), Ok(0x77));
        let mut decoded = inner.decode().unwrap();
        let args = decoded.args.clone();
        assert!(Rc::ptr_eq(&decoded.take_cap(&args).unwrap(), &arg));
    }

    #[test]
    fn test_split_call_rejects_plain_message() {
        let msg = TestMessage::request(0x77, &Arg::empty(), Vec::new(), Vec::new());
        let back = msg.split_call().unwrap_err();
        assert_eq!(back.method(), Ok(0x77));
    }
}
