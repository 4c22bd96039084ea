//! Stream socket I/O with descriptor passing
//!
//! Descriptors ride as `SCM_RIGHTS` control data on the first `sendmsg` of a
//! frame, so the receiver always gets them together with the frame's first
//! byte. The rest of the frame follows as plain bytes.

use core_types::Errno;
use ipc::MAX_FRAME_FDS;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

const RECV_CHUNK: usize = 64 * 1024;

/// Outcome of one receive
pub enum Received {
    Data { bytes: Vec<u8>, fds: Vec<OwnedFd> },
    /// The peer shut down its end
    Closed,
    WouldBlock,
}

/// Creates a connected pair of `AF_UNIX` stream sockets
pub fn socketpair() -> Result<(OwnedFd, OwnedFd), Errno> {
    let mut fds: [RawFd; 2] = [-1; 2];
    let rc = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    if rc < 0 {
        return Err(Errno::last());
    }
    // SAFETY: socketpair succeeded, so both descriptors are fresh and ours
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

pub fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<(), Errno> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(Errno::last());
    }
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Errno::last());
    }
    Ok(())
}

/// Blocks until `fd` reports one of `events`
pub fn wait_ready(fd: BorrowedFd<'_>, events: libc::c_short) -> Result<libc::c_short, Errno> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events,
        revents: 0,
    };
    loop {
        if unsafe { libc::poll(&mut pfd, 1, -1) } >= 0 {
            return Ok(pfd.revents);
        }
        let err = Errno::last();
        if err.code() != libc::EINTR {
            return Err(err);
        }
    }
}

fn cmsg_space(fd_count: usize) -> usize {
    unsafe { libc::CMSG_SPACE((fd_count * mem::size_of::<RawFd>()) as libc::c_uint) as usize }
}

/// Control buffer with the alignment `cmsghdr` needs
fn control_buffer(len: usize) -> Vec<u64> {
    vec![0u64; len.div_ceil(mem::size_of::<u64>())]
}

/// One `sendmsg` call carrying `fds` (if any) with the first byte
///
/// Returns the number of bytes the kernel accepted.
pub fn send_some(sock: BorrowedFd<'_>, bytes: &[u8], fds: &[OwnedFd]) -> Result<usize, Errno> {
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut libc::c_void,
        iov_len: bytes.len(),
    };
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    let mut control = Vec::new();
    if !fds.is_empty() {
        let space = cmsg_space(fds.len());
        control = control_buffer(space);
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;

        // SAFETY: the control buffer is aligned and sized for one header
        // carrying fds.len() descriptors
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            if cmsg.is_null() {
                return Err(Errno::Inval);
            }
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len =
                libc::CMSG_LEN((fds.len() * mem::size_of::<RawFd>()) as libc::c_uint) as _;
            let data = libc::CMSG_DATA(cmsg) as *mut RawFd;
            for (i, fd) in fds.iter().enumerate() {
                ptr::write_unaligned(data.add(i), fd.as_raw_fd());
            }
        }
    }

    let sent = unsafe { libc::sendmsg(sock.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
    drop(control);
    if sent < 0 {
        return Err(Errno::last());
    }
    Ok(sent as usize)
}

/// Writes all of `bytes`, waiting for buffer space when the socket is full
///
/// `fds` travel with the first chunk. The caller keeps ownership of its
/// copies; the kernel duplicates them into the message.
pub fn send_all(sock: BorrowedFd<'_>, bytes: &[u8], fds: &[OwnedFd]) -> Result<(), Errno> {
    let mut sent = 0;
    let mut pending_fds = fds;
    while sent < bytes.len() {
        match send_some(sock, &bytes[sent..], pending_fds) {
            Ok(n) => {
                sent += n;
                pending_fds = &[];
            }
            Err(err) if err.code() == libc::EINTR => {}
            Err(err) if err.code() == libc::EAGAIN => {
                wait_ready(sock, libc::POLLOUT)?;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// One `recvmsg` call
///
/// Received descriptors are close-on-exec. A truncated control message
/// fails with `EIO` after closing whatever descriptors did arrive.
pub fn recv_some(sock: BorrowedFd<'_>) -> Result<Received, Errno> {
    let mut buf = vec![0u8; RECV_CHUNK];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let space = cmsg_space(MAX_FRAME_FDS);
    let mut control = control_buffer(space);
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    let received = loop {
        let n = unsafe { libc::recvmsg(sock.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };
        if n >= 0 {
            break n as usize;
        }
        let err = Errno::last();
        if err.code() == libc::EAGAIN {
            return Ok(Received::WouldBlock);
        }
        if err.code() != libc::EINTR {
            return Err(err);
        }
    };

    let mut fds = Vec::new();
    // SAFETY: the kernel filled the control buffer; each SCM_RIGHTS header
    // is followed by the descriptors it announces, which now belong to us
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                let len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                for i in 0..len / mem::size_of::<RawFd>() {
                    fds.push(OwnedFd::from_raw_fd(ptr::read_unaligned(data.add(i))));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }
    drop(control);

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(Errno::Io);
    }
    if received == 0 {
        return Ok(Received::Closed);
    }
    buf.truncate(received);
    Ok(Received::Data { bytes: buf, fds })
}
