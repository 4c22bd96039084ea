//! Both ends of a socket pair served by one event loop

use core_types::{Errno, ObjectKind};
use fs_view::{Cap, CapMessage, FabDir, FabSymlink, FsObj, RealDir};
use ipc::{tag, Arg};
use remote_ipc::{make_connection, socketpair, ConnMaker, Connection, EventLoop};
use std::cell::{Cell, RefCell};
use std::fs;
use std::io::Read;
use std::rc::Rc;

fn serve(exports: Vec<Cap>, import_count: u32) -> (Rc<EventLoop>, Vec<Cap>) {
    let event_loop = EventLoop::new();
    let (server, client) = socketpair().unwrap();
    event_loop.connect(server, exports, 0).unwrap();
    let (_, imports) = event_loop.connect(client, Vec::new(), import_count).unwrap();
    (event_loop, imports)
}

fn names(dir: &Cap) -> Vec<Vec<u8>> {
    dir.list().unwrap().into_iter().map(|e| e.name).collect()
}

struct BlackHole;

impl FsObj for BlackHole {
    fn type_name(&self) -> &'static str {
        "black_hole"
    }

    fn invoke(&self, _msg: CapMessage) {}
}

struct Hangup(RefCell<Option<Rc<Connection>>>);

impl FsObj for Hangup {
    fn type_name(&self) -> &'static str {
        "hangup"
    }

    fn invoke(&self, _msg: CapMessage) {
        if let Some(conn) = self.0.borrow_mut().take() {
            conn.close();
        }
    }
}

struct Relay(RefCell<Option<Cap>>);

impl FsObj for Relay {
    fn type_name(&self) -> &'static str {
        "relay"
    }

    fn list(&self) -> Result<Vec<core_types::DirEntry>, Errno> {
        let target = self.0.borrow().clone().ok_or(Errno::NoEnt)?;
        target.list()
    }
}

struct Counted(Rc<Cell<u32>>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

impl FsObj for Counted {
    fn type_name(&self) -> &'static str {
        "counted"
    }
}

struct Recorder(Rc<RefCell<Vec<u32>>>);

impl FsObj for Recorder {
    fn type_name(&self) -> &'static str {
        "recorder"
    }

    fn invoke(&self, msg: CapMessage) {
        if let Ok(method) = msg.method() {
            self.0.borrow_mut().push(method);
        }
    }
}

#[test]
fn test_call_over_connection() {
    let mut root = FabDir::new();
    root.insert(b"link", Rc::new(FabSymlink::new(b"target".to_vec())));
    root.insert(b"sub", Rc::new(FabDir::new()));
    let (_event_loop, imports) = serve(vec![Rc::new(root)], 1);
    let proxy = &imports[0];

    assert_eq!(proxy.obj_type(), Ok(ObjectKind::Dir));
    assert_eq!(names(proxy), vec![b"link".to_vec(), b"sub".to_vec()]);

    let link = proxy.traverse(b"link").unwrap();
    assert_eq!(link.type_name(), "remote");
    assert_eq!(link.readlink().unwrap(), b"target");
    assert_eq!(proxy.traverse(b"missing").err(), Some(Errno::NoEnt));
}

#[test]
fn test_descriptor_passing() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("f"), "data").unwrap();
    let root = RealDir::open_root(tmp.path()).unwrap();
    let (_event_loop, imports) = serve(vec![Rc::new(root)], 1);

    let file = imports[0].traverse(b"f").unwrap();
    let fd = file.open(libc::O_RDONLY).unwrap();
    let mut text = String::new();
    fs::File::from(fd).read_to_string(&mut text).unwrap();
    assert_eq!(text, "data");

    let created = imports[0].create_file(b"new", libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
    drop(created);
    assert!(tmp.path().join("new").exists());
}

#[test]
fn test_capability_returns_home() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("sub")).unwrap();
    fs::write(tmp.path().join("a"), "moved").unwrap();
    let root = RealDir::open_root(tmp.path()).unwrap();
    let (_event_loop, imports) = serve(vec![Rc::new(root)], 1);

    // The destination proxy travels back to the server as its own export,
    // so the real directory sees a real directory as the destination
    let sub = imports[0].traverse(b"sub").unwrap();
    imports[0].rename(b"a", &sub, b"b").unwrap();
    assert_eq!(fs::read_to_string(tmp.path().join("sub/b")).unwrap(), "moved");
}

#[test]
fn test_dropped_continuation_cancels_call() {
    let (_event_loop, imports) = serve(vec![Rc::new(BlackHole)], 1);
    assert_eq!(imports[0].stat().err(), Some(Errno::Canceled));
    // The connection survives a dropped reply
    assert_eq!(imports[0].stat().err(), Some(Errno::Canceled));
}

#[test]
fn test_peer_hangup_fails_pending_call() {
    let event_loop = EventLoop::new();
    let (server, client) = socketpair().unwrap();
    let hangup = Rc::new(Hangup(RefCell::new(None)));
    let (server_conn, _) = event_loop.connect(server, vec![hangup.clone()], 0).unwrap();
    *hangup.0.borrow_mut() = Some(server_conn);
    let (client_conn, imports) = event_loop.connect(client, Vec::new(), 1).unwrap();

    assert!(imports[0].stat().is_err());
    assert!(!client_conn.is_open());
}

#[test]
fn test_call_on_dead_socket() {
    let event_loop = EventLoop::new();
    let (client, server) = socketpair().unwrap();
    drop(server);
    let (_, imports) = event_loop.connect(client, Vec::new(), 1).unwrap();
    assert!(imports[0].list().is_err());
    assert_eq!(event_loop.connection_count(), 0);
}

#[test]
fn test_reentrant_call_back_into_caller() {
    let event_loop = EventLoop::new();
    let (side_a, side_b) = socketpair().unwrap();

    let relay = Rc::new(Relay(RefCell::new(None)));
    let (_, a_imports) = event_loop.connect(side_a, vec![relay.clone()], 1).unwrap();

    let mut dir = FabDir::new();
    dir.insert(b"x", Rc::new(FabDir::new()));
    let (_, b_imports) = event_loop.connect(side_b, vec![Rc::new(dir)], 1).unwrap();
    *relay.0.borrow_mut() = Some(a_imports[0].clone());

    // B calls the relay on A, which calls back into B's directory while
    // B's call is still waiting
    assert_eq!(names(&b_imports[0]), vec![b"x".to_vec()]);
}

#[test]
fn test_release_reaches_exporter() {
    let drops = Rc::new(Cell::new(0));
    let (event_loop, imports) = serve(vec![Rc::new(Counted(drops.clone()))], 1);
    let clone = imports[0].clone();
    drop(imports);
    assert_eq!(drops.get(), 0);

    drop(clone);
    event_loop.run().unwrap();
    assert_eq!(drops.get(), 1);
    assert_eq!(event_loop.connection_count(), 0);
}

#[test]
fn test_one_way_invoke() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (event_loop, imports) = serve(vec![Rc::new(Recorder(seen.clone()))], 1);
    let method = tag(b"Ping");
    imports[0].invoke(CapMessage::request(method, &Arg::empty(), Vec::new(), Vec::new()));
    event_loop.run_until(|| !seen.borrow().is_empty()).unwrap();
    assert_eq!(*seen.borrow(), vec![method]);
}

#[test]
fn test_connection_maker() {
    let event_loop = EventLoop::new();
    let maker = ConnMaker::new(&event_loop);
    let mut dir = FabDir::new();
    dir.insert(b"made", Rc::new(FabDir::new()));

    let (sock, _) = make_connection(&maker, vec![Rc::new(dir)], 0).unwrap();
    let (_, imports) = event_loop.connect(sock, Vec::new(), 1).unwrap();
    assert_eq!(names(&imports[0]), vec![b"made".to_vec()]);
}
