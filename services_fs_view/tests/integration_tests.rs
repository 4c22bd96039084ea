//! Integration tests for the filesystem operation service
//!
//! Requests go through the `FsOpClient` stub, so every test exercises the
//! wire encoding as well as the server.

use core_types::{Errno, ObjectKind};
use fs_view::{
    populate, AsFsObj, Cap, FsObj, GrantFlags, NsLeaf, NsNode, NsNodeObj, RealDir,
    DEFAULT_SYMLINK_LIMIT,
};
use remote_ipc::{socketpair, EventLoop};
use services_fs_view::{maker, FsOpClient, FsOpServer, FsOperations, LogSink, ObjMaker};
use std::fs;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

fn write_file(path: &Path, contents: &[u8], mode: u32) {
    fs::File::create(path).unwrap().write_all(contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

/// A host tree:
///
/// ```text
/// etc/hosts, etc/shadow
/// out/
/// data/c/extra
/// bin/interp, bin/script, bin/nested, bin/plain
/// ```
fn host() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("etc")).unwrap();
    fs::create_dir_all(root.join("out")).unwrap();
    fs::create_dir_all(root.join("data/c")).unwrap();
    fs::create_dir_all(root.join("bin")).unwrap();
    write_file(&root.join("etc/hosts"), b"127.0.0.1 localhost\n", 0o644);
    write_file(&root.join("etc/shadow"), b"secret\n", 0o600);
    write_file(&root.join("data/c/extra"), b"extra\n", 0o644);
    write_file(&root.join("bin/interp"), b"\x7fELF\x02\x01\x01", 0o755);
    write_file(&root.join("bin/script"), b"#!/bin/interp -x\necho hi\n", 0o755);
    write_file(&root.join("bin/nested"), b"#!/bin/script\n", 0o755);
    write_file(&root.join("bin/plain"), b"#!/bin/interp\n", 0o644);
    tmp
}

fn real_root(tmp: &TempDir) -> Cap {
    Rc::new(RealDir::open_root(tmp.path()).unwrap())
}

fn client_for(root: Cap, log: Rc<LogSink>) -> FsOpClient {
    FsOpClient::new(Rc::new(FsOpServer::new(root, None, log)))
}

fn client(root: Cap) -> FsOpClient {
    client_for(root, LogSink::new(false))
}

/// Builds a namespace by granting `grants` out of the host root
fn namespace(host_root: &Cap, grants: &[(&str, &str)]) -> Cap {
    let mut ns = NsNode::new();
    for (path, flags) in grants {
        let flags = GrantFlags::parse(flags).unwrap();
        populate(&mut ns, host_root, None, path.as_bytes(), flags, DEFAULT_SYMLINK_LIMIT).unwrap();
    }
    ns.compile().unwrap()
}

fn names(client: &FsOpClient, path: &[u8]) -> Vec<Vec<u8>> {
    client
        .dir_list(path)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

#[test]
fn test_read_only_grant_hides_siblings() {
    let tmp = host();
    let root = namespace(&real_root(&tmp), &[("/etc/hosts", "")]);
    let client = client(root);

    let stat = client.stat(b"/etc/hosts").unwrap();
    assert_eq!(stat.kind(), ObjectKind::File);
    assert_eq!(stat.mode & 0o222, 0);
    assert_eq!(client.stat(b"/etc/shadow").err(), Some(Errno::NoEnt));
    assert_eq!(names(&client, b"/etc"), vec![b"hosts".to_vec()]);

    let mut contents = String::new();
    fs::File::from(client.open(b"/etc/hosts", libc::O_RDONLY, 0).unwrap())
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "127.0.0.1 localhost\n");

    assert_eq!(
        client.open(b"/etc/hosts", libc::O_WRONLY, 0).err(),
        Some(Errno::Access)
    );
    assert_eq!(client.access(b"/etc/hosts", libc::W_OK).err(), Some(Errno::Access));
    assert!(client.access(b"/etc/hosts", libc::R_OK).is_ok());
    assert_eq!(client.mkdir(b"/etc/new", 0o755).err(), Some(Errno::Access));
}

#[test]
fn test_opened_directory_gives_no_host_access() {
    let tmp = host();
    let root = namespace(&real_root(&tmp), &[("/etc", ""), ("/out", "w")]);
    let client = client(root);

    for dir in [&b"/etc"[..], b"/out", b"/"] {
        let fd = client.open(dir, libc::O_RDONLY, 0).unwrap();
        for name in [c"../data/escaped", c"hosts", c"created"] {
            let ret = unsafe {
                libc::openat(
                    fd.as_raw_fd(),
                    name.as_ptr(),
                    libc::O_WRONLY | libc::O_CREAT | libc::O_CLOEXEC,
                    0o644,
                )
            };
            assert_eq!(ret, -1);
        }
        let meta = fs::File::from(fd).metadata().unwrap();
        assert!(!meta.is_dir());
    }
    assert!(!tmp.path().join("data/escaped").exists());
    assert!(!tmp.path().join("out/created").exists());

    assert_eq!(client.open(b"/out", libc::O_RDWR, 0).err(), Some(Errno::IsDir));
    assert_eq!(names(&client, b"/out"), Vec::<Vec<u8>>::new());
}

#[test]
fn test_slot_grant_allows_exactly_one_name() {
    let tmp = host();
    let root = namespace(&real_root(&tmp), &[("/out/result.txt", "s")]);
    let client = client(root);

    assert_eq!(client.stat(b"/out/result.txt").err(), Some(Errno::NoEnt));
    let flags = libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY;
    let mut file = fs::File::from(client.open(b"/out/result.txt", flags, 0o644).unwrap());
    file.write_all(b"done\n").unwrap();
    drop(file);

    assert_eq!(
        fs::read_to_string(tmp.path().join("out/result.txt")).unwrap(),
        "done\n"
    );
    assert_eq!(
        client.open(b"/out/result.txt", flags, 0o644).err(),
        Some(Errno::Exist)
    );
    assert!(client.open(b"/out/other.txt", flags, 0o644).is_err());
    assert!(!tmp.path().join("out/other.txt").exists());
}

#[test]
fn test_symlink_into_directory_grant() {
    let tmp = host();
    let host_root = real_root(&tmp);
    let data = host_root.traverse(b"data").unwrap();
    let mut ns = NsNode::new();
    ns.attach(
        b"/b",
        NsLeaf::Obj {
            cap: data,
            writable: false,
        },
    )
    .unwrap();
    ns.attach(b"/a", NsLeaf::Symlink(b"/b/c".to_vec())).unwrap();
    let client = client(ns.compile().unwrap());

    assert_eq!(client.readlink(b"/a").unwrap(), b"/b/c".to_vec());
    assert_eq!(client.stat(b"/a/extra").unwrap().kind(), ObjectKind::File);
    assert_eq!(client.lstat(b"/a").unwrap().kind(), ObjectKind::Symlink);
    let (_, path) = client.resolve_dir(b"/a").unwrap();
    assert_eq!(path, b"/b/c".to_vec());
}

#[test]
fn test_link_grant_records_symlinks() {
    let tmp = host();
    symlink("data/c", tmp.path().join("shortcut")).unwrap();
    let root = namespace(&real_root(&tmp), &[("/shortcut", "l")]);
    let client = client(root);

    assert_eq!(client.readlink(b"/shortcut").unwrap(), b"data/c".to_vec());
    assert_eq!(client.stat(b"/shortcut/extra").unwrap().kind(), ObjectKind::File);
    assert_eq!(client.stat(b"/data/c/extra").unwrap().kind(), ObjectKind::File);
    assert_eq!(client.stat(b"/etc").err(), Some(Errno::NoEnt));
}

#[test]
fn test_mutations_on_writable_root() {
    let tmp = host();
    let client = client(real_root(&tmp));

    client.mkdir(b"/work", 0o755).unwrap();
    assert_eq!(client.mkdir(b"/work", 0o755).err(), Some(Errno::Exist));
    client.chdir(b"/work").unwrap();
    client
        .open(b"notes", libc::O_CREAT | libc::O_WRONLY, 0o644)
        .unwrap();
    client.symlink(b"notes", b"alias").unwrap();
    assert_eq!(client.readlink(b"alias").unwrap(), b"notes".to_vec());
    assert_eq!(client.readlink(b"notes").err(), Some(Errno::Inval));

    client.rename(b"notes", b"/work/renamed").unwrap();
    client.link(b"renamed", b"hard").unwrap();
    assert_eq!(client.stat(b"alias").err(), Some(Errno::NoEnt));
    assert_eq!(client.stat(b"hard").unwrap().ino, client.stat(b"renamed").unwrap().ino);

    client.chmod(b"renamed", 0o600).unwrap();
    assert_eq!(client.stat(b"renamed").unwrap().mode & 0o777, 0o600);

    client.unlink(b"alias").unwrap();
    client.unlink(b"hard").unwrap();
    client.unlink(b"renamed").unwrap();
    client.chdir(b"..").unwrap();
    client.rmdir(b"work").unwrap();
    assert!(!tmp.path().join("work").exists());
}

#[test]
fn test_nofollow_open_of_symlink() {
    let tmp = host();
    symlink("etc/hosts", tmp.path().join("hosts")).unwrap();
    let client = client(real_root(&tmp));

    assert!(client.open(b"/hosts", libc::O_RDONLY, 0).is_ok());
    assert_eq!(
        client
            .open(b"/hosts", libc::O_RDONLY | libc::O_NOFOLLOW, 0)
            .err(),
        Some(Errno::Loop)
    );
}

#[test]
fn test_relative_paths_need_a_cwd() {
    let tmp = host();
    let client = client(real_root(&tmp));

    assert_eq!(client.getcwd().err(), Some(Errno::NoEnt));
    assert_eq!(client.stat(b"etc/hosts").err(), Some(Errno::NoEnt));
    client.chdir(b"/etc").unwrap();
    assert_eq!(client.getcwd().unwrap(), b"/etc".to_vec());
    assert!(client.stat(b"hosts").is_ok());
    assert_eq!(client.chdir(b"/etc/hosts").err(), Some(Errno::NotDir));
}

#[test]
fn test_fork_has_independent_cwd_and_shared_log() {
    let tmp = host();
    let log = LogSink::new(false);
    let parent = client_for(real_root(&tmp), log.clone());
    parent.chdir(b"/etc").unwrap();

    let child = FsOpClient::new(parent.fork().unwrap());
    assert_eq!(child.getcwd().unwrap(), b"/etc".to_vec());
    child.chdir(b"/bin").unwrap();
    assert_eq!(parent.getcwd().unwrap(), b"/etc".to_vec());
    assert_eq!(child.getcwd().unwrap(), b"/bin".to_vec());

    let before = log.requests();
    child.stat(b"interp").unwrap();
    parent.stat(b"hosts").unwrap();
    assert_eq!(log.requests(), before + 2);

    parent.set_logging(true).unwrap();
    assert!(log.is_enabled());
}

#[test]
fn test_exec_substitutes_interpreter() {
    let tmp = host();
    let client = client(real_root(&tmp));

    let target = client
        .exec(b"/bin/script", vec![b"script".to_vec(), b"one".to_vec()])
        .unwrap();
    assert_eq!(
        target.argv,
        vec![
            b"/bin/interp".to_vec(),
            b"-x".to_vec(),
            b"/bin/script".to_vec(),
            b"one".to_vec()
        ]
    );
    let mut head = Vec::new();
    fs::File::from(target.fd).read_to_end(&mut head).unwrap();
    assert!(head.starts_with(b"\x7fELF"));
    assert_eq!(target.cwd, None);
}

#[test]
fn test_exec_binary_keeps_argv() {
    let tmp = host();
    let client = client(real_root(&tmp));
    client.chdir(b"/bin").unwrap();

    let target = client.exec(b"interp", vec![b"interp".to_vec()]).unwrap();
    assert_eq!(target.argv, vec![b"interp".to_vec()]);
    assert_eq!(target.cwd, Some(b"/bin".to_vec()));
}

#[test]
fn test_exec_failures() {
    let tmp = host();
    let client = client(real_root(&tmp));

    assert_eq!(client.exec(b"/bin/plain", Vec::new()).err(), Some(Errno::Access));
    assert_eq!(client.exec(b"/bin", Vec::new()).err(), Some(Errno::Access));
    assert_eq!(client.exec(b"/bin/nested", Vec::new()).err(), Some(Errno::NoExec));
    assert_eq!(client.exec(b"/bin/missing", Vec::new()).err(), Some(Errno::NoEnt));
}

#[test]
fn test_resolve_populate_builds_a_namespace() {
    let tmp = host();
    let client = client(real_root(&tmp));
    let node = NsNodeObj::new_cap();

    client
        .resolve_populate(node.clone(), b"/etc/hosts", GrantFlags::default())
        .unwrap();
    client
        .resolve_populate(node.clone(), b"/out", GrantFlags::parse("w").unwrap())
        .unwrap();
    let compiled = node
        .as_any()
        .downcast_ref::<NsNodeObj>()
        .unwrap()
        .compile()
        .unwrap();

    let sandboxed = FsOpClient::new(Rc::new(FsOpServer::new(compiled, None, LogSink::new(false))));
    assert!(sandboxed.stat(b"/etc/hosts").is_ok());
    assert_eq!(sandboxed.stat(b"/etc/shadow").err(), Some(Errno::NoEnt));
    sandboxed.mkdir(b"/out/sub", 0o755).unwrap();
    assert!(tmp.path().join("out/sub").is_dir());

    let not_a_node: Cap = Rc::new(fs_view::FabDir::new());
    assert_eq!(
        client
            .resolve_populate(not_a_node, b"/etc", GrantFlags::default())
            .err(),
        Some(Errno::Inval)
    );
}

#[test]
fn test_cow_through_maker() {
    let lower = host();
    let upper = TempDir::new().unwrap();
    let obj_maker = ObjMaker::new(LogSink::new(false), DEFAULT_SYMLINK_LIMIT);
    let cow = maker::client::make_cow(
        &obj_maker,
        Rc::new(RealDir::open_root(upper.path()).unwrap()),
        real_root(&lower),
    )
    .unwrap();
    let server = maker::client::make_fs_op(&obj_maker, cow, Some(b"/etc")).unwrap();
    let client = FsOpClient::new(server);

    assert!(client.stat(b"hosts").is_ok());
    client
        .open(b"/etc/new.conf", libc::O_CREAT | libc::O_WRONLY, 0o644)
        .unwrap();
    assert!(upper.path().join("etc/new.conf").exists());
    assert!(!lower.path().join("etc/new.conf").exists());
    assert_eq!(client.unlink(b"/etc/hosts").err(), Some(Errno::Perm));
}

#[test]
fn test_log_stream() {
    let tmp = host();
    let client = client(real_root(&tmp));
    let stream = client.log_stream().unwrap();
    assert_eq!(stream.type_name(), "log_stream");
    assert!(services_fs_view::log::write_line(&*stream, b"client says hi\n").is_ok());
}

#[test]
fn test_server_over_connection() {
    let tmp = host();
    let server: Cap = Rc::new(FsOpServer::new(real_root(&tmp), None, LogSink::new(false)));
    let event_loop = EventLoop::new();
    let (near, far) = socketpair().unwrap();
    event_loop.connect(near, vec![server], 0).unwrap();
    let (_, mut imports) = event_loop.connect(far, Vec::new(), 1).unwrap();
    let client = FsOpClient::new(imports.remove(0));

    assert_eq!(client.stat(b"/etc/hosts").unwrap().kind(), ObjectKind::File);
    let mut contents = String::new();
    fs::File::from(client.open(b"/data/c/extra", libc::O_RDONLY, 0).unwrap())
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "extra\n");
    assert_eq!(client.stat(b"/missing").err(), Some(Errno::NoEnt));

    let child = FsOpClient::new(client.fork().unwrap());
    child.chdir(b"/etc").unwrap();
    assert_eq!(child.getcwd().unwrap(), b"/etc".to_vec());
    assert_eq!(client.getcwd().err(), Some(Errno::NoEnt));
}
