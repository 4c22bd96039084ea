//! Integration tests for namespace building and program startup

use core_types::{Errno, ObjectKind};
use fs_view::{Cap, GrantFlags, RealDir};
use sandbox_run::{CwdChoice, Grant, RunConfig, RunError, Sandbox};
use services_fs_view::FsOperations;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

fn host() -> (TempDir, Cap) {
    let tmp = TempDir::new().unwrap();
    let p = tmp.path();
    fs::create_dir_all(p.join("etc")).unwrap();
    fs::write(p.join("etc/hosts"), b"127.0.0.1 localhost\n").unwrap();
    fs::write(p.join("etc/shadow"), b"secret\n").unwrap();
    fs::create_dir_all(p.join("data/c")).unwrap();
    fs::create_dir_all(p.join("bin")).unwrap();
    fs::write(p.join("bin/tool"), b"\x7fELF\x02\x01\x01").unwrap();
    fs::set_permissions(p.join("bin/tool"), fs::Permissions::from_mode(0o755)).unwrap();
    let root: Cap = Rc::new(RealDir::open_root(p).unwrap());
    (tmp, root)
}

fn flags(letters: &str) -> GrantFlags {
    GrantFlags::parse(letters).unwrap()
}

fn run_config(grants: Vec<Grant>, cwd: CwdChoice) -> RunConfig {
    RunConfig {
        grants,
        cwd: Some(cwd),
        ..RunConfig::default()
    }
}

#[test]
fn test_failed_grants_are_skipped() {
    let (_tmp, root) = host();
    let config = run_config(
        vec![
            Grant::new("/etc/hosts", flags("")),
            Grant::new("/nope", flags("")),
            Grant::at("/cfg", "/etc", flags("")),
            Grant::new("/data", flags("w")),
        ],
        CwdChoice::Unset,
    );
    let sandbox = Sandbox::build(&config, root, None).unwrap();

    assert_eq!(sandbox.inspect("/etc/hosts").unwrap().kind(), ObjectKind::File);
    assert_eq!(sandbox.inspect("/cfg/shadow").unwrap().kind(), ObjectKind::File);
    assert_eq!(sandbox.inspect("/data").unwrap().kind(), ObjectKind::Dir);
    for missing in ["/etc/shadow", "/nope"] {
        match sandbox.inspect(missing) {
            Err(RunError::Inspect { path, errno }) => {
                assert_eq!(path, missing);
                assert_eq!(errno, Errno::NoEnt);
            }
            other => panic!("unexpected result for {}: {:?}", missing, other.map(|s| s.ino)),
        }
    }
}

#[test]
fn test_writable_grant_reaches_host() {
    let (tmp, root) = host();
    let config = run_config(
        vec![Grant::new("/data", flags("w"))],
        CwdChoice::Path("/data".to_string()),
    );
    let sandbox = Sandbox::build(&config, root, None).unwrap();
    let server = sandbox.server();

    assert_eq!(server.getcwd().unwrap(), b"/data".to_vec());
    server.mkdir(b"made", 0o755).unwrap();
    assert!(tmp.path().join("data/made").is_dir());
}

#[test]
fn test_cwd_must_exist_when_given() {
    let (_tmp, root) = host();
    let config = run_config(Vec::new(), CwdChoice::Path("/missing".to_string()));
    match Sandbox::build(&config, root, None) {
        Err(RunError::Cwd { path, errno }) => {
            assert_eq!(path, "/missing");
            assert_eq!(errno, Errno::NoEnt);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("expected an error"),
    }
}

#[test]
fn test_copied_cwd_and_relative_grants() {
    let (_tmp, root) = host();
    let config = run_config(vec![Grant::new("c", flags(""))], CwdChoice::Copy);
    let sandbox = Sandbox::build(&config, root.clone(), Some(Path::new("/data"))).unwrap();
    assert_eq!(sandbox.server().getcwd().unwrap(), b"/data".to_vec());
    assert_eq!(sandbox.inspect("c").unwrap().kind(), ObjectKind::Dir);

    // Not granted, so the program gets no working directory
    let config = run_config(vec![Grant::new("/etc", flags(""))], CwdChoice::Copy);
    let sandbox = Sandbox::build(&config, root, Some(Path::new("/data"))).unwrap();
    assert_eq!(sandbox.server().getcwd().err(), Some(Errno::NoEnt));
}

#[test]
fn test_exec_target() {
    let (_tmp, root) = host();
    let config = run_config(vec![Grant::new("/bin", flags(""))], CwdChoice::Unset);
    let sandbox = Sandbox::build(&config, root, None).unwrap();

    let target = sandbox
        .exec_target("/bin/tool", &["--flag".to_string()])
        .unwrap();
    assert_eq!(target.argv, vec![b"/bin/tool".to_vec(), b"--flag".to_vec()]);

    match sandbox.exec_target("no-such-program-here", &[]) {
        Err(RunError::Exec { program, errno }) => {
            assert_eq!(program, "no-such-program-here");
            assert_eq!(errno, Errno::NoEnt);
        }
        other => panic!("unexpected result: {:?}", other.map(|t| t.argv)),
    }
}

fn host_sandbox() -> Sandbox {
    let root: Cap = Rc::new(RealDir::open_root(Path::new("/")).unwrap());
    let config = RunConfig {
        default_grants: true,
        cwd: Some(CwdChoice::Unset),
        ..RunConfig::default()
    };
    Sandbox::build(&config, root, None).unwrap()
}

#[test]
fn test_run_reports_exit_code() {
    let sandbox = host_sandbox();
    let args = vec!["-c".to_string(), "exit 3".to_string()];
    assert_eq!(sandbox.run("/bin/sh", &args).unwrap(), 3);
}

#[test]
fn test_run_passes_connection() {
    let sandbox = host_sandbox();
    let script = concat!(
        r#"test -n "$CAPSULE_COMM_FD" && "#,
        r#"test -e "/proc/self/fd/$CAPSULE_COMM_FD" && "#,
        r#"test "$CAPSULE_CAPS" = "fs_op;conn_maker;fs_op_maker""#,
    );
    let args = vec!["-c".to_string(), script.to_string()];
    assert_eq!(sandbox.run("/bin/sh", &args).unwrap(), 0);
}
