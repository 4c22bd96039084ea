//! # Host Runtime
//!
//! Builds the namespace, starts the program inside it and serves its
//! requests until it disconnects.

use crate::config::{ConfigError, CwdChoice, Grant, RunConfig, DEFAULT_LOG_FILTER};
use core_types::{Errno, StatInfo};
use fs_view::{populate, populate_at, Cap, DirFrame, NsNode, RealDir, Resolver};
use remote_ipc::{
    socketpair, ConnError, ConnMaker, EventLoop, DEFAULT_CAP_NAMES, ENV_CAPS, ENV_COMM_FD,
};
use services_fs_view::{ExecTarget, FsOpServer, FsOperations, LogSink, ObjMaker};
use std::env;
use std::ffi::OsStr;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn, Level};

/// Search path for programs named without a `/`, when `PATH` is unset
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Host runtime error types
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot open host root: {0}")]
    HostRoot(Errno),

    #[error("Cannot build namespace: {0}")]
    Namespace(Errno),

    #[error("Working directory {path}: {errno}")]
    Cwd { path: String, errno: Errno },

    #[error("{path}: {errno}")]
    Inspect { path: String, errno: Errno },

    #[error("{program}: {errno}")]
    Exec { program: String, errno: Errno },

    #[error("No program given")]
    NoProgram,

    #[error("Failed to create socket pair: {0}")]
    Socket(Errno),

    #[error("Failed to start program: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to wait for program: {0}")]
    Wait(#[source] io::Error),

    #[error("Connection error: {0}")]
    Conn(#[from] ConnError),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Picks the log filter: command line, then `CAPSULE_LOG`, then the config
/// file, then [`DEFAULT_LOG_FILTER`]
pub fn log_filter(cli: Option<&str>, env: Option<&str>, file: Option<&str>) -> String {
    cli.or(env)
        .or(file)
        .filter(|filter| !filter.trim().is_empty())
        .unwrap_or(DEFAULT_LOG_FILTER)
        .to_string()
}

/// Applies one grant, leaving `ns` unchanged on failure
pub fn apply_grant(
    ns: &mut NsNode,
    host_root: &Cap,
    host_cwd: Option<&Rc<DirFrame>>,
    grant: &Grant,
    symlink_limit: u32,
) -> Result<(), Errno> {
    let path = grant.path.as_bytes();
    match &grant.dest {
        None => populate(ns, host_root, host_cwd, path, grant.flags, symlink_limit),
        Some(dest) => populate_at(
            ns,
            host_root,
            host_cwd,
            dest.as_bytes(),
            path,
            grant.flags,
            symlink_limit,
        ),
    }
}

/// A built namespace and the server for it
pub struct Sandbox {
    server: Rc<FsOpServer>,
    log: Rc<LogSink>,
    symlink_limit: u32,
}

impl Sandbox {
    /// Builds the namespace for `config` out of `host_root`
    ///
    /// A grant that fails is reported and skipped; the rest still apply.
    pub fn build(
        config: &RunConfig,
        host_root: Cap,
        host_cwd: Option<&Path>,
    ) -> Result<Self, RunError> {
        let limit = config.symlink_limit;
        let cwd_frame = host_cwd.and_then(|cwd| {
            Resolver::new(host_root.clone(), None)
                .with_symlink_limit(limit)
                .resolve_dir(cwd.as_os_str().as_bytes())
                .map_err(|errno| {
                    warn!(
                        cwd = %cwd.display(),
                        error = %errno,
                        "Host working directory unreachable"
                    )
                })
                .ok()
        });

        let mut ns = NsNode::new();
        for grant in config.all_grants() {
            match apply_grant(&mut ns, &host_root, cwd_frame.as_ref(), &grant, limit) {
                Ok(()) => debug!(path = %grant.path, dest = grant.visible_path(), "Granted"),
                Err(errno) => warn!(path = %grant.path, error = %errno, "Grant skipped"),
            }
        }
        let root = ns.compile().map_err(RunError::Namespace)?;

        let log = LogSink::new(tracing::enabled!(target: "services_fs_view::log", Level::INFO));
        let server = match config.cwd() {
            CwdChoice::Unset => FsOpServer::new(root, None, log.clone()),
            CwdChoice::Path(path) => {
                FsOpServer::with_cwd_path(root, path.as_bytes(), log.clone()).map_err(|errno| {
                    RunError::Cwd {
                        path: path.clone(),
                        errno,
                    }
                })?
            }
            CwdChoice::Copy => {
                let copied = host_cwd.map(|cwd| cwd.as_os_str().as_bytes()).and_then(|cwd| {
                    FsOpServer::with_cwd_path(root.clone(), cwd, log.clone())
                        .map_err(|errno| debug!(error = %errno, "Working directory not in sandbox"))
                        .ok()
                });
                copied.unwrap_or_else(|| FsOpServer::new(root, None, log.clone()))
            }
        };

        Ok(Self {
            server: Rc::new(server.with_symlink_limit(limit)),
            log,
            symlink_limit: limit,
        })
    }

    pub fn server(&self) -> &Rc<FsOpServer> {
        &self.server
    }

    /// What `path` is inside the sandbox
    pub fn inspect(&self, path: &str) -> Result<StatInfo, RunError> {
        self.server.stat(path.as_bytes()).map_err(|errno| RunError::Inspect {
            path: path.to_string(),
            errno,
        })
    }

    /// Finds the program in the sandbox, searching `PATH` for bare names
    pub fn exec_target(&self, program: &str, args: &[String]) -> Result<ExecTarget, RunError> {
        let mut argv = vec![program.as_bytes().to_vec()];
        argv.extend(args.iter().map(|arg| arg.as_bytes().to_vec()));
        let failed = |errno: Errno| RunError::Exec {
            program: program.to_string(),
            errno,
        };

        if program.contains('/') {
            return self.server.exec(program.as_bytes(), argv).map_err(failed);
        }

        let search = env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut last = Errno::NoEnt;
        for dir in search.split(':').filter(|dir| !dir.is_empty()) {
            let candidate = format!("{}/{}", dir.trim_end_matches('/'), program);
            match self.server.exec(candidate.as_bytes(), argv.clone()) {
                Ok(target) => return Ok(target),
                Err(Errno::NoEnt) | Err(Errno::NotDir) => {}
                Err(errno) => last = errno,
            }
        }
        Err(failed(last))
    }

    /// Starts the program and serves it until every connection closes
    ///
    /// Returns the program's exit code, or 128 plus the signal number.
    pub fn run(&self, program: &str, args: &[String]) -> Result<i32, RunError> {
        let target = self.exec_target(program, args)?;
        let event_loop = EventLoop::new();
        let (parent, child) = socketpair().map_err(RunError::Socket)?;

        // Order matches DEFAULT_CAP_NAMES
        let exports: Vec<Cap> = vec![
            self.server.clone() as Cap,
            Rc::new(ConnMaker::new(&event_loop)) as Cap,
            Rc::new(ObjMaker::new(self.log.clone(), self.symlink_limit)) as Cap,
        ];
        event_loop.connect(parent, exports, 0)?;

        let comm_fd = child.as_raw_fd();
        let mut command = Command::new(format!("/proc/self/fd/{}", target.fd.as_raw_fd()));
        if let Some(arg0) = target.argv.first() {
            command.arg0(OsStr::from_bytes(arg0));
        }
        command
            .args(target.argv.iter().skip(1).map(|arg| OsStr::from_bytes(arg)))
            .env(ENV_COMM_FD, comm_fd.to_string())
            .env(ENV_CAPS, DEFAULT_CAP_NAMES);
        // Safety: only async-signal-safe fcntl calls run between fork and exec
        unsafe {
            command.pre_exec(move || clear_cloexec(comm_fd));
        }
        let mut process = command.spawn().map_err(RunError::Spawn)?;
        drop(child);
        drop(target);
        info!(pid = process.id(), program, "Program started");

        let served = event_loop.run();
        let status = process.wait().map_err(RunError::Wait)?;
        served?;
        info!(program, %status, "Program finished");
        Ok(exit_code(status))
    }
}

fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Runs `config` against the host filesystem
pub fn run(config: &RunConfig) -> Result<i32, RunError> {
    let host_root: Cap = Rc::new(RealDir::open_root(Path::new("/")).map_err(RunError::HostRoot)?);
    let host_cwd = env::current_dir().ok();
    let sandbox = Sandbox::build(config, host_root, host_cwd.as_deref())?;

    if let Some(path) = &config.inspect {
        let stat = sandbox.inspect(path)?;
        println!("{}", serde_json::to_string_pretty(&stat)?);
        return Ok(0);
    }
    let program = config.program.as_deref().ok_or(RunError::NoProgram)?;
    sandbox.run(program, &config.args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_precedence() {
        assert_eq!(log_filter(Some("debug"), Some("info"), Some("trace")), "debug");
        assert_eq!(log_filter(None, Some("info"), Some("trace")), "info");
        assert_eq!(log_filter(None, None, Some("trace")), "trace");
        assert_eq!(log_filter(None, None, None), DEFAULT_LOG_FILTER);
        assert_eq!(log_filter(Some(" "), None, None), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 128 + libc::SIGKILL);
    }
}
