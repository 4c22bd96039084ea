//! # Run Configuration
//!
//! Settings come from the command line and, optionally, a JSON config file.
//! Command-line settings win; config-file grants are applied first.

use fs_view::{GrantFlags, DEFAULT_SYMLINK_LIMIT};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Paths granted read-only by `-B`
pub const DEFAULT_GRANTS: &[&str] = &[
    "/usr",
    "/bin",
    "/lib",
    "/lib64",
    "/etc",
    "/dev/null",
    "/dev/urandom",
    "/dev/tty",
];

/// Log filter used when none is given
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Environment variable holding the log filter
pub const ENV_LOG: &str = "CAPSULE_LOG";

/// Config error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid grant flags: {0:?}")]
    Flags(String),
}

/// One host path made visible to the program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Host path, resolved against the host working directory when relative
    pub path: String,
    /// Where the object appears in the namespace (`None`: at `path`)
    pub dest: Option<String>,
    pub flags: GrantFlags,
}

impl Grant {
    pub fn new(path: impl Into<String>, flags: GrantFlags) -> Self {
        Self {
            path: path.into(),
            dest: None,
            flags,
        }
    }

    pub fn at(dest: impl Into<String>, path: impl Into<String>, flags: GrantFlags) -> Self {
        Self {
            path: path.into(),
            dest: Some(dest.into()),
            flags,
        }
    }

    /// The path under which the program sees the grant
    pub fn visible_path(&self) -> &str {
        self.dest.as_deref().unwrap_or(&self.path)
    }
}

/// Working directory of the program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CwdChoice {
    /// Same path as the launcher's, if the namespace has it
    Copy,
    Path(String),
    /// No working directory; relative paths fail
    Unset,
}

/// Host runtime configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Grants in the order given
    pub grants: Vec<Grant>,
    /// Add [`DEFAULT_GRANTS`] before everything else
    pub default_grants: bool,
    /// `None` until set; behaves as [`CwdChoice::Copy`]
    pub cwd: Option<CwdChoice>,
    /// Program to run, looked up in the namespace
    pub program: Option<String>,
    /// Arguments after the program name
    pub args: Vec<String>,
    /// Print the stat of this path in the namespace instead of running
    pub inspect: Option<String>,
    /// Log filter (`tracing-subscriber` directive syntax)
    pub log: Option<String>,
    pub config_file: Option<PathBuf>,
    pub symlink_limit: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grants: Vec::new(),
            default_grants: false,
            cwd: None,
            program: None,
            args: Vec::new(),
            inspect: None,
            log: None,
            config_file: None,
            symlink_limit: DEFAULT_SYMLINK_LIMIT,
        }
    }
}

impl RunConfig {
    pub fn cwd(&self) -> &CwdChoice {
        self.cwd.as_ref().unwrap_or(&CwdChoice::Copy)
    }

    /// Every grant to apply, defaults first
    pub fn all_grants(&self) -> Vec<Grant> {
        let defaults = DEFAULT_GRANTS
            .iter()
            .filter(|_| self.default_grants)
            .map(|path| Grant::new(*path, GrantFlags::default()));
        defaults.chain(self.grants.iter().cloned()).collect()
    }

    /// Merges a config file into settings taken from the command line
    pub fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        let mut grants = Vec::with_capacity(file.grants.len() + self.grants.len());
        let mut args = Vec::new();
        for grant in file.grants {
            let flags = GrantFlags::parse(&grant.flags)
                .map_err(|_| ConfigError::Flags(grant.flags.clone()))?;
            let grant = Grant {
                path: grant.path,
                dest: grant.dest,
                flags,
            };
            if flags.add_arg {
                args.push(grant.visible_path().to_string());
            }
            grants.push(grant);
        }
        grants.append(&mut self.grants);
        self.grants = grants;
        args.append(&mut self.args);
        self.args = args;

        if self.cwd.is_none() {
            self.cwd = file.cwd.map(CwdChoice::Path);
        }
        if self.log.is_none() {
            self.log = file.log;
        }
        if let Some(limit) = file.symlink_limit {
            self.symlink_limit = limit;
        }
        self.default_grants |= file.default_grants;
        Ok(())
    }
}

/// Contents of a `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub grants: Vec<FileGrant>,
    pub cwd: Option<String>,
    pub symlink_limit: Option<u32>,
    pub log: Option<String>,
    pub default_grants: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileGrant {
    pub path: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub dest: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
