//! # Command-Line Arguments
//!
//! ```text
//! sandbox-run [OPTIONS] [--prog PROGRAM] [-a ARG]... [-e PROGRAM ARGS...]
//! ```
//!
//! - `-f[awls] PATH` grants a host path at the same path
//! - `-t[awls] DEST SRC` grants host path `SRC` at `DEST`
//!
//! Grant letters: `a` also passes the path as an argument, `w` grants
//! read-write, `l` records symlinks met on the way, `s` grants a name that
//! need not exist yet.

use crate::config::{CwdChoice, Grant, RunConfig};
use fs_view::GrantFlags;
use std::path::PathBuf;
use thiserror::Error;

/// Argument error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("Missing value for {0}")]
    MissingValue(String),

    #[error("Invalid grant flags in {0}")]
    BadFlags(String),

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("No program given")]
    MissingProgram,
}

/// What the command line asks for
#[derive(Debug)]
pub enum Invocation {
    Run(RunConfig),
    Help,
}

struct ArgCursor<'a> {
    args: &'a [String],
    pos: usize,
}

impl<'a> ArgCursor<'a> {
    fn next(&mut self) -> Option<&'a str> {
        let arg = self.args.get(self.pos)?;
        self.pos += 1;
        Some(arg)
    }

    fn value(&mut self, option: &str) -> Result<&'a str, ArgError> {
        self.next()
            .ok_or_else(|| ArgError::MissingValue(option.to_string()))
    }

    fn rest(&mut self) -> Vec<String> {
        let rest = self.args[self.pos..].to_vec();
        self.pos = self.args.len();
        rest
    }
}

fn grant_flags(option: &str) -> Result<GrantFlags, ArgError> {
    GrantFlags::parse(&option[2..]).map_err(|_| ArgError::BadFlags(option.to_string()))
}

fn add_grant(config: &mut RunConfig, grant: Grant) {
    if grant.flags.add_arg {
        config.args.push(grant.visible_path().to_string());
    }
    config.grants.push(grant);
}

/// Parses the arguments following the program name
pub fn parse_args(args: &[String]) -> Result<Invocation, ArgError> {
    let mut config = RunConfig::default();
    let mut cursor = ArgCursor { args, pos: 0 };

    while let Some(arg) = cursor.next() {
        match arg {
            "--help" | "-h" => return Ok(Invocation::Help),
            "-B" => config.default_grants = true,
            "--cwd" => config.cwd = Some(CwdChoice::Path(cursor.value(arg)?.to_string())),
            "--copy-cwd" => config.cwd = Some(CwdChoice::Copy),
            "--no-cwd" => config.cwd = Some(CwdChoice::Unset),
            "--prog" => config.program = Some(cursor.value(arg)?.to_string()),
            "-a" => config.args.push(cursor.value(arg)?.to_string()),
            "-e" => {
                config.program = Some(cursor.value(arg)?.to_string());
                config.args.extend(cursor.rest());
            }
            "--config" => config.config_file = Some(PathBuf::from(cursor.value(arg)?)),
            "--inspect" => config.inspect = Some(cursor.value(arg)?.to_string()),
            "--log" => config.log = Some(cursor.value(arg)?.to_string()),
            "--" => {
                if let Some(program) = cursor.next() {
                    config.program = Some(program.to_string());
                    config.args.extend(cursor.rest());
                }
            }
            _ if arg.starts_with("-f") => {
                let flags = grant_flags(arg)?;
                let path = cursor.value(arg)?;
                add_grant(&mut config, Grant::new(path, flags));
            }
            _ if arg.starts_with("-t") => {
                let flags = grant_flags(arg)?;
                let dest = cursor.value(arg)?;
                let src = cursor.value(arg)?;
                add_grant(&mut config, Grant::at(dest, src, flags));
            }
            _ if arg.starts_with('-') => return Err(ArgError::UnknownOption(arg.to_string())),
            program => {
                config.program = Some(program.to_string());
                config.args.extend(cursor.rest());
            }
        }
    }

    if config.program.is_none() && config.inspect.is_none() {
        return Err(ArgError::MissingProgram);
    }
    Ok(Invocation::Run(config))
}

pub fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [OPTIONS] [--prog PROGRAM] [-a ARG]... [-e PROGRAM ARGS...]

Options:
  -f[awls] PATH          Grant PATH (a: add as argument, w: writable,
                         l: record symlinks, s: name may not exist yet)
  -t[awls] DEST SRC      Grant host path SRC at DEST
  -B                     Grant the usual system directories read-only
  --cwd DIR              Working directory inside the sandbox
  --copy-cwd             Use the current directory (default)
  --no-cwd               Run without a working directory
  --prog PROGRAM         Program to run
  -a ARG                 Append an argument
  -e PROGRAM ARGS...     Program and all remaining arguments
  --config FILE          Read settings from a JSON file
  --inspect PATH         Print what PATH is in the sandbox and exit
  --log FILTER           Log filter (default: $CAPSULE_LOG or warn)
  -h, --help             Show this help message

Examples:
  {program} -B -fw . -e make
  {program} -fa /etc/hosts -e cat"
    )
}
