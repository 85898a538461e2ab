// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process launcher: fork, credential and filesystem context setup, exec.
//!
//! All allocation and user-database lookups happen in the parent before the
//! fork; the child touches nothing but prepared buffers and raw syscalls
//! until `execve`. A child-side failure exits with [`EXEC_FAILED_STATUS`],
//! which the reaper can tell apart from the job's own exit codes.

// fork(2) and the signal-disposition reset have no safe wrapper; everything
// between fork and exec is confined to this module.
#![allow(unsafe_code)]

use jobd_core::{ControlError, Job, Manifest, SyscallKind};
use nix::fcntl::{self, OFlag};
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::stat::{self, Mode};
use nix::unistd::{self, ForkResult, Gid, Group, Uid, User};
use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Exit status of a child that failed before or during exec.
pub const EXEC_FAILED_STATUS: i32 = 124;

/// Launcher errors, all parent-side. Child-side failures surface as an
/// [`EXEC_FAILED_STATUS`] exit seen by the reaper.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("manifest defines no program")]
    NoProgram,

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("argument contains NUL byte: {0}")]
    BadString(String),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("user database lookup failed: {0}")]
    Lookup(nix::Error),

    #[error("fork(2) failed: {0}")]
    Fork(nix::Error),
}

impl From<LaunchError> for ControlError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::Fork(err) => {
                ControlError::Syscall { kind: SyscallKind::Fork, message: err.to_string() }
            }
            LaunchError::Lookup(err) => {
                ControlError::Syscall { kind: SyscallKind::UserLookup, message: err.to_string() }
            }
            other => ControlError::InvalidManifest(other.to_string()),
        }
    }
}

/// Credentials applied in the child, resolved at start time in the parent.
struct Credentials {
    uid: Uid,
    gid: Gid,
    user: CString,
    init_groups: bool,
}

/// Everything the child needs, prepared before the fork.
struct LaunchSpec {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    workdir: PathBuf,
    chroot_dir: Option<PathBuf>,
    creds: Option<Credentials>,
    umask: Mode,
    nice: i32,
    stdin_path: PathBuf,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
}

/// Target-user context for environment construction.
pub(crate) struct UserContext {
    pub user_name: String,
    pub home: String,
    pub shell: String,
    pub target_is_root: bool,
}

/// Launch a job's process. Returns the child pid.
///
/// The caller checks the state precondition and records the pid; job state is
/// left untouched here, so a fork failure changes nothing.
pub fn launch(job: &Job) -> Result<i32, LaunchError> {
    let spec = prepare(job)?;
    // Single-threaded daemon: the child execs immediately, touching only the
    // prepared spec between fork and exec.
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child.as_raw()),
        Ok(ForkResult::Child) => exec_child(&spec),
        Err(e) => Err(LaunchError::Fork(e)),
    }
}

fn cstring(s: &str) -> Result<CString, LaunchError> {
    CString::new(s).map_err(|_| LaunchError::BadString(s.to_string()))
}

fn prepare(job: &Job) -> Result<LaunchSpec, LaunchError> {
    let manifest = &job.manifest;

    let argv_strings = manifest.exec_argv();
    if argv_strings.is_empty() {
        return Err(LaunchError::NoProgram);
    }
    let argv = argv_strings.iter().map(|s| cstring(s)).collect::<Result<Vec<_>, _>>()?;
    let program = argv[0].clone();

    let (creds, ctx) = resolve_user(manifest)?;

    let envp = build_environment(manifest, &ctx)
        .iter()
        .map(|s| cstring(s))
        .collect::<Result<Vec<_>, _>>()?;

    let umask_bits = manifest.umask_mode().map_err(|e| LaunchError::Manifest(e.to_string()))?;

    let chroot_dir = if Uid::effective().is_root() && manifest.root_directory != "/" {
        Some(PathBuf::from(&manifest.root_directory))
    } else {
        None
    };

    Ok(LaunchSpec {
        program,
        argv,
        envp,
        workdir: PathBuf::from(&manifest.working_directory),
        chroot_dir,
        creds,
        umask: Mode::from_bits_truncate(umask_bits),
        nice: manifest.nice,
        stdin_path: PathBuf::from(&manifest.stdin_path),
        stdout_path: PathBuf::from(&manifest.stdout_path),
        stderr_path: PathBuf::from(&manifest.stderr_path),
    })
}

/// Resolve manifest credentials against the user database.
///
/// Only a root daemon switches identity; an unprivileged daemon runs every
/// job as itself and only needs the context for environment defaults.
fn resolve_user(manifest: &Manifest) -> Result<(Option<Credentials>, UserContext), LaunchError> {
    let euid = Uid::effective();

    if !euid.is_root() {
        let user = User::from_uid(euid).ok().flatten();
        let ctx = UserContext {
            user_name: user
                .as_ref()
                .map(|u| u.name.clone())
                .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "nobody".into())),
            home: user
                .as_ref()
                .map(|u| u.dir.display().to_string())
                .unwrap_or_else(|| std::env::var("HOME").unwrap_or_else(|_| "/".into())),
            shell: user
                .as_ref()
                .map(|u| u.shell.display().to_string())
                .unwrap_or_else(|| "/bin/sh".into()),
            target_is_root: false,
        };
        return Ok((None, ctx));
    }

    let user = match &manifest.user_name {
        Some(name) => User::from_name(name)
            .map_err(LaunchError::Lookup)?
            .ok_or_else(|| LaunchError::UnknownUser(name.clone()))?,
        None => User::from_uid(euid)
            .map_err(LaunchError::Lookup)?
            .ok_or_else(|| LaunchError::UnknownUser("root".into()))?,
    };
    let gid = match &manifest.group_name {
        Some(name) => {
            Group::from_name(name)
                .map_err(LaunchError::Lookup)?
                .ok_or_else(|| LaunchError::UnknownGroup(name.clone()))?
                .gid
        }
        None => user.gid,
    };

    let ctx = UserContext {
        user_name: user.name.clone(),
        home: user.dir.display().to_string(),
        shell: user.shell.display().to_string(),
        target_is_root: user.uid.is_root(),
    };
    let creds = Credentials {
        uid: user.uid,
        gid,
        user: cstring(&user.name)?,
        init_groups: manifest.init_groups,
    };
    Ok((Some(creds), ctx))
}

/// Variables whose values pass through from the daemon's own environment.
const PASSTHROUGH_KEYS: &[&str] = &[
    "DISPLAY",
    "LC_ALL",
    "LC_COLLATE",
    "LC_CTYPE",
    "LC_MESSAGES",
    "LC_MONETARY",
    "LC_NUMERIC",
    "LC_TIME",
    "NLSPATH",
    "LANG",
    "TZ",
];

fn upsert(env: &mut Vec<(String, String)>, key: &str, value: String) {
    match env.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => env.push((key.to_string(), value)),
    }
}

/// Build the child environment following the crontab(5) convention:
/// LOGNAME and USER always name the target user; HOME, PATH, SHELL, and
/// TMPDIR get defaults the manifest may override. Per-session defaults are
/// omitted for a root target.
pub(crate) fn build_environment(manifest: &Manifest, ctx: &UserContext) -> Vec<String> {
    let mut env: Vec<(String, String)> = Vec::new();

    upsert(&mut env, "LOGNAME", ctx.user_name.clone());
    upsert(&mut env, "USER", ctx.user_name.clone());
    if !ctx.target_is_root {
        upsert(&mut env, "HOME", ctx.home.clone());
        upsert(&mut env, "SHELL", ctx.shell.clone());
        upsert(&mut env, "TMPDIR", "/tmp".to_string());
    }
    upsert(&mut env, "PATH", "/usr/bin:/bin:/usr/local/bin".to_string());
    upsert(&mut env, "PWD", manifest.working_directory.clone());

    for key in PASSTHROUGH_KEYS {
        if let Ok(value) = std::env::var(key) {
            upsert(&mut env, key, value);
        }
    }

    for entry in &manifest.environment {
        if let Some((key, value)) = entry.split_once('=') {
            upsert(&mut env, key, value.to_string());
        }
    }

    env.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Child side. Never returns; any failure exits with [`EXEC_FAILED_STATUS`].
fn exec_child(spec: &LaunchSpec) -> ! {
    let _ = child_setup(spec);
    // No logging here: the parent's tracing machinery is off-limits after
    // fork. The sentinel status is the error report.
    unsafe { nix::libc::_exit(EXEC_FAILED_STATUS) }
}

/// Child setup in a fixed order: session, signals, priority, filesystem
/// context, credentials, umask, stdio, exec. Each step is fatal to the
/// child on failure.
fn child_setup(spec: &LaunchSpec) -> nix::Result<Infallible> {
    unistd::setsid()?;

    let all = SigSet::all();
    signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&all), None)?;
    for sig in Signal::iterator() {
        if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        unsafe {
            let _ = signal::signal(sig, SigHandler::SigDfl);
        }
    }

    if spec.nice != 0 {
        let rc = unsafe { nix::libc::setpriority(nix::libc::PRIO_PROCESS as _, 0, spec.nice) };
        if rc != 0 {
            return Err(nix::errno::Errno::last());
        }
    }

    unistd::chdir(&spec.workdir)?;
    if let Some(root) = &spec.chroot_dir {
        unistd::chroot(root)?;
    }
    if let Some(creds) = &spec.creds {
        if creds.init_groups {
            unistd::initgroups(&creds.user, creds.gid)?;
        }
        unistd::setgid(creds.gid)?;
        unistd::setuid(creds.uid)?;
    }

    stat::umask(spec.umask);

    redirect(&spec.stdin_path, nix::libc::STDIN_FILENO, OFlag::O_RDONLY)?;
    redirect(&spec.stdout_path, nix::libc::STDOUT_FILENO, OFlag::O_WRONLY | OFlag::O_CREAT)?;
    redirect(&spec.stderr_path, nix::libc::STDERR_FILENO, OFlag::O_WRONLY | OFlag::O_CREAT)?;

    unistd::execve(&spec.program, &spec.argv, &spec.envp)
}

fn redirect(path: &Path, target: RawFd, flags: OFlag) -> nix::Result<()> {
    let fd = fcntl::open(path, flags, Mode::from_bits_truncate(0o600))?;
    unistd::dup2(fd, target)?;
    unistd::close(fd)?;
    Ok(())
}

#[cfg(test)]
#[path = "launch_tests.rs"]
mod tests;
