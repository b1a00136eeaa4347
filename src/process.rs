// src/process.rs
//
// Child Supervisor (`spec.md` §4.1). Generalizes the teacher's
// `SupervisedChild`/`SupervisedProcess` (`process_manager.rs`) —
// pgid-wide `SIGTERM` then `SIGKILL` escalation, `kill(pid, 0)`
// liveness probing, `WNOHANG` reaping — away from always-async,
// always-piped `tokio::process::Command` and into the synchronous,
// poll-driven state machine the spec requires, with a raw
// `fork`/`execve` sequence in `start()` giving the precise control
// over pgid/umask/chdir/redirection the teacher's wrapper doesn't need
// (it never had to support a configurable stdout/stderr file target).

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::sys::wait::WaitStatus;
use nix::unistd::{ForkResult, Pid};

use crate::clock::{elapsed_since, secs_to_ns, Clock};
use crate::error::{ProcessError, Result};
use crate::log;
use crate::logger::LogLevel;
use crate::marshal::CStringArray;
use crate::syscalls::Syscalls;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProcessState {
    None,
    Stopped,
    Starting,
    Running,
    Stopping,
    Exited,
    Killed,
    Backoff,
}

/// The spawn parameter contract of `spec.md` §6 (`ProcessParams`).
#[derive(Debug, Clone)]
pub struct SpawnParams {
    pub path: String,
    pub argv: Vec<String>,
    pub envp: Vec<String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub redirect_stdout: bool,
    pub redirect_stderr: bool,
    pub working_directory: Option<PathBuf>,
    pub umask: Option<u16>,
}

impl SpawnParams {
    pub fn new(path: impl Into<String>, argv: Vec<String>, envp: Vec<String>) -> Self {
        Self {
            path: path.into(),
            argv,
            envp,
            stdout_path: None,
            stderr_path: None,
            redirect_stdout: true,
            redirect_stderr: true,
            working_directory: None,
            umask: None,
        }
    }
}

/// One supervised child (`spec.md` §3.1). A plain value; holds no heap
/// references of its own beyond the transient exec-error pipe fd.
#[derive(Debug)]
pub struct Process {
    id: usize,
    pid: Option<Pid>,
    state: ProcessState,
    start_time_ns: u64,
    start_gate_ns: u64,
    successfully_started_ns: u64,
    stop_deadline_ns: u64,
    backoff_until_ns: u64,
    exit_code: Option<u8>,
    exit_signal: Option<u8>,
    failed_start: bool,
    sent_kill: bool,
    retries_count: u32,
    start_gate_s: u64,
    startsecs: u64,
    backoff_delay_s: u64,
    /// Read end of the exec-error pipe (`spec.md` §9's "strict
    /// improvement"); diagnostic only, never drives the state machine.
    exec_error_fd: Option<RawFd>,
    last_exec_errno: Option<i32>,
}

impl Process {
    pub fn new(id: usize, start_gate_s: u64, startsecs: u64, backoff_delay_s: u64) -> Self {
        Self {
            id,
            pid: None,
            state: ProcessState::Stopped,
            start_time_ns: 0,
            start_gate_ns: 0,
            successfully_started_ns: 0,
            stop_deadline_ns: 0,
            backoff_until_ns: 0,
            exit_code: None,
            exit_signal: None,
            failed_start: false,
            sent_kill: false,
            retries_count: 0,
            start_gate_s,
            startsecs,
            backoff_delay_s,
            exec_error_fd: None,
            last_exec_errno: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn retries_count(&self) -> u32 {
        self.retries_count
    }

    pub fn exit_code(&self) -> Option<u8> {
        self.exit_code
    }

    pub fn exit_signal(&self) -> Option<u8> {
        self.exit_signal
    }

    pub fn failed_start(&self) -> bool {
        self.failed_start
    }

    pub fn sent_kill(&self) -> bool {
        self.sent_kill
    }

    pub fn last_exec_errno(&self) -> Option<i32> {
        self.last_exec_errno
    }

    pub fn is_alive(&self) -> bool {
        matches!(
            self.state,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub fn has_exited(&self) -> bool {
        matches!(self.state, ProcessState::Exited | ProcessState::Killed)
    }

    pub fn is_backoff_expired(&self, clock: &dyn Clock) -> bool {
        self.state == ProcessState::Backoff && clock.now_ns() >= self.backoff_until_ns
    }

    /// Whether `startsecs` have elapsed since the `starting -> running`
    /// transition. Observational only (`spec.md` §9) — callers decide
    /// what, if anything, to do with a "stable" child.
    pub fn startsecs_elapsed(&self, clock: &dyn Clock) -> bool {
        self.successfully_started_ns != 0
            && elapsed_since(clock.now_ns(), self.successfully_started_ns)
                >= secs_to_ns(self.startsecs)
    }

    pub fn uptime_ns(&self, clock: &dyn Clock) -> Option<u64> {
        if self.is_running() {
            Some(elapsed_since(clock.now_ns(), self.start_time_ns))
        } else {
            None
        }
    }

    /// Clears all mutable fields, including `retries_count`.
    pub fn reset(&mut self) {
        let id = self.id;
        let start_gate_s = self.start_gate_s;
        let startsecs = self.startsecs;
        let backoff_delay_s = self.backoff_delay_s;
        *self = Process::new(id, start_gate_s, startsecs, backoff_delay_s);
    }

    /// Like `reset`, but preserves `retries_count` so repeated backoff
    /// cycles don't look like fresh restart budgets.
    pub fn reset_for_restart(&mut self) {
        let retries = self.retries_count;
        self.reset();
        self.retries_count = retries;
    }

    /// Moves the child into `backoff` and advances `retries_count`
    /// (`spec.md` §3.1's `retries_count`/`start_retries` budget).
    pub fn enter_backoff(&mut self, clock: &dyn Clock) {
        self.state = ProcessState::Backoff;
        self.backoff_until_ns = clock.now_ns().saturating_add(secs_to_ns(self.backoff_delay_s));
        self.retries_count += 1;
    }

    /// Demotes a child out of `backoff` once its cooldown has expired,
    /// making it eligible for `monitor_children`'s next re-spawn pass.
    pub fn demote_from_backoff(&mut self) {
        self.state = ProcessState::Stopped;
        self.backoff_until_ns = 0;
    }

    pub fn start(
        &mut self,
        params: &SpawnParams,
        syscalls: &dyn Syscalls,
        clock: &dyn Clock,
    ) -> Result<()> {
        if self.state != ProcessState::Stopped {
            return Err(ProcessError::InvalidState);
        }

        self.exit_code = None;
        self.exit_signal = None;
        self.failed_start = false;
        self.sent_kill = false;
        self.last_exec_errno = None;

        let (read_fd, write_fd) = syscalls.pipe_cloexec()?;

        // Safety: the child branch below only calls the narrow,
        // async-signal-safe-ish primitives reachable through `syscalls`
        // before `execve`/`exit_child`.
        let fork_result = unsafe { syscalls.fork() }?;

        match fork_result {
            ForkResult::Child => {
                syscalls.close(read_fd);
                run_child(params, syscalls, write_fd);
                // `run_child` only returns by calling `exit_child`, but
                // the type system doesn't know that without a `!` return.
                syscalls.exit_child(1);
            }
            ForkResult::Parent { child } => {
                syscalls.close(write_fd);
                self.pid = Some(child);
                self.exec_error_fd = Some(read_fd);
                self.state = ProcessState::Starting;
                let now = clock.now_ns();
                self.start_time_ns = now;
                self.start_gate_ns = now;
                log!(LogLevel::Trace, "Child {} forked as pid {}", self.id, child.as_raw());
                Ok(())
            }
        }
    }

    pub fn stop(
        &mut self,
        signal: Signal,
        timeout_s: u64,
        syscalls: &dyn Syscalls,
        clock: &dyn Clock,
    ) -> Result<()> {
        if !matches!(self.state, ProcessState::Running | ProcessState::Starting) {
            return Err(ProcessError::InvalidState);
        }
        self.deliver_signal(signal, syscalls)?;
        self.state = ProcessState::Stopping;
        self.stop_deadline_ns = clock.now_ns().saturating_add(secs_to_ns(timeout_s));
        log!(
            LogLevel::Trace,
            "Child {} (pid {}) sent {:?}, stop deadline in {}s",
            self.id,
            self.pid.map(|p| p.as_raw()).unwrap_or(-1),
            signal,
            timeout_s
        );
        Ok(())
    }

    pub fn send_signal(&mut self, signal: Signal, syscalls: &dyn Syscalls) -> Result<()> {
        if self.state != ProcessState::Running {
            return Err(ProcessError::InvalidState);
        }
        self.deliver_signal(signal, syscalls)
    }

    pub fn kill(&mut self, syscalls: &dyn Syscalls) -> Result<()> {
        if matches!(self.state, ProcessState::Exited | ProcessState::Killed) {
            return Err(ProcessError::InvalidState);
        }
        self.deliver_signal(Signal::SIGKILL, syscalls)?;
        self.state = ProcessState::Killed;
        log!(
            LogLevel::Warn,
            "Child {} (pid {}) killed with SIGKILL",
            self.id,
            self.pid.map(|p| p.as_raw()).unwrap_or(-1)
        );
        Ok(())
    }

    fn deliver_signal(&self, signal: Signal, syscalls: &dyn Syscalls) -> Result<()> {
        let pid = match self.pid {
            Some(pid) => pid,
            None => return Ok(()),
        };
        match syscalls.kill(pid, Some(signal)) {
            Ok(()) => Ok(()),
            Err(nix::Error::ESRCH) => {
                let pgid = Pid::from_raw(-pid.as_raw());
                let _ = syscalls.kill(pgid, Some(signal));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn poll_exec_error(&mut self, syscalls: &dyn Syscalls) {
        let Some(fd) = self.exec_error_fd else {
            return;
        };
        let mut buf = [0u8; 4];
        match syscalls.read_all(fd, &mut buf) {
            Ok(0) => {
                // EOF: the write end closed on successful `execve`.
                syscalls.close(fd);
                self.exec_error_fd = None;
            }
            Ok(n) if n == buf.len() => {
                let errno = i32::from_ne_bytes(buf);
                self.last_exec_errno = Some(errno);
                log!(LogLevel::Error, "Child {} failed to exec, errno {}", self.id, errno);
                syscalls.close(fd);
                self.exec_error_fd = None;
            }
            Ok(_) => {
                // Short read; leave the fd open and retry next pass.
            }
            Err(nix::Error::EAGAIN) => {}
            Err(_) => {
                syscalls.close(fd);
                self.exec_error_fd = None;
            }
        }
    }

    pub fn monitor(&mut self, syscalls: &dyn Syscalls, clock: &dyn Clock) -> Result<()> {
        self.poll_exec_error(syscalls);

        if self.state == ProcessState::Starting {
            let pid = self.pid.expect("starting child always has a pid");
            if !process_is_alive(pid, syscalls) {
                self.failed_start = true;
                self.state = ProcessState::Exited;
                self.pid = None;
                log!(LogLevel::Warn, "Child {} (pid {}) disappeared during start grace", self.id, pid.as_raw());
                return Ok(());
            }
            if elapsed_since(clock.now_ns(), self.start_gate_ns) >= secs_to_ns(self.start_gate_s) {
                self.state = ProcessState::Running;
                self.successfully_started_ns = clock.now_ns();
                log!(LogLevel::Trace, "Child {} (pid {}) cleared start grace, now running", self.id, pid.as_raw());
            }
        }

        if self.state == ProcessState::Stopping && clock.now_ns() >= self.stop_deadline_ns && !self.sent_kill {
            self.kill(syscalls)?;
            self.sent_kill = true;
        }

        let was_starting = self.state == ProcessState::Starting;

        if let Some(pid) = self.pid {
            match syscalls.waitpid_nohang(pid) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.exit_code = Some(code as u8);
                    if was_starting {
                        self.failed_start = true;
                    }
                    if self.state != ProcessState::Killed {
                        self.state = ProcessState::Exited;
                    }
                    log!(LogLevel::Trace, "Reaped child {} (pid {}) with exit code {}", self.id, pid.as_raw(), code);
                    self.pid = None;
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    self.exit_signal = Some(sig as u8);
                    if was_starting {
                        self.failed_start = true;
                    }
                    if self.state != ProcessState::Killed {
                        self.state = ProcessState::Exited;
                    }
                    log!(LogLevel::Trace, "Reaped child {} (pid {}) terminated by signal {:?}", self.id, pid.as_raw(), sig);
                    self.pid = None;
                }
                Ok(_) => {
                    // StillAlive, Stopped, Continued: nothing to reap yet.
                }
                Err(nix::Error::ECHILD) => {
                    // Already reaped elsewhere (or never existed); treat
                    // it the same as a disappeared child.
                    if self.state != ProcessState::Killed {
                        self.state = ProcessState::Exited;
                    }
                    self.pid = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

fn process_is_alive(pid: Pid, syscalls: &dyn Syscalls) -> bool {
    match syscalls.kill(pid, None) {
        Ok(()) => true,
        Err(nix::Error::ESRCH) => false,
        // EPERM (exists but unsignalable) and anything else: assume alive.
        Err(_) => true,
    }
}

/// Runs in the forked child. Never returns: either `execve` replaces
/// the image, or a setup failure writes `errno` to the pipe and calls
/// `exit_child(1)` (`spec.md` §4.1 steps 1-6).
fn run_child(params: &SpawnParams, syscalls: &dyn Syscalls, error_fd: RawFd) {
    let fail = |syscalls: &dyn Syscalls, errno: i32| -> ! {
        let bytes = errno.to_ne_bytes();
        let _ = nix::unistd::write(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(error_fd) },
            &bytes,
        );
        syscalls.exit_child(1);
    };

    let _ = syscalls.setpgid(Pid::from_raw(0), Pid::from_raw(0));

    if let Some(mask) = params.umask {
        syscalls.umask(Mode::from_bits_truncate(mask as u32));
    }

    if let Some(dir) = &params.working_directory {
        let _ = syscalls.chdir(dir);
    }

    match syscalls.open_null_device() {
        Ok(null_fd) => {
            if let Err(errno) = syscalls.dup2(null_fd, libc::STDIN_FILENO) {
                fail(syscalls, errno as i32);
            }
        }
        Err(e) => fail(syscalls, e.raw_os_error().unwrap_or(libc::EIO)),
    }

    if let Err(errno) = redirect_stream(
        syscalls,
        libc::STDOUT_FILENO,
        params.redirect_stdout,
        params.stdout_path.as_deref(),
    ) {
        fail(syscalls, errno);
    }

    if let Err(errno) = redirect_stream(
        syscalls,
        libc::STDERR_FILENO,
        params.redirect_stderr,
        params.stderr_path.as_deref(),
    ) {
        fail(syscalls, errno);
    }

    let path = match std::ffi::CString::new(params.path.as_str()) {
        Ok(p) => p,
        Err(_) => fail(syscalls, libc::EINVAL),
    };
    let argv = match CStringArray::new(&params.argv) {
        Ok(a) => a,
        Err(_) => fail(syscalls, libc::EINVAL),
    };
    let envp = match CStringArray::new(&params.envp) {
        Ok(e) => e,
        Err(_) => fail(syscalls, libc::EINVAL),
    };

    let err = syscalls.execve(&path, argv.as_cstrs(), envp.as_cstrs());
    fail(syscalls, err as i32);
}

fn redirect_stream(
    syscalls: &dyn Syscalls,
    target_fd: RawFd,
    redirect: bool,
    path: Option<&std::path::Path>,
) -> std::result::Result<(), i32> {
    if !redirect {
        return Ok(());
    }
    let source_fd = match path {
        Some(p) => syscalls
            .open_append(p, 0o644)
            .map_err(|e| e.raw_os_error().unwrap_or(libc::EIO))?,
        None => syscalls
            .open_null_device()
            .map_err(|e| e.raw_os_error().unwrap_or(libc::EIO))?,
    };
    syscalls
        .dup2(source_fd, target_fd)
        .map(|_| ())
        .map_err(|errno| errno as i32)
}
