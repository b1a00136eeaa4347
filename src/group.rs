// src/group.rs
//
// Group Coordinator (`spec.md` §4.2). The teacher supervises one PID
// at a time (`SupervisedChild`); nothing in `process_manager.rs`
// coordinates a homogeneous replica set with shared restart/backoff
// policy, so this module generalizes the teacher's single-child
// primitives up to a collection, borrowing the setter-style config
// struct convention from `config.rs`'s `AppConfig` for `GroupConfig`.

use std::collections::HashSet;
use std::path::PathBuf;

use nix::sys::signal::Signal;

use crate::clock::{Clock, MonotonicClock};
use crate::error::{ProcessError, Result};
use crate::log;
use crate::logger::LogLevel;
use crate::process::{Process, ProcessState, SpawnParams};
use crate::syscalls::{PosixSyscalls, Syscalls};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRestart {
    Always,
    Never,
    Unexpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Fatal,
}

/// The shared spawn recipe and policy for a `ProcessGroup`
/// (`spec.md` §3.2). Built with the same `with_*` setter convention
/// `config.rs`'s `AppConfig` uses for its settings structs.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub name: String,
    cmd: String,
    argv: Option<Vec<String>>,
    envp: Option<Vec<String>>,
    working_directory: Option<PathBuf>,
    stdout_path: Option<PathBuf>,
    stderr_path: Option<PathBuf>,
    redirect_stdout: bool,
    redirect_stderr: bool,
    umask: Option<u16>,
    numprocs: usize,
    start_retries: u32,
    start_time: u64,
    startsecs: u64,
    autostart: bool,
    stop_signal: Signal,
    stop_timeout: u64,
    autorestart: AutoRestart,
    exitcodes: HashSet<u8>,
    backoff_delay_s: u64,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let mut exitcodes = HashSet::new();
        exitcodes.insert(0);
        Self {
            name: name.into(),
            cmd: String::new(),
            argv: None,
            envp: None,
            working_directory: None,
            stdout_path: None,
            stderr_path: None,
            redirect_stdout: true,
            redirect_stderr: true,
            umask: None,
            numprocs: 0,
            start_retries: 0,
            start_time: 0,
            startsecs: 1,
            autostart: true,
            stop_signal: Signal::SIGTERM,
            stop_timeout: 0,
            autorestart: AutoRestart::Unexpected,
            exitcodes,
            backoff_delay_s: 1,
        }
    }

    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = cmd.into();
        self
    }

    pub fn with_argv(mut self, argv: Vec<String>) -> Self {
        self.argv = Some(argv);
        self
    }

    pub fn with_envp(mut self, envp: Vec<String>) -> Self {
        self.envp = Some(envp);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_stdout_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    pub fn with_stderr_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_path = Some(path.into());
        self
    }

    pub fn with_redirect_stdout(mut self, redirect: bool) -> Self {
        self.redirect_stdout = redirect;
        self
    }

    pub fn with_redirect_stderr(mut self, redirect: bool) -> Self {
        self.redirect_stderr = redirect;
        self
    }

    pub fn with_umask(mut self, umask: u16) -> Self {
        self.umask = Some(umask);
        self
    }

    pub fn with_numprocs(mut self, numprocs: usize) -> Self {
        self.numprocs = numprocs;
        self
    }

    pub fn with_start_retries(mut self, retries: u32) -> Self {
        self.start_retries = retries;
        self
    }

    pub fn with_start_time(mut self, secs: u64) -> Self {
        self.start_time = secs;
        self
    }

    pub fn with_startsecs(mut self, secs: u64) -> Self {
        self.startsecs = secs;
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn with_stop_signal(mut self, signal: Signal) -> Self {
        self.stop_signal = signal;
        self
    }

    pub fn with_stop_timeout(mut self, secs: u64) -> Self {
        self.stop_timeout = secs;
        self
    }

    pub fn with_autorestart(mut self, policy: AutoRestart) -> Self {
        self.autorestart = policy;
        self
    }

    pub fn with_exitcodes(mut self, codes: impl IntoIterator<Item = u8>) -> Self {
        self.exitcodes = codes.into_iter().collect();
        self
    }

    pub fn with_backoff_delay_s(mut self, secs: u64) -> Self {
        self.backoff_delay_s = secs;
        self
    }

    pub fn autostart(&self) -> bool {
        self.autostart
    }

    fn spawn_params(&self) -> SpawnParams {
        let mut params = SpawnParams::new(
            self.cmd.clone(),
            self.argv.clone().unwrap_or_default(),
            self.envp.clone().unwrap_or_default(),
        );
        params.stdout_path = self.stdout_path.clone();
        params.stderr_path = self.stderr_path.clone();
        params.redirect_stdout = self.redirect_stdout;
        params.redirect_stderr = self.redirect_stderr;
        params.working_directory = self.working_directory.clone();
        params.umask = self.umask;
        params
    }
}

/// Owns a flat collection of `Process`es sharing one `GroupConfig`
/// (`spec.md` §3.2/§4.2). `children` is a plain `Vec`: Rust's ownership
/// model already gives `ProcessGroup` sole ownership of everything
/// reachable from it, the idiomatic equivalent of the spec's "single
/// arena releases all storage at teardown" requirement.
pub struct ProcessGroup {
    config: GroupConfig,
    children: Vec<Process>,
    state: GroupState,
    clock: Box<dyn Clock>,
    syscalls: Box<dyn Syscalls>,
}

impl ProcessGroup {
    pub fn new(config: GroupConfig) -> Self {
        Self::with_clock_and_syscalls(config, Box::new(MonotonicClock::new()), Box::new(PosixSyscalls))
    }

    pub fn with_clock_and_syscalls(
        config: GroupConfig,
        clock: Box<dyn Clock>,
        syscalls: Box<dyn Syscalls>,
    ) -> Self {
        Self {
            config,
            children: Vec::new(),
            state: GroupState::Stopped,
            clock,
            syscalls,
        }
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn children(&self) -> &[Process] {
        &self.children
    }

    pub fn group_state(&self) -> GroupState {
        self.state
    }

    pub fn spawn_children(&mut self) -> Result<()> {
        if self.config.cmd.is_empty() {
            return Err(ProcessError::MissingCommand);
        }
        if self.config.argv.is_none() {
            return Err(ProcessError::MissingArgv);
        }
        if self.config.envp.is_none() {
            return Err(ProcessError::MissingEnvp);
        }
        if self.config.numprocs == 0 {
            return Err(ProcessError::NoProcesses);
        }

        let params = self.config.spawn_params();
        self.children = (0..self.config.numprocs)
            .map(|id| {
                Process::new(
                    id,
                    self.config.start_time,
                    self.config.startsecs,
                    self.config.backoff_delay_s,
                )
            })
            .collect();

        for child in self.children.iter_mut() {
            child.start(&params, self.syscalls.as_ref(), self.clock.as_ref())?;
        }

        log!(LogLevel::Info, "Group '{}' spawned {} replicas", self.config.name, self.config.numprocs);
        self.state = GroupState::Starting;
        Ok(())
    }

    pub fn stop_children(&mut self) -> Result<()> {
        for child in self.children.iter_mut() {
            if !child.is_alive() {
                continue;
            }
            match child.stop(
                self.config.stop_signal,
                self.config.stop_timeout,
                self.syscalls.as_ref(),
                self.clock.as_ref(),
            ) {
                Ok(()) => {}
                Err(ProcessError::InvalidState) => {}
                Err(e) => return Err(e),
            }
        }
        log!(LogLevel::Info, "Group '{}' stopping all children", self.config.name);
        self.state = GroupState::Stopping;
        Ok(())
    }

    pub fn monitor_children(&mut self) -> Result<()> {
        let params = self.config.spawn_params();

        for i in 0..self.children.len() {
            self.children[i].monitor(self.syscalls.as_ref(), self.clock.as_ref())?;

            if self.children[i].is_backoff_expired(self.clock.as_ref()) {
                self.children[i].demote_from_backoff();
            }

            if self.children[i].has_exited() {
                let restart_eligible = self.should_restart(&self.children[i])
                    && self.children[i].retries_count() < self.config.start_retries;
                if restart_eligible {
                    self.children[i].enter_backoff(self.clock.as_ref());
                    log!(
                        LogLevel::Warn,
                        "Group '{}' child {} entering backoff (attempt {})",
                        self.config.name,
                        i,
                        self.children[i].retries_count()
                    );
                }
            }

            // A child only reaches `Stopped` mid-loop via backoff demotion,
            // which step 3 above already gated on the restart budget; no
            // second budget check here (spec.md §4.2 step 4).
            if self.children[i].state() == ProcessState::Stopped
                && self.should_restart(&self.children[i])
            {
                let child = &mut self.children[i];
                child.reset_for_restart();
                child.start(&params, self.syscalls.as_ref(), self.clock.as_ref())?;
                log!(LogLevel::Trace, "Group '{}' child {} respawned after backoff", self.config.name, i);
            }
        }

        self.refresh_state();
        Ok(())
    }

    fn should_restart(&self, child: &Process) -> bool {
        match self.config.autorestart {
            AutoRestart::Always => true,
            AutoRestart::Never => false,
            AutoRestart::Unexpected => match child.exit_code() {
                Some(code) => !self.config.exitcodes.contains(&code),
                None => true,
            },
        }
    }

    fn refresh_state(&mut self) {
        // A deliberate `stop_children()` can itself exhaust a child's
        // restart budget once it's reaped; that's an intentional Stopped
        // group, not a Fatal one, so the Stopping transition takes
        // priority over the fatal check below.
        if self.state == GroupState::Stopping {
            if self.all_exited() {
                self.state = GroupState::Stopped;
            }
            return;
        }
        if self.has_fatal_processes() {
            if self.state != GroupState::Fatal {
                log!(LogLevel::Error, "Group '{}' has exhausted restart budget, now fatal", self.config.name);
            }
            self.state = GroupState::Fatal;
            return;
        }
        if !self.children.is_empty() && self.children.iter().all(|c| c.is_running()) {
            self.state = GroupState::Running;
        }
    }

    pub fn stop_child(&mut self, id: usize) -> Result<()> {
        let child = self
            .children
            .get_mut(id)
            .ok_or(ProcessError::InvalidChildId(id))?;
        child.stop(
            self.config.stop_signal,
            self.config.stop_timeout,
            self.syscalls.as_ref(),
            self.clock.as_ref(),
        )
    }

    pub fn kill_child(&mut self, id: usize) -> Result<()> {
        let child = self
            .children
            .get_mut(id)
            .ok_or(ProcessError::InvalidChildId(id))?;
        child.kill(self.syscalls.as_ref())
    }

    pub fn restart_child(&mut self, id: usize) -> Result<()> {
        let params = self.config.spawn_params();
        let child = self
            .children
            .get_mut(id)
            .ok_or(ProcessError::InvalidChildId(id))?;
        if child.is_alive() {
            child.stop(
                self.config.stop_signal,
                self.config.stop_timeout,
                self.syscalls.as_ref(),
                self.clock.as_ref(),
            )
        } else {
            child.reset();
            child.start(&params, self.syscalls.as_ref(), self.clock.as_ref())
        }
    }

    pub fn running_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_running()).count()
    }

    pub fn alive_count(&self) -> usize {
        self.children.iter().filter(|c| c.is_alive()).count()
    }

    pub fn all_exited(&self) -> bool {
        !self.children.is_empty() && self.children.iter().all(|c| c.has_exited())
    }

    /// A child is fatal once it wants another restart but has exhausted
    /// `start_retries`: `monitor_children` parks it at `Exited` (budget
    /// spent before a backoff cycle started) or `Stopped` (budget spent
    /// right as a backoff cycle finished) instead of respawning it.
    pub fn has_fatal_processes(&self) -> bool {
        self.children.iter().any(|c| {
            matches!(c.state(), ProcessState::Exited | ProcessState::Stopped)
                && c.retries_count() >= self.config.start_retries
                && self.should_restart(c)
        })
    }

    pub fn total_uptime_ns(&self) -> u64 {
        self.children
            .iter()
            .filter_map(|c| c.uptime_ns(self.clock.as_ref()))
            .sum()
    }
}
