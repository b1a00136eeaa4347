// src/syscalls.rs
//
// Narrow trait at the OS boundary, generalized from the free functions
// in the teacher's `process_manager.rs` (`spawn_complex_process`,
// `kill_pgid_recursive`, `is_pid_active`, `ChildLock::reap_zombie_process`)
// the same way `airssys-osl`'s `core/executor.rs` names an `Executor`
// trait at its own syscall seam. `PosixSyscalls` is the one production
// implementation and is what `Process`/`ProcessGroup` use by default;
// this trait is not part of the crate's public contract, it exists so
// the fork/exec/signal/reap sequence can be exercised a call at a time
// in tests without needing a child process spawned for every case.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::Path;

use nix::sys::signal::{kill as nix_kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, dup2, execve, fork, setpgid, ForkResult, Pid};
use nix::Error as NixError;

/// The POSIX-like surface `spec.md` §1 says the core consumes, named
/// as a trait so production code and tests share one call shape.
pub trait Syscalls {
    /// # Safety
    /// Forks the calling process; the caller must only perform
    /// async-signal-safe work in the child branch before `execve`/`exit_child`.
    unsafe fn fork(&self) -> Result<ForkResult, NixError>;

    fn setpgid(&self, pid: Pid, pgid: Pid) -> Result<(), NixError>;
    fn umask(&self, mask: Mode) -> Mode;
    fn chdir(&self, path: &Path) -> Result<(), NixError>;
    fn dup2(&self, oldfd: RawFd, newfd: RawFd) -> Result<RawFd, NixError>;
    fn open_append(&self, path: &Path, mode: u32) -> std::io::Result<RawFd>;
    fn open_null_device(&self) -> std::io::Result<RawFd>;
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    fn execve(&self, path: &CString, argv: &[CString], envp: &[CString]) -> NixError;
    fn exit_child(&self, code: i32) -> !;
    /// `signal = None` sends signal 0, the non-destructive liveness probe.
    fn kill(&self, pid: Pid, signal: Option<Signal>) -> Result<(), NixError>;
    fn waitpid_nohang(&self, pid: Pid) -> Result<WaitStatus, NixError>;
    fn pipe_cloexec(&self) -> Result<(RawFd, RawFd), NixError>;
    fn close(&self, fd: RawFd);
    fn read_all(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize, NixError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PosixSyscalls;

impl Syscalls for PosixSyscalls {
    unsafe fn fork(&self) -> Result<ForkResult, NixError> {
        fork()
    }

    fn setpgid(&self, pid: Pid, pgid: Pid) -> Result<(), NixError> {
        setpgid(pid, pgid)
    }

    fn umask(&self, mask: Mode) -> Mode {
        nix::sys::stat::umask(mask)
    }

    fn chdir(&self, path: &Path) -> Result<(), NixError> {
        chdir(path)
    }

    fn dup2(&self, oldfd: RawFd, newfd: RawFd) -> Result<RawFd, NixError> {
        dup2(oldfd, newfd)
    }

    fn open_append(&self, path: &Path, mode: u32) -> std::io::Result<RawFd> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(mode)
            .open(path)?;
        let fd = file.as_raw_fd();
        // Leak the `File` so the descriptor survives past this scope;
        // it is `dup2`'d onto stdout/stderr and the original is closed
        // on `execve` (inherited descriptors below 3 aren't touched).
        std::mem::forget(file);
        Ok(fd)
    }

    fn open_null_device(&self) -> std::io::Result<RawFd> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/null")?;
        let fd = file.as_raw_fd();
        std::mem::forget(file);
        Ok(fd)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn execve(&self, path: &CString, argv: &[CString], envp: &[CString]) -> NixError {
        match execve(path, argv, envp) {
            Ok(_) => unreachable!("execve only returns on failure"),
            Err(e) => e,
        }
    }

    fn exit_child(&self, code: i32) -> ! {
        unsafe { libc::_exit(code) }
    }

    fn kill(&self, pid: Pid, signal: Option<Signal>) -> Result<(), NixError> {
        nix_kill(pid, signal)
    }

    fn waitpid_nohang(&self, pid: Pid) -> Result<WaitStatus, NixError> {
        waitpid(pid, Some(WaitPidFlag::WNOHANG))
    }

    fn pipe_cloexec(&self) -> Result<(RawFd, RawFd), NixError> {
        use nix::fcntl::OFlag;
        use nix::unistd::pipe2;
        // O_NONBLOCK on the read end lets `monitor()` poll it without
        // ever blocking; 4-byte writes stay well under PIPE_BUF so the
        // (also nonblocking) write end never partially fails either.
        let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        Ok((read_fd.into_raw_fd(), write_fd.into_raw_fd()))
    }

    fn close(&self, fd: RawFd) {
        let _ = nix::unistd::close(fd);
    }

    fn read_all(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize, NixError> {
        nix::unistd::read(fd, buf)
    }
}
