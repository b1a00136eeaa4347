//! Policy-agnostic process supervision: a Child Supervisor (`Process`)
//! and a Group Coordinator (`ProcessGroup`) built directly on POSIX
//! `fork`/`execve`/`waitpid`/`kill`. Synchronous, poll-driven, no
//! internal threads: callers advance the state machine by calling
//! `Process::monitor`/`ProcessGroup::monitor_children` themselves.

#[macro_use]
pub mod logger;

pub mod clock;
pub mod error;
pub mod group;
pub mod marshal;
pub mod process;
pub mod syscalls;

pub use clock::{Clock, MockClock, MonotonicClock};
pub use error::{ProcessError, Result};
pub use group::{AutoRestart, GroupConfig, GroupState, ProcessGroup};
pub use process::{Process, ProcessState, SpawnParams};
pub use syscalls::{PosixSyscalls, Syscalls};

// tests
#[path = "../src/tests/clock_test.rs"]
mod clock_test;

#[path = "../src/tests/marshal_test.rs"]
mod marshal_test;

#[path = "../src/tests/process_test.rs"]
mod process_test;

#[path = "../src/tests/group_test.rs"]
mod group_test;
