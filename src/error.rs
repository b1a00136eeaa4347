// src/error.rs
//
// One crate-wide error enum, in the house style of a single error type
// threaded through `?` (see the teacher's `ErrorArrayItem`/`Errors`),
// but built on `thiserror` rather than `dusa_collection_utils` now that
// nothing here needs that crate's async-lock/ring-buffer baggage.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("operation invalid in current state")]
    InvalidState,

    #[error("group configuration missing a command to execute")]
    MissingCommand,

    #[error("group configuration missing argv")]
    MissingArgv,

    #[error("group configuration missing envp")]
    MissingEnvp,

    #[error("group configuration requests zero processes")]
    NoProcesses,

    #[error("no child with id {0} in this group")]
    InvalidChildId(usize),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Os(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
