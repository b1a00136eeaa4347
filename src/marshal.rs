// src/marshal.rs
//
// `spec.md` §4.3: argv/envp must reach `execve` as a null-sentinel
// vector of null-terminated strings. `CStringArray` owns the `CString`
// storage for at least the duration of the `fork`/`exec` call and
// hands back the raw, null-terminated pointer vector `nix::unistd::execve`
// expects.

use std::ffi::CString;

use crate::error::{ProcessError, Result};

/// Owns a set of `CString`s converted from caller-supplied strings.
/// Construction fails if any string contains an embedded NUL, since
/// that cannot be represented in a C string.
pub struct CStringArray {
    strings: Vec<CString>,
}

impl CStringArray {
    pub fn new<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let strings = items
            .into_iter()
            .map(|s| {
                CString::new(s.as_ref()).map_err(|_| {
                    ProcessError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "string contains an embedded NUL byte",
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { strings })
    }

    pub fn as_cstrs(&self) -> &[CString] {
        &self.strings
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
