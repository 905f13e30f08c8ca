// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// The error taxonomy every `cmv-*` crate maps into. Every error that
/// crosses into `cmv-engine` is tagged with one of these; it is the
/// caller-facing classification, not a type hierarchy of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing caller input.
    InvalidArgument,
    /// Remote fetch or workload probe failed during `Prepare`/`Reconcile`.
    Unavailable,
    /// A `subPath` key is missing from the bundle.
    NotFound,
    /// Local I/O failed while writing a payload.
    Aborted,
    /// The mount primitive or validation-preamble I/O failed.
    Internal,
    /// A violated invariant that indicates a caller or engine bug
    /// (e.g. double teardown).
    FatalBug,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::NotFound => "not found",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Internal => "internal",
            ErrorKind::FatalBug => "fatal bug",
        };
        f.write_str(s)
    }
}
