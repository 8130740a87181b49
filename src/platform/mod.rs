// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Platform abstraction.
//!
//! OS wrappers (filesystem access, dynamic-library loading, environment
//! lookups) are out of scope for the runtime proper; a caller is expected
//! to satisfy the [`Filesystem`] and [`StdlibSource`] trait boundaries with
//! whatever concrete implementation fits its embedder. This module provides
//! a real, `std`-backed implementation plus a mock used by the test suite.

#[cfg(test)]
mod mock_test;

mod mock;
#[cfg(feature = "std")]
mod std_fs;

pub use mock::MockFilesystem;
#[cfg(feature = "std")]
pub use std_fs::StdFilesystem;

/// Everything the module loader needs from the host filesystem.
pub trait Filesystem {
    /// `true` if `path` names an existing regular file.
    fn is_file(&self, path: &str) -> bool;
    /// `true` if `path` names an existing directory.
    fn is_dir(&self, path: &str) -> bool;
    /// Read the full contents of `path` as a byte vector.
    ///
    /// # Errors
    /// Returns a host-specific message on any I/O failure.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, String>;
    /// Join filesystem path segments using the host's separator.
    fn join(&self, base: &str, segment: &str) -> String;
}

/// Resolves a module namespace (e.g. `std.math`) to bytecode-compiler-ready
/// source text. This stands in for the out-of-scope LZ4-compressed embedded
/// stdlib archive: a real embedder supplies a [`StdlibSource`] that knows
/// how to decode its own archive format.
pub trait StdlibSource {
    /// Returns the source text for `namespace`, if this source provides it.
    fn source_for(&self, namespace: &str) -> Option<Vec<u8>>;
}

/// A [`StdlibSource`] that provides nothing; used when an embedder has no
/// stdlib to offer, or in tests that only exercise user modules.
#[derive(Default)]
pub struct EmptyStdlibSource;

impl StdlibSource for EmptyStdlibSource {
    fn source_for(&self, _namespace: &str) -> Option<Vec<u8>> {
        None
    }
}
