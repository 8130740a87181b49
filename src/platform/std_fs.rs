// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! The real, `std`-backed [`Filesystem`] implementation.

use super::Filesystem;
use std::path::Path;

#[derive(Default)]
pub struct StdFilesystem;

impl Filesystem for StdFilesystem {
    fn is_file(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }

    fn is_dir(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, String> {
        std::fs::read(path).map_err(|e| format!("failed to read '{path}': {e}"))
    }

    fn join(&self, base: &str, segment: &str) -> String {
        Path::new(base).join(segment).to_string_lossy().into_owned()
    }
}
