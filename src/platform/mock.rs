// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! An in-memory [`Filesystem`] for tests and embedders without real disk
//! access.

use super::Filesystem;
use std::collections::BTreeMap;

/// A fake filesystem backed by a flat path-to-bytes map. Directories are
/// implicit: any path that is a strict prefix (up to a `/`) of a file entry
/// is reported as a directory by [`MockFilesystem::is_dir`].
#[derive(Default)]
pub struct MockFilesystem {
    files: BTreeMap<String, Vec<u8>>,
}

impl MockFilesystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl Filesystem for MockFilesystem {
    fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.files.keys().any(|k| k.starts_with(&prefix))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| format!("no such file: {path}"))
    }

    fn join(&self, base: &str, segment: &str) -> String {
        if base.is_empty() {
            segment.to_string()
        } else {
            format!("{base}/{segment}")
        }
    }
}
