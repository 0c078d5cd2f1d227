//! Extra bind-mount declarations.
//!
//! The declaration file holds one mount per line, `destination:type:source`,
//! e.g. `/etc/hosts:bind:/etc/hosts`. Extra mounts are best-effort: a missing
//! or unreadable file means no extra mounts, and malformed lines are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One extra mount to add to the container's mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDecl {
    /// Absolute path inside the container.
    pub destination: String,
    /// Filesystem type.
    pub mount_type: String,
    /// Host path (or device) to mount.
    pub source: String,
    /// Mount option flags, without duplicates.
    pub options: Vec<String>,
}

impl MountDecl {
    /// Creates a declaration without options.
    #[must_use]
    pub fn new(
        destination: impl Into<String>,
        mount_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            mount_type: mount_type.into(),
            source: source.into(),
            options: Vec::new(),
        }
    }

    /// Adds an option flag unless it is already present.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        let option = option.into();
        if !self.options.contains(&option) {
            self.options.push(option);
        }
        self
    }

    /// Parses a `destination:type:source` line.
    ///
    /// Returns `None` unless the line has exactly three fields.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.as_slice() {
            [destination, mount_type, source] => Some(Self::new(*destination, *mount_type, *source)),
            _ => None,
        }
    }
}

/// Loads the declaration file at `path`.
///
/// Never fails: any open or read error yields an empty list.
#[must_use]
pub fn load_mounts(path: &Path) -> Vec<MountDecl> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no extra mounts");
            return Vec::new();
        }
    };
    match parse_mounts(BufReader::new(file)) {
        Ok(mounts) => {
            tracing::debug!(path = %path.display(), count = mounts.len(), "loaded extra mounts");
            mounts
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "failed reading mounts, ignoring all");
            Vec::new()
        }
    }
}

/// Parses declarations from a reader, preserving line order.
///
/// Lines are split on raw bytes, so a line that is not valid UTF-8 is
/// skipped like any other malformed line.
///
/// # Errors
///
/// Returns the first read error encountered.
pub fn parse_mounts(reader: impl BufRead) -> std::io::Result<Vec<MountDecl>> {
    let mut mounts = Vec::new();
    for (index, raw) in reader.split(b'\n').enumerate() {
        let mut raw = raw?;
        if raw.last() == Some(&b'\r') {
            let _ = raw.pop();
        }
        let Ok(line) = String::from_utf8(raw) else {
            tracing::debug!(line = index + 1, "skipping mount line that is not UTF-8");
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        match MountDecl::parse(&line) {
            Some(decl) => mounts.push(decl),
            None => tracing::debug!(line = index + 1, content = %line, "skipping malformed mount line"),
        }
    }
    Ok(mounts)
}
