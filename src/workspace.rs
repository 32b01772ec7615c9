//! Workspace fingerprint matching
//!
//! Two processes identify "which project" they belong to by a filesystem
//! location string. The strings rarely agree byte-for-byte (one side may have
//! opened a subfolder, used backslashes, or a differently-cased drive letter),
//! so matching happens on a normalized form.
//!
//! ## Normalization policy
//!
//! Purely lexical; nothing touches the filesystem and symlinks are never
//! resolved.
//!
//! | Input                  | Normalized        |
//! |------------------------|-------------------|
//! | `/proj//a/./b/`        | `/proj/a/b`       |
//! | `/proj/a/../b`         | `/proj/b`         |
//! | `C:\Users\Dev\Proj`    | `c:/users/dev/proj` |
//! | `proj/a` (relative)    | `/proj/a`         |
//! | `/proj/ a /b `         | `/proj/a/b`       |
//! | `/`                    | `/`               |
//!
//! Case is folded to lowercase unless [`MatchPolicy::fold_case`] is off.

use crate::error::BridgeError;

/// Matching policy for workspace fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Treat paths as case-insensitive (lowercase everything)
    pub fold_case: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { fold_case: true }
    }
}

/// A workspace path in normalized form.
///
/// The empty value represents malformed input; it is never related to
/// anything, itself included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Drive prefix (`""` on unix-style paths) and the segment sequence.
    fn components(&self) -> (&str, Vec<&str>) {
        let (prefix, rest) = self.0.split_once('/').unwrap_or((self.0.as_str(), ""));
        let segments = rest.split('/').filter(|s| !s.is_empty()).collect();
        (prefix, segments)
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw workspace string together with its normalized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePath {
    pub raw: String,
    pub normalized: NormalizedPath,
}

impl WorkspacePath {
    /// Parse and normalize, rejecting blank paths and embedded NUL bytes.
    pub fn parse(raw: &str, policy: MatchPolicy) -> Result<Self, BridgeError> {
        if raw.contains('\0') {
            return Err(BridgeError::InvalidWorkspace(format!(
                "{:?} contains a NUL byte",
                raw
            )));
        }
        let normalized = normalize_with(raw, policy);
        if normalized.is_empty() {
            return Err(BridgeError::InvalidWorkspace("path is blank".to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            normalized,
        })
    }
}

/// Normalize with the default (case-folding) policy.
pub fn normalize(path: &str) -> NormalizedPath {
    normalize_with(path, MatchPolicy::default())
}

/// Normalize a workspace path. Deterministic and idempotent.
pub fn normalize_with(path: &str, policy: MatchPolicy) -> NormalizedPath {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return NormalizedPath(String::new());
    }

    let unified = trimmed.replace('\\', "/");
    let (drive, rest) = split_drive(&unified);

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment.trim() {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(unified.len() + 1);
    out.push_str(&drive.to_ascii_lowercase());
    out.push('/');
    out.push_str(&segments.join("/"));

    if policy.fold_case {
        out = out.to_lowercase();
    }
    NormalizedPath(out)
}

/// Split a leading Windows drive designator (`C:`) off the path.
fn split_drive(path: &str) -> (&str, &str) {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        path.split_at(2)
    } else {
        ("", path)
    }
}

/// True when `a` and `b` are the same workspace or one contains the other.
///
/// Symmetric in its arguments. Empty (malformed) paths are never related.
pub fn related(a: &NormalizedPath, b: &NormalizedPath) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let (drive_a, segs_a) = a.components();
    let (drive_b, segs_b) = b.components();
    if drive_a != drive_b {
        return false;
    }

    let (shorter, longer) = if segs_a.len() <= segs_b.len() {
        (&segs_a, &segs_b)
    } else {
        (&segs_b, &segs_a)
    };
    longer.starts_with(shorter)
}
