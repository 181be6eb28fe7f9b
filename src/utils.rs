//! Utility functions for cryptdir
//!
//! Path conversion at the manifest boundary, the natural ordering used for
//! deterministic traversal, and byte formatting for reports.
//!
//! Manifest paths are always relative and always use `/` as separator,
//! whatever the host platform. [`to_manifest_path`] and
//! [`manifest_path_to_host`] are the only places where host paths and
//! manifest paths are converted into each other.

use crate::error::{CryptDirError, Result};
use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};

/// Convert a path under `base` into its manifest form
///
/// Strips `base` lexically (symbolic links are not resolved) and joins the
/// remaining components with `/`.
///
/// # Errors
///
/// - [`CryptDirError::PathConversion`] if `path` is not under `base`, is
///   `base` itself, or contains non UTF-8 components
///
/// # Example
///
/// ```rust,ignore
/// let rel = to_manifest_path(Path::new("/src/a/b.txt"), Path::new("/src"))?;
/// assert_eq!(rel, "a/b.txt");
/// ```
pub fn to_manifest_path(path: &Path, base: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| CryptDirError::PathConversion(path.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| CryptDirError::PathConversion(path.to_path_buf()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => return Err(CryptDirError::PathConversion(path.to_path_buf())),
        }
    }

    if parts.is_empty() {
        return Err(CryptDirError::PathConversion(path.to_path_buf()));
    }

    Ok(parts.join("/"))
}

/// Resolve a manifest path against a host directory
pub fn manifest_path_to_host(root: &Path, manifest_path: &str) -> PathBuf {
    manifest_path
        .split('/')
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Check that a manifest path is relative and free of traversal components
pub fn is_valid_manifest_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != ".." && !part.contains('\0'))
}

/// Numeric-aware, case-insensitive ordering of two strings
///
/// Runs of ASCII digits compare by numeric value (`file2 < file10`), other
/// characters compare case-insensitively. Strings that compare equal under
/// those rules fall back to plain byte order so the result is total.
///
/// A string sorts before every string it is a prefix of, so a directory
/// always precedes its contents.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_cmp_folded(a, b).then_with(|| a.cmp(b))
}

fn natural_cmp_folded(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let left_run = take_digits(&mut left);
                let right_run = take_digits(&mut right);
                let ordering = compare_digit_runs(&left_run, &right_run);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                let ordering = l.to_lowercase().cmp(r.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

// Digit runs of any length compare by value without overflowing.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trimmed = a.trim_start_matches('0');
    let b_trimmed = b.trim_start_matches('0');
    a_trimmed
        .len()
        .cmp(&b_trimmed.len())
        .then_with(|| a_trimmed.cmp(b_trimmed))
        .then_with(|| a.len().cmp(&b.len()))
}

/// Absolute form of `path` with `.` and `..` folded away
///
/// The longest existing ancestor is canonicalized, so symbolic links resolve
/// the same way whether or not the full path exists yet.
pub fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    let mut missing = Vec::new();
    let mut existing = normalized.as_path();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

/// Format bytes in human-readable form
///
/// ```rust
/// assert_eq!(cryptdir::format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
