//! Path splitting shared by lookup, parent lookup and `change_dir`.

use super::error::{Error, Result};

/// Forward-only iterator over the non-empty `/`-separated segments of a path.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    inner: std::str::Split<'a, char>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        self.inner.by_ref().find(|segment| !segment.is_empty())
    }
}

pub fn segments(path: &str) -> Segments<'_> {
    Segments {
        inner: path.split('/'),
    }
}

pub fn is_root(path: &str) -> bool {
    segments(path).next().is_none()
}

/// Splits a path into its parent path and last segment.
/// `/a/b` gives `("/a", "b")`, `/a` and `a` give `("/", "a")`.
pub fn split_last(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::NoParent(path.to_string()));
    }

    match trimmed.rfind('/') {
        Some(pos) => {
            let parent = trimmed[..pos].trim_end_matches('/');
            let parent = if parent.is_empty() { "/" } else { parent };
            Ok((parent, &trimmed[pos + 1..]))
        }
        None => Ok(("/", trimmed)),
    }
}

/// `current` without its last segment, keeping a trailing separator.
pub fn pop(current: &str) -> Result<String> {
    let (parent, _) = split_last(current)?;
    Ok(with_separator(parent))
}

/// Joins a target onto the working directory unless it is absolute.
pub fn absolute(current: &str, target: &str) -> String {
    if target.starts_with('/') {
        target.to_string()
    } else {
        format!("{}{}", with_separator(current), target)
    }
}

pub fn with_separator(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}
