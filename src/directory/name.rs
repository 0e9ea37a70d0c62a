use crate::{Error, Result};

/// Leading character of every directory name.
pub const DIRECTORY_MARKER: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn of(name: &str) -> EntryKind {
        if name.starts_with(DIRECTORY_MARKER) {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

/// Check `name` for an entry of `kind`. The whole name, directory marker
/// included, must fit in `max_bytes`.
pub fn validate(name: &str, kind: EntryKind, max_bytes: usize) -> Result<()> {
    let body = match kind {
        EntryKind::File => {
            if name.starts_with(DIRECTORY_MARKER) {
                return Err(illegal(name, "file names cannot start with '/'"));
            }
            name
        }
        EntryKind::Directory => match name.strip_prefix(DIRECTORY_MARKER) {
            Some(body) => body,
            None => return Err(illegal(name, "directory names must start with '/'")),
        },
    };
    if body.is_empty() {
        return Err(illegal(name, "name cannot be empty"));
    }
    if name.len() > max_bytes {
        return Err(illegal(
            name,
            &format!("name cannot be longer than {} bytes", max_bytes),
        ));
    }
    if body.starts_with(' ') || body.ends_with(' ') {
        return Err(illegal(name, "name cannot start or end with a space"));
    }
    if let Some(c) = body
        .chars()
        .find(|&c| !(c.is_ascii_alphanumeric() || c == '_' || c == ' '))
    {
        return Err(illegal(
            name,
            &format!("character {:?} is not allowed", c),
        ));
    }
    Ok(())
}

fn illegal(name: &str, reason: &str) -> Error {
    Error::IllegalName(format!("'{}': {}", name, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        for ok in &["a", "ok_1", "Report 2024", "Z"] {
            assert!(validate(ok, EntryKind::File, 42).is_ok(), "{}", ok);
        }
        for bad in &["", " leading", "trailing ", "bad&name", "/a", "a/b", "ü", "a-b"] {
            assert!(
                matches!(validate(bad, EntryKind::File, 42), Err(Error::IllegalName(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn directory_names() {
        assert!(validate("/docs", EntryKind::Directory, 42).is_ok());
        assert!(validate("/my docs", EntryKind::Directory, 42).is_ok());
        for bad in &["/", "docs", "/ docs", "//docs", "/do.cs"] {
            assert!(
                matches!(validate(bad, EntryKind::Directory, 42), Err(Error::IllegalName(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn length_counts_the_marker() {
        let file = "f".repeat(42);
        assert!(validate(&file, EntryKind::File, 42).is_ok());
        assert!(validate(&format!("{}f", file), EntryKind::File, 42).is_err());

        let dir = format!("/{}", "d".repeat(41));
        assert!(validate(&dir, EntryKind::Directory, 42).is_ok());
        assert!(validate(&format!("{}d", dir), EntryKind::Directory, 42).is_err());
    }

    #[test]
    fn kind_follows_marker() {
        assert_eq!(EntryKind::Directory, EntryKind::of("/x"));
        assert_eq!(EntryKind::File, EntryKind::of("x"));
    }
}
