//! Path shortening for filesystems with path-length limits.
//!
//! Renames are done in place and are not reversible. They must run before
//! the tree is scanned so that every recorded path is final.

use log::info;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Rewrites a directory tree so every path in it is usable on the target
/// filesystem.
pub trait PathSanitizer: Send + Sync {
    /// Returns the list of `(old, new)` renames that were performed.
    fn sanitize(&self, root: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>>;
}

/// Leaves the tree untouched.
pub struct NoSanitize;

impl PathSanitizer for NoSanitize {
    fn sanitize(&self, _root: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
        Ok(Vec::new())
    }
}

/// Renames directories whose name is longer than `max_len` characters to
/// the shortest free prefix of at least `min_len` characters.
pub struct ShortenLongNames {
    pub max_len: usize,
    pub min_len: usize,
}

impl Default for ShortenLongNames {
    fn default() -> Self {
        Self {
            max_len: 20,
            min_len: 5,
        }
    }
}

impl ShortenLongNames {
    fn shorten_children(
        &self,
        dir: &Path,
        renames: &mut Vec<(PathBuf, PathBuf)>,
    ) -> io::Result<()> {
        let mut children: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .map(|entry| entry.path())
            .collect();
        children.sort();

        for child in children {
            let target = match self.free_prefix(&child) {
                Some(short) => {
                    fs::rename(&child, &short)?;
                    info!("Renamed {} -> {}", child.display(), short.display());
                    renames.push((child, short.clone()));
                    short
                }
                None => child,
            };
            self.shorten_children(&target, renames)?;
        }
        Ok(())
    }

    fn free_prefix(&self, dir: &Path) -> Option<PathBuf> {
        let name = dir.file_name()?.to_string_lossy().into_owned();
        let chars: Vec<char> = name.chars().collect();
        if chars.len() <= self.max_len {
            return None;
        }
        let parent = dir.parent()?;
        (self.min_len..chars.len())
            .map(|len| parent.join(chars[..len].iter().collect::<String>()))
            .find(|candidate| !candidate.exists())
    }
}

impl PathSanitizer for ShortenLongNames {
    fn sanitize(&self, root: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
        let mut renames = Vec::new();
        self.shorten_children(root, &mut renames)?;
        Ok(renames)
    }
}

/// Prefix absolute paths with `\\?\` so Win32 APIs accept paths longer than
/// `MAX_PATH`. A no-op on other platforms.
pub fn extended_length_path(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        let text = path.to_string_lossy();
        if path.is_absolute() && !text.starts_with(r"\\?\") {
            return PathBuf::from(format!(r"\\?\{text}"));
        }
    }
    path.to_path_buf()
}
