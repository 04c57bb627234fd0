// Path handling for destination keys
// Keys are always '/'-separated regardless of the platform the source lives on

use std::path::{Component, Path};

use crate::error::{Result, SyncError};

/// Derive the object key for `path` relative to `root`.
///
/// Both paths must be absolute and `path` must live under `root`. Each
/// normal component is joined with `/`, so platform separators never leak
/// into the key.
pub fn destination_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| SyncError::Config {
        path: Some(path.to_path_buf()),
        reason: format!("path is outside the source root {}", root.display()),
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| SyncError::NonUtf8Path {
                    path: path.to_path_buf(),
                })?;
                parts.push(part);
            }
            Component::CurDir => continue,
            // strip_prefix on two absolute paths never yields these
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::Config {
                    path: Some(path.to_path_buf()),
                    reason: "relative path escapes the source root".to_string(),
                });
            }
        }
    }

    if parts.is_empty() {
        return Err(SyncError::Config {
            path: Some(path.to_path_buf()),
            reason: "the source root itself has no object key".to_string(),
        });
    }

    Ok(parts.join("/"))
}
