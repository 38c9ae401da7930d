//! Mapping container paths onto the host directory backing the container.

use crate::error::{LocalError, LocalResult};
use std::path::{Component, Path, PathBuf};

/// Resolve a container path (absolute or relative) under `root`.
///
/// `..` components are rejected rather than normalised.
pub fn resolve_under(root: &Path, container_path: &str) -> LocalResult<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(container_path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(LocalError::PathEscapesRoot(container_path.to_string()));
            }
        }
    }
    Ok(resolved)
}
