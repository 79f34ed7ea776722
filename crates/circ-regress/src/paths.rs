//! Lexical path helpers.
//!
//! Everything here works on path text only and never touches the filesystem,
//! so missing files (expected outputs, moved imports) normalise the same way
//! as existing ones.

use std::path::{Component, Path, PathBuf};

/// Make `path` absolute against the current directory and collapse `.`/`..`.
pub fn normalize(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(collapse(&absolute))
}

/// Collapse `.` and `..` components without consulting the filesystem.
///
/// `..` never climbs above the root.
pub fn collapse(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if !at_root {
                    out.pop();
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Project-relative `/`-separated form of `path`, if it lies under `root`.
pub fn project_relative(root: &Path, path: &Path) -> Option<String> {
    let path = normalize(path).ok()?;
    path.strip_prefix(root).ok().map(to_posix)
}
