use std::path::{Component, Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const OUTBOX_FILE: &str = "outbox.json";

pub fn syncbox_root(home: &Path) -> PathBuf {
    home.join(".syncbox")
}

/// Config file the CLI reads when `--config` is not given.
pub fn config_path(home: &Path) -> PathBuf {
    syncbox_root(home).join(DEFAULT_CONFIG_FILE)
}

pub fn outbox_path(state_dir: &Path) -> PathBuf {
    state_dir.join(OUTBOX_FILE)
}

/// `path` relative to `root`, `/`-separated.
///
/// Returns `None` for the root itself and for paths outside it.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_strips_root() {
        let root = Path::new("/home/user/box");
        assert_eq!(
            relative_path(root, Path::new("/home/user/box/sub/a.txt")).as_deref(),
            Some("sub/a.txt")
        );
        assert_eq!(
            relative_path(root, Path::new("/home/user/box/a.txt")).as_deref(),
            Some("a.txt")
        );
    }

    #[test]
    fn relative_path_rejects_root_and_outsiders() {
        let root = Path::new("/home/user/box");
        assert_eq!(relative_path(root, root), None);
        assert_eq!(relative_path(root, Path::new("/home/user/other/a.txt")), None);
        assert_eq!(relative_path(root, Path::new("/home/user/boxed/a.txt")), None);
        assert_eq!(relative_path(root, Path::new("/home/user/box/../x")), None);
    }
}
