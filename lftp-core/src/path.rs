//! Path containment: map a peer-supplied filename onto a path inside a root directory.
//!
//! Two stages. [`resolve_under_root`] is purely lexical and rejects anything that
//! could climb out (absolute paths, `..`, drive prefixes, NUL). [`confirm_contained`]
//! then canonicalizes the nearest existing ancestor of the candidate and checks it
//! still lies under the canonical root, which catches symlinks pointing outside.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Lexically join `requested` onto `root`, refusing anything that could escape it.
pub fn resolve_under_root(root: &Path, requested: &str) -> Result<PathBuf, PathError> {
    if requested.is_empty() {
        return Err(PathError::Empty);
    }
    if requested.contains('\0') {
        return Err(PathError::InvalidComponent);
    }
    let mut out = root.to_path_buf();
    let mut pushed = false;
    for comp in Path::new(requested).components() {
        match comp {
            Component::Normal(part) => {
                out.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::ParentTraversal),
            Component::RootDir | Component::Prefix(_) => return Err(PathError::Absolute),
        }
    }
    if !pushed {
        return Err(PathError::Empty);
    }
    Ok(out)
}

/// Confirm `candidate` resolves inside `root` once symlinks are followed.
///
/// `candidate` need not exist yet (uploads); its deepest existing ancestor is checked.
/// Dangling symlinks anywhere on the way are refused.
pub fn confirm_contained(root: &Path, candidate: &Path) -> Result<(), PathError> {
    let root = root.canonicalize().map_err(PathError::Io)?;
    let mut ancestor = candidate;
    let resolved = loop {
        match ancestor.canonicalize() {
            Ok(p) => break p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink canonicalizes as missing, but opening it would
                // create the target wherever it points.
                if ancestor.symlink_metadata().is_ok() {
                    return Err(PathError::Escapes);
                }
                match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => return Err(PathError::Escapes),
                }
            }
            Err(e) => return Err(PathError::Io(e)),
        }
    };
    if resolved.starts_with(&root) {
        Ok(())
    } else {
        Err(PathError::Escapes)
    }
}

/// Both checks in one call. Returns the joined path.
pub fn contained_path(root: &Path, requested: &str) -> Result<PathBuf, PathError> {
    let path = resolve_under_root(root, requested)?;
    confirm_contained(root, &path)?;
    Ok(path)
}

/// Final component of a peer-supplied name, for writing into a local directory.
pub fn final_component(name: &str) -> Option<&str> {
    match Path::new(name).components().next_back()? {
        Component::Normal(part) => part.to_str(),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("empty filename")]
    Empty,
    #[error("absolute path not allowed")]
    Absolute,
    #[error("'..' not allowed")]
    ParentTraversal,
    #[error("invalid path component")]
    InvalidComponent,
    #[error("path escapes root")]
    Escapes,
    #[error("io: {0}")]
    Io(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_nested_names_join() {
        let root = Path::new("/srv");
        assert_eq!(
            resolve_under_root(root, "report.txt").unwrap(),
            PathBuf::from("/srv/report.txt")
        );
        assert_eq!(
            resolve_under_root(root, "./docs/a.txt").unwrap(),
            PathBuf::from("/srv/docs/a.txt")
        );
    }

    #[test]
    fn traversal_rejected() {
        let root = Path::new("/srv");
        assert!(matches!(
            resolve_under_root(root, "../../etc/passwd"),
            Err(PathError::ParentTraversal)
        ));
        assert!(matches!(
            resolve_under_root(root, "docs/../../x"),
            Err(PathError::ParentTraversal)
        ));
        assert!(matches!(
            resolve_under_root(root, "/etc/passwd"),
            Err(PathError::Absolute)
        ));
    }

    #[test]
    fn degenerate_names_rejected() {
        let root = Path::new("/srv");
        assert!(matches!(resolve_under_root(root, ""), Err(PathError::Empty)));
        assert!(matches!(resolve_under_root(root, "."), Err(PathError::Empty)));
        assert!(matches!(
            resolve_under_root(root, "a\0b"),
            Err(PathError::InvalidComponent)
        ));
    }

    #[test]
    fn confirm_accepts_new_file_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let p = resolve_under_root(dir.path(), "new.bin").unwrap();
        confirm_contained(dir.path(), &p).unwrap();
        let nested = resolve_under_root(dir.path(), "missing/dir/new.bin").unwrap();
        confirm_contained(dir.path(), &nested).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn confirm_rejects_symlink_escape() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let err = contained_path(root.path(), "link/secret").unwrap_err();
        assert!(matches!(err, PathError::Escapes));
    }

    #[cfg(unix)]
    #[test]
    fn confirm_rejects_dangling_symlink() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let target = base.path().join("outside/planted.txt");
        std::os::unix::fs::symlink(&target, root.join("link")).unwrap();

        assert!(matches!(
            contained_path(&root, "link"),
            Err(PathError::Escapes)
        ));
        assert!(matches!(
            contained_path(&root, "link/deeper.txt"),
            Err(PathError::Escapes)
        ));
        assert!(!target.exists());
    }

    #[test]
    fn final_component_strips_directories() {
        assert_eq!(final_component("a/b/c.txt"), Some("c.txt"));
        assert_eq!(final_component("c.txt"), Some("c.txt"));
        assert_eq!(final_component("a/.."), None);
        assert_eq!(final_component("/"), None);
    }
}
