//! Project identity derived from a directory path.

use std::path::{Path, PathBuf};

use learning_memory_core::models::project_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub id: String,
    pub name: String,
    pub dir: PathBuf,
}

impl ProjectIdentity {
    /// Resolve `dir` to an absolute, canonical path and hash it.
    ///
    /// A directory that does not exist is made absolute against the current
    /// directory without canonicalizing.
    pub fn resolve(dir: &Path) -> Self {
        let absolute = std::fs::canonicalize(dir).unwrap_or_else(|_| {
            if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(dir))
                    .unwrap_or_else(|_| dir.to_path_buf())
            }
        });
        let path_str = absolute.to_string_lossy();
        let name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_str.to_string());

        Self {
            id: project_id(&path_str),
            name,
            dir: absolute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_existing_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let project = tmp.path().join("webapp");
        std::fs::create_dir(&project).unwrap();

        let a = ProjectIdentity::resolve(&project);
        let b = ProjectIdentity::resolve(&project.join("."));
        assert_eq!(a.name, "webapp");
        assert_eq!(a.id.len(), 24);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_missing_dir_still_resolves() {
        let p = ProjectIdentity::resolve(Path::new("/definitely/not/here/proj"));
        assert_eq!(p.name, "proj");
        assert_eq!(p.dir, PathBuf::from("/definitely/not/here/proj"));
        assert_eq!(p.id, project_id("/definitely/not/here/proj"));
    }
}
