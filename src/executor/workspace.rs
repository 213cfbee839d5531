//! Per-run local working directory.
//!
//! Holds transport state such as ssh control sockets. The directory is
//! removed when the workspace is closed or dropped, whichever comes first.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

/// Temporary directory owned by one run
#[derive(Debug)]
pub struct RunWorkspace {
    dir: TempDir,
}

impl RunWorkspace {
    /// Create the workspace under `root`, or the system temp directory.
    ///
    /// The name stays short: unix socket paths are limited to about a
    /// hundred bytes and control sockets live in here.
    pub fn create(root: Option<&Path>, run_id: Uuid) -> io::Result<Self> {
        let prefix = format!("fanout-{}-", &run_id.simple().to_string()[..8]);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                let root = PathBuf::from(shellexpand::tilde(&root.to_string_lossy()).into_owned());
                std::fs::create_dir_all(&root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        debug!(path = %dir.path().display(), "Created run workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory, reporting failures
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "Removed run workspace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_removed_on_close() {
        let root = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(Some(root.path()), Uuid::new_v4()).unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.starts_with(root.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("fanout-"));

        std::fs::write(path.join("socket"), "x").unwrap();
        workspace.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let path = {
            let workspace = RunWorkspace::create(Some(&nested), Uuid::new_v4()).unwrap();
            workspace.path().to_path_buf()
        };
        assert!(nested.exists());
        assert!(!path.exists());
    }
}
