use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// The locally cached worker id, read only when the coordination backend
/// cannot be trusted.
///
/// The file holds a single line `workerID=<int>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWorkerIdFile {
    path: PathBuf,
}

impl LocalWorkerIdFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/<app_name>/leafconf/<port>/workerID.toml`
    pub fn for_port(config_dir: impl AsRef<Path>, app_name: &str, port: u16) -> Self {
        Self::new(
            config_dir
                .as_ref()
                .join(app_name)
                .join("leafconf")
                .join(port.to_string())
                .join("workerID.toml"),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `worker_id`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on any filesystem failure.
    pub fn write(&self, worker_id: i64) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, format!("workerID={worker_id}"))?;
        Ok(())
    }

    /// Reads the cached worker id; `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidWorkerIdFile`] if the content is not
    ///   `workerID=<int>`.
    /// - [`Error::Io`] on any other filesystem failure.
    pub fn read(&self) -> Result<Option<i64>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        content
            .trim()
            .strip_prefix("workerID=")
            .and_then(|value| value.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| Error::InvalidWorkerIdFile {
                path: self.path.display().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_scoped_by_app_and_port() {
        let file = LocalWorkerIdFile::for_port("/etc/leaf", "orders", 8080);
        assert_eq!(
            file.path(),
            Path::new("/etc/leaf/orders/leafconf/8080/workerID.toml")
        );
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = LocalWorkerIdFile::for_port(dir.path(), "orders", 8080);

        assert_eq!(file.read().unwrap(), None);
        file.write(42).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "workerID=42");
        assert_eq!(file.read().unwrap(), Some(42));

        file.write(7).unwrap();
        assert_eq!(file.read().unwrap(), Some(7));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = LocalWorkerIdFile::new(dir.path().join("workerID.toml"));

        for content in ["", "workerID=", "workerId=3", "workerID=three"] {
            fs::write(file.path(), content).unwrap();
            assert!(
                matches!(file.read(), Err(Error::InvalidWorkerIdFile { .. })),
                "accepted {content:?}"
            );
        }
        fs::write(file.path(), "workerID=3\n").unwrap();
        assert_eq!(file.read().unwrap(), Some(3));
    }
}
