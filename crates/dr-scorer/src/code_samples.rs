use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use dr_common::{CollaboratorError, DeveloperRecord, scoring::CodeSampleSource};
use tracing::debug;

/// Reads `<root>/<github_username>/*.py`, in file-name order.
#[derive(Debug, Clone)]
pub struct FsCodeSampleSource {
    root: PathBuf,
}

impl FsCodeSampleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn developer_dir(&self, username: &str) -> Option<PathBuf> {
        let safe = !username.is_empty()
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && username != "."
            && username != "..";
        safe.then(|| self.root.join(username))
    }
}

fn is_python(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "py")
}

fn retrieval_error(path: &Path, err: std::io::Error) -> CollaboratorError {
    CollaboratorError::CodeRetrieval(format!("{}: {err}", path.display()))
}

impl CodeSampleSource for FsCodeSampleSource {
    async fn fetch_samples(
        &self,
        record: &DeveloperRecord,
        max_samples: usize,
    ) -> Result<Vec<String>, CollaboratorError> {
        let Some(dir) = self.developer_dir(&record.github_username) else {
            return Ok(Vec::new());
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(retrieval_error(&dir, err)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| retrieval_error(&dir, err))?.path();
            if is_python(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut samples = Vec::with_capacity(paths.len().min(max_samples));
        for path in paths.into_iter().take(max_samples) {
            match fs::read_to_string(&path) {
                Ok(source) => samples.push(source),
                // non-UTF-8 files are not source we can analyze
                Err(err) if err.kind() == ErrorKind::InvalidData => {
                    debug!(path = %path.display(), "skipping non-utf8 file");
                }
                Err(err) => return Err(retrieval_error(&path, err)),
            }
        }

        debug!(
            developer = %record.github_username,
            samples = samples.len(),
            "loaded code samples"
        );
        Ok(samples)
    }

    fn rate_limited(&self) -> bool {
        false
    }
}
