use super::{ObjectReader, ObjectStore, StoreError};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Serves objects from a directory; keys are paths relative to `root`.
///
/// Handy for replaying a downloaded feed without touching the remote store.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    async fn fetch(&self, key: &str) -> Result<ObjectReader, StoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn fetches_file_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("products-1.jsonl"), b"{\"id\":1}\n").unwrap();

        let store = LocalObjectStore::new(dir.path());
        let mut reader = store.fetch("products-1.jsonl").await.expect("object exists");
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();

        assert_eq!(body, "{\"id\":1}\n");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path());

        let err = store.fetch("nope.jsonl").await.err().expect("missing object");
        assert!(matches!(err, StoreError::NotFound { key } if key == "nope.jsonl"));
    }

    #[tokio::test]
    async fn keys_cannot_escape_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path());

        for key in ["../secret.jsonl", "/etc/passwd", ""] {
            let err = store.fetch(key).await.err().expect("rejected key");
            assert!(matches!(err, StoreError::InvalidKey(_)), "key {key:?}");
        }
    }
}
