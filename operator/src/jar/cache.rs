use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::util::Error;

/// Content-addressed cache directory for resolved JAR files. Writes are
/// write-then-rename for atomicity; concurrent requests for the same cache
/// key are coalesced so at most one extraction/download happens per key.
pub struct JarCache {
    dir: PathBuf,
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
}

impl JarCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// The cache's root directory, e.g. for bind-mounting into a helper Job
    /// that needs to write directly into the cache.
    pub fn base_dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the cached path for `key` if present, otherwise runs
    /// `fetch` to populate it exactly once even under concurrent callers
    /// racing on the same key.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<PathBuf, Error>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = Result<(), Error>>,
    {
        let dest = self.path_for_key(key);
        if tokio::fs::metadata(&dest).await.is_ok() {
            return Ok(dest);
        }

        let notify = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.get(key) {
                Some(existing.clone())
            } else {
                inflight.insert(key.to_string(), Arc::new(Notify::new()));
                None
            }
        };

        if let Some(notify) = notify {
            // Another caller is already populating this key; wait for it.
            notify.notified().await;
            return Ok(dest);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Jar(format!("failed to create cache dir: {e}")))?;
        let tmp = self.dir.join(format!("{key}.tmp-{}", uuid::Uuid::new_v4()));
        let result = fetch(tmp.clone()).await;
        if result.is_ok() {
            tokio::fs::rename(&tmp, &dest)
                .await
                .map_err(|e| Error::Jar(format!("failed to finalize cache entry: {e}")))?;
        } else {
            let _ = tokio::fs::remove_file(&tmp).await;
        }

        let notify = self
            .inflight
            .lock()
            .await
            .remove(key)
            .expect("inflight entry inserted above");
        notify.notify_waiters();

        result.map(|_| dest)
    }
}

/// SHA-256 hex digest of a file's contents, used both as a cache-key
/// ingredient for container-extracted JARs and to verify an optional
/// checksum from the spec.
pub async fn sha256_file(path: &Path) -> Result<String, Error> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Jar(format!("failed to read '{}': {e}", path.display())))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_fetches_for_same_key_run_fetch_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(JarCache::new(dir.path()));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("foo.jar", |dest| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            tokio::fs::write(&dest, b"jar bytes").await.unwrap();
                            Ok(())
                        }
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
