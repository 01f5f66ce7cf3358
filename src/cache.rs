use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, info, warn};

/// Flat directory of downloaded media, bounded to the `max_files` most
/// recently modified entries.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    max_files: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    modified: SystemTime,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            max_files,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn path_for(&self, id: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{id}.{ext}"))
    }

    /// Removes the oldest files until at most `max_files` remain and returns
    /// the paths that were deleted. Individual failures are logged and skipped.
    pub async fn evict(&self) -> Vec<PathBuf> {
        self.evict_keeping(None).await
    }

    /// Same as [`CacheStore::evict`], but the cache file named like `keep` is
    /// never removed, even when it is the oldest. It still counts toward the limit.
    pub async fn evict_keeping(&self, keep: Option<&Path>) -> Vec<PathBuf> {
        let entries = self.entries().await;
        let overflow = entries.len().saturating_sub(self.max_files);
        if overflow == 0 {
            return Vec::new();
        }

        let mut entries: Vec<CacheEntry> = entries
            .into_iter()
            .filter(|entry| keep.is_none_or(|keep| entry.path.file_name() != keep.file_name()))
            .collect();
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut removed = Vec::with_capacity(overflow);
        for entry in entries.into_iter().take(overflow) {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    debug!("Evicted cache file {:?}", entry.path);
                    removed.push(entry.path);
                }
                Err(error) if error.kind() == ErrorKind::NotFound => {
                    debug!("Cache file {:?} was already removed", entry.path);
                }
                Err(error) => {
                    warn!("Failed to remove cache file {:?}: {error}", entry.path);
                }
            }
        }

        if !removed.is_empty() {
            info!(
                "Cache eviction removed {} file(s), limit is {}",
                removed.len(),
                self.max_files
            );
        }
        removed
    }

    /// Maps a requested file name onto an existing regular file inside the
    /// cache directory. Names that could escape the directory are rejected.
    pub async fn resolve(&self, filename: &str) -> Option<PathBuf> {
        if !is_plain_filename(filename) {
            warn!("Rejected cache lookup for {:?}", filename);
            return None;
        }

        let path = self.dir.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }

    async fn entries(&self) -> Vec<CacheEntry> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(read_dir) => read_dir,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("Could not open cache directory {:?}: {error}", self.dir);
                }
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!("Could not list cache directory {:?}: {error}", self.dir);
                    break;
                }
            };

            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("Could not read metadata of {:?}: {error}", path);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            match metadata.modified() {
                Ok(modified) => entries.push(CacheEntry { path, modified }),
                Err(error) => warn!("Could not read modification time of {:?}: {error}", path),
            }
        }
        entries
    }
}

fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\'])
        && !filename.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs::File, time::Duration};
    use tempfile::tempdir;

    fn write_with_age(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn evicts_oldest_files_first() {
        let dir = tempdir().unwrap();
        for (index, age) in [50, 10, 40, 20, 30].into_iter().enumerate() {
            write_with_age(dir.path(), &format!("media{index}.mp4"), age);
        }

        let store = CacheStore::new(dir.path(), 3);
        let mut removed = store.evict().await;
        removed.sort();

        assert_eq!(
            removed,
            vec![dir.path().join("media0.mp4"), dir.path().join("media2.mp4")]
        );
        assert_eq!(
            file_names(dir.path()),
            vec!["media1.mp4", "media3.mp4", "media4.mp4"]
        );
    }

    #[tokio::test]
    async fn within_limit_is_a_no_op() {
        let dir = tempdir().unwrap();
        write_with_age(dir.path(), "a.mp3", 5);
        write_with_age(dir.path(), "b.mp3", 1);

        let store = CacheStore::new(dir.path(), 2);
        assert!(store.evict().await.is_empty());
        assert_eq!(file_names(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn subdirectories_are_not_counted_or_removed() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_with_age(dir.path(), "old.webm", 100);
        write_with_age(dir.path(), "new.webm", 1);

        let store = CacheStore::new(dir.path(), 1);
        let removed = store.evict().await;

        assert_eq!(removed, vec![dir.path().join("old.webm")]);
        assert_eq!(file_names(dir.path()), vec!["nested", "new.webm"]);
    }

    #[tokio::test]
    async fn missing_directory_evicts_nothing() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("absent"), 1);
        assert!(store.evict().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_eviction_converges() {
        let dir = tempdir().unwrap();
        for index in 0..8 {
            write_with_age(dir.path(), &format!("{index}.mp4"), 100 - index);
        }

        let store = CacheStore::new(dir.path(), 4);
        let (first, second) = tokio::join!(store.evict(), store.evict());
        assert!(first.len() + second.len() >= 4);
        store.evict().await;

        assert_eq!(file_names(dir.path()), vec!["4.mp4", "5.mp4", "6.mp4", "7.mp4"]);
    }

    #[tokio::test]
    async fn kept_file_survives_even_when_oldest() {
        let dir = tempdir().unwrap();
        let fresh = write_with_age(dir.path(), "fresh.mp4", 365 * 24 * 3600);
        for index in 0..3 {
            write_with_age(dir.path(), &format!("{index}.mp4"), 100 - index);
        }

        let store = CacheStore::new(dir.path(), 3);
        let removed = store.evict_keeping(Some(&fresh)).await;

        assert_eq!(removed, vec![dir.path().join("0.mp4")]);
        assert_eq!(file_names(dir.path()), vec!["1.mp4", "2.mp4", "fresh.mp4"]);
    }

    #[tokio::test]
    async fn resolve_rejects_traversal_and_missing_files() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir(&cache_dir).unwrap();
        write_with_age(&cache_dir, "abc.mp4", 1);
        write_with_age(dir.path(), "secret.txt", 1);

        let store = CacheStore::new(&cache_dir, 10);
        assert_eq!(store.resolve("abc.mp4").await, Some(cache_dir.join("abc.mp4")));
        assert_eq!(store.resolve("missing.mp4").await, None);
        assert_eq!(store.resolve("../secret.txt").await, None);
        assert_eq!(store.resolve("..").await, None);
        assert_eq!(store.resolve("").await, None);
    }

    #[test]
    fn cache_paths_follow_id_and_extension() {
        let store = CacheStore::new("cache", 10);
        assert_eq!(store.path_for("dQw4w9WgXcQ", "mp3"), PathBuf::from("cache/dQw4w9WgXcQ.mp3"));
    }
}
