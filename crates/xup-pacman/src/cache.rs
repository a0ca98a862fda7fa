use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use xup_core::error::Result;

/// Measures the package cache directories. Cleaning itself is delegated to paccache.
#[derive(Debug, Clone)]
pub struct CacheManager {
    cache_dirs: Vec<PathBuf>,
}

impl CacheManager {
    pub fn new(dirs: &[String]) -> Self {
        Self {
            cache_dirs: dirs.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn get_size(&self) -> Result<u64> {
        let mut total = 0u64;

        for dir in &self.cache_dirs {
            if dir.exists() {
                total += Self::dir_size(dir)?;
            }
        }

        debug!("Package cache size: {} bytes", total);
        Ok(total)
    }

    fn dir_size(path: &Path) -> Result<u64> {
        let mut size = 0u64;

        if path.is_dir() {
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let metadata = entry.metadata()?;

                if metadata.is_file() {
                    size += metadata.len();
                } else if metadata.is_dir() {
                    size += Self::dir_size(&entry.path())?;
                }
            }
        }

        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_size_walks_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo-1.0-1-x86_64.pkg.tar.zst"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("foo-1.0-1-x86_64.pkg.tar.zst.sig"), vec![0u8; 10]).unwrap();
        fs::create_dir(dir.path().join("download-abc")).unwrap();
        fs::write(dir.path().join("download-abc/bar.part"), vec![0u8; 50]).unwrap();

        let manager = CacheManager::new(&[
            dir.path().to_string_lossy().to_string(),
            "/nonexistent/cache".to_string(),
        ]);
        assert_eq!(manager.get_size().unwrap(), 160);
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let manager = CacheManager::new(&["/nonexistent/cache".to_string()]);
        assert_eq!(manager.get_size().unwrap(), 0);
    }
}
