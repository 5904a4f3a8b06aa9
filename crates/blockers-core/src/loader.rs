//! Rule-set loader.
//!
//! Rule data lives at `<data_dir>/<version>/<file_name>`. Buffers are read
//! whole and handed to a matcher constructor, which takes ownership.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::RuleFileConfig;
use crate::error::{BlockersError, Result, RuleFamily};

/// Raw bytes of one rule database.
pub type RuleSetBuffer = Vec<u8>;

#[derive(Debug, Clone)]
pub struct RuleSetLoader {
    data_dir: PathBuf,
}

impl RuleSetLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, file: &RuleFileConfig) -> PathBuf {
        self.data_dir.join(&file.version).join(&file.file_name)
    }

    /// Resolve the path of a rule file that is opened by someone else
    /// (the HTTPS rule database), checking only that it exists.
    pub fn resolve(&self, file: &RuleFileConfig) -> Result<PathBuf> {
        let path = self.path_for(file);
        if !path.is_file() {
            return Err(BlockersError::MissingRuleData(path));
        }
        Ok(path)
    }

    /// Read a rule file into memory. Empty files are rejected.
    pub fn load(&self, family: RuleFamily, file: &RuleFileConfig) -> Result<RuleSetBuffer> {
        let path = self.resolve(file)?;
        let buffer = fs::read(&path).map_err(|source| BlockersError::Io {
            path: path.clone(),
            source,
        })?;
        if buffer.is_empty() {
            return Err(BlockersError::invalid(
                family,
                format!("'{}' is empty", path.display()),
            ));
        }
        debug!("Loaded {} bytes of {} rule data from {}", buffer.len(), family, path.display());
        Ok(buffer)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::RuleFileConfig;

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    /// Fresh, empty directory under the system temp dir.
    pub(crate) fn temp_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "blockers-{}-{}-{}",
            name,
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub(crate) fn write_rule_file(data_dir: &Path, file: &RuleFileConfig, contents: &[u8]) {
        let dir = data_dir.join(&file.version);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(&file.file_name), contents).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_load_versioned_file() {
        let dir = temp_data_dir("loader");
        let file = RuleFileConfig::new("3", "rules.dat");
        write_rule_file(&dir, &file, b"||ads.example^");

        let loader = RuleSetLoader::new(&dir);
        assert_eq!(loader.path_for(&file), dir.join("3").join("rules.dat"));
        let buffer = loader.load(RuleFamily::AdBlock, &file).unwrap();
        assert_eq!(buffer, b"||ads.example^");
    }

    #[test]
    fn test_missing_file() {
        let dir = temp_data_dir("loader-missing");
        let loader = RuleSetLoader::new(&dir);
        let err = loader
            .load(RuleFamily::AdBlock, &RuleFileConfig::new("1", "nope.dat"))
            .unwrap_err();
        assert!(matches!(err, BlockersError::MissingRuleData(_)));
    }

    #[test]
    fn test_empty_file_is_invalid() {
        let dir = temp_data_dir("loader-empty");
        let file = RuleFileConfig::new("1", "empty.dat");
        write_rule_file(&dir, &file, b"");
        let err = RuleSetLoader::new(&dir)
            .load(RuleFamily::TrackingProtection, &file)
            .unwrap_err();
        assert!(matches!(
            err,
            BlockersError::InvalidRuleData { family: RuleFamily::TrackingProtection, .. }
        ));
    }
}
