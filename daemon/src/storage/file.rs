use std::path::Path;

use serde::{Deserialize, Serialize};

pub trait FileIoWithBackup {
    /// Writes `content` to `path`, keeping the previous file as `<path>.bak`.
    fn write_with_backup<P: AsRef<Path>>(path: P, content: &str) -> Result<(), std::io::Error> {
        let path = path.as_ref();

        if path.exists() {
            std::fs::copy(path, path.with_extension("bak"))?;
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Removes `path` together with its backup.
    fn remove_with_backup<P: AsRef<Path>>(path: P) -> Result<(), std::io::Error> {
        let path = path.as_ref();
        for target in [path.to_path_buf(), path.with_extension("bak")] {
            match std::fs::remove_file(&target) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err),
                _ => {}
            }
        }
        Ok(())
    }
}

/// JSON file handling shared by every persisted document.
pub trait Config: FileIoWithBackup {
    type ConfigType: Serialize + for<'de> Deserialize<'de>;

    fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Self::ConfigType> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self::ConfigType = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn save_config<P: AsRef<Path>>(path: P, config: &Self::ConfigType) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        Self::write_with_backup(path, &content)?;
        Ok(())
    }

    fn load_config_or_default<P: AsRef<Path>, F: FnOnce() -> Self::ConfigType>(
        path: P,
        default: F,
    ) -> anyhow::Result<Self::ConfigType> {
        match std::fs::metadata(path.as_ref()) {
            Ok(metadata) if metadata.is_file() => Self::load_config(path),
            _ => {
                let config = default();
                Self::save_config(path, &config)?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Numbers;

    impl FileIoWithBackup for Numbers {}

    impl Config for Numbers {
        type ConfigType = Vec<u32>;
    }

    #[test]
    fn default_is_written_then_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/numbers.json");

        assert_eq!(Numbers::load_config_or_default(&path, || vec![1]).unwrap(), vec![1]);
        assert_eq!(Numbers::load_config_or_default(&path, || vec![9]).unwrap(), vec![1]);

        Numbers::save_config(&path, &vec![2, 3]).unwrap();
        assert_eq!(Numbers::load_config(&path).unwrap(), vec![2, 3]);
        assert_eq!(
            Numbers::load_config(path.with_extension("bak")).unwrap(),
            vec![1]
        );

        Numbers::remove_with_backup(&path).unwrap();
        assert!(!path.exists());
        assert!(!path.with_extension("bak").exists());
        Numbers::remove_with_backup(&path).unwrap();
    }
}
