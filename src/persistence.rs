//! JSON snapshots of networks and configurations.
//!
//! Networks rebuild their scratch buffers while being deserialized, a loaded
//! [Scae](crate::network::Scae) or [Ffcnn](crate::network::Ffcnn) is ready to compute.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

pub fn save<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> anyhow::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn load<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> anyhow::Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Saves `value` only if `path` doesn't exist yet. Returns whether it was written.
pub fn try_save<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> anyhow::Result<bool> {
    if path.as_ref().exists() {
        return Ok(false);
    }
    fs::write(path, serde_json::to_string(value)?)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;

    #[test]
    fn configurations_survive_a_save() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("training.json");
        let config = TrainingConfig {
            learning_rate: Some(0.125),
            ..TrainingConfig::default()
        };
        save(&config, &path)?;
        assert_eq!(load::<TrainingConfig, _>(&path)?, config);
        assert!(!try_save(&config, &path)?);
        Ok(())
    }

    #[test]
    fn missing_files_are_errors() {
        assert!(load::<TrainingConfig, _>("/nonexistent/scae/network.json").is_err());
    }
}
