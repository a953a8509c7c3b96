//! Persistence helpers shared by the model families.
//!
//! Files are opened for the duration of a single call; buffered writers are
//! flushed explicitly so write errors surface instead of being lost on drop.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{PolarityError, Result};

/// Serialize `value` as JSON into `path`, creating parent directories.
pub fn write_json<T: Serialize + ?Sized, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Read JSON from `path`; a missing file is reported as `NotFound`.
pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(PolarityError::NotFound(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Fail with `NotFound` unless `dir` holds every file in `required`.
pub fn ensure_saved<P: AsRef<Path>>(dir: P, required: &[&str]) -> Result<()> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(PolarityError::NotFound(dir.to_path_buf()));
    }
    for name in required {
        let file = dir.join(name);
        if !file.exists() {
            return Err(PolarityError::NotFound(file));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vocab.json");
        let mut vocab = HashMap::new();
        vocab.insert("good".to_string(), 2u32);
        write_json(&path, &vocab).unwrap();
        let back: HashMap<String, u32> = read_json(&path).unwrap();
        assert_eq!(back, vocab);
    }

    #[test]
    fn test_missing_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Vec<u32>, _>(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, PolarityError::NotFound(_)));
        assert!(matches!(
            ensure_saved(dir.path(), &["model.safetensors"]),
            Err(PolarityError::NotFound(_))
        ));
        assert!(matches!(
            ensure_saved(dir.path().join("absent"), &[]),
            Err(PolarityError::NotFound(_))
        ));
    }
}
