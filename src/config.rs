//! Persisted settings file

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write as _},
    path::Path,
};

use crate::settings::{Hardware, Settings};

/// Settings file content, tagged with its format version
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "version")]
enum ConfigFile {
    /// First format version
    #[serde(rename = "1")]
    V1(Settings),
}

/// Configuration file error
#[derive(thiserror::Error, Debug)]
pub(crate) enum ConfigError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// File content is not valid
    #[error("Invalid content: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read settings from file
///
/// Hardware identifiers stored in the file are replaced by the ones probed at startup.
/// The result is not validated.
pub(crate) fn read(path: &Path, hardware: &Hardware) -> Result<Settings, ConfigError> {
    let reader = BufReader::new(File::open(path)?);
    let ConfigFile::V1(mut settings) = serde_json::from_reader(reader)?;
    if settings.hardware != *hardware {
        log::info!("Hardware in {path:?} differs from the current one, ignoring it");
        settings.hardware = hardware.clone();
    }
    Ok(settings)
}

/// Write settings to file
pub(crate) fn write(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &ConfigFile::V1(settings.clone()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
