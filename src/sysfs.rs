//! Helpers to manipulate sysfs files
//!
//! Every call opens, reads or writes, and closes the file again: sysfs values change
//! between reads and some nodes only take effect while being written.

use std::{
    error::Error,
    fmt,
    fs::File,
    io::{Read as _, Write as _},
    path::{Path, PathBuf},
    str::{self, FromStr},
};

/// Ensure path is a valid sysfs file path, and normalizes it
pub(crate) fn ensure_sysfs_file(path: &Path) -> anyhow::Result<PathBuf> {
    let path = path.canonicalize()?;
    anyhow::ensure!(path.is_file(), "{path:?} missing or not a file");
    Ok(path)
}

/// Ensure path is a valid sysfs dir path, and normalizes it
pub(crate) fn ensure_sysfs_dir(path: &Path) -> anyhow::Result<PathBuf> {
    let path = path.canonicalize()?;
    anyhow::ensure!(path.is_dir(), "{path:?} missing or not a directory");
    Ok(path)
}

/// Write value to path
pub(crate) fn write_value<T>(path: &Path, val: T) -> anyhow::Result<()>
where
    T: fmt::Display,
{
    let mut f = File::create(path)?;
    f.write_all(format!("{val}\n").as_bytes())?;
    Ok(())
}

/// Read integer value from path
pub(crate) fn read_value<T>(path: &Path) -> anyhow::Result<T>
where
    T: FromStr + PartialEq + Copy,
    <T as FromStr>::Err: Error + Send + Sync,
    <T as FromStr>::Err: 'static,
{
    let mut file = File::open(path)?;
    let mut buf = vec![0; 32];
    let count = file.read(&mut buf)?;
    buf.truncate(count);
    let s = str::from_utf8(&buf)?.trim();
    Ok(s.parse::<T>()?)
}

/// Read integer value from path, logging failures
///
/// `None` means the value is currently unavailable, callers skip whatever depended on it.
pub(crate) fn read_integer<T>(path: &Path) -> Option<T>
where
    T: FromStr + PartialEq + Copy,
    <T as FromStr>::Err: Error + Send + Sync,
    <T as FromStr>::Err: 'static,
{
    read_value(path)
        .inspect_err(|err| log::error!("Failed to read {path:?}: {err:#}"))
        .ok()
}

/// Write integer value to path, logging failures
///
/// A failed write is never retried, the next poll cycle will compute a new value anyway.
pub(crate) fn write_integer<T>(path: &Path, val: T) -> bool
where
    T: fmt::Display,
{
    write_value(path, val)
        .inspect_err(|err| log::error!("Failed to write {path:?}: {err:#}"))
        .is_ok()
}

/// Write string to path, logging failures
pub(crate) fn write_string(path: &Path, val: &str) -> bool {
    write_value(path, val)
        .inspect_err(|err| log::error!("Failed to write {path:?}: {err:#}"))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn read_integer_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp2_input");
        fs::write(&path, "54321\n").unwrap();
        assert_eq!(read_integer::<i32>(&path), Some(54321));
    }

    #[test]
    fn read_integer_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_integer::<i32>(&dir.path().join("missing")), None);

        let path = dir.path().join("garbage");
        fs::write(&path, "not a number\n").unwrap();
        assert_eq!(read_integer::<i32>(&path), None);

        let path = dir.path().join("empty");
        fs::write(&path, "").unwrap();
        assert_eq!(read_integer::<u32>(&path), None);
    }

    #[test]
    fn write_integer_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaling_max_freq");
        fs::write(&path, "3500000\n").unwrap();
        assert!(write_integer(&path, 3_400_000_u32));
        assert_eq!(fs::read_to_string(&path).unwrap(), "3400000\n");
    }

    #[test]
    fn write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("pwm1");
        assert!(!write_integer(&path, 1));
        assert!(!write_string(&path, "powersave"));
    }

    #[test]
    fn write_string_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaling_governor");
        assert!(write_string(&path, "powersave"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "powersave\n");
    }

    #[test]
    fn ensure_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pwm1");
        fs::write(&file, "0\n").unwrap();
        assert!(ensure_sysfs_file(&file).is_ok());
        assert!(ensure_sysfs_file(dir.path()).is_err());
        assert!(ensure_sysfs_dir(dir.path()).is_ok());
        assert!(ensure_sysfs_dir(&file).is_err());
        assert!(ensure_sysfs_dir(&dir.path().join("missing")).is_err());
    }
}
