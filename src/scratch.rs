//! Temporary audio files for engines that only talk to the filesystem.
//!
//! Files are created right before an engine call and deleted when the
//! returned handle drops, whether the call succeeded or not.

use tempfile::NamedTempFile;

const PREFIX: &str = "speechd-hub-";

/// An empty scratch file the engine will write into.
pub fn reserve(suffix: &str) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(PREFIX)
        .suffix(suffix)
        .tempfile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let mut file = reserve(".wav").unwrap();
        file.write_all(b"RIFF").unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF");
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(".wav")));
        drop(file);
        assert!(!path.exists());
    }
}
