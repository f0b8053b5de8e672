//! Structural verification of completed archives.
//!
//! A downloaded file only counts as complete once it looks like an archive
//! all the way down: plausible size, correct leading signature, readable
//! central directory, and a matching CRC for every member. Any structural
//! read error is a verification failure, never a panic.

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};
use zip::ZipArchive;

use super::constants::{ARCHIVE_SIGNATURE, MIN_VALID_ARCHIVE_BYTES};

/// Reasons a completed file fails verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The file is not on disk.
    #[error("file does not exist: {path}")]
    Missing {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The file is too small to be a real archive.
    #[error("file too small to be a valid archive ({bytes} bytes): {path}")]
    TooSmall {
        /// Path that was checked.
        path: PathBuf,
        /// Observed size in bytes.
        bytes: u64,
    },

    /// The leading bytes are not the archive signature.
    #[error("invalid archive signature: {path}")]
    BadSignature {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The archive's internal index could not be read.
    #[error("unreadable archive structure in {path}: {detail}")]
    Structure {
        /// Path that was checked.
        path: PathBuf,
        /// What the archive reader reported.
        detail: String,
    },

    /// A member's checksum did not match its content.
    #[error("corrupted member '{name}' in {path}: {detail}")]
    CorruptMember {
        /// Path that was checked.
        path: PathBuf,
        /// Name of the failing member.
        name: String,
        /// What the archive reader reported.
        detail: String,
    },
}

/// Structurally validates a completed archive.
///
/// Checks, in order: the file exists and exceeds the minimum plausible
/// size, the leading bytes match the archive signature, the central
/// directory is readable, and every member's CRC32 matches its content.
///
/// This does blocking IO proportional to the archive size; callers on the
/// async runtime should wrap it in `spawn_blocking`.
///
/// # Errors
///
/// Returns the first failing [`VerifyError`] check; `Ok(())` means the
/// archive passed all of them.
#[instrument(fields(path = %path.display()))]
pub fn verify_archive(path: &Path) -> Result<(), VerifyError> {
    let metadata = std::fs::metadata(path).map_err(|_| VerifyError::Missing {
        path: path.to_path_buf(),
    })?;

    if metadata.len() < MIN_VALID_ARCHIVE_BYTES {
        return Err(VerifyError::TooSmall {
            path: path.to_path_buf(),
            bytes: metadata.len(),
        });
    }

    let mut file = std::fs::File::open(path).map_err(|e| VerifyError::Structure {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|e| VerifyError::Structure {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    if &magic[..ARCHIVE_SIGNATURE.len()] != ARCHIVE_SIGNATURE {
        return Err(VerifyError::BadSignature {
            path: path.to_path_buf(),
        });
    }

    // Re-open from the start for the archive reader.
    let file = std::fs::File::open(path).map_err(|e| VerifyError::Structure {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| VerifyError::Structure {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    for index in 0..archive.len() {
        let mut member = archive.by_index(index).map_err(|e| VerifyError::Structure {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let name = member.name().to_string();
        // Reading a member to the end is what triggers its CRC check.
        if let Err(e) = std::io::copy(&mut member, &mut std::io::sink()) {
            return Err(VerifyError::CorruptMember {
                path: path.to_path_buf(),
                name,
                detail: e.to_string(),
            });
        }
    }

    debug!(members = archive.len(), "archive verified");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Seek, SeekFrom, Write};

    use tempfile::TempDir;
    use zip::CompressionMethod;
    use zip::write::FileOptions;

    /// Builds a stored (uncompressed) archive with one padded member so the
    /// on-disk size clears the minimum threshold.
    fn build_archive(payload_len: usize) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("data.bin", options).unwrap();
        writer.write_all(&vec![0xA5u8; payload_len]).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_verify_valid_archive_passes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("takeout-1-001.zip");
        std::fs::write(&path, build_archive(4096)).unwrap();

        verify_archive(&path).unwrap();
    }

    #[test]
    fn test_verify_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = verify_archive(&dir.path().join("takeout-1-001.zip"));
        assert!(matches!(result, Err(VerifyError::Missing { .. })));
    }

    #[test]
    fn test_verify_too_small_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("takeout-1-001.zip");
        std::fs::write(&path, b"PK\x03\x04 tiny").unwrap();

        let result = verify_archive(&path);
        match result {
            Err(VerifyError::TooSmall { bytes, .. }) => assert!(bytes < MIN_VALID_ARCHIVE_BYTES),
            other => panic!("Expected TooSmall, got: {other:?}"),
        }
    }

    #[test]
    fn test_verify_bad_signature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("takeout-1-001.zip");
        let mut body = vec![0u8; 4096];
        body[0] = b'<';
        body[1] = b'!';
        std::fs::write(&path, body).unwrap();

        let result = verify_archive(&path);
        assert!(matches!(result, Err(VerifyError::BadSignature { .. })));
    }

    #[test]
    fn test_verify_truncated_archive_is_structure_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("takeout-1-001.zip");
        let mut body = build_archive(4096);
        // Drop the central directory.
        body.truncate(body.len() / 2);
        // Keep it above the size floor so the structural check is reached.
        assert!(body.len() as u64 >= MIN_VALID_ARCHIVE_BYTES);
        std::fs::write(&path, body).unwrap();

        let result = verify_archive(&path);
        assert!(matches!(result, Err(VerifyError::Structure { .. })));
    }

    #[test]
    fn test_verify_corrupt_member_fails_crc() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("takeout-1-001.zip");
        let body = build_archive(4096);
        std::fs::write(&path, &body).unwrap();

        // Flip one payload byte in the stored member; the structure stays
        // intact but the member CRC no longer matches.
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(200)).unwrap();
        file.write_all(&[0x5A]).unwrap();
        drop(file);

        let result = verify_archive(&path);
        assert!(
            matches!(
                result,
                Err(VerifyError::CorruptMember { .. }) | Err(VerifyError::Structure { .. })
            ),
            "Expected corruption failure, got: {result:?}"
        );
    }
}
