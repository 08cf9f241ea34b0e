//! SHA-256 helpers and constant-time comparison.

use crate::{TollgateError, TollgateResult};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of a file, streamed in 8 KiB chunks.
pub async fn sha256_file_hex(path: &Path) -> TollgateResult<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TollgateError::DownloadFailed(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| TollgateError::DownloadFailed(format!("Failed to read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file against an expected hex SHA-256.
///
/// The expected value is trimmed and lowercased before comparison.
pub async fn verify_sha256_file(path: &Path, expected: &str) -> TollgateResult<()> {
    let actual = sha256_file_hex(path).await?;
    let expected = expected.trim().to_lowercase();

    if !constant_time_eq(actual.as_bytes(), expected.as_bytes()) {
        return Err(TollgateError::ChecksumMismatch { expected, actual });
    }

    Ok(())
}

/// Compare two byte strings without short-circuiting on the first mismatch.
///
/// Length is not secret here; tokens always have the same length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_hex_empty() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hex_hello_world() {
        assert_eq!(sha256_hex(b"hello world"), HELLO_WORLD_SHA256);
    }

    #[tokio::test]
    async fn test_sha256_file_matches_slice() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "hello world").unwrap();

        let hash = sha256_file_hex(file.path()).await.unwrap();
        assert_eq!(hash, HELLO_WORLD_SHA256);
    }

    #[tokio::test]
    async fn test_verify_sha256_file_normalizes_expected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "hello world").unwrap();

        let expected = format!("  {}  ", HELLO_WORLD_SHA256.to_uppercase());
        verify_sha256_file(file.path(), &expected).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_sha256_file_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "hello world").unwrap();

        let result = verify_sha256_file(file.path(), &"0".repeat(64)).await;
        assert!(matches!(result, Err(TollgateError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
