//! Raw model bytes from a model reference.
//!
//! Compression is detected from content, not from the file name: a stream
//! that starts with the gzip magic is inflated, anything else is returned as
//! is and left for the safetensors parser to judge.

use flate2::read::GzDecoder;
use protego_core::{Result, ScanError};
use std::borrow::Cow;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub(crate) fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Serialized model bytes for `path`, inflated when gzip-compressed.
pub(crate) fn read_model_source(path: &Path) -> Result<Vec<u8>> {
    let raw = std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => {
            ScanError::ModelLoad(format!("File not found: model reference {}", path.display()))
        }
        _ => ScanError::ModelLoad(format!("Cannot read model {}: {e}", path.display())),
    })?;
    let inflated = match inflate(&raw, &path.display().to_string())? {
        Cow::Owned(inflated) => Some(inflated),
        Cow::Borrowed(_) => None,
    };
    Ok(inflated.unwrap_or(raw))
}

/// `bytes` unchanged, or inflated when they carry the gzip magic.
///
/// `origin` names the model in error messages.
pub(crate) fn inflate<'a>(bytes: &'a [u8], origin: &str) -> Result<Cow<'a, [u8]>> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut inflated = Vec::with_capacity(bytes.len().saturating_mul(2));
    GzDecoder::new(bytes)
        .read_to_end(&mut inflated)
        .map_err(|e| ScanError::ModelLoad(format!("Corrupt gzip model {origin}: {e}")))?;
    debug!(
        origin,
        compressed = bytes.len(),
        inflated = inflated.len(),
        "Inflated gzip model"
    );
    Ok(Cow::Owned(inflated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn gzip(payload: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_compression_is_detected_from_content() {
        let dir = tempfile::tempdir().unwrap();
        // Compressed data under a plain name, plain data under a .gz name.
        let packed = dir.path().join("weights.safetensors");
        std::fs::write(&packed, gzip(b"layer bytes")).unwrap();
        let plain = dir.path().join("weights.safetensors.gz");
        std::fs::write(&plain, b"layer bytes").unwrap();

        assert_eq!(read_model_source(&packed).unwrap(), b"layer bytes");
        assert_eq!(read_model_source(&plain).unwrap(), b"layer bytes");
    }

    #[test]
    fn test_plain_bytes_are_borrowed() {
        let bytes = inflate(b"abc", "mem").unwrap();
        assert!(matches!(bytes, Cow::Borrowed(_)));
        assert_eq!(&*bytes, b"abc");
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn test_errors_name_the_model() {
        let err = read_model_source(Path::new("/nonexistent/resnet.safetensors")).unwrap_err();
        assert_eq!(err.kind(), protego_core::ErrorKind::ModelLoad);
        assert!(err.to_string().contains("/nonexistent/resnet.safetensors"), "{err}");

        let mut truncated = gzip(b"layer bytes");
        truncated.truncate(12);
        let err = inflate(&truncated, "cached-model").unwrap_err();
        assert!(err.to_string().contains("Corrupt gzip model cached-model"), "{err}");
    }
}
