//! Container hardening: ZIP bomb protection, entry-name guards, size limits, DRM detection.

use serde::{Deserialize, Serialize};

use crate::error::SecurityError;

/// Entries smaller than this are never treated as ZIP bombs; short, highly
/// repetitive markup compresses far beyond any sane ratio.
const RATIO_CHECK_FLOOR_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLimits {
    /// Maximum decompression ratio before flagging as ZIP bomb.
    pub max_compression_ratio: u64,
    /// Maximum number of entries allowed in the container.
    pub max_file_count: u64,
    /// Maximum size of a single entry in bytes.
    pub max_resource_size_bytes: u64,
    /// Maximum total decompressed size in bytes.
    pub max_total_size_bytes: u64,
    /// Markup deeper than this is truncated when building element trees.
    pub max_nesting_depth: u32,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_compression_ratio: 100,
            max_file_count: 10_000,
            max_resource_size_bytes: 200 * 1024 * 1024, // 200 MB
            max_total_size_bytes: 1024 * 1024 * 1024,   // 1 GB
            max_nesting_depth: 200,
        }
    }
}

/// Reject entry names that would escape the container root: absolute paths,
/// drive letters, and `..` segments. Entry names always use `/`.
pub fn check_entry_name(name: &str) -> Result<(), SecurityError> {
    let escapes = name.starts_with('/')
        || name.starts_with('\\')
        || name.as_bytes().get(1) == Some(&b':')
        || name.split(['/', '\\']).any(|segment| segment == "..");
    if escapes {
        return Err(SecurityError::PathTraversal {
            path: name.to_string(),
        });
    }
    Ok(())
}

/// ZIP bomb detection for a single entry.
pub fn check_compression_ratio(
    name: &str,
    compressed_size: u64,
    uncompressed_size: u64,
    limits: &SecurityLimits,
) -> Result<(), SecurityError> {
    if uncompressed_size < RATIO_CHECK_FLOOR_BYTES {
        return Ok(());
    }
    let ratio = uncompressed_size
        .checked_div(compressed_size)
        .unwrap_or(u64::MAX);
    if ratio > limits.max_compression_ratio {
        return Err(SecurityError::ZipBomb {
            name: name.to_string(),
            ratio,
            limit: limits.max_compression_ratio,
        });
    }
    Ok(())
}

pub fn check_file_count(count: u64, limits: &SecurityLimits) -> Result<(), SecurityError> {
    if count > limits.max_file_count {
        return Err(SecurityError::TooManyFiles {
            count,
            limit: limits.max_file_count,
        });
    }
    Ok(())
}

pub fn check_resource_size(
    name: &str,
    size_bytes: u64,
    limits: &SecurityLimits,
) -> Result<(), SecurityError> {
    if size_bytes > limits.max_resource_size_bytes {
        return Err(oversized(name, size_bytes, limits.max_resource_size_bytes));
    }
    Ok(())
}

/// Running total of decompressed bytes across the container.
pub fn check_total_size(total_bytes: u64, limits: &SecurityLimits) -> Result<(), SecurityError> {
    if total_bytes > limits.max_total_size_bytes {
        return Err(oversized("<total>", total_bytes, limits.max_total_size_bytes));
    }
    Ok(())
}

fn oversized(name: &str, size_bytes: u64, limit_bytes: u64) -> SecurityError {
    SecurityError::OversizedResource {
        name: name.to_string(),
        size_mb: size_bytes / (1024 * 1024),
        limit_mb: limit_bytes / (1024 * 1024),
    }
}

/// Inspect `META-INF/encryption.xml`. Font obfuscation is allowed; anything
/// else that encrypts content is reported with its DRM scheme.
pub fn check_epub_drm(encryption_xml: &str) -> Result<(), SecurityError> {
    let drm_type = if encryption_xml.contains("http://ns.adobe.com/adept")
        || encryption_xml.contains("http://ns.adobe.com/digitaleditions")
    {
        Some("Adobe DRM")
    } else if encryption_xml.contains("http://www.apple.com/ibooks")
        || encryption_xml.contains("sinf")
    {
        Some("Apple FairPlay")
    } else if encryption_xml.contains("http://urms.org") {
        Some("Sony URMS")
    } else if encryption_xml.contains("EncryptedData")
        && !encryption_xml.contains("http://www.idpf.org/2008/embedding")
        && !encryption_xml.contains("http://ns.adobe.com/pdf/enc#RC")
    {
        Some("Unknown DRM")
    } else {
        None
    };

    match drm_type {
        Some(drm_type) => Err(SecurityError::DrmProtected {
            drm_type: drm_type.to_string(),
        }),
        None => Ok(()),
    }
}
