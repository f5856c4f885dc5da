/// Fatal parse failure. Everything below container level is skipped and logged
/// instead, so this is the only error `parse` can return.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid EPUB archive: {0}")]
    InvalidArchive(String),

    #[error("Missing required content: {0}")]
    MissingContent(String),

    #[error("Malformed package document {path}: {detail}")]
    MalformedPackage { path: String, detail: String },

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("ZIP bomb detected in {name}: decompression ratio {ratio}:1 exceeds limit {limit}:1")]
    ZipBomb { name: String, ratio: u64, limit: u64 },

    #[error("Path traversal detected in archive entry: {path}")]
    PathTraversal { path: String },

    #[error("Archive contains {count} files, exceeding limit of {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("Resource {name} is {size_mb}MB, exceeding limit of {limit_mb}MB")]
    OversizedResource {
        name: String,
        size_mb: u64,
        limit_mb: u64,
    },

    #[error("DRM protected file ({drm_type})")]
    DrmProtected { drm_type: String },
}
