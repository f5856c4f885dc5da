//! EPUB reader: ZIP → container.xml → OPF → TOC + spine → [`EpubDocument`].
//! Supports both EPUB2 (NCX navigation) and EPUB3 (NAV document).

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::archive::{decode_text, ArchiveContainer};
use crate::document::EpubDocument;
use crate::error::ParseError;
use crate::progress::{emit_progress, ParseStage, ProgressHandler};
use crate::security::{self, SecurityLimits};
use crate::{metadata, package, reconcile, toc};

const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    pub security: SecurityLimits,
    pub extract_cover: bool,
    pub parse_toc: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            security: SecurityLimits::default(),
            extract_cover: true,
            parse_toc: true,
        }
    }
}

/// Parse an EPUB from a byte source.
pub fn parse<R: Read + Seek>(input: R, opts: &ParseOptions) -> Result<EpubDocument, ParseError> {
    parse_with_progress(input, opts, None)
}

pub fn parse_bytes(bytes: &[u8], opts: &ParseOptions) -> Result<EpubDocument, ParseError> {
    parse(Cursor::new(bytes), opts)
}

pub fn parse_path(path: impl AsRef<Path>, opts: &ParseOptions) -> Result<EpubDocument, ParseError> {
    let file = File::open(path.as_ref())?;
    parse(BufReader::new(file), opts)
}

/// Like [`parse`], reporting each finished stage to `progress`.
pub fn parse_with_progress<R: Read + Seek>(
    input: R,
    opts: &ParseOptions,
    progress: Option<&dyn ProgressHandler>,
) -> Result<EpubDocument, ParseError> {
    let archive = ArchiveContainer::open(input, &opts.security)?;
    if let Some(encryption) = archive.read(ENCRYPTION_PATH) {
        security::check_epub_drm(&String::from_utf8_lossy(encryption))?;
    }
    emit_progress(progress, ParseStage::Container, Some(format!("{} entries", archive.len())));

    let package_path = package::find_package_path(&archive)?;
    let bytes = archive.read(&package_path).ok_or_else(|| {
        ParseError::MissingContent(format!("Package document {package_path} not in archive"))
    })?;
    let content = decode_text(bytes).ok_or_else(|| ParseError::MalformedPackage {
        path: package_path.clone(),
        detail: "binary data, not text".into(),
    })?;
    let package = package::parse_package(&content, &package_path)?;
    let metadata = metadata::extract(&package);
    emit_progress(progress, ParseStage::Package, Some(package_path.clone()));

    let toc = if opts.parse_toc {
        toc::load(&archive, &package)
            .map(|document| toc::extract(&document, &archive))
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    emit_progress(progress, ParseStage::Navigation, Some(format!("{} entries", toc.len())));

    let spine = package.spine_entries();
    let chapters = reconcile::reconcile(&spine, &toc::flatten(&toc), &archive);
    emit_progress(
        progress,
        ParseStage::Chapters,
        Some(format!("{} chapters from {} spine items", chapters.len(), spine.len())),
    );

    let cover_image = if opts.extract_cover {
        package
            .cover_item()
            .filter(|item| item.media_type.starts_with("image/") || crate::media::is_raster_image(&item.href, ""))
            .and_then(|item| archive.read(&item.href))
            .map(<[u8]>::to_vec)
    } else {
        None
    };
    emit_progress(progress, ParseStage::Cover, None);

    tracing::debug!(
        "Parsed '{}': {} chapters, {} TOC entries, cover: {}",
        metadata.title,
        chapters.len(),
        toc.len(),
        cover_image.is_some()
    );

    Ok(EpubDocument {
        title: metadata.title.clone(),
        author: metadata.creator.clone(),
        cover_image,
        chapters,
        toc,
        identifier: metadata.identifier.clone(),
        metadata,
    })
}
