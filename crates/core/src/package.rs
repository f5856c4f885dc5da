//! Package document (OPF) parsing: bibliographic fields, manifest, and spine.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;

use crate::archive::ArchiveContainer;
use crate::error::ParseError;
use crate::media::{NCX_MEDIA_TYPE, PACKAGE_MEDIA_TYPE};
use crate::resolve::normalize_path;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// The parsed OPF. Manifest hrefs are already normalized to archive paths.
#[derive(Debug, Clone, Default)]
pub struct PackageDocument {
    /// Archive path of the OPF itself.
    pub path: String,
    pub version: Option<String>,
    /// Id of the `dc:identifier` named by `unique-identifier`.
    pub unique_identifier: Option<String>,
    pub dublin_core: Vec<DublinCoreElement>,
    pub meta: Vec<MetaElement>,
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineItemRef>,
    /// `toc` attribute of `<spine>` (NCX manifest id).
    pub spine_toc: Option<String>,
}

/// A `dc:*` element from `<metadata>`, keyed by local name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DublinCoreElement {
    pub name: String,
    pub id: Option<String>,
    pub text: String,
}

/// `<meta name=".." content=".."/>` (EPUB2) or `<meta property="..">..</meta>` (EPUB3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaElement {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|p| p == property))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItemRef {
    pub idref: String,
    pub linear: bool,
}

/// A spine item joined with its manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineEntry {
    /// Index in the spine; defines document order.
    pub position: usize,
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub linear: bool,
}

impl PackageDocument {
    pub fn manifest_item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// EPUB3 navigation document.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.has_property("nav"))
    }

    /// EPUB2 NCX: the spine's `toc` id, else any item with the NCX media type.
    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.spine_toc
            .as_deref()
            .and_then(|id| self.manifest_item(id))
            .or_else(|| {
                self.manifest
                    .iter()
                    .find(|item| item.media_type == NCX_MEDIA_TYPE)
            })
    }

    /// Cover image: `<meta name="cover">`, then `properties="cover-image"`,
    /// then an image item whose id or href mentions "cover".
    pub fn cover_item(&self) -> Option<&ManifestItem> {
        let from_meta = self
            .meta
            .iter()
            .find(|m| m.name == "cover")
            .and_then(|m| {
                self.manifest_item(&m.value)
                    .or_else(|| self.manifest.iter().find(|item| item.href.ends_with(&m.value)))
            });
        from_meta
            .or_else(|| self.manifest.iter().find(|item| item.has_property("cover-image")))
            .or_else(|| {
                self.manifest.iter().find(|item| {
                    item.media_type.starts_with("image/")
                        && (item.id.to_ascii_lowercase().contains("cover")
                            || item.href.to_ascii_lowercase().contains("cover"))
                })
            })
    }

    /// Spine items joined with the manifest. Items whose idref is not in the
    /// manifest are skipped; positions keep their original spine index.
    pub fn spine_entries(&self) -> Vec<SpineEntry> {
        self.spine
            .iter()
            .enumerate()
            .filter_map(|(position, itemref)| match self.manifest_item(&itemref.idref) {
                Some(item) => Some(SpineEntry {
                    position,
                    id: item.id.clone(),
                    href: item.href.clone(),
                    media_type: item.media_type.clone(),
                    linear: itemref.linear,
                }),
                None => {
                    tracing::warn!("Skipping spine item '{}': not in manifest", itemref.idref);
                    None
                }
            })
            .collect()
    }
}

/// Locate the OPF via `META-INF/container.xml`, falling back to the first
/// `.opf` entry in the archive.
pub fn find_package_path(archive: &ArchiveContainer) -> Result<String, ParseError> {
    if let Some(container) = archive.read_text(CONTAINER_PATH) {
        match rootfile_path(&container) {
            Ok(Some(path)) => return Ok(path),
            Ok(None) => tracing::warn!("No rootfile found in {}", CONTAINER_PATH),
            Err(e) => tracing::warn!("Failed to parse {}: {}", CONTAINER_PATH, e),
        }
    }

    archive
        .entry_names()
        .find(|name| name.to_ascii_lowercase().ends_with(".opf"))
        .map(str::to_string)
        .ok_or_else(|| ParseError::MissingContent("No package document (.opf) found".into()))
}

fn rootfile_path(container: &str) -> Result<Option<String>, quick_xml::Error> {
    let mut reader = XmlReader::from_str(container);
    let mut fallback = None;

    loop {
        match reader.read_event()? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"rootfile" => {
                let path = attr(e, b"full-path");
                let media_type = attr(e, b"media-type");
                match (path, media_type.as_deref()) {
                    (Some(path), Some(PACKAGE_MEDIA_TYPE)) => return Ok(Some(path)),
                    (Some(path), _) if fallback.is_none() => fallback = Some(path),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(fallback)
}

enum Capture {
    DublinCore { name: String, id: Option<String> },
    Meta { property: String },
}

/// Parse the OPF at `path`. Any XML error here is fatal.
pub fn parse_package(content: &str, path: &str) -> Result<PackageDocument, ParseError> {
    let malformed = |detail: String| ParseError::MalformedPackage {
        path: path.to_string(),
        detail,
    };

    let mut reader = XmlReader::from_str(content);
    let mut package = PackageDocument {
        path: path.to_string(),
        ..PackageDocument::default()
    };

    let mut in_metadata = false;
    let mut capture: Option<Capture> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let local = e.local_name();
                match local.as_ref() {
                    b"package" => {
                        package.version = attr(e, b"version");
                        package.unique_identifier = attr(e, b"unique-identifier");
                    }
                    b"metadata" => in_metadata = !is_empty,
                    b"meta" if in_metadata => {
                        let name = attr(e, b"name");
                        let property = attr(e, b"property");
                        match (name, property) {
                            (Some(name), _) => package.meta.push(MetaElement {
                                name,
                                value: attr(e, b"content").unwrap_or_default(),
                            }),
                            (None, Some(property)) if !is_empty => {
                                capture = Some(Capture::Meta { property });
                                text.clear();
                            }
                            _ => {}
                        }
                    }
                    b"link" => {}
                    name if in_metadata && !is_empty && capture.is_none() => {
                        capture = Some(Capture::DublinCore {
                            name: String::from_utf8_lossy(name).into_owned(),
                            id: attr(e, b"id"),
                        });
                        text.clear();
                    }
                    b"item" => {
                        let href = attr(e, b"href").unwrap_or_default();
                        package.manifest.push(ManifestItem {
                            id: attr(e, b"id").unwrap_or_default(),
                            href: normalize_path(path, &href),
                            media_type: attr(e, b"media-type").unwrap_or_default(),
                            properties: attr(e, b"properties"),
                        });
                    }
                    b"spine" => package.spine_toc = attr(e, b"toc"),
                    b"itemref" => {
                        if let Some(idref) = attr(e, b"idref") {
                            let linear = attr(e, b"linear")
                                .map_or(true, |v| !v.trim().eq_ignore_ascii_case("no"));
                            package.spine.push(SpineItemRef { idref, linear });
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) if capture.is_some() => match e.unescape() {
                Ok(t) => text.push_str(&t),
                Err(_) => text.push_str(&String::from_utf8_lossy(e)),
            },
            Event::CData(ref e) if capture.is_some() => {
                text.push_str(&String::from_utf8_lossy(e));
            }
            Event::End(ref e) => {
                let local = e.local_name();
                if local.as_ref() == b"metadata" {
                    in_metadata = false;
                }
                let closes_capture = match &capture {
                    Some(Capture::DublinCore { name, .. }) => name.as_bytes() == local.as_ref(),
                    Some(Capture::Meta { .. }) => local.as_ref() == b"meta",
                    None => false,
                };
                if closes_capture {
                    let value = text.trim().to_string();
                    match capture.take() {
                        Some(Capture::DublinCore { name, id }) => {
                            package.dublin_core.push(DublinCoreElement { name, id, text: value })
                        }
                        Some(Capture::Meta { property }) => package.meta.push(MetaElement {
                            name: property,
                            value,
                        }),
                        None => {}
                    }
                    text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if package.manifest.is_empty() && package.spine.is_empty() {
        return Err(malformed("no manifest or spine".into()));
    }
    Ok(package)
}

/// Attribute value by local name, unescaped.
pub(crate) fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}
