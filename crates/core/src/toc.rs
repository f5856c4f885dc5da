//! Table of contents: EPUB3 NAV documents and EPUB2 NCX files.
//!
//! Both formats are first read into [`NavPoint`] trees, then resolved
//! against the archive. Nodes whose target cannot be found are dropped and
//! their children move up to the dropped node's level.

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use scraper::{ElementRef, Html};

use crate::archive::ArchiveContainer;
use crate::document::TableOfContentsEntry;
use crate::package::{attr, PackageDocument};
use crate::resolve::{locate, strip_fragment, ResourceLookup};

/// A navigation node as written in the source document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavPoint {
    pub id: Option<String>,
    pub title: String,
    /// Raw `href`/`src`, relative to the TOC document.
    pub href: Option<String>,
    pub children: Vec<NavPoint>,
}

/// A parsed TOC document and the archive path it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TocDocument {
    pub path: String,
    pub points: Vec<NavPoint>,
}

/// A flattened TOC target: archive path without fragment, plus title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocTarget {
    pub href: String,
    pub title: String,
}

/// Read the NAV document, falling back to the NCX when there is no usable NAV.
pub fn load(archive: &ArchiveContainer, package: &PackageDocument) -> Option<TocDocument> {
    if let Some(nav) = package.nav_item() {
        match archive.read_text(&nav.href).and_then(|content| parse_nav(&content)) {
            Some(points) if !points.is_empty() => {
                return Some(TocDocument {
                    path: nav.href.clone(),
                    points,
                })
            }
            _ => tracing::warn!("Navigation document {} unusable, trying NCX", nav.href),
        }
    }

    let ncx = package.ncx_item()?;
    let Some(content) = archive.read_text(&ncx.href) else {
        tracing::warn!("NCX {} missing from archive", ncx.href);
        return None;
    };
    Some(TocDocument {
        path: ncx.href.clone(),
        points: parse_ncx(&content),
    })
}

/// Parse an EPUB3 navigation document. Prefers `<nav epub:type="toc">`,
/// then `role="doc-toc"`, then the first `<nav>`.
pub fn parse_nav(content: &str) -> Option<Vec<NavPoint>> {
    let document = Html::parse_document(content);
    let navs: Vec<ElementRef<'_>> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "nav")
        .collect();

    let is_toc = |el: &ElementRef<'_>| {
        el.value().attrs().any(|(k, v)| {
            (k == "epub:type" || k == "type") && v.split_whitespace().any(|t| t == "toc")
        })
    };
    let nav = navs
        .iter()
        .find(|el| is_toc(*el))
        .or_else(|| navs.iter().find(|el| el.value().attr("role") == Some("doc-toc")))
        .or_else(|| navs.first())?;

    let ol = nav
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "ol")?;
    Some(parse_nav_list(ol))
}

fn parse_nav_list(ol: ElementRef<'_>) -> Vec<NavPoint> {
    let mut points = Vec::new();
    for li in ol.children().filter_map(ElementRef::wrap) {
        if li.value().name() != "li" {
            continue;
        }
        let label = li
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() != "ol");
        let children = li
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "ol")
            .map(parse_nav_list)
            .unwrap_or_default();

        let (title, href, id) = match label {
            Some(label) => (
                collapse(&label.text().collect::<String>()),
                if label.value().name() == "a" {
                    label.value().attr("href").map(str::to_string)
                } else {
                    None
                },
                label.value().id().or_else(|| li.value().id()).map(str::to_string),
            ),
            None => (String::new(), None, li.value().id().map(str::to_string)),
        };
        points.push(NavPoint {
            id,
            title,
            href,
            children,
        });
    }
    points
}

/// Parse an EPUB2 NCX `navMap`. A malformed NCX yields whatever was read
/// before the error.
pub fn parse_ncx(content: &str) -> Vec<NavPoint> {
    let mut reader = XmlReader::from_str(content);
    let mut roots: Vec<NavPoint> = Vec::new();
    let mut stack: Vec<NavPoint> = Vec::new();
    let mut in_label = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"navPoint" => stack.push(NavPoint {
                    id: attr(e, b"id"),
                    ..NavPoint::default()
                }),
                b"navLabel" => in_label = true,
                b"text" => in_text = in_label,
                b"content" => set_content(&mut stack, attr(e, b"src")),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"content" => {
                set_content(&mut stack, attr(e, b"src"));
            }
            Ok(Event::Text(ref e)) if in_text => {
                if let Some(point) = stack.last_mut() {
                    match e.unescape() {
                        Ok(t) => point.title.push_str(&t),
                        Err(_) => point.title.push_str(&String::from_utf8_lossy(e)),
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"text" => in_text = false,
                b"navLabel" => in_label = false,
                b"navPoint" => {
                    if let Some(mut point) = stack.pop() {
                        point.title = collapse(&point.title);
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(point),
                            None => roots.push(point),
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("NCX parse error at {}: {}", reader.buffer_position(), e);
                break;
            }
            _ => {}
        }
    }

    // Close anything left open by a truncated document.
    while let Some(mut point) = stack.pop() {
        point.title = collapse(&point.title);
        match stack.last_mut() {
            Some(parent) => parent.children.push(point),
            None => roots.push(point),
        }
    }
    roots
}

fn set_content(stack: &mut [NavPoint], src: Option<String>) {
    if let Some(point) = stack.last_mut() {
        if point.href.is_none() {
            point.href = src;
        }
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a TOC document into entries. Every entry gets an id: the source
/// one, else `toc_<index>` at the top level or `toc_sub_<level>-<index>`
/// below it.
pub fn extract<L>(document: &TocDocument, manifest: &L) -> Vec<TableOfContentsEntry>
where
    L: ResourceLookup + ?Sized,
{
    let mut entries = Vec::new();
    convert(&document.points, 0, &document.path, manifest, &mut entries);
    entries
}

fn convert<L>(
    points: &[NavPoint],
    level: usize,
    base_path: &str,
    manifest: &L,
    out: &mut Vec<TableOfContentsEntry>,
) where
    L: ResourceLookup + ?Sized,
{
    for point in points {
        let target = point
            .href
            .as_deref()
            .and_then(|href| resolve_target(base_path, href, manifest));
        let Some(href) = target else {
            tracing::debug!(
                "Skipping TOC entry '{}': target {:?} not in archive",
                point.title,
                point.href
            );
            convert(&point.children, level, base_path, manifest, out);
            continue;
        };

        let index = out.len();
        let mut children = Vec::new();
        convert(&point.children, level + 1, base_path, manifest, &mut children);
        let id = match point.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ if level == 0 => format!("toc_{index}"),
            _ => format!("toc_sub_{level}-{index}"),
        };
        out.push(TableOfContentsEntry {
            id,
            href,
            title: point.title.clone(),
            level,
            children,
        });
    }
}

/// Archive key of the target with the original fragment re-attached.
fn resolve_target<L>(base_path: &str, href: &str, manifest: &L) -> Option<String>
where
    L: ResourceLookup + ?Sized,
{
    let path = locate(base_path, href, manifest)?.path()?;
    let fragment = href.find('#').map_or("", |i| &href[i..]);
    Some(format!("{path}{fragment}"))
}

/// Depth-first `(href without fragment, title)` pairs in document order.
pub fn flatten(entries: &[TableOfContentsEntry]) -> Vec<TocTarget> {
    fn walk(entries: &[TableOfContentsEntry], out: &mut Vec<TocTarget>) {
        for entry in entries {
            out.push(TocTarget {
                href: strip_fragment(&entry.href).to_string(),
                title: entry.title.clone(),
            });
            walk(&entry.children, out);
        }
    }

    let mut out = Vec::new();
    walk(entries, &mut out);
    out
}
