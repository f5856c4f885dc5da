//! Spine/TOC reconciliation: group spine files into logical chapters.
//!
//! A TOC match whose href differs from the previous match opens a new
//! chapter; everything else is appended to the chapter being built. Image
//! spine items always stand alone.

use crate::archive::decode_text;
use crate::document::{Chapter, ResourceMap};
use crate::markup;
use crate::media::{is_markup, is_package_document, is_raster_image, media_type_for_path};
use crate::package::SpineEntry;
use crate::resolve::{file_name, is_data_uri, locate, normalize_path, ResourceLookup};
use crate::toc::TocTarget;

/// Build the chapter list. `manifest` supplies both the spine files and
/// the resources they reference. The result is sorted by spine position.
pub fn reconcile<L>(spine: &[SpineEntry], toc: &[TocTarget], manifest: &L) -> Vec<Chapter>
where
    L: ResourceLookup + ?Sized,
{
    // Without a single TOC hit every markup file becomes its own chapter.
    let per_file = !spine
        .iter()
        .any(|entry| toc.iter().any(|target| target.href == entry.href));
    if per_file && !spine.is_empty() {
        tracing::debug!("No spine item matches the TOC, one chapter per file");
    }

    let mut chapters: Vec<Chapter> = Vec::new();
    let mut current: Option<Accumulator> = None;
    let mut last_match: Option<&str> = None;

    for entry in spine {
        let Some((key, data)) = manifest.find(&entry.href) else {
            tracing::warn!("Skipping spine item {}: {} not in archive", entry.id, entry.href);
            continue;
        };

        if is_raster_image(&entry.href, &entry.media_type) {
            finish(current.take(), &mut chapters);
            last_match = None;
            chapters.push(image_chapter(entry, key, data));
            continue;
        }

        if is_package_document(&entry.href, &entry.media_type) {
            tracing::warn!("Skipping spine item {}: navigation or package document", entry.href);
            continue;
        }
        let eligible = is_markup(&entry.media_type)
            || (entry.media_type.trim().is_empty() && is_markup(media_type_for_path(&entry.href)))
            || !entry.linear;
        if !eligible {
            tracing::debug!("Skipping spine item {} ({})", entry.href, entry.media_type);
            continue;
        }

        let matched = toc.iter().find(|target| target.href == entry.href);
        let starts_chapter = per_file
            || match matched {
                Some(target) if last_match != Some(target.href.as_str()) => {
                    !continues_title(current.as_ref(), &target.title)
                }
                _ => false,
            };
        if let Some(target) = matched {
            last_match = Some(target.href.as_str());
        }

        if starts_chapter {
            finish(current.take(), &mut chapters);
            current = Some(Accumulator::new(entry, matched.map(|t| t.title.as_str())));
        }
        match current.as_mut() {
            Some(chapter) => chapter.append(entry, data, manifest),
            None => tracing::debug!("Dropping {}: precedes the first chapter", entry.href),
        }
    }
    finish(current.take(), &mut chapters);

    chapters.sort_by_key(|chapter| chapter.position);
    chapters
}

/// A TOC entry whose href is new but whose title equals the open chapter's
/// title continues that chapter: three entries all titled "Chapter" give
/// one chapter. Only that exact (trimmed) title continues; blank titles and
/// any other title start a new chapter.
fn continues_title(current: Option<&Accumulator>, title: &str) -> bool {
    let title = title.trim();
    !title.is_empty()
        && current
            .and_then(|chapter| chapter.title.as_deref())
            .is_some_and(|open| open.trim() == title)
}

struct Accumulator {
    id: String,
    href: String,
    title: Option<String>,
    media_type: String,
    position: usize,
    parts: Vec<String>,
    resources: ResourceMap,
}

impl Accumulator {
    fn new(entry: &SpineEntry, title: Option<&str>) -> Self {
        Self {
            id: entry.id.clone(),
            href: entry.href.clone(),
            title: title.map(str::to_string),
            media_type: entry.media_type.clone(),
            position: entry.position,
            parts: Vec::new(),
            resources: ResourceMap::new(),
        }
    }

    fn append<L>(&mut self, entry: &SpineEntry, data: &[u8], manifest: &L)
    where
        L: ResourceLookup + ?Sized,
    {
        let Some(text) = decode_text(data) else {
            tracing::warn!("Spine item {} is not text, merged as empty", entry.href);
            return;
        };
        let mut fragment = markup::body_fragment(&text);

        // Archive path each reference resolved to, relative to this file.
        let mut located: Vec<(String, String)> = Vec::new();
        for reference in &fragment.references {
            if is_data_uri(reference) {
                continue;
            }
            let Some(found) = locate(&entry.href, reference, manifest) else {
                tracing::debug!("Unresolved resource {} in {}", reference, entry.href);
                continue;
            };
            let key = found.path().map(str::to_string);
            let bytes = found.into_bytes().into_owned();
            let mut aliases = vec![reference.clone(), normalize_path(&entry.href, reference)];
            aliases.extend(key.clone());
            for alias in aliases {
                self.resources.entry(alias).or_insert_with(|| bytes.clone());
            }
            if let Some(key) = key {
                located.push((reference.clone(), key));
            }
        }

        // Merged files may share a relative reference that points at
        // different files, so the merged markup carries archive paths.
        fragment.rewrite_references(|reference| {
            located
                .iter()
                .find(|(literal, _)| literal == reference)
                .map(|(_, key)| key.clone())
        });
        if !fragment.html.is_empty() {
            self.parts.push(fragment.html);
        }
    }
}

/// Emit the accumulated chapter if it has any content.
fn finish(chapter: Option<Accumulator>, chapters: &mut Vec<Chapter>) {
    let Some(chapter) = chapter else {
        return;
    };
    let body = chapter.parts.join("\n");
    if body.trim().is_empty() {
        tracing::debug!("Dropping empty chapter at spine position {}", chapter.position);
        return;
    }

    let title = match chapter.title {
        Some(title) if !title.trim().is_empty() => title,
        _ => format!("Chapter {}", chapters.len() + 1),
    };
    let id = if chapter.id.trim().is_empty() {
        format!("chapter_{}", chapter.position)
    } else {
        chapter.id
    };
    chapters.push(Chapter {
        id,
        href: chapter.href,
        title: Some(title),
        content: format!("<html><head></head><body>\n{body}\n</body></html>"),
        media_type: chapter.media_type,
        position: chapter.position,
        resources: chapter.resources,
    });
}

fn image_chapter(entry: &SpineEntry, key: &str, data: &[u8]) -> Chapter {
    let mut resources = ResourceMap::new();
    resources.insert(key.to_string(), data.to_vec());
    resources
        .entry(file_name(key).to_string())
        .or_insert_with(|| data.to_vec());

    let media_type = if entry.media_type.trim().is_empty() {
        media_type_for_path(key).to_string()
    } else {
        entry.media_type.clone()
    };
    Chapter {
        id: if entry.id.trim().is_empty() {
            format!("image_{}", entry.position)
        } else {
            entry.id.clone()
        },
        href: String::new(),
        title: None,
        content: String::new(),
        media_type,
        position: entry.position,
        resources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn xhtml(body: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><html xmlns="http://www.w3.org/1999/xhtml"><head><title>t</title></head><body>{body}</body></html>"#
        )
        .into_bytes()
    }

    fn spine_entry(position: usize, href: &str) -> SpineEntry {
        SpineEntry {
            position,
            id: format!("item{position}"),
            href: href.to_string(),
            media_type: media_type_for_path(href).to_string(),
            linear: true,
        }
    }

    fn target(href: &str, title: &str) -> TocTarget {
        TocTarget {
            href: href.to_string(),
            title: title.to_string(),
        }
    }

    fn archive(files: &[(&str, Vec<u8>)]) -> BTreeMap<String, Vec<u8>> {
        files
            .iter()
            .map(|(name, data)| (name.to_string(), data.clone()))
            .collect()
    }

    #[test]
    fn test_same_title_merges_distinct_hrefs() {
        let files = archive(&[
            ("a.xhtml", xhtml("<p>A</p>")),
            ("b.xhtml", xhtml("<p>B</p>")),
            ("c.xhtml", xhtml("<p>C</p>")),
            ("d.xhtml", xhtml("<p>D</p>")),
        ]);
        let spine = vec![
            spine_entry(0, "a.xhtml"),
            spine_entry(1, "b.xhtml"),
            spine_entry(2, "c.xhtml"),
            spine_entry(3, "d.xhtml"),
        ];
        let toc = vec![
            target("a.xhtml", "Ch1"),
            target("c.xhtml", "Ch2"),
            target("d.xhtml", "Ch2"),
        ];

        let chapters = reconcile(&spine, &toc, &files);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title.as_deref(), Some("Ch1"));
        assert_eq!(
            chapters[0].content,
            "<html><head></head><body>\n<p>A</p>\n<p>B</p>\n</body></html>"
        );
        assert_eq!(chapters[1].title.as_deref(), Some("Ch2"));
        assert_eq!(chapters[1].position, 2);
        assert!(chapters[1].content.contains("<p>C</p>\n<p>D</p>"));
    }

    #[test]
    fn test_new_toc_href_starts_chapter() {
        let files = archive(&[("a.xhtml", xhtml("<p>A</p>")), ("b.xhtml", xhtml("<p>B</p>"))]);
        let spine = vec![spine_entry(0, "a.xhtml"), spine_entry(1, "b.xhtml")];
        let toc = vec![target("a.xhtml", "One"), target("b.xhtml", "Two")];
        let chapters = reconcile(&spine, &toc, &files);
        let titles: Vec<_> = chapters.iter().map(|c| c.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["One", "Two"]);
    }

    #[test]
    fn test_image_between_chapters_stands_alone() {
        let files = archive(&[
            ("a.xhtml", xhtml("<p>A</p>")),
            ("images/plate.jpg", vec![0xFF, 0xD8, 0xFF]),
            ("b.xhtml", xhtml("<p>B</p>")),
        ]);
        let spine = vec![
            spine_entry(0, "a.xhtml"),
            spine_entry(1, "images/plate.jpg"),
            spine_entry(2, "b.xhtml"),
        ];
        let toc = vec![target("a.xhtml", "One"), target("b.xhtml", "Two")];

        let chapters = reconcile(&spine, &toc, &files);
        assert_eq!(chapters.len(), 3);
        let image = &chapters[1];
        assert!(image.is_image());
        assert_eq!(image.title, None);
        assert_eq!(image.content, "");
        assert_eq!(image.id, "item1");
        assert_eq!(image.media_type, "image/jpeg");
        assert_eq!(image.resources.get("images/plate.jpg"), Some(&vec![0xFF, 0xD8, 0xFF]));
        assert!(image.resources.contains_key("plate.jpg"));
        assert_eq!(chapters[2].title.as_deref(), Some("Two"));
    }

    #[test]
    fn test_missing_spine_resource_is_skipped() {
        let files = archive(&[("b.xhtml", xhtml("<p>B</p>"))]);
        let spine = vec![spine_entry(0, "a.xhtml"), spine_entry(1, "b.xhtml")];
        let toc = vec![target("a.xhtml", "One"), target("b.xhtml", "Two")];
        let chapters = reconcile(&spine, &toc, &files);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].position, 1);
        assert_eq!(chapters[0].title.as_deref(), Some("Two"));
    }

    #[test]
    fn test_unmatched_items_before_first_chapter_are_dropped() {
        let files = archive(&[
            ("front.xhtml", xhtml("<p>Front</p>")),
            ("a.xhtml", xhtml("<p>A</p>")),
        ]);
        let spine = vec![spine_entry(0, "front.xhtml"), spine_entry(1, "a.xhtml")];
        let toc = vec![target("a.xhtml", "One")];
        let chapters = reconcile(&spine, &toc, &files);
        assert_eq!(chapters.len(), 1);
        assert!(!chapters[0].content.contains("Front"));
    }

    #[test]
    fn test_without_toc_every_file_is_a_chapter() {
        let files = archive(&[
            ("a.xhtml", xhtml("<p>A</p>")),
            ("b.xhtml", xhtml("<p>B</p>")),
            ("style.css", b"p {}".to_vec()),
        ]);
        let mut spine = vec![
            spine_entry(0, "a.xhtml"),
            spine_entry(1, "style.css"),
            spine_entry(2, "b.xhtml"),
        ];
        spine[2].id = " ".into();
        let chapters = reconcile(&spine, &[], &files);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title.as_deref(), Some("Chapter 1"));
        assert_eq!(chapters[1].title.as_deref(), Some("Chapter 2"));
        assert_eq!(chapters[1].id, "chapter_2");
    }

    #[test]
    fn test_undecodable_content_is_empty() {
        let files = archive(&[
            ("a.xhtml", xhtml("<p>A</p>")),
            ("b.xhtml", vec![0x00, 0x01, 0x80, 0x02]),
        ]);
        let spine = vec![spine_entry(0, "a.xhtml"), spine_entry(1, "b.xhtml")];
        let chapters = reconcile(&spine, &[target("a.xhtml", "One")], &files);
        assert_eq!(chapters.len(), 1);
        assert_eq!(
            chapters[0].content,
            "<html><head></head><body>\n<p>A</p>\n</body></html>"
        );
    }

    #[test]
    fn test_non_linear_items_are_eligible() {
        let files = archive(&[("notes.dat", xhtml("<p>Note</p>"))]);
        let mut entry = spine_entry(0, "notes.dat");
        entry.media_type = "application/octet-stream".into();
        entry.linear = false;
        let chapters = reconcile(&[entry], &[], &files);
        assert_eq!(chapters.len(), 1);
        assert!(chapters[0].content.contains("Note"));
    }

    #[test]
    fn test_chapter_resources_are_aliased() {
        let files = archive(&[
            ("OEBPS/Text/a.xhtml", xhtml(r#"<p><img src="../Images/p.png"/></p><img src="data:image/png;base64,AA=="/>"#)),
            ("OEBPS/Text/b.xhtml", xhtml(r#"<img src="img/q.png"/>"#)),
            ("OEBPS/Images/p.png", b"P".to_vec()),
            ("images/q.png", b"Q".to_vec()),
        ]);
        let spine = vec![
            spine_entry(0, "OEBPS/Text/a.xhtml"),
            spine_entry(1, "OEBPS/Text/b.xhtml"),
        ];
        let toc = vec![target("OEBPS/Text/a.xhtml", "One")];
        let chapters = reconcile(&spine, &toc, &files);
        assert_eq!(chapters.len(), 1);

        let mut keys: Vec<&str> = chapters[0].resources.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "../Images/p.png",
                "OEBPS/Images/p.png",
                "OEBPS/Text/img/q.png",
                "images/q.png",
                "img/q.png",
            ]
        );
        assert_eq!(chapters[0].resources["img/q.png"], b"Q".to_vec());
    }

    #[test]
    fn test_chapters_sorted_by_position() {
        let files = archive(&[
            ("a.xhtml", xhtml("<p>A</p>")),
            ("b.png", vec![1]),
            ("c.xhtml", xhtml("<p>C</p>")),
        ]);
        let spine = vec![spine_entry(4, "a.xhtml"), spine_entry(7, "b.png"), spine_entry(9, "c.xhtml")];
        let chapters = reconcile(&spine, &[], &files);
        let positions: Vec<usize> = chapters.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![4, 7, 9]);
    }

    #[test]
    fn test_repeated_title_continues_open_chapter() {
        let files = archive(&[
            ("a.xhtml", xhtml("<p>A</p>")),
            ("b.xhtml", xhtml("<p>B</p>")),
            ("c.xhtml", xhtml("<p>C</p>")),
            ("d.xhtml", xhtml("<p>D</p>")),
        ]);
        let spine: Vec<SpineEntry> = ["a.xhtml", "b.xhtml", "c.xhtml", "d.xhtml"]
            .iter()
            .enumerate()
            .map(|(i, href)| spine_entry(i, href))
            .collect();
        let toc = vec![
            target("a.xhtml", "Chapter"),
            target("b.xhtml", " Chapter "),
            target("c.xhtml", "Chapter"),
            target("d.xhtml", "Epilogue"),
        ];
        let chapters = reconcile(&spine, &toc, &files);
        let titles: Vec<Option<&str>> = chapters.iter().map(|c| c.title.as_deref()).collect();
        assert_eq!(titles, vec![Some("Chapter"), Some("Epilogue")]);
        assert!(chapters[0].content.contains("<p>A</p>\n<p>B</p>\n<p>C</p>"));
    }

    #[test]
    fn test_blank_titles_do_not_continue() {
        let files = archive(&[("a.xhtml", xhtml("<p>A</p>")), ("b.xhtml", xhtml("<p>B</p>"))]);
        let spine = vec![spine_entry(0, "a.xhtml"), spine_entry(1, "b.xhtml")];
        let toc = vec![target("a.xhtml", ""), target("b.xhtml", "")];
        let chapters = reconcile(&spine, &toc, &files);
        let titles: Vec<Option<&str>> = chapters.iter().map(|c| c.title.as_deref()).collect();
        assert_eq!(titles, vec![Some("Chapter 1"), Some("Chapter 2")]);
    }

    #[test]
    fn test_ncx_in_spine_is_not_a_chapter() {
        let ncx = br#"<?xml version="1.0"?><ncx><navMap><navPoint><navLabel><text>One</text></navLabel><content src="a.xhtml"/></navPoint></navMap></ncx>"#;
        let files = archive(&[("toc.ncx", ncx.to_vec()), ("a.xhtml", xhtml("<p>A</p>"))]);
        let mut ncx_entry = spine_entry(0, "toc.ncx");
        ncx_entry.linear = false;
        let spine = vec![ncx_entry, spine_entry(1, "a.xhtml")];
        let chapters = reconcile(&spine, &[], &files);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].href, "a.xhtml");
        assert!(!chapters[0].content.contains("One"));
    }

    #[test]
    fn test_utf16_spine_item_is_merged() {
        let mut utf16 = vec![0xFF, 0xFE];
        let markup = r#"<?xml version="1.0" encoding="UTF-16"?><html xmlns="http://www.w3.org/1999/xhtml"><body><p>Zweite Seite</p></body></html>"#;
        for unit in markup.encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        let files = archive(&[("a.xhtml", utf16)]);
        let chapters = reconcile(&[spine_entry(0, "a.xhtml")], &[], &files);
        assert_eq!(chapters.len(), 1);
        assert!(chapters[0].content.contains("<p>Zweite Seite</p>"));
    }

    #[test]
    fn test_declared_latin1_spine_item_is_merged() {
        let latin1 = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><html><body><p>Caf\xE9 cr\xE8me</p></body></html>".to_vec();
        let files = archive(&[("a.xhtml", latin1)]);
        let chapters = reconcile(&[spine_entry(0, "a.xhtml")], &[], &files);
        assert_eq!(chapters.len(), 1);
        assert!(chapters[0].content.contains("<p>Café crème</p>"));
    }

    #[test]
    fn test_shared_relative_reference_keeps_each_files_image() {
        let files = archive(&[
            ("OEBPS/Text/a.xhtml", xhtml(r#"<p>A</p><img src="../img/x.png"/>"#)),
            ("OEBPS/Text/part/b.xhtml", xhtml(r#"<p>B</p><img src="../img/x.png"/>"#)),
            ("OEBPS/img/x.png", b"AAA".to_vec()),
            ("OEBPS/Text/img/x.png", b"BBB".to_vec()),
        ]);
        let spine = vec![
            spine_entry(0, "OEBPS/Text/a.xhtml"),
            spine_entry(1, "OEBPS/Text/part/b.xhtml"),
        ];
        let chapters = reconcile(&spine, &[target("OEBPS/Text/a.xhtml", "One")], &files);
        assert_eq!(chapters.len(), 1);

        let chapter = &chapters[0];
        assert!(chapter.content.contains(r#"<img src="OEBPS/img/x.png">"#));
        assert!(chapter.content.contains(r#"<img src="OEBPS/Text/img/x.png">"#));
        assert_eq!(chapter.resources["OEBPS/img/x.png"], b"AAA".to_vec());
        assert_eq!(chapter.resources["OEBPS/Text/img/x.png"], b"BBB".to_vec());

        let images: Vec<Option<Vec<u8>>> = chapter
            .content_blocks()
            .into_iter()
            .filter_map(|block| match block {
                crate::document::ContentBlock::Image { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(images, vec![Some(b"AAA".to_vec()), Some(b"BBB".to_vec())]);
    }
}
