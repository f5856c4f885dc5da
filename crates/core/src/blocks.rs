//! Chapter markup to [`ContentBlock`]s.
//!
//! The body is parsed as HTML first. If that yields nothing the same markup
//! is parsed as generic XML, and if that also yields nothing the raw markup
//! comes back as a single `Text` block, so non-empty input never produces an
//! empty sequence.
//!
//! Extraction is a pure function of the markup; resource bytes are filled in
//! afterwards by [`attach_resources`].

use crate::document::{Chapter, ContentBlock};
use crate::markup::{self, MarkupElement, MarkupNode};
use crate::media::media_type_for_path;
use crate::resolve::{is_data_uri, resolve, ResourceLookup};
use crate::security::SecurityLimits;

const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "ul", "ol", "li", "table", "thead",
    "tbody", "tfoot", "tr", "td", "th", "hr", "div", "section", "article", "aside", "header",
    "footer", "nav", "main", "figure", "figcaption", "pre", "dl", "dt", "dd", "address", "body",
];

/// Never rendered.
const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "title", "template", "noscript"];

const EMBED_TAGS: &[&str] = &["embed", "video", "audio", "object", "iframe"];

pub fn is_block(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

/// Extract blocks with the default nesting limit.
pub fn extract(markup: &str) -> Vec<ContentBlock> {
    extract_with_depth(markup, SecurityLimits::default().max_nesting_depth)
}

pub fn extract_with_depth(markup: &str, max_depth: u32) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let body = markup::parse_html(markup, max_depth);
    walk_children(&body, &mut blocks);
    if !blocks.is_empty() {
        return blocks;
    }

    if let Some(root) = markup::parse_xml(markup, max_depth) {
        let target = root.find("body").unwrap_or(&root);
        walk_children(target, &mut blocks);
        if !blocks.is_empty() {
            tracing::debug!("Content blocks recovered through the XML parser");
            return blocks;
        }
    }

    vec![ContentBlock::text(markup)]
}

fn walk_children(el: &MarkupElement, out: &mut Vec<ContentBlock>) {
    for child in &el.children {
        match child {
            MarkupNode::Text(text) => {
                let text = collapse(text);
                if !text.is_empty() {
                    out.push(ContentBlock::Text { text });
                }
            }
            MarkupNode::Element(child) => walk_element(child, out),
        }
    }
}

fn walk_element(el: &MarkupElement, out: &mut Vec<ContentBlock>) {
    let name = el.name.as_str();
    if SKIPPED_TAGS.contains(&name) {
        return;
    }

    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let text = collapse(&el.text());
            if !text.is_empty() {
                let level = name[1..].parse().unwrap_or(1);
                out.push(ContentBlock::Header { level, text });
            }
        }
        "blockquote" => {
            let mut children = Vec::new();
            walk_children(el, &mut children);
            if !children.is_empty() {
                out.push(ContentBlock::BlockQuote { children });
            }
        }
        "ul" | "ol" => {
            let items: Vec<String> = el
                .child_elements()
                .filter(|child| child.name == "li")
                .map(|li| collapse(&li.text()))
                .filter(|text| !text.is_empty())
                .collect();
            if !items.is_empty() {
                out.push(ContentBlock::List {
                    items,
                    ordered: name == "ol",
                });
            }
        }
        "table" => {
            if let Some(table) = table_block(el) {
                out.push(table);
            }
        }
        "hr" => {}
        "pre" => {
            let text = el.text().trim_matches('\n').to_string();
            if !text.trim().is_empty() {
                out.push(ContentBlock::Text { text });
            }
            inline_pass(el, out);
        }
        _ if has_block_child(el) => walk_children(el, out),
        "p" => {
            let text = collapse(&el.text());
            if !text.is_empty() {
                out.push(ContentBlock::Paragraph { text });
            }
            inline_pass(el, out);
        }
        _ if is_block(name) => {
            let text = collapse(&el.text());
            if !text.is_empty() {
                out.push(ContentBlock::Text { text });
            }
            inline_pass(el, out);
        }
        _ => {
            if !inline_block(el, out) {
                walk_children(el, out);
            }
        }
    }
}

/// Images, links, line breaks and embeds nested inside a text block.
fn inline_pass(el: &MarkupElement, out: &mut Vec<ContentBlock>) {
    for child in el.child_elements() {
        if SKIPPED_TAGS.contains(&child.name.as_str()) {
            continue;
        }
        if !inline_block(child, out) {
            inline_pass(child, out);
        }
    }
}

/// Emit the block for an inline element that has one. Returns false when
/// the element should be descended into instead.
fn inline_block(el: &MarkupElement, out: &mut Vec<ContentBlock>) -> bool {
    match el.name.as_str() {
        "br" => out.push(ContentBlock::LineBreak),
        "img" | "image" => {
            let src = el.attr("src").or_else(|| el.attr("href")).unwrap_or("").trim();
            if src.is_empty() {
                return true;
            }
            out.push(ContentBlock::Image {
                src: src.to_string(),
                alt: el
                    .attr("alt")
                    .map(str::trim)
                    .filter(|alt| !alt.is_empty())
                    .map(str::to_string),
                data: None,
            });
        }
        "a" => {
            let Some(href) = el.attr("href") else {
                return false;
            };
            out.push(ContentBlock::Link {
                href: href.trim().to_string(),
                text: collapse(&el.text()),
            });
        }
        name if EMBED_TAGS.contains(&name) => match embed_block(el) {
            Some(embed) => out.push(embed),
            // Fallback content of a source-less object or video.
            None => return false,
        },
        _ => return false,
    }
    true
}

/// `type` attribute, then the first `<source type>`, then the extension.
fn embed_block(el: &MarkupElement) -> Option<ContentBlock> {
    let source = el.child_elements().find(|child| child.name == "source");
    let src = el
        .attr("src")
        .or_else(|| el.attr("data"))
        .or_else(|| source.and_then(|s| s.attr("src")))
        .map(str::trim)
        .filter(|src| !src.is_empty())?;

    let media_type = el
        .attr("type")
        .or_else(|| source.and_then(|s| s.attr("type")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| media_type_for_path(src).to_string());

    Some(ContentBlock::Embed {
        media_type,
        src: src.to_string(),
        data: None,
    })
}

fn has_block_child(el: &MarkupElement) -> bool {
    el.child_elements().any(|child| is_block(&child.name))
}

/// Header row from `<thead>` or a leading all-`<th>` row; every other row
/// goes to the body.
fn table_block(table: &MarkupElement) -> Option<ContentBlock> {
    let mut headers: Vec<String> = Vec::new();
    let mut rows: Vec<(Vec<String>, bool)> = Vec::new();

    for section in table.child_elements() {
        match section.name.as_str() {
            "thead" => {
                for tr in section.child_elements().filter(|c| c.name == "tr") {
                    let (cells, _) = row_cells(tr);
                    if headers.is_empty() {
                        headers = cells;
                    } else {
                        rows.push((cells, false));
                    }
                }
            }
            "tbody" | "tfoot" => {
                rows.extend(section.child_elements().filter(|c| c.name == "tr").map(row_cells));
            }
            "tr" => rows.push(row_cells(section)),
            _ => {}
        }
    }

    if headers.is_empty() && rows.first().is_some_and(|(_, all_th)| *all_th) {
        headers = rows.remove(0).0;
    }
    let rows: Vec<Vec<String>> = rows.into_iter().map(|(cells, _)| cells).collect();
    if headers.is_empty() && rows.is_empty() {
        return None;
    }
    Some(ContentBlock::Table { headers, rows })
}

/// Cell texts, and whether every cell is a `<th>`.
fn row_cells(tr: &MarkupElement) -> (Vec<String>, bool) {
    let cells: Vec<&MarkupElement> = tr
        .child_elements()
        .filter(|c| c.name == "td" || c.name == "th")
        .collect();
    let all_th = !cells.is_empty() && cells.iter().all(|c| c.name == "th");
    (cells.iter().map(|c| collapse(&c.text())).collect(), all_th)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fill `data` on image and embed blocks from `resources`. References are
/// tried as literal keys first, then resolved against `base_path`.
pub fn attach_resources<L>(blocks: &[ContentBlock], base_path: &str, resources: &L) -> Vec<ContentBlock>
where
    L: ResourceLookup + ?Sized,
{
    let load = |src: &str| -> Option<Vec<u8>> {
        let src = src.trim();
        if !is_data_uri(src) {
            if let Some(data) = resources.bytes(src) {
                return Some(data.to_vec());
            }
        }
        resolve(base_path, src, resources).map(|data| data.into_owned())
    };

    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Image { src, alt, data } => ContentBlock::Image {
                src: src.clone(),
                alt: alt.clone(),
                data: data.clone().or_else(|| load(src)),
            },
            ContentBlock::Embed {
                media_type,
                src,
                data,
            } => ContentBlock::Embed {
                media_type: media_type.clone(),
                src: src.clone(),
                data: data.clone().or_else(|| load(src)),
            },
            ContentBlock::BlockQuote { children } => ContentBlock::BlockQuote {
                children: attach_resources(children, base_path, resources),
            },
            other => other.clone(),
        })
        .collect()
}

impl Chapter {
    /// Renderer-ready blocks with resource bytes attached from this
    /// chapter's own resource map. An image chapter yields its image.
    pub fn content_blocks(&self) -> Vec<ContentBlock> {
        if self.is_image() {
            // The full archive path is the longest alias.
            let image = self
                .resources
                .iter()
                .max_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| b.0.cmp(a.0)));
            return match image {
                Some((src, data)) => vec![ContentBlock::Image {
                    src: src.clone(),
                    alt: None,
                    data: Some(data.clone()),
                }],
                None => Vec::new(),
            };
        }
        let blocks = extract(&self.content);
        attach_resources(&blocks, &self.href, &self.resources)
    }
}
