//! Owned element trees over chapter markup.
//!
//! HTML goes through `scraper` (html5ever), generic XML through `quick-xml`.
//! Both produce the same [`MarkupElement`] tree so the block walk does not
//! care which parser succeeded. Element and attribute names are lowercase
//! local names.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use scraper::{ElementRef, Html, Node};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Element(MarkupElement),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,
}

impl MarkupElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &MarkupElement> {
        self.children.iter().filter_map(|child| match child {
            MarkupNode::Element(el) => Some(el),
            MarkupNode::Text(_) => None,
        })
    }

    /// Concatenated descendant text.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                MarkupNode::Text(t) => out.push_str(t),
                MarkupNode::Element(el) if el.name == "br" => out.push(' '),
                MarkupNode::Element(el) => el.collect_text(out),
            }
        }
    }

    /// First element named `name`, self included, depth-first.
    pub fn find(&self, name: &str) -> Option<&MarkupElement> {
        if self.name == name {
            return Some(self);
        }
        self.child_elements().find_map(|el| el.find(name))
    }
}

/// Parse as HTML and return `<body>` (html5ever always synthesizes one).
pub fn parse_html(markup: &str, max_depth: u32) -> MarkupElement {
    let document = Html::parse_document(markup);
    let root = document.root_element();
    let body = find_body(root).unwrap_or(root);
    let mut truncated = false;
    let element = from_scraper(body, 0, max_depth, &mut truncated);
    if truncated {
        tracing::warn!("Markup nesting exceeds {} levels, truncated", max_depth);
    }
    element
}

fn find_body(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
}

fn from_scraper(el: ElementRef<'_>, depth: u32, max_depth: u32, truncated: &mut bool) -> MarkupElement {
    let mut element = MarkupElement {
        name: el.value().name().to_ascii_lowercase(),
        attrs: el
            .value()
            .attrs()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect(),
        children: Vec::new(),
    };
    if depth >= max_depth {
        *truncated = true;
        return element;
    }
    for child in el.children() {
        match child.value() {
            Node::Text(text) => element.children.push(MarkupNode::Text(text.text.to_string())),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    element
                        .children
                        .push(MarkupNode::Element(from_scraper(child, depth + 1, max_depth, truncated)));
                }
            }
            _ => {}
        }
    }
    element
}

/// Parse as generic XML and return the root element. `None` when the
/// markup is not well-formed.
pub fn parse_xml(markup: &str, max_depth: u32) -> Option<MarkupElement> {
    let mut reader = XmlReader::from_str(markup);
    let mut stack: Vec<MarkupElement> = Vec::new();
    let mut root = None;
    // Open elements past `max_depth` that are being dropped.
    let mut skipped: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if skipped > 0 || stack.len() >= max_depth as usize {
                    skipped += 1;
                    continue;
                }
                stack.push(xml_element(e));
            }
            Ok(Event::Empty(ref e)) if skipped == 0 => attach(&mut stack, &mut root, xml_element(e)),
            Ok(Event::End(_)) => {
                if skipped > 0 {
                    skipped -= 1;
                } else if let Some(el) = stack.pop() {
                    attach(&mut stack, &mut root, el);
                }
            }
            Ok(Event::Text(ref e)) if skipped == 0 => {
                let text = match e.unescape() {
                    Ok(t) => t.into_owned(),
                    Err(_) => String::from_utf8_lossy(e).into_owned(),
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(MarkupNode::Text(text));
                }
            }
            Ok(Event::CData(ref e)) if skipped == 0 => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(MarkupNode::Text(String::from_utf8_lossy(e).into_owned()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!("XML parse failed at {}: {}", reader.buffer_position(), e);
                return None;
            }
            _ => {}
        }
    }

    // Unclosed elements at EOF are closed implicitly.
    while let Some(el) = stack.pop() {
        attach(&mut stack, &mut root, el);
    }
    root
}

fn xml_element(e: &BytesStart<'_>) -> MarkupElement {
    MarkupElement {
        name: String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase(),
        attrs: e
            .attributes()
            .flatten()
            .map(|a| {
                let key = String::from_utf8_lossy(a.key.local_name().as_ref()).to_ascii_lowercase();
                let value = match a.unescape_value() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
                };
                (key, value)
            })
            .collect(),
        children: Vec::new(),
    }
}

fn attach(stack: &mut [MarkupElement], root: &mut Option<MarkupElement>, el: MarkupElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(MarkupNode::Element(el)),
        None if root.is_none() => *root = Some(el),
        None => {}
    }
}

/// Tag and attribute pairs whose values reference embedded resources.
const RESOURCE_ATTRIBUTES: [(&str, &str); 9] = [
    ("img", "src"),
    ("image", "href"),
    ("embed", "src"),
    ("iframe", "src"),
    ("video", "src"),
    ("video", "poster"),
    ("audio", "src"),
    ("source", "src"),
    ("object", "data"),
];

/// Body content of one spine document, ready to be merged into a chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyFragment {
    /// Inner markup of `<body>`, without the document or namespace wrappers.
    pub html: String,
    /// Resource references in document order, duplicates removed.
    pub references: Vec<String>,
}

pub fn body_fragment(markup: &str) -> BodyFragment {
    let document = Html::parse_document(markup);
    let root = document.root_element();
    let body = find_body(root).unwrap_or(root);

    let mut references: Vec<String> = Vec::new();
    for el in body.descendants().filter_map(ElementRef::wrap) {
        let name = el.value().name();
        for (tag, attribute) in RESOURCE_ATTRIBUTES {
            if tag != name {
                continue;
            }
            let value = el
                .value()
                .attrs()
                .find(|(k, _)| k.eq_ignore_ascii_case(attribute))
                .map(|(_, v)| v.trim());
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                if !references.iter().any(|r| r == value) {
                    references.push(value.to_string());
                }
            }
        }
    }

    BodyFragment {
        html: body.inner_html().trim().to_string(),
        references,
    }
}

impl BodyFragment {
    /// Replace resource attribute values in `html`. `rewrite` receives each
    /// trimmed reference and returns its replacement, or `None` to keep it.
    pub fn rewrite_references<F>(&mut self, mut rewrite: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.html.len());
        let mut rest = self.html.as_str();
        // Text `<` is serialized as `&lt;`, so every `<` opens a tag.
        while let Some(open) = rest.find('<') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let end = tail.find('>').map_or(tail.len(), |i| i + 1);
            out.push_str(&rewrite_tag(&tail[..end], &mut rewrite));
            rest = &tail[end..];
        }
        out.push_str(rest);
        self.html = out;
    }
}

/// One serialized start tag with its resource attributes rewritten.
fn rewrite_tag<F>(tag: &str, rewrite: &mut F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let name_len = tag[1..]
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(tag.len() - 1);
    let name = tag[1..1 + name_len].to_ascii_lowercase();

    let mut tag = tag.to_string();
    for (_, attribute) in RESOURCE_ATTRIBUTES.iter().filter(|(t, _)| *t == name) {
        let needle = format!("{attribute}=\"");
        let mut from = 0;
        while let Some(found) = tag[from..].find(&needle) {
            let at = from + found;
            let value_start = at + needle.len();
            let Some(value_len) = tag[value_start..].find('"') else {
                break;
            };
            // `src="` inside `data-src="` is a different attribute.
            let bounded = tag[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_whitespace() || c == ':');
            let value = unescape_attribute(&tag[value_start..value_start + value_len]);
            let replacement = if bounded { rewrite(value.trim()) } else { None };
            match replacement {
                Some(replacement) => {
                    let escaped = escape_attribute(&replacement);
                    tag.replace_range(value_start..value_start + value_len, &escaped);
                    from = value_start + escaped.len() + 1;
                }
                None => from = value_start + value_len + 1,
            }
        }
    }
    tag
}

fn unescape_attribute(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\u{a0}', "&nbsp;")
}
