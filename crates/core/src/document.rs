use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A parsed EPUB: reconciled chapters, navigation tree, and bibliographic data.
/// Built once by [`crate::reader::parse`] and owned by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpubDocument {
    pub title: String,
    pub author: Option<String>,
    pub cover_image: Option<Vec<u8>>,
    pub chapters: Vec<Chapter>,
    pub toc: Vec<TableOfContentsEntry>,
    pub metadata: Metadata,
    pub identifier: String,
}

impl EpubDocument {
    /// Chapter at `index` in the chapter list (not the spine position).
    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }
}

/// Resource bytes keyed by every alias the resource was resolvable under.
/// Several keys may hold identical bytes.
pub type ResourceMap = HashMap<String, Vec<u8>>;

/// One logical reading unit, possibly merged from several spine files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    /// Archive path of the first spine file; empty for standalone image chapters.
    pub href: String,
    pub title: Option<String>,
    /// Merged body markup wrapped in a single document shell.
    pub content: String,
    pub media_type: String,
    /// Spine index the chapter starts at. Chapter lists are sorted by it.
    pub position: usize,
    pub resources: ResourceMap,
}

impl Chapter {
    /// Whether this chapter was synthesized from a standalone image spine item.
    pub fn is_image(&self) -> bool {
        self.href.is_empty() && self.content.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOfContentsEntry {
    pub id: String,
    /// Archive path of the target, fragment preserved.
    pub href: String,
    pub title: String,
    /// Nesting depth, 0 for top-level entries.
    pub level: usize,
    pub children: Vec<TableOfContentsEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub creator: Option<String>,
    pub contributor: Option<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub language: String,
    pub identifier: String,
    pub date: String,
    pub rights: String,
    pub other: HashMap<String, String>,
}

/// Renderer-ready content unit. Only `BlockQuote` nests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Carries first-line indent intent, unlike `Text`.
    Paragraph {
        text: String,
    },
    LineBreak,
    BlockQuote {
        children: Vec<ContentBlock>,
    },
    Image {
        src: String,
        alt: Option<String>,
        data: Option<Vec<u8>>,
    },
    Header {
        level: u8,
        text: String,
    },
    Link {
        href: String,
        text: String,
    },
    List {
        items: Vec<String>,
        ordered: bool,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Embed {
        media_type: String,
        src: String,
        data: Option<Vec<u8>>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}
