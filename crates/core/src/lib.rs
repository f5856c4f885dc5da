pub mod archive;
pub mod blocks;
pub mod config;
pub mod document;
pub mod error;
pub mod markup;
pub mod media;
pub mod metadata;
pub mod package;
pub mod progress;
pub mod reader;
pub mod reconcile;
pub mod resolve;
pub mod security;
pub mod toc;

pub use reader::{parse, parse_bytes, parse_path, parse_with_progress, ParseOptions};

pub mod prelude {
    pub use crate::document::*;
    pub use crate::error::*;
    pub use crate::reader::{parse, parse_bytes, parse_path, ParseOptions};
    pub use crate::resolve::ResourceLookup;
}
