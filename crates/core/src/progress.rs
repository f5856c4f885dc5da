//! Progress reporting for [`crate::reader::parse_with_progress`].

use std::fmt;

/// Assembly stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Container,
    Package,
    Navigation,
    Chapters,
    Cover,
}

impl ParseStage {
    pub const ALL: [ParseStage; 5] = [
        ParseStage::Container,
        ParseStage::Package,
        ParseStage::Navigation,
        ParseStage::Chapters,
        ParseStage::Cover,
    ];

    /// 1-based index among [`ParseStage::ALL`].
    pub fn step(self) -> u64 {
        ParseStage::ALL
            .iter()
            .position(|stage| *stage == self)
            .map_or(0, |i| i as u64 + 1)
    }
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::Container => "container",
            ParseStage::Package => "package",
            ParseStage::Navigation => "navigation",
            ParseStage::Chapters => "chapters",
            ParseStage::Cover => "cover",
        };
        f.write_str(name)
    }
}

/// Emitted once a stage has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: ParseStage,
    pub current: u64,
    pub total: u64,
    pub message: Option<String>,
}

/// Receives progress updates. Implement this to drive progress bars or
/// status displays. Purely informational: a parse cannot be cancelled.
pub trait ProgressHandler: Send {
    fn on_progress(&self, event: ProgressEvent);
}

/// Emit the event for `stage` if a handler is provided.
pub fn emit_progress(handler: Option<&dyn ProgressHandler>, stage: ParseStage, message: Option<String>) {
    if let Some(h) = handler {
        h.on_progress(ProgressEvent {
            stage,
            current: stage.step(),
            total: ParseStage::ALL.len() as u64,
            message,
        });
    }
}
