//! Concrete locations and their text form.

use std::fmt;

/// One step of a concrete location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Object field.
    Field(String),
    /// Array element.
    Index(usize),
    /// The array as a whole, when no element is selected.
    Whole,
}

/// A location inside an instance: fields and element indexes from the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConcretePath {
    segments: Vec<Segment>,
}

impl ConcretePath {
    /// The root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build from segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Append a segment.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Segments from the root.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether this is the root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for ConcretePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&DefaultPathFormatter.format(self))
    }
}

/// Renders concrete locations for validation results.
pub trait PathFormatter: Send + Sync {
    /// Text for `path`.
    fn format(&self, path: &ConcretePath) -> String;
}

/// `Items[2].Total`; the whole-array marker renders as `[*]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPathFormatter;

impl PathFormatter for DefaultPathFormatter {
    fn format(&self, path: &ConcretePath) -> String {
        let mut out = String::new();
        for segment in path.segments() {
            match segment {
                Segment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                Segment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
                Segment::Whole => out.push_str("[*]"),
            }
        }
        out
    }
}
