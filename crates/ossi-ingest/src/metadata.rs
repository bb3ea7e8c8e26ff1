//! Header metadata embedded in object content
//!
//! CloudFront-style access logs start with `#Version:` and `#Fields:` header
//! lines. They are not records; they describe the records that follow, so
//! their values are remembered for the rest of the object.

const VERSION_PREFIX: &str = "#Version: ";
const FIELDS_PREFIX: &str = "#Fields: ";

/// Classification of one line of object content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `#Version: <value>` header; carries the trimmed value
    Version(&'a str),
    /// `#Fields: <value>` header; carries the trimmed value
    Fields(&'a str),
    /// Anything else; forwarded to the record decoder untouched
    Data(&'a str),
}

impl<'a> LineKind<'a> {
    pub fn classify(line: &'a str) -> Self {
        if let Some(rest) = line.strip_prefix(VERSION_PREFIX) {
            LineKind::Version(rest.trim())
        } else if let Some(rest) = line.strip_prefix(FIELDS_PREFIX) {
            LineKind::Fields(rest.trim())
        } else {
            LineKind::Data(line)
        }
    }

    pub fn is_metadata(&self) -> bool {
        !matches!(self, LineKind::Data(_))
    }
}

/// Metadata seen so far in one object's stream.
///
/// Owned by the processing pass of a single object and dropped with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadataState {
    pub cloudfront_version: Option<String>,
    pub cloudfront_fields: Option<String>,
}

impl ObjectMetadataState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a metadata line into the state. Data lines leave it untouched.
    pub fn observe(&mut self, kind: LineKind<'_>) {
        match kind {
            LineKind::Version(value) => self.cloudfront_version = Some(value.to_string()),
            LineKind::Fields(value) => self.cloudfront_fields = Some(value.to_string()),
            LineKind::Data(_) => {},
        }
    }
}
