use std::fmt;

/// One row scraped from the results portal listing.
///
/// Immutable once built; the cache hands out shared snapshots of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEntry {
    /// Normalized display text, e.g. "B.Tech-3-1-R20-Regular-2024"
    pub display_text: String,
    /// Absolute link to the result page
    pub target_link: String,
    /// Dash-separated tokens of the display text, year/semester already arabic
    pub normalized_parts: Vec<String>,
}

impl ResultEntry {
    /// True when this row belongs to the given regulation, year and semester.
    pub fn matches(&self, key: &CacheKey) -> bool {
        let parts = &self.normalized_parts;
        parts.len() > 2
            && parts[1] == key.year.to_string()
            && parts[2] == key.semester.to_string()
            && parts.iter().any(|p| p == &key.regulation)
    }
}

/// Filter index for one snapshot of matching result entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub regulation: String,
    pub year: u8,
    pub semester: u8,
}

impl CacheKey {
    pub fn new(regulation: impl Into<String>, year: u8, semester: u8) -> Self {
        Self {
            regulation: regulation.into(),
            year,
            semester,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.regulation, self.year, self.semester)
    }
}

/// Everything the rendering chain needs to produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub link: String,
    /// Label of the listing option the user picked. Only shown back in text answers;
    /// it carries no department code the portal form could accept.
    pub selected_option: Option<String>,
    pub roll_number: String,
    pub date_of_birth: String,
}

/// A captured image of the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub png: Vec<u8>,
    /// Which strategy or provider produced it
    pub source: String,
}

/// Outcome of the rendering chain, forwarded verbatim to the messaging side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderResult {
    Screenshot(Screenshot),
    Text(String),
    Error(String),
}

/// One exam timetable notice from the exam portal page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableNotice {
    pub title: String,
    pub link: String,
}
