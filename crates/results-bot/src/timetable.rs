/// Exam timetable notices for a regulation, read from the exam portal page on demand.
///
/// Best-effort: an unreachable page yields no notices. Nothing is cached since the page
/// changes as notices are posted.
use std::sync::Arc;

use reqwest::Url;
use tracing::{info, warn};

use crate::model::TimetableNotice;
use crate::parser;
use crate::resolver::ListingSource;

pub const MAX_NOTICES: usize = 10;

pub struct TimetableService {
    source: Arc<dyn ListingSource>,
    base: Url,
}

impl TimetableService {
    pub fn new(source: Arc<dyn ListingSource>, base: Url) -> Self {
        Self { source, base }
    }

    pub async fn notices(&self, regulation: &str) -> Vec<TimetableNotice> {
        let html = match self.source.fetch_listing().await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, regulation, "exam portal unavailable");
                return Vec::new();
            }
        };
        let notices = parser::parse_timetable(&html, &self.base, regulation, MAX_NOTICES);
        info!(regulation, count = notices.len(), "timetable notices found");
        notices
    }
}

/// Message listing `notices`, or a "nothing found" line.
pub fn notices_message(regulation: &str, notices: &[TimetableNotice]) -> String {
    if notices.is_empty() {
        return "No timetable found for that regulation.".to_string();
    }
    let mut text = format!("Exam timetables for {regulation}:\n");
    for (i, notice) in notices.iter().enumerate() {
        text.push_str(&format!("\n{}. {}\n{}\n", i + 1, notice.title, notice.link));
    }
    text
}
