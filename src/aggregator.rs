use crate::analysis::RawAnalysisResponse;
use crate::ingredients::normalize_term;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Deduplicated outcome of one scan or upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Recognized label text, possibly empty
    pub recognized_text: String,
    /// Flagged terms, unique case-insensitively, in first-seen order and casing
    pub flagged_ingredients: Vec<String>,
}

impl AnalysisResult {
    pub fn is_clear(&self) -> bool {
        self.flagged_ingredients.is_empty()
    }

    /// Case-insensitive membership test
    pub fn flags(&self, term: &str) -> bool {
        match normalize_term(term) {
            Some(wanted) => self
                .flagged_ingredients
                .iter()
                .any(|t| normalize_term(t).as_deref() == Some(wanted.as_str())),
            None => false,
        }
    }
}

/// Merges analysis responses into a single [`AnalysisResult`]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Union the flagged terms of every response, keeping the first spelling
    /// seen for each case-insensitive term, and join the recognized texts.
    pub fn merge(responses: &[RawAnalysisResponse]) -> AnalysisResult {
        let mut seen = HashSet::new();
        let mut flagged_ingredients = Vec::new();

        for term in responses.iter().flat_map(|r| r.flagged_ingredients.iter()) {
            if let Some(key) = normalize_term(term) {
                if seen.insert(key) {
                    flagged_ingredients.push(term.trim().to_string());
                }
            }
        }

        let recognized_text = responses
            .iter()
            .filter_map(|r| r.all_text.as_ref())
            .map(|text| text.joined())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        AnalysisResult {
            recognized_text,
            flagged_ingredients,
        }
    }
}
