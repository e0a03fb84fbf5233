use crate::analysis::AnalysisClient;
use crate::error::{AnalysisError, IngredientError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

/// Canonical comparison form of an ingredient term: trimmed and lower-cased
///
/// Returns `None` for blank input.
pub fn normalize_term(term: &str) -> Option<String> {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// A single normalized ingredient term submitted to the ingredient list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IngredientQuery(String);

impl IngredientQuery {
    pub fn new(term: &str) -> Result<Self, IngredientError> {
        normalize_term(term).map(Self).ok_or(IngredientError::Empty)
    }

    /// Split comma-separated input into unique queries, first-seen order
    pub fn parse_list(input: &str) -> Result<Vec<Self>, IngredientError> {
        let mut seen = HashSet::new();
        let queries: Vec<Self> = input
            .split(',')
            .filter_map(|part| Self::new(part).ok())
            .filter(|query| seen.insert(query.0.clone()))
            .collect();

        if queries.is_empty() {
            return Err(IngredientError::NoTerms);
        }
        Ok(queries)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IngredientQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IngredientQuery {
    type Error = IngredientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<IngredientQuery> for String {
    fn from(query: IngredientQuery) -> Self {
        query.0
    }
}

/// Outcome of submitting several terms one at a time
#[derive(Debug)]
pub struct AddIngredientsReport {
    /// Terms the service accepted, in submission order
    pub added: Vec<IngredientQuery>,
    /// The term that failed and why; later terms were not submitted
    pub failed: Option<(IngredientQuery, AnalysisError)>,
}

impl AddIngredientsReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

/// Submit each term individually, stopping at the first failure
pub async fn add_ingredients(
    client: &dyn AnalysisClient,
    queries: Vec<IngredientQuery>,
) -> AddIngredientsReport {
    let mut added = Vec::with_capacity(queries.len());

    for query in queries {
        match client.add_ingredient(&query).await {
            Ok(()) => {
                info!("Added ingredient '{}'", query);
                added.push(query);
            }
            Err(e) => {
                warn!("Failed to add ingredient '{}': {}", query, e);
                return AddIngredientsReport {
                    added,
                    failed: Some((query, e)),
                };
            }
        }
    }

    AddIngredientsReport {
        added,
        failed: None,
    }
}
