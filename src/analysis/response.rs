use serde::{Deserialize, Serialize};

/// Text recognized by the service: one string, or one string per frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecognizedText {
    Single(String),
    PerFrame(Vec<String>),
}

impl RecognizedText {
    /// Flatten to one string, skipping blank per-frame entries
    pub fn joined(&self) -> String {
        match self {
            RecognizedText::Single(text) => text.trim().to_string(),
            RecognizedText::PerFrame(texts) => texts
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Body returned by `/upload` and `/upload-frames`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnalysisResponse {
    #[serde(default)]
    pub flagged_ingredients: Vec<String>,

    /// `all_text` from the batch endpoint, `extracted_text` from single uploads
    #[serde(default, alias = "extracted_text", skip_serializing_if = "Option::is_none")]
    pub all_text: Option<RecognizedText>,
}

impl RawAnalysisResponse {
    pub fn new<I, S>(flagged: I, text: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flagged_ingredients: flagged.into_iter().map(Into::into).collect(),
            all_text: text.map(|t| RecognizedText::Single(t.to_string())),
        }
    }
}

/// Request body for `/upload-frames`
#[derive(Debug, Serialize)]
pub struct FramesRequest<'a> {
    pub frames: &'a [String],
}

/// Request body for `/add-ingredient`
#[derive(Debug, Serialize)]
pub struct AddIngredientRequest<'a> {
    pub ingredient: &'a str,
}

/// Body of `/list-ingredients`
#[derive(Debug, Deserialize)]
pub struct IngredientListResponse {
    #[serde(default)]
    pub ingredients: Vec<String>,
}

/// Error body the service attaches to non-2xx responses
#[derive(Debug, Deserialize)]
pub struct ServiceErrorBody {
    pub error: String,
}
