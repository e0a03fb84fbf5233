use super::response::RawAnalysisResponse;
use crate::error::AnalysisError;
use crate::frame::{Frame, FrameFormat};
use crate::ingredients::IngredientQuery;
use async_trait::async_trait;

/// Remote OCR and ingredient-matching service
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Submit a whole scanning batch as one request
    async fn analyze_frames(&self, frames: &[Frame]) -> Result<RawAnalysisResponse, AnalysisError>;

    /// Submit a single still image
    async fn analyze_image(
        &self,
        image: Vec<u8>,
        file_name: &str,
        format: FrameFormat,
    ) -> Result<RawAnalysisResponse, AnalysisError>;

    /// Add one term to the flagged ingredient list
    async fn add_ingredient(&self, query: &IngredientQuery) -> Result<(), AnalysisError>;

    /// Current flagged ingredient list
    async fn list_ingredients(&self) -> Result<Vec<String>, AnalysisError>;
}
