use super::client::AnalysisClient;
use super::response::{
    AddIngredientRequest, FramesRequest, IngredientListResponse, RawAnalysisResponse,
    ServiceErrorBody,
};
use crate::config::ApiConfig;
use crate::error::AnalysisError;
use crate::frame::{Frame, FrameFormat};
use crate::ingredients::IngredientQuery;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// `reqwest` client for the AllerLens analysis service
#[derive(Clone)]
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAnalysisClient {
    pub fn new(config: &ApiConfig) -> Result<Self, AnalysisError> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| AnalysisError::Service {
            details: format!("Invalid base URL '{}': {}", config.base_url, e),
        })?;
        // Url::join replaces the last path segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        info!("Analysis client ready for {}", base_url);

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, AnalysisError> {
        self.base_url.join(path).map_err(|e| AnalysisError::Service {
            details: format!("Invalid endpoint '{}': {}", path, e),
        })
    }

    /// Map non-2xx to `AnalysisError::Status` and decode the body
    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AnalysisError> {
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ServiceErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|e| AnalysisError::Decode {
            details: e.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze_frames(&self, frames: &[Frame]) -> Result<RawAnalysisResponse, AnalysisError> {
        if frames.is_empty() {
            return Err(AnalysisError::EmptyBatch);
        }

        let encoded: Vec<String> = frames.iter().map(Frame::to_data_url).collect();
        let payload_bytes: usize = encoded.iter().map(String::len).sum();
        debug!(
            "Submitting batch of {} frames ({} bytes encoded)",
            frames.len(),
            payload_bytes
        );

        let response = self
            .client
            .post(self.endpoint("upload-frames")?)
            .json(&FramesRequest { frames: &encoded })
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn analyze_image(
        &self,
        image: Vec<u8>,
        file_name: &str,
        format: FrameFormat,
    ) -> Result<RawAnalysisResponse, AnalysisError> {
        debug!("Uploading {} ({} bytes)", file_name, image.len());

        let part = Part::bytes(image)
            .file_name(file_name.to_string())
            .mime_str(format.mime_type())?;
        let form = Form::new().part("image", part);

        let response = self
            .client
            .post(self.endpoint("upload")?)
            .multipart(form)
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn add_ingredient(&self, query: &IngredientQuery) -> Result<(), AnalysisError> {
        let response = self
            .client
            .post(self.endpoint("add-ingredient")?)
            .json(&AddIngredientRequest {
                ingredient: query.as_str(),
            })
            .send()
            .await?;

        let _: serde_json::Value = Self::read_json(response).await?;
        Ok(())
    }

    async fn list_ingredients(&self) -> Result<Vec<String>, AnalysisError> {
        let response = self
            .client
            .get(self.endpoint("list-ingredients")?)
            .send()
            .await?;

        let body: IngredientListResponse = Self::read_json(response).await?;
        Ok(body.ingredients)
    }
}
