mod client;
mod http;
mod response;

pub use client::AnalysisClient;
pub use http::HttpAnalysisClient;
pub use response::{RawAnalysisResponse, RecognizedText};
