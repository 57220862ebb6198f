use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the hosted inference API.
    #[serde(default = "default_inference_endpoint")]
    pub inference_endpoint: String,

    /// Image-classification model identifier on the inference API.
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// API token for the inference API. Optional; public models work without one.
    pub inference_api_token: Option<String>,

    /// Number of concurrent classification workers per run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Initial confidence threshold (percent) for the filtered canvas view.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_inference_endpoint() -> String {
    "https://api-inference.huggingface.co".to_string()
}

fn default_model_id() -> String {
    "small-models-for-glam/historical-illustration-detector".to_string()
}

fn default_max_concurrency() -> usize {
    3
}

fn default_confidence_threshold() -> u8 {
    50
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
