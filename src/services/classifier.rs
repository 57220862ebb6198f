//! Classification capability: a lazily-initialized, shared handle on an
//! image-classification model hosted behind an inference API.
//!
//! The provider performs at most one initialization attempt per process;
//! the outcome, success or failure, is memoized and replayed to every
//! caller after that.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

/// One (label, score) pair returned by the model for an image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("failed to fetch image: {0}")]
    ImageFetch(#[source] reqwest::Error),

    #[error("inference request failed: {0}")]
    Inference(#[source] reqwest::Error),

    #[error("inference API error: {0}")]
    Api(String),

    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}

/// The classification function. Invoked concurrently by the scheduler's
/// workers; implementations must be internally shareable.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image_url: &str) -> Result<Vec<LabelScore>, ClassifierError>;
}

/// Hands out the memoized classifier instance.
#[async_trait]
pub trait ClassifierProvider: Send + Sync {
    async fn get(&self) -> Result<Arc<dyn ImageClassifier>, ClassifierError>;

    /// Current lifecycle state, without forcing initialization.
    fn status(&self) -> ProviderStatus;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Uninitialized,
    Ready,
    Unavailable,
}

/// Memoizes a single initialization attempt of the classification capability.
///
/// A failed attempt is memoized too: every later `get` replays the failure
/// instead of retrying, so the process never initializes the model twice.
pub struct MemoizedProvider<F> {
    factory: F,
    cell: OnceCell<Result<Arc<dyn ImageClassifier>, String>>,
}

impl<F, Fut> MemoizedProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<dyn ImageClassifier>, ClassifierError>> + Send,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            cell: OnceCell::new(),
        }
    }
}

#[async_trait]
impl<F, Fut> ClassifierProvider for MemoizedProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<dyn ImageClassifier>, ClassifierError>> + Send,
{
    async fn get(&self) -> Result<Arc<dyn ImageClassifier>, ClassifierError> {
        let outcome = self
            .cell
            .get_or_init(|| async {
                match (self.factory)().await {
                    Ok(classifier) => {
                        tracing::info!("classifier initialized");
                        Ok(classifier)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "classifier initialization failed");
                        Err(e.to_string())
                    }
                }
            })
            .await;

        match outcome {
            Ok(classifier) => Ok(Arc::clone(classifier)),
            Err(message) => Err(ClassifierError::Unavailable(message.clone())),
        }
    }

    fn status(&self) -> ProviderStatus {
        match self.cell.get() {
            None => ProviderStatus::Uninitialized,
            Some(Ok(_)) => ProviderStatus::Ready,
            Some(Err(_)) => ProviderStatus::Unavailable,
        }
    }
}

/// Client for a Hugging Face style hosted inference API.
pub struct InferenceApiClient {
    http: reqwest::Client,
    endpoint: String,
    model_id: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: String,
}

impl InferenceApiClient {
    pub fn new(endpoint: &str, model_id: &str, api_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            api_token,
        }
    }

    /// Probe the model's status route so a cold or missing model surfaces
    /// as an initialization failure rather than a per-canvas error.
    pub async fn warm_up(&self) -> Result<(), ClassifierError> {
        let url = format!("{}/status/{}", self.endpoint, self.model_id);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(ClassifierError::Inference)?;
        if !response.status().is_success() {
            return Err(ClassifierError::Unavailable(format!(
                "model {} returned status {}",
                self.model_id,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageClassifier for InferenceApiClient {
    /// Fetch the image bytes at `image_url` and post them to the model,
    /// returning the raw (label, score) list.
    async fn classify(&self, image_url: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let image = self
            .http
            .get(image_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(ClassifierError::ImageFetch)?
            .bytes()
            .await
            .map_err(ClassifierError::ImageFetch)?;

        let url = format!("{}/models/{}", self.endpoint, self.model_id);
        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec());
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(ClassifierError::Inference)?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<ApiErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("status {status}"),
            };
            return Err(ClassifierError::Api(message));
        }

        response.json().await.map_err(ClassifierError::Inference)
    }
}

/// Build the process-wide provider for the configured model.
pub fn inference_provider(
    endpoint: String,
    model_id: String,
    api_token: Option<String>,
) -> impl ClassifierProvider {
    MemoizedProvider::new(move || {
        let client = InferenceApiClient::new(&endpoint, &model_id, api_token.clone());
        async move {
            client.warm_up().await?;
            Ok(Arc::new(client) as Arc<dyn ImageClassifier>)
        }
    })
}
