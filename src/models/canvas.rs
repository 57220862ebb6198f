use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Fixed reason recorded on canvases that carry no usable image reference.
pub const NO_IMAGE_REFERENCE: &str = "no image reference";

/// Status of a single canvas in the classification state table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CanvasStatus {
    Pending,
    Classifying,
    Classified,
    Error,
    Skipped,
}

/// Model verdict for one canvas image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PredictedLabel {
    Illustrated,
    NotIllustrated,
}

/// Reference to a canvas thumbnail image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThumbnailRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Immutable per-canvas classification job, derived once from the manifest.
///
/// A missing `image_url` means the canvas cannot be classified and is
/// skipped for the lifetime of the table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescriptor {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<ThumbnailRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Mutable classification state for one canvas. Owned by the scheduler;
/// everything handed out to readers is a clone of a consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasState {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<ThumbnailRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub status: CanvasStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_label: Option<PredictedLabel>,
    /// P(illustrated) in [0,1], present only when classified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CanvasState {
    /// Build the initial state for a descriptor: `pending` when an image
    /// reference exists, otherwise permanently `skipped`.
    pub fn from_descriptor(descriptor: JobDescriptor) -> Self {
        let (status, error) = if descriptor.image_url.is_some() {
            (CanvasStatus::Pending, None)
        } else {
            (CanvasStatus::Skipped, Some(NO_IMAGE_REFERENCE.to_string()))
        };

        Self {
            id: descriptor.id,
            label: descriptor.label,
            thumbnail: descriptor.thumbnail,
            image_url: descriptor.image_url,
            status,
            predicted_label: None,
            confidence: None,
            error,
        }
    }

    /// Clear any prior result or error ahead of a new run. Skipped canvases
    /// never leave `skipped` and keep their reason.
    pub fn reset_for_run(&mut self) {
        if self.status == CanvasStatus::Skipped {
            return;
        }
        self.status = CanvasStatus::Pending;
        self.predicted_label = None;
        self.confidence = None;
        self.error = None;
    }
}

/// Aggregate counts over the state table. `pending` includes canvases
/// currently being classified; skipped canvases are counted nowhere.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub classified: usize,
    pub pending: usize,
    pub errors: usize,
}
