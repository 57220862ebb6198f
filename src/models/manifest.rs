//! Serde shapes for the subset of IIIF Presentation 3 the extractor reads.
//!
//! Only the fields needed to derive classification jobs are modeled; the
//! rest of the manifest is ignored during deserialization.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Language map as used by IIIF `label` properties, e.g.
/// `{"en": ["p. 1"], "none": ["[1]"]}`.
pub type LanguageMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub items: Vec<Canvas>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Canvas {
    pub id: String,
    #[serde(default)]
    pub label: Option<LanguageMap>,
    #[serde(default)]
    pub thumbnail: Vec<Thumbnail>,
    /// Annotation pages holding the painting annotations.
    #[serde(default)]
    pub items: Vec<AnnotationPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub id: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationPage {
    #[serde(default)]
    pub items: Vec<Annotation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub body: Option<AnnotationBody>,
}

/// Annotation bodies appear as a bare URI string, a resource object, or an
/// array of either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnnotationBody {
    Uri(String),
    Resource(BodyResource),
    Many(Vec<AnnotationBody>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BodyResource {
    #[serde(default)]
    pub id: Option<String>,
}

impl AnnotationBody {
    /// First usable body id, recursing into array bodies.
    pub fn first_id(&self) -> Option<&str> {
        match self {
            AnnotationBody::Uri(id) => Some(id),
            AnnotationBody::Resource(resource) => resource.id.as_deref(),
            AnnotationBody::Many(bodies) => bodies.first().and_then(AnnotationBody::first_id),
        }
    }
}
