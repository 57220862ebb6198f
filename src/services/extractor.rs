//! Job Extractor: derives one classification job per manifest canvas.
//!
//! The scheduler never inspects manifest structure itself; this module is
//! the only place that knows how canvases, annotation pages, and bodies
//! nest.

use crate::models::canvas::{JobDescriptor, ThumbnailRef};
use crate::models::manifest::{Canvas, LanguageMap, Manifest};

/// Derive job descriptors for every canvas, in manifest order.
pub fn job_descriptors(manifest: &Manifest) -> Vec<JobDescriptor> {
    manifest.items.iter().map(describe_canvas).collect()
}

fn describe_canvas(canvas: &Canvas) -> JobDescriptor {
    JobDescriptor {
        id: canvas.id.clone(),
        label: display_label(canvas),
        thumbnail: first_thumbnail(canvas),
        image_url: image_url(canvas),
    }
}

/// Display label from the canvas language map: prefer "en", then "none",
/// then any language, falling back to the canvas id.
fn display_label(canvas: &Canvas) -> String {
    canvas
        .label
        .as_ref()
        .and_then(first_language_value)
        .unwrap_or_else(|| canvas.id.clone())
}

fn first_language_value(label: &LanguageMap) -> Option<String> {
    for language in ["en", "none"] {
        if let Some(value) = label.get(language).and_then(|values| values.first()) {
            return Some(value.clone());
        }
    }
    label
        .values()
        .find_map(|values| values.first())
        .cloned()
}

fn first_thumbnail(canvas: &Canvas) -> Option<ThumbnailRef> {
    canvas.thumbnail.first().map(|thumbnail| ThumbnailRef {
        id: thumbnail.id.clone(),
        format: thumbnail.format.clone(),
    })
}

/// Image locator for classification: the first annotation body id of the
/// first annotation page, falling back to the first thumbnail. Canvases
/// yielding neither are non-classifiable.
fn image_url(canvas: &Canvas) -> Option<String> {
    let painted = canvas
        .items
        .first()
        .and_then(|page| page.items.first())
        .and_then(|annotation| annotation.body.as_ref())
        .and_then(|body| body.first_id());

    painted
        .map(str::to_string)
        .or_else(|| canvas.thumbnail.first().map(|thumbnail| thumbnail.id.clone()))
}
