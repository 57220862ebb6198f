//! Illustration Scan
//!
//! This library provides the core functionality for the illustration-scan
//! service, which classifies the canvases of a IIIF Presentation 3 manifest
//! as "illustrated" or "not-illustrated" using a hosted image-classification
//! model.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
