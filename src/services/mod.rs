pub mod classifier;
pub mod extractor;
pub mod scheduler;
pub mod scoring;
