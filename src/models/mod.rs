pub mod canvas;
pub mod manifest;
