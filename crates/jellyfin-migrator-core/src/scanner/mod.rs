//! Heuristics that decide whether a raw string is worth treating as a path or an identifier.

pub mod classify;
pub mod images;

pub use classify::{classify, Classification, Confidence, ValueKind};
pub use images::{image_paths, rewrite_image_list};
