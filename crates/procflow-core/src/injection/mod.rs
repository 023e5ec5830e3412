//! Inyección determinista de valores sobre outputs con nombre.

pub mod merge;

pub use merge::{apply_modified_values, merge_json};
