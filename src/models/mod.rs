//! Shared model types

pub mod catalog;

pub use catalog::{CatalogEntry, CategoryEntry, StreamKey};
