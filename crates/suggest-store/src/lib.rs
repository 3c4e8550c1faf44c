//! Tantivy-backed storage for suggest items.

pub mod backend;
pub mod compile;
pub mod schema;

pub use backend::TantivyBackend;
