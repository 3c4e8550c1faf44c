//! Core model and contracts for the suggestion engine.
//!
//! `types` holds the suggest item and its merge rules, `query` the
//! backend-neutral query AST, `traits` the strategy and storage seams.

pub mod alias;
pub mod analysis;
pub mod config;
pub mod error;
pub mod memory;
pub mod query;
pub mod query_string;
pub mod traits;
pub mod types;

pub use error::{Result, SuggestError};
pub use types::{Kind, Record, SuggestItem};
