//! Concrete text strategies for the suggestion engine and the registry that
//! assembles them from configuration.

pub mod normalize;
pub mod reading;
pub mod registry;
pub mod tokenize;

pub use registry::StrategyRegistry;
