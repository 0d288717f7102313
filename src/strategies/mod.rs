//! Option strategy construction from a chain and its signals.

pub mod generator;

pub use generator::{generate, GeneratorInput, StrategyConfig};
