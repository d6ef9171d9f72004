pub mod cache;
pub mod tier;

pub use cache::{ModelCache, ModelHandle};
pub use tier::ModelTier;
