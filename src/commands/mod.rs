pub mod harvest;

// Re-export command functions for convenience
pub use harvest::{harvest, HarvestParams};
