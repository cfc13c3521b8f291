//! Node configuration
//!
//! Process-wide settings: the listening address derived from the node id,
//! and the optional mining reward address.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
