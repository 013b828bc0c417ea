pub mod id;
pub mod stats;
