pub mod cache;
pub mod dedup;
pub mod dispatch;
pub mod orchestrator;
pub mod ranking;
pub mod stats;
pub mod types;
