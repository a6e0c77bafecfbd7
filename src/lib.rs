// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod feedback;
pub mod indicators;
pub mod llm;
pub mod market_data;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod telegram;

// Re-export commonly used types
pub use models::*;
pub use orchestrator::{BatchReport, Orchestrator};

// Error handling
pub use error::{Error, Result};
