pub mod blocking;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ingest;
pub mod matching;
pub mod metrics;
pub mod models;
pub mod normalize;
