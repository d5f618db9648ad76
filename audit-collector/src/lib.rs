pub mod audit;
pub mod aws;
pub mod collector_core;
pub mod collectors;
pub mod config;
pub mod engine;
pub mod error;
pub mod mock;
pub mod out;
pub mod utils;
