pub mod api;
pub mod color_utils;
pub mod config;
pub mod detection;
pub mod field;
pub mod image_input;
pub mod metrics;
pub mod output_manager;
pub mod overlay;
pub mod processing;
pub mod progress;
pub mod report;
pub mod session;
pub mod shared_metadata;
