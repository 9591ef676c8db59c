pub mod config;
pub mod manifest;
pub mod text;
pub mod types;
