pub mod config;
pub mod http;

pub use iris_core as core;
