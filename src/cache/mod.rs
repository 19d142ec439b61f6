//! On-disk discovery cache.
//!
//! - `paths`: deterministic cache file locations per backend
//! - `file_cache`: tolerant loads and atomic saves of JSON values

pub mod file_cache;
pub mod paths;

pub use file_cache::{load, save_and_replace, save_or_update};
pub use paths::{
    cache_directory_in, default_cache_directory, default_cache_root, profile_cache_directory,
    schema_cache_file, server_cache_file,
};
