//! Store backends and configuration.

pub mod config;
pub mod file_store;
pub mod memory_store;
pub mod remote_store;
pub mod store;
