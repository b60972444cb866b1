pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod notify;
pub mod server;
pub mod source;
pub mod state;
pub mod store;
pub mod symbol_cache;
pub mod sync_engine;
pub mod sync_service;
