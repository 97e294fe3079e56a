//! Core modules shared by every Prospectus subsystem.
//!
//! Storage layout, the serialized DB broker, errors, configuration and
//! CLI output helpers live here. Domain logic lives in `plugins`.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;
