//! Amity — a personal relationship-management backend.
//!
//! Contacts, activities, tasks and reminders live in a local SQLite vault;
//! the [`sync`] module keeps them consistent with a CalDAV/CardDAV server
//! and with a git repository of markdown files. [`server`] exposes the
//! trigger/status HTTP surface and the `amity` binary drives everything
//! from the command line.

pub mod config;
pub mod db;
pub mod models;
pub mod server;
pub mod sync;

pub use config::Config;
