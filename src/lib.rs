//! A single-user TODO tracker served as server-rendered HTML over SQLite.

pub mod actions;
pub mod admin;
pub mod config;
pub mod database;
pub mod error;
pub mod model;
pub mod query;
pub mod render;
pub mod routes;
pub mod validation;
