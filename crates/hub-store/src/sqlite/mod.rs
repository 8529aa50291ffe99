//! `SQLite` backend: pool, schema migrations, and repositories.

pub mod connection;
pub mod migrations;
pub mod repositories;
