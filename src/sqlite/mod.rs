// SQLite module - a native driver for the grid wrappers backed by rusqlite
//
// This module is split into several sub-modules:
// - config: connector options and builder
// - params: conversion between RowValues and SQLite values
// - connection: the NativeConnection implementation
// - schema: sample schema and seed data

pub mod config;
pub mod connection;
pub mod params;
pub mod schema;

pub use config::{SqliteConnector, SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteNativeConnection;
pub use schema::{SeedOptions, create_sample_database};
