//! `proxy_fleet_controller`: the controller binary's library surface, split
//! out so integration tests can exercise the HTTP API and services against
//! an in-memory store without going through `main`.

pub mod config;
pub mod error;
pub mod http;
pub mod services;
