#![forbid(unsafe_code)]

//! Shared building blocks for the tubegrab download server.

pub mod config;
pub mod downloads;
pub mod extractor;
pub mod fetch;
pub mod formats;
pub mod jobs;
pub mod logging;
pub mod naming;
pub mod security;
