// src/lib.rs

//! newshound: discovers news articles on publication sites, scrapes them
//! into a SQL store and streams them back out over HTTP.

pub mod client;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
