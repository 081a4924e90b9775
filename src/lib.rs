pub mod auth;
pub mod compression;
pub mod config;
pub mod http;
