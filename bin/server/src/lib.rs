//! portcullis gateway server.
//!
//! This crate provides the HTTP surface of the gateway: browser and device
//! logins through external identity providers, and the JWT session cookies
//! those logins produce.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
