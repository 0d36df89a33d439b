//! Middleware for the administrative API.

pub mod auth;
