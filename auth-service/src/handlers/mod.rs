//! HTTP handlers for auth-service.

pub mod auth;
