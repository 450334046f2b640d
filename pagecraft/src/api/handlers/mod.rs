//! Axum route handlers.

pub mod admin;
pub mod generate;
pub mod payments;
pub mod projects;
pub mod users;
