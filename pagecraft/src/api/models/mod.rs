//! API request and response data models.
//!
//! API models are distinct from database models so the two can evolve independently.
//! JSON bodies use camelCase keys; every model is annotated for the OpenAPI document.

pub mod admin;
pub mod credits;
pub mod generate;
pub mod pagination;
pub mod payments;
pub mod projects;
pub mod users;
