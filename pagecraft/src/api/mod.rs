//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Generation** (`/api/generate`): credit-metered code generation, blocking or streamed
//! - **Projects** (`/api/projects/*`): the caller's generation history
//! - **Account** (`/api/me`, `/api/credits/transactions`): profile, balance and ledger
//! - **Payments** (`/api/checkout`, `/webhooks/stripe`): buying credits
//! - **Admin** (`/api/admin/*`): credit grants and read-only listings
//!
//! All endpoints are documented with `utoipa`; the document is served at
//! `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
