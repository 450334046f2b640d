//! Authentication.
//!
//! Users sign in with the external identity provider; this service only verifies the
//! resulting credentials. Two methods are supported:
//!
//! ## 1. Session tokens
//!
//! HS256 JWTs signed with the identity provider's shared secret (`secret_key`), read from
//! the `Authorization: Bearer <token>` header or from the session cookie. The `sub` claim is
//! the user's ID; users are provisioned in the local store the first time they appear.
//!
//! ## 2. Proxy headers
//!
//! For deployments behind a trusted SSO proxy, the user's email is read from a configured
//! header.
//!
//! Handlers take a [`CurrentUser`](crate::api::models::users::CurrentUser) argument to require
//! authentication, and call [`CurrentUser::require_admin`](crate::api::models::users::CurrentUser::require_admin)
//! for admin-only operations.

pub mod current_user;
pub mod session;
