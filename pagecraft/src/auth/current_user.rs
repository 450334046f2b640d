use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session::{self, SessionClaims},
    config::Config,
    db::{Store, models::users::UserCreateDBRequest},
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

/// Find the session token in the `Authorization` header or the session cookie.
///
/// The header wins when both are present.
fn extract_session_token(headers: &HeaderMap, config: &Config) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    let cookie_name = &config.auth.jwt.cookie_name;
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| name == cookie_name)
        .map(|(_, value)| value.to_string())
}

/// Authenticate with a session token if one is present
/// Returns:
/// - None: No token present
/// - Some(Ok(user)): Valid token, user resolved (and provisioned if new)
/// - Some(Err(error)): Token present but invalid, or user lookup failed
#[instrument(skip(parts, state))]
async fn try_jwt_session_auth(parts: &Parts, state: &AppState) -> Option<Result<CurrentUser>> {
    let token = extract_session_token(&parts.headers, &state.config)?;

    let claims: SessionClaims = match session::verify_session_token(&token, &state.config) {
        Ok(claims) => claims,
        Err(e) => return Some(Err(e)),
    };

    let request = UserCreateDBRequest {
        id: claims.sub,
        email: claims.email,
        full_name: claims.user_metadata.full_name,
        initial_credits: state.config.credits.initial_credits_for_new_users,
    };

    Some(
        state
            .store
            .get_or_create_user(&request)
            .await
            .map(CurrentUser::from)
            .map_err(Error::Database),
    )
}

/// Authenticate from the trusted proxy header if present
/// Returns:
/// - None: No proxy header present, or unknown user with auto-creation disabled
/// - Some(Ok(user)): User found or created
/// - Some(Err(error)): Store failure
#[instrument(skip(parts, state))]
async fn try_proxy_header_auth(parts: &Parts, state: &AppState) -> Option<Result<CurrentUser>> {
    let proxy_config = &state.config.auth.proxy_header;
    let email = parts
        .headers
        .get(&proxy_config.email_header_name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|e| !e.is_empty())?;

    match state.store.get_user_by_email(email).await {
        Ok(Some(user)) => Some(Ok(user.into())),
        Ok(None) if proxy_config.auto_create_users => {
            let request = UserCreateDBRequest {
                id: Uuid::new_v4(),
                email: email.to_string(),
                full_name: None,
                initial_credits: state.config.credits.initial_credits_for_new_users,
            };
            Some(state.store.get_or_create_user(&request).await.map(CurrentUser::from).map_err(Error::Database))
        }
        Ok(None) => None,
        Err(e) => Some(Err(Error::Database(e))),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Each method returns None when its credentials are absent. The first success wins;
        // if every present credential failed, the first failure is reported.
        let mut first_error = None;

        if state.config.auth.jwt.enabled {
            match try_jwt_session_auth(parts, state).await {
                Some(Ok(user)) => {
                    debug!("Found JWT session authenticated user: {}", user.id);
                    return Ok(user);
                }
                Some(Err(e)) => {
                    trace!("JWT session authentication failed: {:?}", e);
                    first_error.get_or_insert(e);
                }
                None => trace!("No session token present"),
            }
        }

        if state.config.auth.proxy_header.enabled {
            match try_proxy_header_auth(parts, state).await {
                Some(Ok(user)) => {
                    debug!("Found proxy header authenticated user: {}", user.id);
                    return Ok(user);
                }
                Some(Err(e)) => {
                    trace!("Proxy header authentication failed: {:?}", e);
                    first_error.get_or_insert(e);
                }
                None => trace!("No proxy header present"),
            }
        }

        Err(first_error.unwrap_or(Error::Unauthenticated { message: None }))
    }
}
