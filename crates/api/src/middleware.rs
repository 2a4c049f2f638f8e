//! Request middleware: session load/commit, caller resolution and route guards.
//!
//! Layering, outermost first: `load_and_save` → `authenticate` → guards
//! (`require_authenticated`, `require_activated`, `require_permission`).

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};

use greenlight_auth::{Account, AuthzError, Permission, require_activated as check_activated};
use greenlight_core::{AccountId, DomainError};
use greenlight_infra::Session;
use greenlight_infra::session::AUTHENTICATED_ACCOUNT_KEY;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::AuthContext;

pub const SESSION_COOKIE: &str = "session";

/// Load the caller's session before the handler and persist it afterwards,
/// re-issuing the cookie whenever the identifier or contents changed.
pub async fn load_and_save(
    State(services): State<Arc<AppServices>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let id = session_cookie(req.headers());
    let session = services
        .sessions
        .load(id.as_deref())
        .map_err(|e| errors::server_error(&method, &uri, &e))?;
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    let committed = services
        .sessions
        .commit(&session)
        .map_err(|e| errors::server_error(&method, &uri, &e))?;

    if let Some(id) = committed {
        let cookie = format!(
            "{SESSION_COOKIE}={id}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            services.sessions.lifetime().num_seconds()
        );
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| errors::server_error(&method, &uri, &e))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }

    Ok(response)
}

/// Resolve the caller into an [`AuthContext`].
///
/// A bearer token wins over the session. A presented token that is malformed,
/// unknown or expired is rejected outright; no header at all means the
/// session (or nobody) decides.
pub async fn authenticate(
    State(services): State<Arc<AppServices>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let bearer = match req.headers().get(header::AUTHORIZATION) {
        Some(value) => Some(
            extract_bearer(value)
                .map(str::to_owned)
                .ok_or_else(errors::invalid_authentication_token)?,
        ),
        None => None,
    };

    let context = match bearer {
        Some(token) => match services.accounts.authenticate_bearer(&token).await {
            Ok(account) => AuthContext::from(account),
            Err(DomainError::ValidationFailed(_) | DomainError::RecordNotFound) => {
                return Err(with_vary(errors::invalid_authentication_token()));
            }
            Err(e) => return Err(errors::server_error(&method, &uri, &e)),
        },
        None => {
            let session = req.extensions().get::<Session>().cloned();
            match session {
                Some(session) => from_session(&services, &session)
                    .await
                    .map_err(|e| errors::server_error(&method, &uri, &e))?,
                None => AuthContext::Anonymous,
            }
        }
    };

    req.extensions_mut().insert(context);
    Ok(with_vary(next.run(req).await))
}

async fn from_session(services: &AppServices, session: &Session) -> Result<AuthContext, DomainError> {
    let Some(id) = session.get_i64(AUTHENTICATED_ACCOUNT_KEY) else {
        return Ok(AuthContext::Anonymous);
    };

    match services.accounts.account_for_session(AccountId::new(id)).await {
        Ok(account) => Ok(account.into()),
        Err(DomainError::RecordNotFound) => {
            // account is gone; drop the stale binding
            session.remove(AUTHENTICATED_ACCOUNT_KEY);
            Ok(AuthContext::Anonymous)
        }
        Err(e) => Err(e),
    }
}

pub async fn require_authenticated(req: Request<Body>, next: Next) -> Result<Response, Response> {
    caller(&req)?;
    Ok(next.run(req).await)
}

pub async fn require_activated(req: Request<Body>, next: Next) -> Result<Response, Response> {
    activated_caller(&req)?;
    Ok(next.run(req).await)
}

/// State for [`require_permission`]: the code a route needs.
#[derive(Clone)]
pub struct PermissionGate {
    services: Arc<AppServices>,
    required: Permission,
}

impl PermissionGate {
    pub fn new(services: Arc<AppServices>, required: Permission) -> Self {
        Self { services, required }
    }
}

/// Activated caller holding `gate.required`. The permission set is fetched
/// per request.
pub async fn require_permission(
    State(gate): State<PermissionGate>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let account_id = activated_caller(&req)?.id;

    let allowed = gate
        .services
        .accounts
        .permissions()
        .has_permission(account_id, &gate.required)
        .await
        .map_err(|e| errors::server_error(req.method(), req.uri(), &e))?;

    if !allowed {
        tracing::info!(
            account_id = %account_id,
            permission = %gate.required,
            "permission denied"
        );
        return Err(reject(AuthzError::Forbidden(gate.required.to_string())));
    }

    Ok(next.run(req).await)
}

fn caller(req: &Request<Body>) -> Result<&Account, Response> {
    req.extensions()
        .get::<AuthContext>()
        .and_then(AuthContext::account)
        .ok_or_else(|| reject(AuthzError::AuthenticationRequired))
}

fn activated_caller(req: &Request<Body>) -> Result<&Account, Response> {
    let account = caller(req)?;
    check_activated(account).map_err(reject)?;
    Ok(account)
}

fn reject(err: AuthzError) -> Response {
    match err {
        AuthzError::AuthenticationRequired => errors::authentication_required(),
        AuthzError::InactiveAccount => errors::inactive_account(),
        AuthzError::Forbidden(_) => errors::not_permitted(),
    }
}

fn with_vary(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

fn extract_bearer(value: &HeaderValue) -> Option<&str> {
    let token = value.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_requires_scheme_and_token() {
        assert_eq!(
            extract_bearer(&HeaderValue::from_static("Bearer ABCDEFGHIJKLMNOPQRSTUVWXYZ")),
            Some("ABCDEFGHIJKLMNOPQRSTUVWXYZ")
        );
        assert_eq!(extract_bearer(&HeaderValue::from_static("Basic abc")), None);
        assert_eq!(extract_bearer(&HeaderValue::from_static("Bearer   ")), None);
        assert_eq!(extract_bearer(&HeaderValue::from_static("ABCDEF")), None);
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; session=XYZ"));
        assert_eq!(session_cookie(&headers).as_deref(), Some("XYZ"));

        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("sessionx=1"));
        assert_eq!(session_cookie(&headers), None);
    }
}
