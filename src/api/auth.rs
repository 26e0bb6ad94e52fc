//! Authentication API endpoints
//!
//! Login (password, TOTP second step, SSO), token refresh, logout, password
//! reset and MFA enrollment.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    middleware::{
        auth::{AuthUser, ACCESS_COOKIE, REFRESH_COOKIE},
        rate_limit_middleware, ClientIp,
    },
    models::{
        AuthResponse, ForgotPasswordRequest, IdentityPublic, LoginRequest, MfaChallengeResponse,
        MfaCodeRequest, MfaSetupResponse, MfaVerifyRequest, RefreshRequest, ResetPasswordRequest,
        TenantContext,
    },
    services::{LoginOutcome, Session, SsoCredential},
    utils::{AppError, AppResult},
    AppState,
};

/// Public authentication routes; credential-accepting ones sit behind the strict limiter
pub fn public_routes(state: &AppState) -> Router<AppState> {
    let limited = Router::new()
        .route("/login", post(login))
        .route("/mfa/verify", post(verify_mfa))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/sso/{provider}", post(sso_login))
        .route_layer(from_fn_with_state(
            state.auth_rate_limit.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .merge(limited)
}

/// Authentication routes for a signed-in caller
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_current_user))
        .route("/mfa/setup", post(setup_mfa))
        .route("/mfa/enable", post(enable_mfa))
        .route("/mfa/disable", post(disable_mfa))
}

/// SSO login body; which field is used depends on the provider kind
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoLoginRequest {
    pub code: Option<String>,
    pub assertion: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub use_cookies: bool,
}

impl SsoLoginRequest {
    fn credential(&self) -> AppResult<SsoCredential> {
        match (&self.code, &self.assertion, &self.username, &self.password) {
            (Some(code), _, _, _) => Ok(SsoCredential::AuthorizationCode(code.clone())),
            (_, Some(assertion), _, _) => Ok(SsoCredential::Assertion(assertion.clone())),
            (_, _, Some(username), Some(password)) => Ok(SsoCredential::Bind {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => Err(AppError::BadRequest(
                "One of code, assertion or username/password is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CurrentUserResponse {
    pub user: IdentityPublic,
    pub context: TenantContext,
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

fn expired_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = session_cookie(name, String::new(), secure);
    cookie.make_removal();
    cookie
}

/// Token pair in the body, plus cookies and a CSRF token for browser clients
fn session_response(state: &AppState, jar: CookieJar, session: Session, use_cookies: bool) -> Response {
    if !use_cookies {
        return Json(AuthResponse::new(&session.tokens, None)).into_response();
    }

    let secure = state.config.auth.cookie_secure;
    let csrf = state.tokens.csrf_token(&session.tokens.access_jti);
    let jar = jar
        .add(session_cookie(
            ACCESS_COOKIE,
            session.tokens.access_token.clone(),
            secure,
        ))
        .add(session_cookie(
            REFRESH_COOKIE,
            session.tokens.refresh_token.clone(),
            secure,
        ));
    (jar, Json(AuthResponse::new(&session.tokens, Some(csrf)))).into_response()
}

/// Login handler
///
/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    ip: ClientIp,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Response> {
    payload.validate()?;

    match state
        .auth
        .login(&payload.email, &payload.password, ip.for_audit())
        .await?
    {
        LoginOutcome::Authenticated(session) => {
            Ok(session_response(&state, jar, session, payload.use_cookies))
        }
        LoginOutcome::MfaRequired { mfa_token } => Ok(Json(MfaChallengeResponse {
            mfa_required: true,
            mfa_token,
        })
        .into_response()),
    }
}

/// Second login step
///
/// POST /api/v1/auth/mfa/verify
async fn verify_mfa(
    State(state): State<AppState>,
    ip: ClientIp,
    jar: CookieJar,
    Json(payload): Json<MfaVerifyRequest>,
) -> AppResult<Response> {
    payload.validate()?;

    let session = state
        .auth
        .verify_mfa(&payload.mfa_token, &payload.code, ip.for_audit())
        .await?;
    Ok(session_response(&state, jar, session, payload.use_cookies))
}

/// Refresh token handler
///
/// POST /api/v1/auth/refresh
///
/// The refresh token comes from the body or, for browser clients, the
/// `refresh_token` cookie; cookie callers get their cookies rotated.
async fn refresh(
    State(state): State<AppState>,
    ip: ClientIp,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<Response> {
    let payload: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    let (token, from_cookie) = match payload.refresh_token {
        Some(token) => (token, false),
        None => match jar.get(REFRESH_COOKIE) {
            Some(cookie) => (cookie.value().to_string(), true),
            None => return Err(AppError::Unauthorized),
        },
    };

    let session = state.auth.refresh(&token, ip.for_audit()).await?;
    Ok(session_response(&state, jar, session, from_cookie))
}

/// Logout handler
///
/// POST /api/v1/auth/logout
///
/// Tokens are stateless; logout expires the session cookies whether or not
/// the request carried them.
async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, StatusCode) {
    let secure = state.config.auth.cookie_secure;
    let jar = jar
        .add(expired_cookie(ACCESS_COOKIE, secure))
        .add(expired_cookie(REFRESH_COOKIE, secure));
    (jar, StatusCode::NO_CONTENT)
}

/// Start a password reset
///
/// POST /api/v1/auth/forgot-password
///
/// Answers identically whether or not the account exists.
async fn forgot_password(
    State(state): State<AppState>,
    ip: ClientIp,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    payload.validate()?;

    state.auth.forgot_password(&payload.email, ip.for_audit()).await?;

    Ok(Json(MessageResponse {
        message: "If the account exists, a reset link has been sent",
    }))
}

/// Complete a password reset
///
/// POST /api/v1/auth/reset-password
async fn reset_password(
    State(state): State<AppState>,
    ip: ClientIp,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    payload.validate()?;

    state
        .auth
        .reset_password(&payload.token, &payload.new_password, ip.for_audit())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// SSO login
///
/// POST /api/v1/auth/sso/{provider}
async fn sso_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    ip: ClientIp,
    jar: CookieJar,
    Json(payload): Json<SsoLoginRequest>,
) -> AppResult<Response> {
    let credential = payload.credential()?;
    let session = state
        .auth
        .sso_login(&provider, &credential, ip.for_audit())
        .await?;
    Ok(session_response(&state, jar, session, payload.use_cookies))
}

/// Get current user handler
///
/// GET /api/v1/auth/me
async fn get_current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<CurrentUserResponse>> {
    let identity = state.auth.current_user(user.user_id()).await?;
    Ok(Json(CurrentUserResponse {
        user: identity,
        context: user.claims.context(),
    }))
}

/// POST /api/v1/auth/mfa/setup
async fn setup_mfa(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<MfaSetupResponse>> {
    Ok(Json(state.auth.setup_mfa(user.user_id()).await?))
}

/// POST /api/v1/auth/mfa/enable
async fn enable_mfa(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<MfaCodeRequest>,
) -> AppResult<StatusCode> {
    payload.validate()?;
    state.auth.enable_mfa(user.user_id(), &payload.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/mfa/disable
async fn disable_mfa(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<MfaCodeRequest>,
) -> AppResult<StatusCode> {
    payload.validate()?;
    state.auth.disable_mfa(user.user_id(), &payload.code).await?;
    Ok(StatusCode::NO_CONTENT)
}
