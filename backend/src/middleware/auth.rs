//! Authentication middleware
//!
//! Verifies the actor token issued by the external identity service and
//! exposes the caller's role and company/bar scope to handlers.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult, ErrorDetail, ErrorResponse};
use crate::AppState;

/// Role carried in the actor token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Every bar and reserve of the company
    Admin,
    /// Same scope as admin; may transfer and maintain ledger rows
    Manager,
    /// Only its own bar
    Staff,
}

/// Authenticated actor extracted from the token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub actor_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
    pub bar_id: Option<Uuid>,
}

impl AuthUser {
    /// Whether the actor may address every bar of its company
    pub fn is_company_wide(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager)
    }

    /// Whether the actor may address `bar_id`, assuming the bar belongs to
    /// the actor's company
    pub fn can_access_bar(&self, bar_id: Uuid) -> bool {
        self.is_company_wide() || self.bar_id == Some(bar_id)
    }

    /// Transfers and ledger maintenance need manager rights
    pub fn require_manager(&self) -> AppResult<()> {
        if self.is_company_wide() {
            Ok(())
        } else {
            Err(AppError::InsufficientPermissions(
                "requires manager or admin role".to_string(),
            ))
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub company_id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub bar_id: Option<Uuid>,
    pub exp: i64,
    pub iat: i64,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            actor_id: claims.sub,
            company_id: claims.company_id,
            role: claims.role,
            bar_id: claims.bar_id,
        }
    }
}

/// Authentication middleware that validates JWT tokens.
///
/// The token comes from the `Authorization: Bearer` header, or from the
/// `token` query parameter for EventSource clients that cannot set headers.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = bearer_token(&request).or_else(|| query_token(&request));

    let token = match token {
        Some(token) => token,
        None => {
            return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
                .into_response();
        }
    };

    let claims = match decode_jwt(&token, &state.config.jwt.secret) {
        Ok(claims) => claims,
        Err(err) => return err.into_response(),
    };

    if claims.role == Role::Staff && claims.bar_id.is_none() {
        return AppError::Unauthorized("Staff token carries no bar scope".to_string())
            .into_response();
    }

    request.extensions_mut().insert(AuthUser::from(claims));

    next.run(request).await
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn query_token(request: &Request) -> Option<String> {
    request
        .uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Decode and validate JWT token
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::InvalidToken,
    })
}

/// Extractor for authenticated user
/// Use this in handlers to get the current user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                let error = ErrorResponse {
                    error: ErrorDetail::new("UNAUTHORIZED", "Authentication required"),
                };
                (StatusCode::UNAUTHORIZED, Json(error))
            })
    }
}
