use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use forum_shared::{AuthResponse, Capability, Message, Role, User, WalletRequest};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{db, error::AppError, extract::Json, users, AppState};

pub const TOKEN_COOKIE: &str = "auth_token";
const TOKEN_TTL_SECS: usize = 24 * 60 * 60;

// ── JWT Claims ──

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64, // user id
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self {
            sub: user_id,
            role,
            exp: now_secs() + TOKEN_TTL_SECS,
        }
    }
}

fn now_secs() -> usize {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

/// The authenticated caller of a protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
    pub role: Role,
}

impl AuthUser {
    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.role.can(capability) {
            Ok(())
        } else {
            Err(AppError::Forbidden("access denied"))
        }
    }
}

pub fn issue_token(user: &User, jwt_secret: &str) -> Result<String, AppError> {
    Ok(encode(
        &Header::default(),
        &Claims::new(user.id, user.role),
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?)
}

pub fn decode_token(token: &str, jwt_secret: &str) -> Result<AuthUser, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("invalid token"))?;

    Ok(AuthUser {
        user_id: data.claims.sub,
        role: data.claims.role,
    })
}

// ── Extract authenticated user from the Authorization header or session cookie ──

fn token_from(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    bearer.or_else(|| {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == TOKEN_COOKIE)
            .map(|(_, value)| value)
    })
}

pub fn require_user(headers: &HeaderMap, jwt_secret: &str) -> Result<AuthUser, AppError> {
    let token = token_from(headers).ok_or(AppError::Unauthorized("missing token"))?;
    decode_token(token, jwt_secret)
}

fn session_cookie(token: &str) -> String {
    format!("{TOKEN_COOKIE}={token}; Path=/; Max-Age={TOKEN_TTL_SECS}; HttpOnly; SameSite=Strict")
}

fn expired_cookie() -> String {
    format!("{TOKEN_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict")
}

fn wallet_from(payload: &WalletRequest) -> Result<String, AppError> {
    let wallet = payload.wallet.trim();
    if wallet.is_empty() {
        return Err(AppError::validation("wallet is required"));
    }
    Ok(wallet.to_string())
}

// ── Handlers ──

/// POST /register: create a user from the wallet's first game character
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<WalletRequest>,
) -> Result<impl IntoResponse, AppError> {
    let wallet = wallet_from(&payload)?;

    let lookup = wallet.clone();
    let existing = db::run(&state.db, move |conn| users::find_by_wallet(conn, &lookup)).await?;
    if existing.is_some() {
        return Err(AppError::Conflict("wallet already registered"));
    }

    let characters = state.characters.fetch(&wallet).await?;
    let first = characters
        .into_iter()
        .next()
        .ok_or_else(|| AppError::validation("no characters found for this wallet"))?;

    let user = db::run(&state.db, move |conn| {
        users::create(conn, &wallet, &first.name, &first.image_url)
    })
    .await?;

    info!(user_id = user.id, "registered user");
    let token = issue_token(&user, &state.jwt_secret)?;

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&token))],
        Json(AuthResponse {
            token,
            user,
            characters: Vec::new(),
        }),
    ))
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<WalletRequest>,
) -> Result<impl IntoResponse, AppError> {
    let wallet = wallet_from(&payload)?;

    let lookup = wallet.clone();
    let user = db::run(&state.db, move |conn| users::find_by_wallet(conn, &lookup))
        .await?
        .ok_or(AppError::Unauthorized("wallet not found"))?;

    if !user.is_active {
        return Err(AppError::Forbidden("user is inactive"));
    }

    let user_id = user.id;
    if let Err(e) = db::run(&state.db, move |conn| users::touch_last_seen(conn, user_id)).await {
        warn!(user_id, error = %e, "failed to update last_seen");
    }

    let characters = match state.characters.fetch(&wallet).await {
        Ok(characters) => characters,
        Err(e) => {
            warn!(user_id, error = %e, "could not refresh characters");
            Vec::new()
        }
    };

    let token = issue_token(&user, &state.jwt_secret)?;

    Ok((
        [(header::SET_COOKIE, session_cookie(&token))],
        Json(AuthResponse {
            token,
            user,
            characters,
        }),
    ))
}

/// POST /logout
pub async fn logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, expired_cookie())],
        Json(Message {
            message: "logged out".into(),
        }),
    )
}

/// POST /wallets/exists
pub async fn wallet_exists(
    State(state): State<AppState>,
    Json(payload): Json<WalletRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let wallet = payload.wallet;
    let exists = db::run(&state.db, move |conn| {
        Ok(users::find_by_wallet(conn, &wallet)?.is_some())
    })
    .await?;

    Ok(Json(serde_json::json!({ "exists": exists })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    fn sample_user(role: Role) -> User {
        User {
            id: 5,
            wallet: "0xabc".into(),
            username: "hero".into(),
            email: String::new(),
            phone: String::new(),
            avatar_url: String::new(),
            role,
            reputation: 0,
            is_active: true,
            created_at: String::new(),
            last_seen: String::new(),
        }
    }

    #[test]
    fn token_round_trips_through_bearer_header() {
        let token = issue_token(&sample_user(Role::Moderator), SECRET).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        let caller = require_user(&headers, SECRET).unwrap();
        assert_eq!(caller, AuthUser { user_id: 5, role: Role::Moderator });
    }

    #[test]
    fn token_is_read_from_cookie() {
        let token = issue_token(&sample_user(Role::Member), SECRET).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {TOKEN_COOKIE}={token}")).unwrap(),
        );

        assert_eq!(require_user(&headers, SECRET).unwrap().user_id, 5);
    }

    #[test]
    fn rejects_missing_or_forged_tokens() {
        assert!(matches!(
            require_user(&HeaderMap::new(), SECRET),
            Err(AppError::Unauthorized(_))
        ));

        let token = issue_token(&sample_user(Role::Admin), "other-secret").unwrap();
        assert!(matches!(
            decode_token(&token, SECRET),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn capabilities_follow_role() {
        let member = AuthUser { user_id: 1, role: Role::Member };
        let admin = AuthUser { user_id: 2, role: Role::Admin };
        assert!(matches!(
            member.require(Capability::ManageTags),
            Err(AppError::Forbidden(_))
        ));
        assert!(admin.require(Capability::ManageTags).is_ok());
    }
}
