use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use askboard_shared::{ApiResponse, AuthResponse, Login, Profile, Role, SignUp, UpdateProfile};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{
    db::{self, enum_column},
    error::{ApiError, ApiJson},
    AppState,
};

// ── JWT Claims ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64, // user id
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: i64, email: &str, role: Role, ttl_days: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            email: email.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + Duration::days(ttl_days)).timestamp(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub fn issue_token(claims: &Claims, jwt_secret: &str) -> Result<String, ApiError> {
    Ok(encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )?)
}

// ── Extract authenticated user from Authorization header ──

pub fn extract_claims(headers: &HeaderMap, jwt_secret: &str) -> Result<Claims, ApiError> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Unauthorized, JWT token is required".into()))?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        ApiError::Unauthorized("Unauthorized, JWT token is invalid or expired".into())
    })?;

    Ok(data.claims)
}

pub fn require_admin(headers: &HeaderMap, jwt_secret: &str) -> Result<Claims, ApiError> {
    let claims = extract_claims(headers, jwt_secret)?;
    if !claims.is_admin() {
        return Err(ApiError::forbidden(
            "Access denied. Admin privileges required.",
        ));
    }
    Ok(claims)
}

/// Edits and deletes are open to the content's author and to admins.
pub fn ensure_owner_or_admin(
    acting_id: i64,
    is_admin: bool,
    owner_id: i64,
    denied: &'static str,
) -> Result<(), ApiError> {
    if acting_id == owner_id || is_admin {
        Ok(())
    } else {
        Err(ApiError::forbidden(denied))
    }
}

// ── Passwords ──

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::PasswordHash(e.to_string()))
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(stored).map_err(|e| ApiError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// ── Validation ──

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    match char_len(name.trim()) {
        0..=1 => Err(ApiError::validation("Name must be at least 2 characters long")),
        2..=100 => Ok(()),
        _ => Err(ApiError::validation("Name cannot exceed 100 characters")),
    }
}

fn validate_bio(bio: &str) -> Result<(), ApiError> {
    if char_len(bio) > 500 {
        return Err(ApiError::validation("Bio cannot exceed 500 characters"));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

pub fn validate_signup(payload: &SignUp) -> Result<(), ApiError> {
    validate_name(&payload.name)?;

    if !is_plausible_email(&payload.email) {
        return Err(ApiError::validation("Please provide a valid email address"));
    }

    let username = &payload.username;
    if char_len(username) < 3 {
        return Err(ApiError::validation("Username must be at least 3 characters long"));
    }
    if char_len(username) > 30 {
        return Err(ApiError::validation("Username cannot exceed 30 characters"));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ApiError::validation(
            "Username can only contain letters, numbers, and underscores",
        ));
    }

    match char_len(&payload.password) {
        0..=5 => return Err(ApiError::validation("Password must be at least 6 characters long")),
        6..=128 => {}
        _ => return Err(ApiError::validation("Password cannot exceed 128 characters")),
    }

    if let Some(bio) = &payload.bio {
        validate_bio(bio)?;
    }
    Ok(())
}

// ── Store ──

const PROFILE_COLUMNS: &str = "id, name, email, username, bio, role, reputation, is_active,
     is_banned, ban_reason, created_at, last_active, questions_asked, answers_given,
     accepted_answers, total_votes_received";

pub fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        username: row.get(3)?,
        bio: row.get(4)?,
        role: enum_column(row, 5)?,
        reputation: row.get(6)?,
        is_active: row.get(7)?,
        is_banned: row.get(8)?,
        ban_reason: row.get(9)?,
        join_date: row.get(10)?,
        last_active: row.get(11)?,
        questions_asked: row.get(12)?,
        answers_given: row.get(13)?,
        accepted_answers: row.get(14)?,
        total_votes_received: row.get(15)?,
    })
}

pub fn load_profile(conn: &Connection, user_id: i64) -> Result<Profile, ApiError> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLUMNS} FROM users WHERE id = ?1"),
        [user_id],
        profile_from_row,
    )
    .optional()?
    .ok_or(ApiError::NotFound("User"))
}

pub fn list_profiles(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Profile>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt
        .query_map(params![limit, offset], profile_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Inserts a new account. The password is hashed here.
pub fn register(conn: &mut Connection, payload: &SignUp) -> Result<Profile, ApiError> {
    validate_signup(payload)?;

    let email = payload.email.trim().to_lowercase();
    let hash = hash_password(&payload.password)?;
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    let clash: Option<String> = tx
        .query_row(
            "SELECT CASE WHEN email = ?1 THEN 'email' ELSE 'username' END
             FROM users WHERE email = ?1 OR username = ?2 LIMIT 1",
            params![email, payload.username],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(field) = clash {
        return Err(ApiError::conflict(format!("User already exists with this {field}")));
    }

    let ts = db::now();
    tx.execute(
        "INSERT INTO users (name, email, username, password_hash, bio, role, created_at, last_active)
         VALUES (?1, ?2, ?3, ?4, ?5, 'user', ?6, ?6)",
        params![
            payload.name.trim(),
            email,
            payload.username,
            hash,
            payload.bio.clone().unwrap_or_default(),
            ts
        ],
    )?;
    let id = tx.last_insert_rowid();
    let profile = load_profile(&tx, id)?;
    tx.commit()?;

    tracing::info!(user_id = id, username = %profile.username, "user registered");
    Ok(profile)
}

/// Checks credentials and account standing; refreshes `last_active`.
pub fn authenticate(conn: &Connection, payload: &Login) -> Result<Profile, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".into());

    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    let found: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?1",
            [payload.email.trim().to_lowercase()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (id, hash) = found.ok_or_else(invalid)?;

    if !verify_password(&payload.password, &hash)? {
        return Err(invalid());
    }

    let profile = load_profile(conn, id)?;
    if !profile.is_active {
        return Err(ApiError::forbidden(
            "Account is deactivated. Please contact support.",
        ));
    }
    if profile.is_banned {
        return Err(ApiError::forbidden(format!(
            "Account is banned. Reason: {}",
            profile.ban_reason.as_deref().unwrap_or("No reason provided")
        )));
    }

    conn.execute(
        "UPDATE users SET last_active = ?2 WHERE id = ?1",
        params![id, db::now()],
    )?;
    load_profile(conn, id)
}

pub fn update_profile(
    conn: &Connection,
    user_id: i64,
    payload: &UpdateProfile,
) -> Result<Profile, ApiError> {
    if let Some(name) = &payload.name {
        validate_name(name)?;
        conn.execute(
            "UPDATE users SET name = ?2 WHERE id = ?1",
            params![user_id, name.trim()],
        )?;
    }
    if let Some(bio) = &payload.bio {
        validate_bio(bio)?;
        conn.execute("UPDATE users SET bio = ?2 WHERE id = ?1", params![user_id, bio])?;
    }
    load_profile(conn, user_id)
}

/// Promotes or demotes `target_id`. `acting_id` is the admin doing it.
pub fn change_role(
    conn: &Connection,
    acting_id: i64,
    target_id: i64,
    role: Role,
) -> Result<Profile, ApiError> {
    let current = load_profile(conn, target_id)?;
    match role {
        Role::Admin if current.role == Role::Admin => {
            return Err(ApiError::validation("User is already an admin"));
        }
        Role::User if acting_id == target_id => {
            return Err(ApiError::validation("You cannot demote yourself from admin role"));
        }
        Role::User if current.role != Role::Admin => {
            return Err(ApiError::validation("User is not an admin"));
        }
        _ => {}
    }

    conn.execute(
        "UPDATE users SET role = ?2 WHERE id = ?1",
        params![target_id, role.as_str()],
    )?;
    tracing::info!(acting_id, target_id, role = %role, "role changed");
    load_profile(conn, target_id)
}

// ── Handlers ──

fn auth_response(state: &AppState, user: Profile) -> Result<AuthResponse, ApiError> {
    let claims = Claims::new(user.id, &user.email, user.role, state.token_ttl_days);
    let token = issue_token(&claims, &state.jwt_secret)?;
    Ok(AuthResponse { token, user })
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignUp>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ApiError> {
    let user = db::with_conn(&state.db, move |conn| register(conn, &payload)).await?;
    let body = auth_response(&state, user)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("User registered successfully", body)),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<Login>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let user = db::with_conn(&state.db, move |conn| authenticate(conn, &payload)).await?;
    let body = auth_response(&state, user)?;
    Ok(Json(ApiResponse::with_message("Login successful", body)))
}

/// GET /api/auth/profile
pub async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let claims = extract_claims(&headers, &state.jwt_secret)?;
    let user = db::with_conn(&state.db, move |conn| load_profile(conn, claims.sub)).await?;
    Ok(Json(ApiResponse::ok(user)))
}

/// PUT /api/auth/profile
pub async fn edit_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<UpdateProfile>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let claims = extract_claims(&headers, &state.jwt_secret)?;
    let user =
        db::with_conn(&state.db, move |conn| update_profile(conn, claims.sub, &payload)).await?;
    Ok(Json(ApiResponse::with_message("Profile updated successfully", user)))
}

/// GET /api/auth/verify
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let claims = extract_claims(&headers, &state.jwt_secret)?;
    let user = db::with_conn(&state.db, move |conn| load_profile(conn, claims.sub)).await?;
    Ok(Json(ApiResponse::with_message("Token is valid", user)))
}

/// POST /api/auth/logout
///
/// Tokens are stateless; the client discards its copy.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let claims = extract_claims(&headers, &state.jwt_secret)?;
    tracing::debug!(user_id = claims.sub, "logout");
    Ok(Json(ApiResponse::message("Logged out successfully")))
}

/// POST /api/auth/users/{id}/promote
pub async fn promote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let claims = require_admin(&headers, &state.jwt_secret)?;
    let user =
        db::with_conn(&state.db, move |conn| change_role(conn, claims.sub, id, Role::Admin))
            .await?;
    Ok(Json(ApiResponse::with_message(
        "User promoted to admin successfully",
        user,
    )))
}

/// POST /api/auth/users/{id}/demote
pub async fn demote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let claims = require_admin(&headers, &state.jwt_secret)?;
    let user =
        db::with_conn(&state.db, move |conn| change_role(conn, claims.sub, id, Role::User))
            .await?;
    Ok(Json(ApiResponse::with_message(
        "Admin demoted to user successfully",
        user,
    )))
}
