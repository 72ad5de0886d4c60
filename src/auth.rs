use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use log::error;
use mongodb::bson::{doc, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::user::{Role, User};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Caller identity decoded from the bearer token and stashed in request
/// extensions by the Authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: ObjectId,
    pub role: Role,
}

/// Pulls the caller identity out of the request, or 401.
pub fn identity(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    req.extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or(ApiError::Unauthorized)
}

/// As `identity`, additionally requiring the admin role.
pub fn require_admin(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let user = identity(req)?;
    if !user.role.is_admin() {
        return Err(ApiError::permission(
            "Access denied. Admin privileges required.",
        ));
    }
    Ok(user)
}

pub fn create_jwt(user: &User, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user.id.to_hex(),
        role: user.role.as_str().to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

#[derive(Deserialize)]
pub struct SignupInfo {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginInfo {
    pub email: String,
    pub password: String,
}

pub async fn signup(
    data: web::Data<AppState>,
    signup_info: web::Json<SignupInfo>,
) -> impl Responder {
    let users = data.mongodb.db.collection::<User>("users");

    match users.find_one(doc! { "email": &signup_info.email }).await {
        Ok(Some(_)) => return HttpResponse::BadRequest().body("Email already registered"),
        Ok(None) => {}
        Err(e) => {
            error!("Error checking existing user: {}", e);
            return HttpResponse::InternalServerError().body("Error creating user");
        }
    }

    let hashed_password = match hash(&signup_info.password, DEFAULT_COST) {
        Ok(h) => h,
        Err(_) => return HttpResponse::InternalServerError().body("Error hashing password"),
    };

    let new_user = User {
        id: ObjectId::new(),
        name: signup_info.name.clone(),
        email: signup_info.email.clone(),
        password: hashed_password,
        role: Role::Member,
    };

    match users.insert_one(&new_user).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({ "status": "User created" })),
        Err(e) => {
            error!("Error inserting user: {}", e);
            HttpResponse::InternalServerError().body("Error creating user")
        }
    }
}

pub async fn login(data: web::Data<AppState>, login_info: web::Json<LoginInfo>) -> impl Responder {
    let users = data.mongodb.db.collection::<User>("users");
    let user_doc = users.find_one(doc! { "email": &login_info.email }).await;

    match user_doc {
        Ok(Some(user)) => {
            if verify(&login_info.password, &user.password).unwrap_or(false) {
                match create_jwt(&user, &data.config.jwt_secret) {
                    Ok(token) => HttpResponse::Ok().json(serde_json::json!({
                        "token": token,
                        "userId": user.id.to_hex(),
                        "role": user.role.as_str(),
                    })),
                    Err(e) => {
                        error!("Error creating token: {}", e);
                        HttpResponse::InternalServerError().body("Error logging in")
                    }
                }
            } else {
                HttpResponse::Unauthorized().body("Invalid credentials")
            }
        }
        Ok(None) => HttpResponse::Unauthorized().body("Invalid credentials"),
        Err(e) => {
            error!("Error logging in: {}", e);
            HttpResponse::InternalServerError().body("Error logging in")
        }
    }
}
