use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::{error_response, Response};

/// Authenticators by configured name
pub type AuthenticatorCollection = HashMap<String, Arc<Authenticator>>;

/// Authenticator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum AuthenticatorOptions {
    /// HTTP basic authentication against a static user table
    Basic {
        #[serde(default = "default_realm")]
        realm: String,
        users: HashMap<String, String>,
    },
    /// Static API keys carried in a header
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        keys: Vec<String>,
    },
    /// Bearer JWT validation
    Jwt {
        secret: String,
        #[serde(default = "default_jwt_algorithm")]
        algorithm: String,
        #[serde(default = "default_true")]
        validate_exp: bool,
    },
}

fn default_realm() -> String {
    "pmp-proxy-gateway".to_string()
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// A named authenticator
#[derive(Debug)]
pub struct Authenticator {
    name: String,
    options: AuthenticatorOptions,
}

/// Why a request was not authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    MissingCredentials,
    InvalidCredentials,
}

impl Authenticator {
    pub fn new(name: &str, options: AuthenticatorOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check the request headers against this authenticator
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthRejection> {
        match &self.options {
            AuthenticatorOptions::Basic { users, .. } => validate_basic(headers, users),
            AuthenticatorOptions::ApiKey { header, keys } => validate_api_key(headers, header, keys),
            AuthenticatorOptions::Jwt {
                secret,
                algorithm,
                validate_exp,
            } => validate_jwt(headers, secret, algorithm, *validate_exp),
        }
    }

    /// The 401 response for a rejected request
    pub fn challenge(&self, rejection: &AuthRejection) -> Response {
        let message = match rejection {
            AuthRejection::MissingCredentials => "Missing credentials",
            AuthRejection::InvalidCredentials => "Invalid credentials",
        };
        let mut response = error_response(StatusCode::UNAUTHORIZED, message);
        if let AuthenticatorOptions::Basic { realm, .. } = &self.options {
            if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm)) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

fn validate_basic(
    headers: &HeaderMap,
    users: &HashMap<String, String>,
) -> Result<(), AuthRejection> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(AuthRejection::MissingCredentials)?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthRejection::InvalidCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthRejection::InvalidCredentials)?;
    let (user, password) = decoded
        .split_once(':')
        .ok_or(AuthRejection::InvalidCredentials)?;

    match users.get(user) {
        Some(expected) if expected == password => Ok(()),
        _ => Err(AuthRejection::InvalidCredentials),
    }
}

fn validate_api_key(headers: &HeaderMap, header: &str, keys: &[String]) -> Result<(), AuthRejection> {
    let key = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthRejection::MissingCredentials)?;
    if keys.iter().any(|k| k == key) {
        Ok(())
    } else {
        Err(AuthRejection::InvalidCredentials)
    }
}

fn validate_jwt(
    headers: &HeaderMap,
    secret: &str,
    algorithm: &str,
    validate_exp: bool,
) -> Result<(), AuthRejection> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AuthRejection::MissingCredentials)?;

    let algorithm = match algorithm {
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        _ => Algorithm::HS256,
    };
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = validate_exp;
    if !validate_exp {
        validation.required_spec_claims.remove("exp");
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &key, &validation)
        .map(|_| ())
        .map_err(|_| AuthRejection::InvalidCredentials)
}

/// Build every configured authenticator
pub fn build_authenticators(
    options: &HashMap<String, AuthenticatorOptions>,
) -> AuthenticatorCollection {
    options
        .iter()
        .map(|(name, auth_options)| {
            (
                name.clone(),
                Arc::new(Authenticator::new(name, auth_options.clone())),
            )
        })
        .collect()
}
