//! Signed access/refresh tokens and the refresh-token revocation ledger.
//!
//! Tokens are HS256 JWTs. The issuer claim tells access tokens from refresh
//! tokens, so a refresh token can never be replayed as an access token.
//! Refresh and revoke both re-run the full chain (signature and expiry,
//! issuer, revocation) on every call.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::*;
use crate::core::db::Db;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::authorization_credential;
use crate::models::models::{AccountView, Credentials};
use crate::AppState;

/// Source of the current time; swapped out in tests to move past expiry.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn issuer(self) -> &'static str {
        match self {
            TokenKind::Access => ACCESS_TOKEN_ISSUER,
            TokenKind::Refresh => REFRESH_TOKEN_ISSUER,
        }
    }

    fn from_issuer(issuer: &str) -> Option<Self> {
        match issuer {
            ACCESS_TOKEN_ISSUER => Some(TokenKind::Access),
            REFRESH_TOKEN_ISSUER => Some(TokenKind::Refresh),
            _ => None,
        }
    }

    fn lifetime(self) -> Duration {
        match self {
            TokenKind::Access => Duration::hours(ACCESS_TOKEN_EXPIRATION_HOURS),
            TokenKind::Refresh => Duration::hours(REFRESH_TOKEN_EXPIRATION_HOURS),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
    /// Unique per issue, so two sessions never share a token string.
    jti: String,
}

/// What a token proves once its signature and expiry have checked out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedToken {
    pub account_id: u64,
    pub kind: TokenKind,
}

pub struct TokenService {
    db: Arc<Db>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Clock,
}

impl TokenService {
    pub fn new(db: Arc<Db>, secret: &str) -> Self {
        Self::with_clock(db, secret, Arc::new(Utc::now))
    }

    pub fn with_clock(db: Arc<Db>, secret: &str, clock: Clock) -> Self {
        TokenService {
            db,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            clock,
        }
    }

    pub fn issue_access(&self, account_id: u64) -> ApiResult<String> {
        self.issue(TokenKind::Access, account_id)
    }

    pub fn issue_refresh(&self, account_id: u64) -> ApiResult<String> {
        self.issue(TokenKind::Refresh, account_id)
    }

    fn issue(&self, kind: TokenKind, account_id: u64) -> ApiResult<String> {
        let now = (self.clock)();
        let claims = Claims {
            iss: kind.issuer().to_string(),
            sub: account_id.to_string(),
            iat: now.timestamp(),
            exp: (now + kind.lifetime()).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::InternalError(format!("Failed to sign token: {}", e)))
    }

    /// Checks signature, shape and expiry. Does not consult the revocation ledger.
    pub fn validate(&self, token: &str) -> ApiResult<ValidatedToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against our own clock, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| ApiError::unauthorized(format!("invalid token: {}", e)))?
            .claims;

        if (self.clock)().timestamp() >= claims.exp {
            return Err(ApiError::unauthorized("token expired"));
        }

        let kind = TokenKind::from_issuer(&claims.iss)
            .ok_or_else(|| ApiError::unauthorized("unknown token issuer"))?;
        let account_id = claims
            .sub
            .parse::<u64>()
            .map_err(|_| ApiError::unauthorized("malformed token subject"))?;

        Ok(ValidatedToken { account_id, kind })
    }

    pub fn is_revoked(&self, token: &str) -> ApiResult<bool> {
        Ok(self.db.read(|doc| doc.revoked_tokens.contains_key(token))?)
    }

    /// Mints a new access token from a live refresh token. The refresh token stays usable.
    pub fn refresh(&self, token: &str) -> ApiResult<String> {
        let validated = self.validate_refresh(token)?;
        if self.is_revoked(token)? {
            return Err(ApiError::unauthorized("token revoked"));
        }
        self.issue_access(validated.account_id)
    }

    pub fn revoke(&self, token: &str) -> ApiResult<()> {
        let validated = self.validate_refresh(token)?;
        let revoked_at = (self.clock)().to_rfc3339();

        // The ledger check and insert share one critical section.
        self.db.update(|doc| {
            if doc.revoked_tokens.contains_key(token) {
                return Err(ApiError::unauthorized("token revoked"));
            }
            doc.revoked_tokens.insert(token.to_string(), revoked_at);
            Ok(())
        })?;

        tracing::info!(account_id = validated.account_id, "refresh token revoked");
        Ok(())
    }

    /// Resolves the `Authorization: Bearer` access token of a request to an account id.
    pub fn authenticate_request(&self, req: &HttpRequest) -> ApiResult<u64> {
        let token = authorization_credential(req, "Bearer")
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

        let validated = self.validate(token)?;
        if validated.kind != TokenKind::Access {
            return Err(ApiError::unauthorized("not an access token"));
        }
        Ok(validated.account_id)
    }

    fn validate_refresh(&self, token: &str) -> ApiResult<ValidatedToken> {
        let validated = self.validate(token)?;
        if validated.kind != TokenKind::Refresh {
            return Err(ApiError::unauthorized("not a refresh token"));
        }
        Ok(validated)
    }
}

fn bearer_token(req: &HttpRequest) -> ApiResult<String> {
    authorization_credential(req, "Bearer")
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))
}

// === HTTP Handlers ===

pub async fn login_user(
    state: web::Data<AppState>,
    payload: web::Json<Credentials>,
) -> ApiResult<HttpResponse> {
    let Credentials { email, password } = payload.into_inner();

    let view = web::block(move || -> ApiResult<AccountView> {
        let account = state.accounts.authenticate(&email, &password)?;
        let mut view = AccountView::from(&account);
        view.token = Some(state.tokens.issue_access(account.id)?);
        view.refresh_token = Some(state.tokens.issue_refresh(account.id)?);
        Ok(view)
    })
    .await??;

    Ok(HttpResponse::Ok().json(view))
}

pub async fn refresh_token(req: HttpRequest, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;

    let access = web::block(move || state.tokens.refresh(&token)).await??;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": access })))
}

pub async fn revoke_token(req: HttpRequest, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;

    web::block(move || state.tokens.revoke(&token)).await??;

    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::AUTHORIZATION;
    use actix_web::test::TestRequest;
    use parking_lot::Mutex;
    use tempfile::{tempdir, TempDir};

    const SECRET: &str = "test-secret";

    struct Fixture {
        _dir: TempDir,
        db: Arc<Db>,
        now: Arc<Mutex<DateTime<Utc>>>,
        tokens: TokenService,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let db = Arc::new(Db::open(dir.path().join("db.json")).unwrap());
            let now = Arc::new(Mutex::new(Utc::now()));
            let clock_now = now.clone();
            let tokens = TokenService::with_clock(db.clone(), SECRET, Arc::new(move || *clock_now.lock()));
            Fixture {
                _dir: dir,
                db,
                now,
                tokens,
            }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock();
            *now = *now + by;
        }
    }

    #[test]
    fn access_token_round_trip() {
        let f = Fixture::new();
        let token = f.tokens.issue_access(42).unwrap();

        let validated = f.tokens.validate(&token).unwrap();
        assert_eq!(validated.account_id, 42);
        assert_eq!(validated.kind, TokenKind::Access);
        assert_eq!(validated.kind.issuer(), ACCESS_TOKEN_ISSUER);
    }

    #[test]
    fn access_token_expires_after_one_hour() {
        let f = Fixture::new();
        let token = f.tokens.issue_access(1).unwrap();

        f.advance(Duration::minutes(59));
        assert!(f.tokens.validate(&token).is_ok());

        f.advance(Duration::minutes(1));
        assert!(matches!(f.tokens.validate(&token), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn refresh_token_outlives_access_token() {
        let f = Fixture::new();
        let token = f.tokens.issue_refresh(1).unwrap();

        f.advance(Duration::hours(REFRESH_TOKEN_EXPIRATION_HOURS - 1));
        assert!(f.tokens.refresh(&token).is_ok());

        f.advance(Duration::hours(1));
        assert!(f.tokens.refresh(&token).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let f = Fixture::new();
        let other = TokenService::new(f.db.clone(), "another-secret");
        let token = other.issue_access(1).unwrap();

        assert!(matches!(f.tokens.validate(&token), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let f = Fixture::new();
        assert!(f.tokens.validate("not.a.jwt").is_err());
        assert!(f.tokens.validate("").is_err());
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let f = Fixture::new();
        let now = Utc::now();
        let claims = Claims {
            iss: "someone-else".to_string(),
            sub: "1".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(f.tokens.validate(&token).is_err());
    }

    #[test]
    fn refresh_issues_access_for_same_account() {
        let f = Fixture::new();
        let refresh = f.tokens.issue_refresh(7).unwrap();

        let access = f.tokens.refresh(&refresh).unwrap();
        let validated = f.tokens.validate(&access).unwrap();
        assert_eq!(validated.account_id, 7);
        assert_eq!(validated.kind, TokenKind::Access);

        // Still reusable
        assert!(f.tokens.refresh(&refresh).is_ok());
    }

    #[test]
    fn access_token_cannot_refresh_or_revoke() {
        let f = Fixture::new();
        let access = f.tokens.issue_access(1).unwrap();

        assert!(matches!(f.tokens.refresh(&access), Err(ApiError::Unauthorized(_))));
        assert!(matches!(f.tokens.revoke(&access), Err(ApiError::Unauthorized(_))));
        assert!(f.db.load().unwrap().revoked_tokens.is_empty());
    }

    #[test]
    fn sessions_issued_together_revoke_independently() {
        let f = Fixture::new();
        let first = f.tokens.issue_refresh(1).unwrap();
        let second = f.tokens.issue_refresh(1).unwrap();
        assert_ne!(first, second);

        f.tokens.revoke(&first).unwrap();
        assert!(f.tokens.refresh(&second).is_ok());

        // Logging back in right after a logout yields a live session
        let relogin = f.tokens.issue_refresh(1).unwrap();
        assert!(!f.tokens.is_revoked(&relogin).unwrap());
        assert!(f.tokens.refresh(&relogin).is_ok());
    }

    #[test]
    fn revoked_refresh_token_is_dead() {
        let f = Fixture::new();
        let refresh = f.tokens.issue_refresh(7).unwrap();

        f.tokens.revoke(&refresh).unwrap();

        assert!(f.tokens.is_revoked(&refresh).unwrap());
        assert!(matches!(f.tokens.refresh(&refresh), Err(ApiError::Unauthorized(_))));
        assert!(matches!(f.tokens.revoke(&refresh), Err(ApiError::Unauthorized(_))));

        // Signature and expiry alone still pass; only the ledger knows.
        let validated = f.tokens.validate(&refresh).unwrap();
        assert_eq!(validated.account_id, 7);
    }

    #[test]
    fn revocation_records_timestamp() {
        let f = Fixture::new();
        let refresh = f.tokens.issue_refresh(3).unwrap();
        let at = *f.now.lock();

        f.tokens.revoke(&refresh).unwrap();

        let doc = f.db.load().unwrap();
        assert_eq!(doc.revoked_tokens.get(&refresh), Some(&at.to_rfc3339()));
    }

    #[test]
    fn request_needs_bearer_access_token() {
        let f = Fixture::new();
        let access = f.tokens.issue_access(5).unwrap();
        let refresh = f.tokens.issue_refresh(5).unwrap();

        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, format!("Bearer {}", access)))
            .to_http_request();
        assert_eq!(f.tokens.authenticate_request(&req).unwrap(), 5);

        let with_refresh = TestRequest::default()
            .insert_header((AUTHORIZATION, format!("Bearer {}", refresh)))
            .to_http_request();
        assert!(f.tokens.authenticate_request(&with_refresh).is_err());

        let anonymous = TestRequest::default().to_http_request();
        assert!(f.tokens.authenticate_request(&anonymous).is_err());
    }
}
