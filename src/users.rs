use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::core::db::{Db, Document};
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::CredentialVerifier;
use crate::models::models::{Account, AccountView, Credentials};
use crate::AppState;

const INVALID_CREDENTIALS: &str = "invalid email or password";

/// Field-wise account changes. `None` or an empty string leaves a field as it is.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AccountChanges {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Only settable by the billing webhook, never from a request body.
    #[serde(skip)]
    pub is_upgraded: Option<bool>,
}

pub struct AccountRepository {
    db: Arc<Db>,
    credentials: CredentialVerifier,
}

impl AccountRepository {
    pub fn new(db: Arc<Db>, credentials: CredentialVerifier) -> Self {
        AccountRepository { db, credentials }
    }

    /// Creates an account, or returns the existing one untouched if the email is taken.
    pub fn create(&self, email: &str, password: &str) -> ApiResult<Account> {
        if email.trim().is_empty() {
            return Err(ApiError::BadRequest("Email is required".to_string()));
        }
        if password.is_empty() {
            return Err(ApiError::BadRequest("Password is required".to_string()));
        }

        if let Some(existing) = self.db.read(|doc| find_by_email(doc, email))? {
            return Ok(existing);
        }

        // Hash outside the lock; the email is checked again before inserting.
        let password_hash = self.credentials.hash(password)?;

        let (account, created) = self.db.update(|doc| {
            if let Some(existing) = find_by_email(doc, email) {
                return Ok::<_, ApiError>((existing, false));
            }

            let id = doc.next_account_id();
            let account = Account {
                id,
                email: email.to_string(),
                password_hash,
                is_upgraded: false,
            };
            doc.accounts.insert(id, account.clone());
            doc.account_ids_by_email.insert(account.email.clone(), id);
            Ok((account, true))
        })?;

        if created {
            tracing::info!(account_id = account.id, "account created");
        }
        Ok(account)
    }

    pub fn authenticate(&self, email: &str, password: &str) -> ApiResult<Account> {
        let account = self
            .db
            .read(|doc| find_by_email(doc, email))?
            .ok_or_else(|| ApiError::unauthorized(INVALID_CREDENTIALS))?;

        if !self.credentials.verify(password, &account.password_hash) {
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }
        Ok(account)
    }

    /// Applies `changes` and returns the account as written.
    pub fn update(&self, id: u64, changes: AccountChanges) -> ApiResult<Account> {
        let new_email = changes.email.filter(|e| !e.trim().is_empty());
        let new_password_hash = match changes.password.filter(|p| !p.is_empty()) {
            Some(password) => Some(self.credentials.hash(&password)?),
            None => None,
        };

        self.db.update(|doc| {
            let mut account = doc
                .accounts
                .get(&id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("Account {} not found", id)))?;

            if let Some(email) = new_email {
                if email != account.email {
                    if doc.account_ids_by_email.contains_key(&email) {
                        return Err(ApiError::Conflict("Email already in use".to_string()));
                    }
                    doc.account_ids_by_email.remove(&account.email);
                    doc.account_ids_by_email.insert(email.clone(), id);
                    account.email = email;
                }
            }
            if let Some(hash) = new_password_hash {
                account.password_hash = hash;
            }
            if let Some(is_upgraded) = changes.is_upgraded {
                account.is_upgraded = is_upgraded;
            }

            doc.accounts.insert(id, account.clone());
            Ok(account)
        })
    }
}

fn find_by_email(doc: &Document, email: &str) -> Option<Account> {
    let id = doc.account_ids_by_email.get(email)?;
    doc.accounts.get(id).cloned()
}

// === HTTP Handlers ===

pub async fn create_user(
    state: web::Data<AppState>,
    payload: web::Json<Credentials>,
) -> ApiResult<HttpResponse> {
    let Credentials { email, password } = payload.into_inner();

    let account = web::block(move || state.accounts.create(&email, &password)).await??;

    Ok(HttpResponse::Created().json(AccountView::from(&account)))
}

pub async fn update_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<AccountChanges>,
) -> ApiResult<HttpResponse> {
    let account_id = state.tokens.authenticate_request(&req)?;
    let changes = AccountChanges {
        is_upgraded: None,
        ..payload.into_inner()
    };

    let account = web::block(move || state.accounts.update(account_id, changes)).await??;

    Ok(HttpResponse::Ok().json(AccountView::from(&account)))
}
