use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::rngs::OsRng;

/// One-way hashing and verification of account passwords (argon2id, PHC strings).
#[derive(Clone, Default)]
pub struct CredentialVerifier {
    argon2: Argon2<'static>,
}

impl CredentialVerifier {
    /// Minimum-cost parameters, for tests and local bootstrapping only.
    pub fn low_cost() -> anyhow::Result<Self> {
        let params = Params::new(
            Params::MIN_M_COST,
            Params::MIN_T_COST,
            Params::MIN_P_COST,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid argon2 parameters: {}", e))?;

        Ok(CredentialVerifier {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, password: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
    }

    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(h) => h,
            Err(_) => return false,
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

/// Returns the credential following `scheme` in the Authorization header,
/// e.g. `authorization_credential(req, "Bearer")`.
pub fn authorization_credential<'a>(req: &'a HttpRequest, scheme: &str) -> Option<&'a str> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (found_scheme, credential) = header.split_once(' ')?;
    if found_scheme != scheme {
        return None;
    }

    let credential = credential.trim();
    if credential.is_empty() {
        None
    } else {
        Some(credential)
    }
}
