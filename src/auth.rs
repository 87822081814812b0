//! Authentication: password hashing, JWT sessions and the login /
//! registration flows that hand a client its role dashboard.

use bcrypt::{hash, verify, DEFAULT_COST};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{today, Account, AuthPayload, Credentials, Role};
use crate::storage::{AdminRule, Sequence, Storage};
use crate::validation::{
    self, is_valid_email, LoginForm, PasswordChangeForm, RegisterForm, ValidationErrors,
};

/// Injects backend failures at fixed rates so clients can exercise their
/// error states. Rates of zero disable injection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureInjector {
    pub login_rate: f64,
    pub register_rate: f64,
}

impl FailureInjector {
    pub fn disabled() -> Self {
        Self::default()
    }

    fn trips(rate: f64) -> bool {
        rate > 0.0 && rand::thread_rng().gen_bool(rate.min(1.0))
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub bcrypt_cost: u32,
    pub failures: FailureInjector,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            token_ttl_secs: config.token_ttl_secs,
            bcrypt_cost: DEFAULT_COST,
            failures: FailureInjector {
                login_rate: config.login_failure_rate,
                register_rate: config.register_failure_rate,
            },
        }
    }
}

/// Returned by login and registration
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub account_id: String,
    pub name: String,
    pub role: Role,
    /// Dashboard the client should navigate to
    pub redirect: String,
}

pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    Ok(hash(password, cost)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    Ok(verify(password, hash)?)
}

pub fn create_jwt(account: &Account, settings: &AuthSettings) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("system clock before epoch: {e}")))?
        .as_secs();

    let claims = AuthPayload {
        sub: account.id.clone(),
        role: account.role,
        exp: (now + settings.token_ttl_secs) as usize,
        jti: Uuid::new_v4().to_string(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )?)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<AuthPayload> {
    let token_data = decode::<AuthPayload>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(token_data.claims)
}

fn session_for(account: &Account, settings: &AuthSettings) -> Result<Session> {
    Ok(Session {
        token: create_jwt(account, settings)?,
        account_id: account.id.clone(),
        name: account.name.clone(),
        role: account.role,
        redirect: account.role.dashboard_path().to_string(),
    })
}

fn find_by_identifier(storage: &Storage, identifier: &str) -> Result<Option<Account>> {
    if is_valid_email(identifier) {
        if let Some(account) = storage.find_account_by_email(identifier)? {
            return Ok(Some(account));
        }
    }
    storage.find_account_by_username(identifier)
}

pub fn login(storage: &Storage, settings: &AuthSettings, form: &LoginForm) -> Result<Session> {
    validation::validate_login(form)?;

    if FailureInjector::trips(settings.failures.login_rate) {
        warn!(identifier = %form.email_or_username, "simulated login failure");
        return Err(Error::SimulatedFailure("Invalid credentials".to_string()));
    }

    let account = find_by_identifier(storage, &form.email_or_username)?
        .ok_or(Error::InvalidCredentials)?;
    let credentials = storage
        .get_credentials(&account.id)?
        .ok_or(Error::InvalidCredentials)?;

    if credentials.must_reset || !verify_password(&form.password, &credentials.password_hash)? {
        warn!(account = %account.id, "login rejected");
        return Err(Error::InvalidCredentials);
    }
    if !account.is_active() {
        return Err(Error::AccountInactive);
    }

    let account = storage.update_account(&account.id, |a| {
        a.last_active = today();
        Ok(())
    })?;

    info!(account = %account.id, role = %account.role, "logged in");
    session_for(&account, settings)
}

pub fn register(storage: &Storage, settings: &AuthSettings, form: &RegisterForm) -> Result<Session> {
    let role = validation::validate_registration(form)?;

    if FailureInjector::trips(settings.failures.register_rate) {
        warn!(email = %form.email, "simulated registration failure");
        return Err(Error::SimulatedFailure("Email already exists".to_string()));
    }

    let id = storage.next_id(Sequence::Account(role))?;
    let mut account = Account::new(
        id,
        format!("{} {}", form.first_name.trim(), form.last_name.trim()),
        form.email.trim().to_string(),
        role,
        today(),
    );
    account.username = Some(form.username.clone());
    account.newsletter = form.subscribe_newsletter.unwrap_or(true);

    let credentials = Credentials {
        account_id: account.id.clone(),
        password_hash: hash_password(&form.password, settings.bcrypt_cost)?,
        must_reset: false,
    };
    // self-service admin sign-up only bootstraps the first administrator
    if let Err(e) = storage.insert_account(&account, &credentials, AdminRule::FirstOnly) {
        warn!(email = %form.email, error = %e, "registration refused");
        return Err(e);
    }

    info!(account = %account.id, role = %role, "registered");
    session_for(&account, settings)
}

pub fn change_password(
    storage: &Storage,
    settings: &AuthSettings,
    account_id: &str,
    form: &PasswordChangeForm,
) -> Result<()> {
    validation::validate_password_change(form)?;

    let credentials = storage
        .get_credentials(account_id)?
        .ok_or_else(|| Error::not_found("account", account_id))?;
    if !verify_password(&form.current_password, &credentials.password_hash)? {
        return Err(ValidationErrors::single("currentPassword", "Current password is incorrect").into());
    }

    storage.put_credentials(&Credentials {
        account_id: account_id.to_string(),
        password_hash: hash_password(&form.new_password, settings.bcrypt_cost)?,
        must_reset: false,
    })?;
    info!(account = %account_id, "password changed");
    Ok(())
}

/// Admin-side password reset; clears the must-reset flag of created accounts.
pub fn set_password(
    storage: &Storage,
    settings: &AuthSettings,
    account_id: &str,
    password: &str,
) -> Result<()> {
    if storage.get_account(account_id)?.is_none() {
        return Err(Error::not_found("account", account_id));
    }
    if password.chars().count() < 8 {
        return Err(
            ValidationErrors::single("password", "Password must be at least 8 characters").into(),
        );
    }
    storage.put_credentials(&Credentials {
        account_id: account_id.to_string(),
        password_hash: hash_password(password, settings.bcrypt_cost)?,
        must_reset: false,
    })?;
    info!(account = %account_id, "password reset by administrator");
    Ok(())
}

/// Placeholder credentials for accounts created by an administrator
pub fn locked_credentials(account_id: &str, settings: &AuthSettings) -> Result<Credentials> {
    let secret = Uuid::new_v4().to_string();
    Ok(Credentials {
        account_id: account_id.to_string(),
        password_hash: hash_password(&secret, settings.bcrypt_cost)?,
        must_reset: true,
    })
}
