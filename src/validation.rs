//! Form validation for the login, registration and password-change flows.
//!
//! Every rule reports a field-level message; the first failing rule of a
//! field wins, so each field carries at most one message.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Role;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"));
static LOGIN_USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{3,20}$").expect("username pattern"));
static USERNAME_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("username charset"));

/// Characters accepted as the "special" class of a password
pub const SPECIAL_CHARS: &str = "@$!%*?&";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-error shorthand used by the services for form-level messages
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Records `message` unless `field` already has one.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        if !self.has(field) {
            self.0.push(FieldError {
                field: field.to_string(),
                message: message.into(),
            });
        }
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_vec(self) -> Vec<FieldError> {
        self.0
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

/// Identifier accepted at login: an email address or a 3-20 char username.
pub fn is_valid_login_identifier(value: &str) -> bool {
    is_valid_email(value) || LOGIN_USERNAME_RE.is_match(value)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginForm {
    #[serde(default)]
    pub email_or_username: String,
    #[serde(default)]
    pub password: String,
}

pub fn validate_login(form: &LoginForm) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if form.email_or_username.is_empty() {
        errors.add("emailOrUsername", "Email or username is required");
    } else if !is_valid_login_identifier(&form.email_or_username) {
        errors.add("emailOrUsername", "Enter a valid email address or username");
    }

    if form.password.is_empty() {
        errors.add("password", "Password is required");
    }

    errors.into_result()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub agree_to_terms: bool,
    pub subscribe_newsletter: Option<bool>,
}

/// Validates a registration form and returns the requested role.
///
/// The password confirmation is checked independently of every other
/// field, so a mismatch is always reported.
pub fn validate_registration(form: &RegisterForm) -> Result<Role, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if form.first_name.chars().count() < 2 {
        errors.add("firstName", "First name must be at least 2 characters");
    }
    if form.last_name.chars().count() < 2 {
        errors.add("lastName", "Last name must be at least 2 characters");
    }

    let username_len = form.username.chars().count();
    if username_len < 3 {
        errors.add("username", "Username must be at least 3 characters");
    } else if username_len > 20 {
        errors.add("username", "Username must be less than 20 characters");
    } else if !USERNAME_CHARS_RE.is_match(&form.username) {
        errors.add(
            "username",
            "Username can only contain letters, numbers, hyphens, and underscores",
        );
    } else if form.username.starts_with('_') || form.username.starts_with('-') {
        errors.add("username", "Username cannot start with underscore or hyphen");
    }

    if !is_valid_email(&form.email) {
        errors.add("email", "Please enter a valid email address");
    }

    if form.password.chars().count() < 8 {
        errors.add("password", "Password must be at least 8 characters");
    } else if !meets_composition_rule(&form.password) {
        errors.add(
            "password",
            "Password must contain uppercase, lowercase, number and special character",
        );
    }

    if form.password != form.confirm_password {
        errors.add("confirmPassword", "Passwords don't match");
    }

    let role = form.role.parse::<Role>().ok();
    if role.is_none() {
        errors.add("role", "Please select a role");
    }

    if !form.agree_to_terms {
        errors.add("agreeToTerms", "You must agree to the terms and conditions");
    }

    match (errors.into_result(), role) {
        (Ok(()), Some(role)) => Ok(role),
        (Err(errors), _) => Err(errors),
        // unreachable in practice: a missing role always records an error
        (Ok(()), None) => Err(ValidationErrors::single("role", "Please select a role")),
    }
}

fn is_special(c: char) -> bool {
    SPECIAL_CHARS.contains(c)
}

/// Lowercase, uppercase, digit and special character present, and the
/// password opens with a character from the accepted alphabet.
pub fn meets_composition_rule(password: &str) -> bool {
    let opens_with_allowed = password
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric() || is_special(c))
        .unwrap_or(false);

    opens_with_allowed
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(is_special)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrengthLabel {
    Weak,
    Fair,
    Good,
    Strong,
}

impl StrengthLabel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => StrengthLabel::Weak,
            40..=59 => StrengthLabel::Fair,
            60..=79 => StrengthLabel::Good,
            _ => StrengthLabel::Strong,
        }
    }
}

impl fmt::Display for StrengthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrengthLabel::Weak => "Weak",
            StrengthLabel::Fair => "Fair",
            StrengthLabel::Good => "Good",
            StrengthLabel::Strong => "Strong",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordStrength {
    pub score: u8,
    pub label: StrengthLabel,
    /// Names of the checks that failed, in check order
    pub feedback: Vec<String>,
}

/// Five independent checks worth 20 points each.
pub fn password_strength(password: &str) -> PasswordStrength {
    let checks: [(bool, &str); 5] = [
        (password.chars().count() >= 8, "At least 8 characters"),
        (password.chars().any(|c| c.is_ascii_lowercase()), "Lowercase letter"),
        (password.chars().any(|c| c.is_ascii_uppercase()), "Uppercase letter"),
        (password.chars().any(|c| c.is_ascii_digit()), "Number"),
        (password.chars().any(is_special), "Special character"),
    ];

    let mut score = 0u8;
    let mut feedback = Vec::new();
    for (passed, name) in checks {
        if passed {
            score += 20;
        } else {
            feedback.push(name.to_string());
        }
    }

    PasswordStrength {
        score,
        label: StrengthLabel::from_score(score),
        feedback,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeForm {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

pub fn validate_password_change(form: &PasswordChangeForm) -> Result<(), ValidationErrors> {
    if form.current_password.is_empty()
        || form.new_password.is_empty()
        || form.confirm_password.is_empty()
    {
        return Err(ValidationErrors::single(
            "password",
            "Please fill in all password fields",
        ));
    }
    if form.new_password != form.confirm_password {
        return Err(ValidationErrors::single(
            "confirmPassword",
            "New passwords don't match",
        ));
    }
    if form.new_password.chars().count() < 8 {
        return Err(ValidationErrors::single(
            "newPassword",
            "Password must be at least 8 characters",
        ));
    }
    Ok(())
}
