use crate::errors::{AppError, AppResult};
use crate::models::{
    RedeemInvitePayload, SaveBscPayload, SaveCategoryPayload, SaveIndicatorPayload, SavePersonPayload, ValueKind,
};
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_CODE_LENGTH: usize = 10;
const MAX_TEXT_LENGTH: usize = 255;
const MAX_BSC_NAME_LENGTH: usize = 100;
const MAX_USERNAME_LENGTH: usize = 150;
const MIN_PASSWORD_LENGTH: usize = 8;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.@+-]+$").expect("valid username regex"));

#[derive(Debug, Clone, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_indicator(&self, payload: &SaveIndicatorPayload) -> AppResult<()> {
        if let Some(code) = payload.code.as_deref().map(str::trim) {
            if code.chars().count() > MAX_CODE_LENGTH {
                return Err(AppError::Validation(format!(
                    "indicator code must be at most {MAX_CODE_LENGTH} characters"
                )));
            }
        }
        for (field, value) in [
            ("name", &payload.name),
            ("owner", &payload.owner),
            ("unit", &payload.unit),
            ("indicatorType", &payload.indicator_type),
        ] {
            check_length(field, value.as_deref(), MAX_TEXT_LENGTH)?;
        }
        let Some(monthly) = &payload.monthly else {
            return Ok(());
        };
        for kind in ValueKind::ALL {
            for (month, value) in monthly.series(kind).iter().enumerate() {
                if value.is_some_and(|v| !v.is_finite()) {
                    return Err(AppError::Validation(format!(
                        "{} value for month {} must be a finite number",
                        kind_label(kind),
                        month + 1
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn validate_category(&self, payload: &SaveCategoryPayload) -> AppResult<()> {
        require_name("category name", &payload.name, MAX_TEXT_LENGTH)
    }

    pub fn validate_bsc(&self, payload: &SaveBscPayload) -> AppResult<()> {
        require_name("scorecard name", &payload.name, MAX_BSC_NAME_LENGTH)
    }

    pub fn validate_person(&self, payload: &SavePersonPayload) -> AppResult<()> {
        require_name("first names", &payload.first_names, MAX_TEXT_LENGTH)?;
        require_name("last names", &payload.last_names, MAX_TEXT_LENGTH)?;
        if !EMAIL_RE.is_match(payload.email.trim()) {
            return Err(AppError::Validation(format!("'{}' is not a valid email", payload.email)));
        }
        Ok(())
    }

    pub fn validate_redeem(&self, payload: &RedeemInvitePayload) -> AppResult<()> {
        if payload.code.trim().is_empty() {
            return Err(AppError::Validation("invite code is required".to_string()));
        }
        let username = payload.username.trim();
        require_name("username", username, MAX_USERNAME_LENGTH)?;
        if !USERNAME_RE.is_match(username) {
            return Err(AppError::Validation(
                "username may only contain letters, digits and @/./+/-/_".to_string(),
            ));
        }
        if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        Ok(())
    }
}

/// Trims free text and collapses blank strings to absent.
pub fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn require_name(field: &str, value: &str, max: usize) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    check_length(field, Some(value), max)
}

fn check_length(field: &str, value: Option<&str>, max: usize) -> AppResult<()> {
    match value {
        Some(text) if text.trim().chars().count() > max => Err(AppError::Validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

fn kind_label(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Result => "result",
        ValueKind::Target => "target",
    }
}
