//! Input checks shared by every write path. Failures never reach the store.

use crate::error::{CoreError, CoreResult};
use chrono::{NaiveDate, NaiveTime};

pub fn required_text(field: &str, value: &str, min: usize, max: usize) -> CoreResult<String> {
    let t = value.trim();
    let len = t.chars().count();
    if len == 0 {
        return Err(CoreError::validation(field, "is required"));
    }
    if len < min || len > max {
        return Err(CoreError::validation(
            field,
            format!("must be between {} and {} characters", min, max),
        ));
    }
    Ok(t.to_string())
}

/// Blank input collapses to `None`.
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> CoreResult<Option<String>> {
    let Some(v) = value else { return Ok(None) };
    let t = v.trim();
    if t.is_empty() {
        return Ok(None);
    }
    if t.chars().count() > max {
        return Err(CoreError::validation(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(Some(t.to_string()))
}

pub fn int_range(field: &str, value: i64, min: i64, max: i64) -> CoreResult<i64> {
    if !(min..=max).contains(&value) {
        return Err(CoreError::validation(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(value)
}

pub fn date(field: &str, value: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| CoreError::validation(field, "must be a YYYY-MM-DD date"))
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn time(field: &str, value: &str) -> CoreResult<NaiveTime> {
    let t = value.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| CoreError::validation(field, "must be HH:MM or HH:MM:SS"))
}

pub fn phone(field: &str, value: &str) -> CoreResult<String> {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < 10 {
        return Err(CoreError::validation(field, "must contain at least 10 digits"));
    }
    Ok(value.trim().to_string())
}

pub fn optional_phone(field: &str, value: Option<&str>) -> CoreResult<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => phone(field, v).map(Some),
    }
}

pub fn optional_email(field: &str, value: Option<&str>) -> CoreResult<Option<String>> {
    let Some(v) = optional_text(field, value, 100)? else {
        return Ok(None);
    };
    let valid = match v.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(CoreError::validation(field, "must be an email address"));
    }
    Ok(Some(v))
}
