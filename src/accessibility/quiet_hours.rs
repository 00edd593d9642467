//! Quiet-hour windows (`HH:MM-HH:MM`) during which sensory output is dimmed.

use chrono::NaiveTime;
use serde_json::Value;

use super::ProfilesError;

/// A half-open `[start, end)` window. `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietWindow {
    pub fn parse(entry: &str) -> Option<Self> {
        let (start, end) = entry.split_once('-')?;
        Some(Self {
            start: parse_time(start.trim())?,
            end: parse_time(end.trim())?,
        })
    }

    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let (hours, minutes) = value.split_once(':')?;
    let hour: u32 = hours.trim().parse().ok()?;
    let minute: u32 = minutes.trim().parse().ok()?;
    if hour >= 24 || minute >= 60 {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Flatten the configured value into trimmed, non-empty entries.
///
/// Strings are taken as a single entry. List items that are not strings are
/// rendered as JSON text, so they never parse as windows.
fn entries(value: &Value) -> Result<Vec<String>, ProfilesError> {
    let candidates = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Object(_) => {
            return Err(ProfilesError::QuietHoursShape(
                "quiet_hours must be a list of HH:MM-HH:MM strings.".to_string(),
            ))
        }
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::Bool(_) | Value::Number(_) => {
            return Err(ProfilesError::QuietHoursShape(
                "quiet_hours must be provided as a string or list.".to_string(),
            ))
        }
    };
    Ok(candidates
        .into_iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect())
}

/// Windows usable for derivation. Unparsable entries (or a malformed value)
/// are skipped rather than reported.
pub fn windows(value: Option<&Value>) -> Vec<QuietWindow> {
    let Some(value) = value else {
        return Vec::new();
    };
    match entries(value) {
        Ok(list) => list.iter().filter_map(|e| QuietWindow::parse(e)).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn is_active(value: Option<&Value>, now: NaiveTime) -> bool {
    windows(value).iter().any(|window| window.contains(now))
}

/// Strict validation used when profiles are loaded or edited.
pub fn validate(value: Option<&Value>) -> Result<(), ProfilesError> {
    let Some(value) = value else {
        return Ok(());
    };
    let invalid: Vec<String> = entries(value)?
        .into_iter()
        .filter(|entry| QuietWindow::parse(entry).is_none())
        .collect();
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ProfilesError::InvalidQuietHours(invalid))
    }
}
