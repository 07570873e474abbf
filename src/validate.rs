//! Pre-submission checks for walk, activity and feeding input.
//!
//! Every validator collects all violated rules instead of stopping at the
//! first one, so the whole list can be shown to the user at once.

use crate::model::{parse_timestamp, ActivityDraft, FeedingDraft, WalkDraft};
use chrono::{DateTime, Duration, Months, Utc};

pub const MAX_DURATION_MINUTES: i64 = 480;
pub const MAX_TITLE_CHARS: usize = 255;
pub const MAX_LOCATION_CHARS: usize = 255;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Clock-skew tolerance for walk timestamps.
const WALK_FUTURE_TOLERANCE_MINUTES: i64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

fn too_long(value: &Option<String>, max: usize) -> bool {
    value.as_deref().is_some_and(|v| v.chars().count() > max)
}

pub fn validate_activity(draft: &ActivityDraft) -> ValidationResult {
    validate_activity_at(draft, Utc::now())
}

pub fn validate_activity_at(draft: &ActivityDraft, now: DateTime<Utc>) -> ValidationResult {
    let mut result = ValidationResult::default();

    if let Some(raw) = draft.duration_minutes.as_deref().map(str::trim) {
        if !raw.is_empty() {
            match raw.parse::<i64>() {
                Ok(minutes) if (0..=MAX_DURATION_MINUTES).contains(&minutes) => {}
                _ => result.push(format!(
                    "Duration must be a whole number between 0 and {} minutes.",
                    MAX_DURATION_MINUTES
                )),
            }
        }
    }

    if too_long(&draft.title, MAX_TITLE_CHARS) {
        result.push(format!(
            "Title must be {} characters or fewer.",
            MAX_TITLE_CHARS
        ));
    }
    if too_long(&draft.location, MAX_LOCATION_CHARS) {
        result.push(format!(
            "Location must be {} characters or fewer.",
            MAX_LOCATION_CHARS
        ));
    }
    if too_long(&draft.description, MAX_DESCRIPTION_CHARS) {
        result.push(format!(
            "Description must be {} characters or fewer.",
            MAX_DESCRIPTION_CHARS
        ));
    }

    match parse_timestamp(&draft.timestamp) {
        None => result.push("Invalid date and time."),
        Some(ts) => {
            let one_year_ago = now.checked_sub_months(Months::new(12)).unwrap_or(now);
            if ts < one_year_ago {
                result.push("Date cannot be more than 1 year in the past.");
            }
            if ts > now {
                result.push("Date cannot be in the future.");
            }
        }
    }

    if draft.pee_incident && !draft.pee {
        result.push("A pee accident can only be logged together with pee.");
    }
    if draft.poop_incident && !draft.poop {
        result.push("A poop accident can only be logged together with poop.");
    }

    result
}

pub fn validate_walk(draft: &WalkDraft) -> ValidationResult {
    validate_walk_at(draft, Utc::now())
}

pub fn validate_walk_at(draft: &WalkDraft, now: DateTime<Utc>) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !draft.pee && !draft.poop {
        result.push("Select at least one: pee or poop.");
    }
    if draft.pee_location.is_some() && !draft.pee {
        result.push("A pee location was given but no pee was logged.");
    }
    if draft.poop_location.is_some() && !draft.poop {
        result.push("A poop location was given but no poop was logged.");
    }

    match parse_timestamp(&draft.timestamp) {
        None => result.push("Invalid date and time."),
        Some(ts) if ts > now + Duration::minutes(WALK_FUTURE_TOLERANCE_MINUTES) => {
            result.push("Date cannot be in the future.");
        }
        Some(_) => {}
    }

    result
}

pub fn validate_feeding(draft: &FeedingDraft) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !draft.food_types.iter().any(|t| !t.trim().is_empty()) {
        result.push("Select at least one food type.");
    }
    if parse_timestamp(&draft.timestamp).is_none() {
        result.push("Invalid date and time.");
    }

    result
}

/// Join errors for display: empty for none, the message itself for one,
/// a bulleted list for several.
pub fn format_validation_errors(errors: &[String]) -> String {
    match errors {
        [] => String::new(),
        [only] => only.clone(),
        many => many
            .iter()
            .map(|e| format!("• {}", e))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
