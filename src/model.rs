use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where a relief event happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Inside,
    Outside,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Inside => "inside",
            Location::Outside => "outside",
        }
    }
}

impl std::str::FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inside" | "in" => Ok(Location::Inside),
            "outside" | "out" => Ok(Location::Outside),
            other => Err(format!("unknown location '{}'", other)),
        }
    }
}

/// Tag carried by change notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Walk,
    Activity,
    Feeding,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Walk => "walk",
            ChangeKind::Activity => "activity",
            ChangeKind::Feeding => "feeding",
        }
    }

    /// Backend table the records of this kind live in.
    pub fn table(&self) -> &'static str {
        match self {
            ChangeKind::Walk => "walks",
            ChangeKind::Activity => "activities",
            ChangeKind::Feeding => "feedings",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
}

/// Quick-action relief event. A location is only present when the
/// corresponding need happened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutingRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub pee: bool,
    pub pee_location: Option<Location>,
    pub poop: bool,
    pub poop_location: Option<Location>,
}

impl OutingRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        pee: Option<Location>,
        poop: Option<Location>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            pee: pee.is_some(),
            pee_location: pee,
            poop: poop.is_some(),
            poop_location: poop,
        }
    }
}

/// Full walk/activity log. Flags missing from a stored row read as false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub duration_minutes: Option<u32>,
    pub pee: bool,
    pub pee_incident: bool,
    pub poop: bool,
    pub poop_incident: bool,
    pub treat: bool,
    pub dog_asked_for_walk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedingRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub food_types: Vec<String>,
    pub amount: Option<String>,
    pub notes: Option<String>,
}

/// Raw walk form input, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkDraft {
    pub pee: bool,
    pub pee_location: Option<Location>,
    pub poop: bool,
    pub poop_location: Option<Location>,
    /// RFC 3339.
    pub timestamp: String,
}

/// Raw activity form input, before validation. Numeric and time fields are
/// kept as entered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub duration_minutes: Option<String>,
    pub timestamp: String,
    pub pee: bool,
    pub pee_incident: bool,
    pub poop: bool,
    pub poop_incident: bool,
    pub treat: bool,
    pub dog_asked_for_walk: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedingDraft {
    pub food_types: Vec<String>,
    pub amount: Option<String>,
    pub notes: Option<String>,
    pub timestamp: String,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// RFC 3339 in any offset, normalized to UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl WalkDraft {
    /// Build the record for an already-validated draft. Returns `None` when
    /// the timestamp does not parse.
    pub fn to_record(&self) -> Option<OutingRecord> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        Some(OutingRecord {
            id: Uuid::new_v4(),
            timestamp,
            pee: self.pee,
            pee_location: self.pee_location.filter(|_| self.pee),
            poop: self.poop,
            poop_location: self.poop_location.filter(|_| self.poop),
        })
    }
}

impl ActivityDraft {
    pub fn to_record(&self) -> Option<ActivityRecord> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        let duration_minutes = match non_blank(&self.duration_minutes) {
            Some(raw) => Some(raw.parse::<u32>().ok()?),
            None => None,
        };
        Some(ActivityRecord {
            id: Uuid::new_v4(),
            timestamp,
            title: non_blank(&self.title),
            description: non_blank(&self.description),
            location: non_blank(&self.location),
            duration_minutes,
            pee: self.pee,
            pee_incident: self.pee && self.pee_incident,
            poop: self.poop,
            poop_incident: self.poop && self.poop_incident,
            treat: self.treat,
            dog_asked_for_walk: self.dog_asked_for_walk,
        })
    }
}

impl FeedingDraft {
    pub fn to_record(&self) -> Option<FeedingRecord> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        Some(FeedingRecord {
            id: Uuid::new_v4(),
            timestamp,
            food_types: self
                .food_types
                .iter()
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect(),
            amount: non_blank(&self.amount),
            notes: non_blank(&self.notes),
        })
    }
}
