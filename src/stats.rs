//! Incident and success counts derived from walk and activity history.
//!
//! Incidents are counted per record: an outing with both pee and poop
//! inside is one incident. Successes are counted per need: an outing with
//! both pee and poop outside is two successes.

use crate::model::{ActivityRecord, Location, OutingRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSummary {
    /// Successes.
    pub outside: u32,
    /// Incidents.
    pub inside: u32,
    pub total: u32,
    /// 0..=100
    pub percentage: u32,
}

fn outing_is_incident(o: &OutingRecord) -> bool {
    (o.pee && o.pee_location == Some(Location::Inside))
        || (o.poop && o.poop_location == Some(Location::Inside))
}

fn activity_is_incident(a: &ActivityRecord) -> bool {
    a.pee_incident || a.poop_incident
}

fn outing_successes(o: &OutingRecord) -> u32 {
    u32::from(o.pee && o.pee_location == Some(Location::Outside))
        + u32::from(o.poop && o.poop_location == Some(Location::Outside))
}

fn activity_successes(a: &ActivityRecord) -> u32 {
    u32::from(a.pee) + u32::from(a.poop)
}

fn count<T>(items: &[T], pred: impl Fn(&T) -> bool) -> u32 {
    u32::try_from(items.iter().filter(|i| pred(i)).count()).unwrap_or(u32::MAX)
}

pub fn count_incidents(outings: &[OutingRecord], activities: &[ActivityRecord]) -> u32 {
    count(outings, outing_is_incident).saturating_add(count(activities, activity_is_incident))
}

pub fn count_successes(outings: &[OutingRecord], activities: &[ActivityRecord]) -> u32 {
    let from_outings = outings
        .iter()
        .fold(0_u32, |acc, o| acc.saturating_add(outing_successes(o)));
    activities
        .iter()
        .fold(from_outings, |acc, a| acc.saturating_add(activity_successes(a)))
}

/// `round(100 * successes / (successes + incidents))`, 0 when both are 0.
pub fn success_percentage(successes: u32, incidents: u32) -> u32 {
    let total = u64::from(successes) + u64::from(incidents);
    if total == 0 {
        return 0;
    }
    // half-up rounding in integers
    let pct = (200 * u64::from(successes) + total) / (2 * total);
    u32::try_from(pct).unwrap_or(100)
}

pub fn build_summary(outings: &[OutingRecord], activities: &[ActivityRecord]) -> StatsSummary {
    let outside = count_successes(outings, activities);
    let inside = count_incidents(outings, activities);
    StatsSummary {
        outside,
        inside,
        total: outside.saturating_add(inside),
        percentage: success_percentage(outside, inside),
    }
}

/// Summary over records with `timestamp >= since`.
pub fn build_summary_since(
    outings: &[OutingRecord],
    activities: &[ActivityRecord],
    since: DateTime<Utc>,
) -> StatsSummary {
    let outings: Vec<OutingRecord> = outings
        .iter()
        .filter(|o| o.timestamp >= since)
        .cloned()
        .collect();
    let activities: Vec<ActivityRecord> = activities
        .iter()
        .filter(|a| a.timestamp >= since)
        .cloned()
        .collect();
    build_summary(&outings, &activities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outing(pee: Option<Location>, poop: Option<Location>) -> OutingRecord {
        OutingRecord::new(Utc::now(), pee, poop)
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(success_percentage(0, 0), 0);
        assert_eq!(success_percentage(1, 0), 100);
        assert_eq!(success_percentage(0, 3), 0);
        assert_eq!(success_percentage(1, 1), 50);
        assert_eq!(success_percentage(2, 1), 67);
        assert_eq!(success_percentage(1, 2), 33);
        // 1/8 = 12.5%
        assert_eq!(success_percentage(1, 7), 13);
    }

    #[test]
    fn summary_totals() {
        let outings = vec![
            outing(Some(Location::Outside), Some(Location::Outside)),
            outing(Some(Location::Inside), None),
        ];
        let summary = build_summary(&outings, &[]);
        assert_eq!(
            summary,
            StatsSummary {
                outside: 2,
                inside: 1,
                total: 3,
                percentage: 67
            }
        );
    }

    #[test]
    fn empty_history() {
        assert_eq!(build_summary(&[], &[]), StatsSummary::default());
    }

    #[test]
    fn location_without_need_is_ignored() {
        let mut o = outing(None, None);
        o.pee_location = Some(Location::Inside);
        o.poop_location = Some(Location::Outside);
        assert_eq!(count_incidents(&[o.clone()], &[]), 0);
        assert_eq!(count_successes(&[o], &[]), 0);
    }

    #[test]
    fn since_filters_both_collections() {
        let cutoff = Utc::now();
        let mut old = outing(Some(Location::Inside), None);
        old.timestamp = cutoff - chrono::Duration::hours(30);
        let fresh = outing(Some(Location::Outside), None);
        let mut old_activity = ActivityRecord {
            pee: true,
            pee_incident: true,
            ..Default::default()
        };
        old_activity.timestamp = cutoff - chrono::Duration::hours(2);

        let summary = build_summary_since(&[old, fresh], &[old_activity], cutoff - chrono::Duration::hours(1));
        assert_eq!(summary.inside, 0);
        assert_eq!(summary.outside, 1);
        assert_eq!(summary.percentage, 100);
    }
}
