use chrono::Utc;
use housetrain::model::{ActivityRecord, Location, OutingRecord};
use housetrain::stats::{build_summary, count_incidents, count_successes};

use Location::{Inside, Outside};

fn outing(pee: Option<Location>, poop: Option<Location>) -> OutingRecord {
    OutingRecord::new(Utc::now(), pee, poop)
}

fn activity(pee: bool, pee_incident: bool, poop: bool, poop_incident: bool) -> ActivityRecord {
    ActivityRecord {
        timestamp: Utc::now(),
        pee,
        pee_incident,
        poop,
        poop_incident,
        ..Default::default()
    }
}

fn incident_outings() -> Vec<OutingRecord> {
    vec![
        outing(None, Some(Inside)),
        outing(Some(Inside), Some(Inside)),
        outing(Some(Inside), None),
        outing(Some(Outside), None),
        outing(None, Some(Outside)),
    ]
}

fn incident_activities() -> Vec<ActivityRecord> {
    vec![
        activity(false, false, true, true),
        activity(true, true, true, true),
        activity(false, false, false, false),
    ]
}

#[test]
fn double_accident_is_one_incident() {
    assert_eq!(count_incidents(&[outing(Some(Inside), Some(Inside))], &[]), 1);
    assert_eq!(count_incidents(&[], &[activity(true, true, true, true)]), 1);
}

#[test]
fn incidents_are_counted_per_record() {
    assert_eq!(count_incidents(&incident_outings(), &[]), 3);
    assert_eq!(count_incidents(&[], &incident_activities()), 2);
    assert_eq!(count_incidents(&incident_outings(), &incident_activities()), 5);
}

#[test]
fn successes_are_counted_per_need() {
    let outings = vec![
        outing(Some(Outside), None),
        outing(Some(Outside), Some(Outside)),
        outing(Some(Inside), None),
    ];
    let activities = vec![activity(true, false, false, false), activity(true, false, true, false)];

    assert_eq!(count_successes(&outings, &[]), 3);
    assert_eq!(count_successes(&[], &activities), 3);
    assert_eq!(count_successes(&outings, &activities), 6);
}

#[test]
fn summary_over_mixed_history() {
    let summary = build_summary(&incident_outings(), &incident_activities());
    // outings: pee outside + poop outside; activities: 1 + 2 + 0 needs
    assert_eq!(summary.outside, 5);
    assert_eq!(summary.inside, 5);
    assert_eq!(summary.total, 10);
    assert_eq!(summary.percentage, 50);
}
