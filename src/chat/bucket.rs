//! Time categories for grouping messages ("Today", "3 days ago", ...)

use std::fmt;

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeCategory {
    Today,
    Yesterday,
    /// 2 to 6 whole days ago.
    DaysAgo(i64),
    /// 7 to 13 whole days ago.
    WeekAgo,
    Date(NaiveDate),
    /// The message carries no usable timestamp.
    Unknown,
}

impl fmt::Display for TimeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeCategory::Today => f.write_str("Today"),
            TimeCategory::Yesterday => f.write_str("Yesterday"),
            TimeCategory::DaysAgo(days) => write!(f, "{} days ago", days),
            TimeCategory::WeekAgo => f.write_str("1 week ago"),
            TimeCategory::Date(date) => write!(f, "{}", date.format("%-m/%-d/%Y")),
            TimeCategory::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Classify `timestamp` relative to `now`.
///
/// Buckets use whole elapsed days. Under 24 hours counts as "Today" only on
/// the same calendar date (in `now`'s time zone); across a midnight it is
/// "Yesterday". Future timestamps are "Today".
pub fn classify<Tz: TimeZone>(timestamp: &DateTime<Tz>, now: &DateTime<Tz>) -> TimeCategory {
    let elapsed = now.clone() - timestamp.clone();
    if elapsed < chrono::Duration::zero() {
        return TimeCategory::Today;
    }

    match elapsed.num_days() {
        0 if timestamp.date_naive() == now.date_naive() => TimeCategory::Today,
        0 | 1 => TimeCategory::Yesterday,
        days @ 2..=6 => TimeCategory::DaysAgo(days),
        7..=13 => TimeCategory::WeekAgo,
        _ => TimeCategory::Date(timestamp.date_naive()),
    }
}

pub fn classify_message<Tz: TimeZone>(message: &Message, now: &DateTime<Tz>) -> TimeCategory {
    match message.timestamp {
        Some(ts) => classify(&ts.with_timezone(&now.timezone()), now),
        None => TimeCategory::Unknown,
    }
}

/// Group messages by category, categories in order of first appearance.
pub fn group_by_category<'a, Tz: TimeZone>(
    messages: &'a [Message],
    now: &DateTime<Tz>,
) -> Vec<(TimeCategory, Vec<&'a Message>)> {
    let mut groups: Vec<(TimeCategory, Vec<&'a Message>)> = Vec::new();
    for message in messages {
        let category = classify_message(message, now);
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some((_, members)) => members.push(message),
            None => groups.push((category, vec![message])),
        }
    }
    groups
}
