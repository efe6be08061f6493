use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;

/// Row of an append-only, timestamped collection subject to retention.
///
/// Implemented explicitly per entity type instead of any structural lookup:
/// retention only ever needs a key and a timestamp.
pub trait Retained {
    type Id: Eq + Hash + Clone;

    fn id(&self) -> Self::Id;
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Classification of rows into keep/delete sets.
///
/// Purely descriptive: the caller performs the actual deletion, which must
/// be idempotent.
#[derive(Debug)]
pub struct RetentionOutcome<K> {
    pub keep: Vec<K>,
    pub delete: Vec<K>,
}

// Not derived: the derive would require K: Default, which row keys
// have no reason to provide
impl<K> Default for RetentionOutcome<K> {
    fn default() -> Self {
        Self {
            keep: Vec::new(),
            delete: Vec::new(),
        }
    }
}

enum Class {
    Keep,
    Delete,
    /// (policy window, bucket index) pair. The window discriminant keeps
    /// buckets of different widths from colliding at window edges.
    Bucket(u8, i64),
}

fn classify(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> Class {
    let age = now - timestamp;

    if age < Duration::hours(1) {
        Class::Keep
    } else if age >= Duration::days(70) {
        Class::Delete
    } else {
        let (window, width) = if age < Duration::days(7) {
            (0, 600)
        } else if age < Duration::days(30) {
            (1, 3600)
        } else {
            (2, 21_600)
        };

        Class::Bucket(window, timestamp.timestamp().div_euclid(width))
    }
}

/// Downsample `rows` against the retention policy at time `now`.
///
/// Rows younger than 1 hour are kept at full resolution, rows aged 1h-7d are
/// thinned to one per 10 minutes, 7d-30d to one per hour, 30d-70d to one per
/// 6 hours, and rows older than 70 days are deleted outright. Within a
/// bucket the most recent row wins.
pub fn apply_retention<R>(now: DateTime<Utc>, rows: &[R]) -> RetentionOutcome<R::Id>
where
    R: Retained,
{
    let mut outcome = RetentionOutcome::default();

    let buckets = rows
        .iter()
        .filter_map(|row| match classify(now, row.timestamp()) {
            Class::Keep => {
                outcome.keep.push(row.id());
                None
            }
            Class::Delete => {
                outcome.delete.push(row.id());
                None
            }
            Class::Bucket(window, index) => Some(((window, index), row)),
        })
        .into_group_map();

    for (_, mut rows) in buckets {
        rows.sort_by_key(|row| row.timestamp());

        let winner = rows.pop().expect("Bucket groups are never empty");
        outcome.keep.push(winner.id());
        outcome
            .delete
            .extend(rows.into_iter().map(Retained::id));
    }

    outcome
}
