use std::fmt;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use object_store::path::Path;

pub const DEFAULT_BATCH_PREFIX: &str = "stock-data";
pub const BATCH_SUFFIX: &str = ".ndjson";
pub const BATCH_CONTENT_TYPE: &str = "application/x-ndjson";

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// `<prefix>-<YYYYMMDD-HHMMSS>-<counter>.ndjson`
///
/// Ordering is by (timestamp, counter), which is flush order within a run.
/// A parsed name keeps the exact spelling it was listed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    prefix: String,
    timestamp: NaiveDateTime,
    counter: u64,
    name: String,
}

impl ObjectName {
    pub fn new(prefix: &str, at: DateTime<Utc>, counter: u64) -> Self {
        let timestamp = at.naive_utc().trunc_subsecs(0);
        Self {
            prefix: prefix.to_owned(),
            timestamp,
            counter,
            name: format!(
                "{prefix}-{}-{counter}{BATCH_SUFFIX}",
                timestamp.format(TIMESTAMP_FORMAT)
            ),
        }
    }

    /// Recover the name of an object written under `prefix`, `None` for anything else
    pub fn parse(prefix: &str, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
        let rest = rest.strip_suffix(BATCH_SUFFIX)?;
        let (timestamp, counter) = rest.rsplit_once('-')?;

        Some(Self {
            prefix: prefix.to_owned(),
            timestamp: NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?,
            counter: counter.parse().ok()?,
            name: name.to_owned(),
        })
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Name without the `.ndjson` suffix
    pub fn stem(&self) -> String {
        self.name[..self.name.len() - BATCH_SUFFIX.len()].to_owned()
    }

    pub fn path(&self) -> Path {
        Path::from(self.name.as_str())
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl PartialOrd for ObjectName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.timestamp, self.counter, &self.prefix, &self.name).cmp(&(
            other.timestamp,
            other.counter,
            &other.prefix,
            &other.name,
        ))
    }
}

/// Hands out batch object names whose (timestamp, counter) strictly increases,
/// even if the wall clock steps backwards.
#[derive(Debug, Clone)]
pub struct ObjectNamer {
    prefix: String,
    next_counter: u64,
    last: Option<NaiveDateTime>,
}

impl ObjectNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next_counter: 1,
            last: None,
        }
    }

    pub fn next(&mut self, now: DateTime<Utc>) -> ObjectName {
        let mut at = now.naive_utc().trunc_subsecs(0);
        if let Some(last) = self.last {
            at = at.max(last);
        }
        let name = ObjectName::new(&self.prefix, Utc.from_utc_datetime(&at), self.next_counter);

        self.last = Some(name.timestamp);
        self.next_counter += 1;
        name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
