use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A command to run every day at a fixed time of day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    #[serde(serialize_with = "serialize_time", deserialize_with = "deserialize_time")]
    pub time: NaiveTime,
    pub command: Value,
}

/// Accepts `HH:MM:SS` and `HH:MM`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_time_of_day(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid time of day '{raw}', expected HH:MM:SS"))
    })
}

fn serialize_time<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&time.format("%H:%M:%S").to_string())
}

/// First instant strictly after `after` whose time of day is `time`
pub fn next_occurrence(time: NaiveTime, after: NaiveDateTime) -> NaiveDateTime {
    let today = after.date().and_time(time);
    if today > after {
        today
    } else {
        today + Duration::days(1)
    }
}

/// An entry together with when it is next due
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub entry: ScheduleEntry,
    pub next_run: NaiveDateTime,
}

/// Daily command table. Entries are fixed at construction; only their next
/// due time moves.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    jobs: Vec<ScheduledJob>,
}

impl Schedule {
    pub fn new(entries: Vec<ScheduleEntry>, now: NaiveDateTime) -> Self {
        let mut jobs: Vec<_> = entries
            .into_iter()
            .map(|entry| ScheduledJob {
                next_run: next_occurrence(entry.time, now),
                entry,
            })
            .collect();
        jobs.sort_by_key(|job| job.entry.time);
        Self { jobs }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Time left until the earliest job is due; zero if one is overdue.
    pub fn idle(&self, now: NaiveDateTime) -> Option<Duration> {
        self.jobs
            .iter()
            .map(|job| (job.next_run - now).max(Duration::zero()))
            .min()
    }

    /// Commands due at `now`, in time-of-day order. Each returned job is
    /// rescheduled to its next occurrence after `now`.
    pub fn take_due(&mut self, now: NaiveDateTime) -> Vec<Value> {
        let mut due = Vec::new();
        for job in self.jobs.iter_mut().filter(|job| job.next_run <= now) {
            due.push(job.entry.command.clone());
            job.next_run = next_occurrence(job.entry.time, now);
        }
        due
    }
}
