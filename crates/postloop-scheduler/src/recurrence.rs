//! Recurrence rules and next-occurrence computation.
//!
//! Rules use a small RRULE-style vocabulary, `KEY=VALUE` pairs separated by
//! `;` with an optional `RRULE:` prefix:
//!
//! | Rule                                         | Fires                                   |
//! |----------------------------------------------|-----------------------------------------|
//! | `FREQ=MINUTELY;INTERVAL=15`                  | every 15 minutes on the UTC minute grid |
//! | `FREQ=HOURLY;BYMINUTE=30`                    | at :30 of every local hour              |
//! | `FREQ=DAILY;BYHOUR=9;BYMINUTE=0`             | 09:00 local every day                   |
//! | `FREQ=WEEKLY;BYDAY=MO,TH;BYHOUR=18;BYMINUTE=0` | 18:00 local on Mondays and Thursdays  |

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{Result, SchedulerError};

const MAX_INTERVAL_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    /// Every `interval` minutes, aligned so minutes-since-epoch is a multiple of `interval`.
    Minutely { interval: u32 },
    /// Minute `minute` of every local hour.
    Hourly { minute: u32 },
    /// `hour:minute` local, every day.
    Daily { hour: u32, minute: u32 },
    /// `hour:minute` local on each listed weekday (sorted, deduplicated).
    Weekly {
        days: Vec<Weekday>,
        hour: u32,
        minute: u32,
    },
}

fn invalid(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidSchedule(msg.into())
}

fn parse_bounded(fields: &BTreeMap<String, String>, key: &str, default: Option<u32>, max: u32) -> Result<u32> {
    let value = match fields.get(key) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| invalid(format!("{key} must be a number, got {raw:?}")))?,
        None => default.ok_or_else(|| invalid(format!("{key} is required")))?,
    };
    if value > max {
        return Err(invalid(format!("{key}={value} is out of range (max {max})")));
    }
    Ok(value)
}

fn parse_weekday(raw: &str) -> Result<Weekday> {
    match raw {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(invalid(format!("unknown weekday {other:?}"))),
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

impl std::str::FromStr for Recurrence {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let body = upper.strip_prefix("RRULE:").unwrap_or(&upper);

        let mut fields = BTreeMap::new();
        for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected KEY=VALUE, got {part:?}")))?;
            if fields.insert(key.trim().to_string(), value.trim().to_string()).is_some() {
                return Err(invalid(format!("duplicate key {key}")));
            }
        }

        let freq = fields
            .get("FREQ")
            .ok_or_else(|| invalid("FREQ is required"))?
            .clone();
        let allowed: &[&str] = match freq.as_str() {
            "MINUTELY" => &["FREQ", "INTERVAL"],
            "HOURLY" => &["FREQ", "BYMINUTE"],
            "DAILY" => &["FREQ", "BYHOUR", "BYMINUTE"],
            "WEEKLY" => &["FREQ", "BYDAY", "BYHOUR", "BYMINUTE"],
            other => return Err(invalid(format!("unsupported FREQ {other:?}"))),
        };
        if let Some(extra) = fields.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(invalid(format!("{extra} is not supported with FREQ={freq}")));
        }

        match freq.as_str() {
            "MINUTELY" => {
                let interval = parse_bounded(&fields, "INTERVAL", Some(1), MAX_INTERVAL_MINUTES)?;
                if interval == 0 {
                    return Err(invalid("INTERVAL must be at least 1"));
                }
                Ok(Recurrence::Minutely { interval })
            }
            "HOURLY" => Ok(Recurrence::Hourly {
                minute: parse_bounded(&fields, "BYMINUTE", Some(0), 59)?,
            }),
            "DAILY" => Ok(Recurrence::Daily {
                hour: parse_bounded(&fields, "BYHOUR", None, 23)?,
                minute: parse_bounded(&fields, "BYMINUTE", Some(0), 59)?,
            }),
            _ => {
                let raw_days = fields.get("BYDAY").ok_or_else(|| invalid("BYDAY is required"))?;
                let mut days = raw_days
                    .split(',')
                    .map(|d| parse_weekday(d.trim()))
                    .collect::<Result<Vec<_>>>()?;
                days.sort_by_key(|d| d.num_days_from_monday());
                days.dedup();
                Ok(Recurrence::Weekly {
                    days,
                    hour: parse_bounded(&fields, "BYHOUR", None, 23)?,
                    minute: parse_bounded(&fields, "BYMINUTE", Some(0), 59)?,
                })
            }
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Minutely { interval } => write!(f, "FREQ=MINUTELY;INTERVAL={interval}"),
            Recurrence::Hourly { minute } => write!(f, "FREQ=HOURLY;BYMINUTE={minute}"),
            Recurrence::Daily { hour, minute } => {
                write!(f, "FREQ=DAILY;BYHOUR={hour};BYMINUTE={minute}")
            }
            Recurrence::Weekly { days, hour, minute } => {
                let days: Vec<&str> = days.iter().map(|d| weekday_code(*d)).collect();
                write!(
                    f,
                    "FREQ=WEEKLY;BYDAY={};BYHOUR={hour};BYMINUTE={minute}",
                    days.join(",")
                )
            }
        }
    }
}

/// Map a local wall-clock time to UTC.
///
/// Spring-forward gaps have no mapping and are skipped; fall-back overlaps
/// take the earliest instant.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    date.and_hms_opt(hour, minute, 0)
}

impl Recurrence {
    /// Smallest occurrence strictly after `from`, evaluated in `tz`.
    pub fn next_after(&self, tz: Tz, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = from.with_timezone(&tz).naive_local();
        let today = local.date();

        match self {
            Recurrence::Minutely { interval } => {
                let step = i64::from(*interval);
                let minutes = from.timestamp().div_euclid(60);
                let next = (minutes.div_euclid(step) + 1) * step;
                DateTime::from_timestamp(next * 60, 0)
            }

            Recurrence::Hourly { minute } => {
                let start = at(today, local.hour(), *minute)?;
                // Two days of hours covers any DST shift.
                (0..48)
                    .map(|h| start + Duration::hours(h))
                    .filter_map(|c| resolve_local(tz, c))
                    .find(|dt| *dt > from)
            }

            Recurrence::Daily { hour, minute } => (0..8)
                .filter_map(|d| at(today + Duration::days(d), *hour, *minute))
                .filter_map(|c| resolve_local(tz, c))
                .find(|dt| *dt > from),

            Recurrence::Weekly { days, hour, minute } => (0..15)
                .map(|d| today + Duration::days(d))
                .filter(|date| days.contains(&date.weekday()))
                .filter_map(|date| at(date, *hour, *minute))
                .filter_map(|c| resolve_local(tz, c))
                .find(|dt| *dt > from),
        }
    }
}

/// Compute the next UTC due instant for a stored rule and timezone, starting
/// *after* `from`.
///
/// Returns `None` when the rule is malformed or the timezone is unknown. The
/// schedule then simply has no next run; callers treat that as idle.
pub fn compute_next_run(rule: &str, timezone: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let recurrence = match rule.parse::<Recurrence>() {
        Ok(r) => r,
        Err(e) => {
            warn!(rule, "unusable recurrence rule; schedule will idle: {e}");
            return None;
        }
    };
    let tz = match timezone.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone, "unknown timezone; schedule will idle");
            return None;
        }
    };
    recurrence.next_after(tz, from)
}
