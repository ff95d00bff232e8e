use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Weekday};
use serde::Deserialize;
use std::collections::BTreeMap;

const DAY_KEYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Local-time window, `"HH:MM"` on both ends. A window whose start is later
/// than its end runs across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Deserialize)]
struct RawPeriod {
    start: String,
    end: String,
}

impl TryFrom<RawPeriod> for Period {
    type Error = String;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| format!("invalid time {s:?}: {e}"))
        };
        Ok(Period {
            start: parse(&raw.start)?,
            end: parse(&raw.end)?,
        })
    }
}

impl Period {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start > self.end {
            time >= self.start || time <= self.end
        } else {
            self.start <= time && time <= self.end
        }
    }
}

/// Weekly closed hours keyed by lowercase day (`mon` .. `sun`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct AfterHoursSchedule {
    days: BTreeMap<String, Vec<Period>>,
}

impl AfterHoursSchedule {
    pub fn with_period(mut self, day: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        self.days
            .entry(day_key(day).to_string())
            .or_default()
            .push(Period { start, end });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(Vec::is_empty)
    }

    /// Only the current weekday's periods are consulted. An overnight window
    /// listed under a day covers that day's evening and its early morning.
    pub fn is_after_hours<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let time = now.time();
        self.days
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(day_key(now.weekday())))
            .flat_map(|(_, periods)| periods)
            .any(|period| period.contains(time))
    }
}

fn day_key(day: Weekday) -> &'static str {
    DAY_KEYS[day.num_days_from_monday() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Local> {
        // March 2026: the 2nd is a Monday
        Local.with_ymd_and_hms(2026, 3, day, h, m, 0).unwrap()
    }

    #[test]
    fn daytime_window() {
        let schedule = AfterHoursSchedule::default().with_period(Weekday::Mon, hm(12, 0), hm(13, 30));
        assert!(schedule.is_after_hours(&at(2, 12, 0)));
        assert!(schedule.is_after_hours(&at(2, 13, 30)));
        assert!(!schedule.is_after_hours(&at(2, 13, 31)));
        assert!(!schedule.is_after_hours(&at(3, 12, 30)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let schedule = AfterHoursSchedule::default().with_period(Weekday::Mon, hm(22, 0), hm(8, 0));
        assert!(schedule.is_after_hours(&at(2, 23, 15)));
        assert!(schedule.is_after_hours(&at(2, 3, 0)));
        assert!(!schedule.is_after_hours(&at(2, 12, 0)));
    }

    #[test]
    fn deserializes_from_day_map() {
        let schedule: AfterHoursSchedule = serde_json::from_str(
            r#"{ "sun": [{ "start": "00:00", "end": "23:59" }], "mon": [] }"#,
        )
        .unwrap();
        assert!(!schedule.is_empty());
        assert!(schedule.is_after_hours(&at(8, 9, 0)));
        assert!(!schedule.is_after_hours(&at(2, 9, 0)));

        let bad = serde_json::from_str::<AfterHoursSchedule>(r#"{ "mon": [{ "start": "25:00", "end": "01:00" }] }"#);
        assert!(bad.is_err());
    }

    #[test]
    fn empty_schedule_is_never_after_hours() {
        let schedule = AfterHoursSchedule::default();
        assert!(schedule.is_empty());
        assert!(!schedule.is_after_hours(&at(4, 2, 0)));
    }
}
