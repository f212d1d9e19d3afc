use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::DomainError;

/// Format shared by slot keys and persisted end times.
pub const SLOT_KEY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Every reservation lasts exactly this long.
pub fn slot_duration() -> Duration {
    Duration::hours(1)
}

/// Start of a reserved slot, rendered as `YYYY-MM-DD HH:MM`.
///
/// All components are zero-padded, so ordering keys as strings and ordering
/// them as date-times agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(NaiveDateTime);

impl SlotKey {
    pub fn new(start: NaiveDateTime) -> Self {
        Self(start)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.0
    }

    pub fn end(&self) -> NaiveDateTime {
        self.0 + slot_duration()
    }

    /// `DD/HH:MM`, the shape users type.
    pub fn short_label(&self) -> String {
        self.0.format("%d/%H:%M").to_string()
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(SLOT_KEY_FORMAT))
    }
}

impl FromStr for SlotKey {
    type Err = chrono::ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(value.trim(), SLOT_KEY_FORMAT).map(Self)
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn format_slot_time(value: NaiveDateTime) -> String {
    value.format(SLOT_KEY_FORMAT).to_string()
}

pub fn parse_slot_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), SLOT_KEY_FORMAT).ok()
}

/// A `DD/HH:MM` request as typed by a user.
///
/// The raw day and time are kept verbatim so replies can echo exactly what
/// was asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotRequest {
    pub day: String,
    pub time: String,
    day_of_month: u32,
    hour: u32,
    minute: u32,
}

impl SlotRequest {
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let trimmed = input.trim();
        let invalid = || DomainError::InvalidFormat { input: trimmed.to_owned() };

        let (day, time) = trimmed.split_once('/').ok_or_else(invalid)?;
        let (hour, minute) = time.split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            day: day.to_owned(),
            time: time.to_owned(),
            day_of_month: parse_component(day).ok_or_else(invalid)?,
            hour: parse_component(hour).ok_or_else(invalid)?,
            minute: parse_component(minute).ok_or_else(invalid)?,
        })
    }

    /// Places the request in the month and year of `now`.
    pub fn resolve(&self, now: NaiveDateTime) -> Result<NaiveDateTime, DomainError> {
        NaiveDate::from_ymd_opt(now.year(), now.month(), self.day_of_month)
            .and_then(|date| date.and_hms_opt(self.hour, self.minute, 0))
            .ok_or_else(|| DomainError::InvalidFormat { input: format!("{}/{}", self.day, self.time) })
    }
}

fn parse_component(raw: &str) -> Option<u32> {
    let bytes = raw.as_bytes();
    if bytes.is_empty() || bytes.len() > 2 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{SlotKey, SlotRequest};
    use crate::errors::DomainError;

    fn at(day: u32, hour: u32, minute: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid fixture date")
    }

    #[test]
    fn resolves_request_into_current_month() {
        let request = SlotRequest::parse("12/15:00").expect("parse");
        let start = request.resolve(at(10, 9, 30)).expect("resolve");
        let key = SlotKey::new(start);

        assert_eq!(key.to_string(), "2025-03-12 15:00");
        assert_eq!(super::format_slot_time(key.end()), "2025-03-12 16:00");
        assert_eq!(request.day, "12");
        assert_eq!(request.time, "15:00");
    }

    #[test]
    fn unpadded_and_padded_inputs_share_a_key() {
        let now = at(1, 0, 0);
        let padded = SlotRequest::parse("05/09:00").and_then(|r| r.resolve(now)).expect("padded");
        let bare = SlotRequest::parse("5/9:00").and_then(|r| r.resolve(now)).expect("bare");

        assert_eq!(SlotKey::new(padded), SlotKey::new(bare));
        assert_eq!(SlotKey::new(bare).to_string(), "2025-03-05 09:00");
    }

    #[test]
    fn rejects_malformed_inputs() {
        for input in ["", "12", "12-15:00", "12/1500", "aa/15:00", "12/15:xx", "12/15:00/1", "123/1:00"]
        {
            assert!(
                matches!(SlotRequest::parse(input), Err(DomainError::InvalidFormat { .. })),
                "`{input}` should be rejected"
            );
        }
    }

    #[test]
    fn rejects_dates_that_do_not_exist_in_the_month() {
        let now = at(1, 0, 0);
        for input in ["32/10:00", "0/10:00", "10/24:00", "10/10:60"] {
            let result = SlotRequest::parse(input).and_then(|request| request.resolve(now));
            assert!(
                matches!(result, Err(DomainError::InvalidFormat { .. })),
                "`{input}` should not resolve"
            );
        }
    }

    #[test]
    fn keys_sort_chronologically_as_strings() {
        let mut keys = vec![SlotKey::new(at(12, 9, 0)), SlotKey::new(at(3, 18, 0))];
        keys.sort();
        let rendered = keys.iter().map(ToString::to_string).collect::<Vec<_>>();
        let mut lexical = rendered.clone();
        lexical.sort();

        assert_eq!(rendered, lexical);
        assert_eq!(rendered[0], "2025-03-03 18:00");
    }

    #[test]
    fn short_label_matches_user_input_shape() {
        assert_eq!(SlotKey::new(at(5, 9, 0)).short_label(), "05/09:00");
    }
}
