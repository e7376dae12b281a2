use std::fmt::{Display, Formatter};
use std::str::FromStr;

use jiff::tz::TimeZone;
use jiff::Timestamp;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::ValidationError;

const WALL_CLOCK: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DATE_ONLY: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Value of the sort attribute, normalized to UTC at whole-second precision.
///
/// Ordering is chronological, and the canonical string form
/// (`YYYY-MM-DDTHH:MM:SSZ`) sorts the same way lexicographically, which is
/// what the store relies on for `MAX(sort_key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortValue(OffsetDateTime);

impl SortValue {
    /// Parse RFC3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) or `YYYY-MM-DD`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let invalid = || ValidationError::InvalidTimestamp {
            value: input.to_owned(),
        };

        if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
            return Ok(Self::normalize(parsed));
        }
        if let Ok(parsed) = PrimitiveDateTime::parse(trimmed, WALL_CLOCK) {
            return Ok(Self::normalize(parsed.assume_utc()));
        }
        if let Ok(parsed) = Date::parse(trimmed, DATE_ONLY) {
            return Ok(Self::normalize(parsed.midnight().assume_utc()));
        }
        Err(invalid())
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Result<Self, ValidationError> {
        if !(1..=9998).contains(&value.year()) {
            return Err(ValidationError::InvalidTimestamp {
                value: value.to_string(),
            });
        }
        Ok(Self::normalize(value))
    }

    pub fn from_unix_timestamp(seconds: i64) -> Result<Self, ValidationError> {
        let value = OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| {
            ValidationError::InvalidTimestamp {
                value: seconds.to_string(),
            }
        })?;
        Self::from_offset_datetime(value)
    }

    fn normalize(value: OffsetDateTime) -> Self {
        let utc = value.to_offset(UtcOffset::UTC);
        Self(utc.replace_nanosecond(0).unwrap_or(utc))
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn unix_timestamp(self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Canonical storage form, e.g. `2024-05-01T13:07:00Z`.
    pub fn format_rfc3339(self) -> String {
        let (date, clock) = (self.0.date(), self.0.time());
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            date.year(),
            u8::from(date.month()),
            date.day(),
            clock.hour(),
            clock.minute(),
            clock.second()
        )
    }

    /// Wall-clock rendering (`YYYY-MM-DD HH:MM:SS`) in a fixed offset, as the
    /// listing filter expects.
    pub fn render_in(self, offset: UtcOffset) -> String {
        let local = self.0.to_offset(offset);
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            local.year(),
            u8::from(local.month()),
            local.day(),
            local.hour(),
            local.minute(),
            local.second()
        )
    }

    /// Wall-clock rendering in `zone`, using the offset in force at this
    /// instant so daylight time is honoured.
    pub fn render_in_zone(self, zone: &TimeZone) -> String {
        let offset = Timestamp::from_second(self.unix_timestamp())
            .ok()
            .map(|instant| zone.to_offset(instant).seconds())
            .and_then(|seconds| UtcOffset::from_whole_seconds(seconds).ok())
            .unwrap_or(UtcOffset::UTC);
        self.render_in(offset)
    }
}

impl Display for SortValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl FromStr for SortValue {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for SortValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for SortValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}
