use crate::errors::ReplayError;
use chrono::format::{Fixed, Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fmt::Write;
use std::time::SystemTime;

pub fn validate_pattern(pattern: &str) -> Result<(), ReplayError> {
    let probe = NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    format_timestamp(&probe, pattern).map(|_| ())
}

/// Timezone items render as nothing: timestamps here are local wall-clock
/// times with no offset attached.
pub fn format_timestamp(timestamp: &NaiveDateTime, pattern: &str) -> Result<String, ReplayError> {
    let mut items = Vec::new();
    for item in StrftimeItems::new(pattern) {
        match item {
            Item::Error => return Err(invalid_pattern(pattern)),
            Item::Fixed(
                Fixed::TimezoneName
                | Fixed::TimezoneOffset
                | Fixed::TimezoneOffsetColon
                | Fixed::TimezoneOffsetColonZ
                | Fixed::TimezoneOffsetZ,
            ) => {}
            other => items.push(other),
        }
    }
    let mut rendered = String::new();
    write!(rendered, "{}", timestamp.format_with_items(items.iter()))
        .map_err(|_| invalid_pattern(pattern))?;
    Ok(rendered)
}

fn invalid_pattern(pattern: &str) -> ReplayError {
    ReplayError::Format(format!("invalid strftime pattern: {pattern:?}"))
}

pub fn local_naive(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

pub fn unix_seconds(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

pub fn from_unix_seconds(secs: i64) -> Option<SystemTime> {
    Utc.timestamp_opt(secs, 0).single().map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::{format_timestamp, from_unix_seconds, unix_seconds, validate_pattern};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("valid date")
    }

    #[test]
    fn default_filename_pattern_renders() {
        let name = format_timestamp(&at(7, 5, 3), "Replay_%Y-%m-%d_%H-%M-%S").expect("format");
        assert_eq!(name, "Replay_2024-03-09_07-05-03");
    }

    #[test]
    fn weekday_scheme_renders_nested_segments() {
        let path = format_timestamp(&at(0, 0, 0), "%Y/%B/%a_%d/").expect("format");
        assert_eq!(path, "2024/March/Sat_09/");
    }

    #[test]
    fn literal_pattern_is_unchanged() {
        assert_eq!(format_timestamp(&at(1, 2, 3), "clip").expect("format"), "clip");
    }

    #[test]
    fn dangling_percent_is_rejected() {
        assert!(validate_pattern("Replay_%").is_err());
        assert!(validate_pattern("Replay_%!").is_err());
    }

    #[test]
    fn timezone_items_render_empty_on_local_times() {
        validate_pattern("Replay_%Y%z").expect("valid");
        assert_eq!(
            format_timestamp(&at(7, 5, 3), "Replay_%Y%z").expect("format"),
            "Replay_2024"
        );
        assert_eq!(
            format_timestamp(&at(7, 5, 3), "%H%:z-%M%Z").expect("format"),
            "07-05"
        );
    }

    #[test]
    fn unix_seconds_round_trip_at_second_precision() {
        let secs = 1_700_000_000;
        let time = from_unix_seconds(secs).expect("in range");
        assert_eq!(unix_seconds(time), secs);
    }
}
