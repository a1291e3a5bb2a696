// src/utils/timezone.rs

use chrono::{DateTime, Duration, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::AppError;

const WALL_CLOCK_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Converts between a learner's local wall-clock time and the stored UTC instant.
///
/// Unknown zone ids never fail a request: they resolve to the configured default zone.
#[derive(Debug, Clone, Copy)]
pub struct TimeZoneConverter {
    default_zone: Tz,
}

impl TimeZoneConverter {
    pub fn new(default_zone: Tz) -> Self {
        Self { default_zone }
    }

    /// Builds a converter from a configured zone id, using UTC if that id is itself invalid.
    pub fn from_zone_id(default_zone_id: &str) -> Self {
        let default_zone = default_zone_id.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!("Unknown default timezone '{}', using UTC", default_zone_id);
            Tz::UTC
        });
        Self { default_zone }
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    /// Resolves an IANA zone id, falling back to the default zone.
    pub fn resolve_zone(&self, zone_id: &str) -> Tz {
        match zone_id.trim().parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(
                    "Unknown timezone '{}', falling back to {}",
                    zone_id,
                    self.default_zone.name()
                );
                self.default_zone
            }
        }
    }

    /// Interprets `local` as wall-clock time in `zone_id` and returns the instant.
    ///
    /// The offset is the one in force on that date. An ambiguous local time (clocks
    /// turned back) takes the earlier instant; a skipped local time (clocks turned
    /// forward) is read with the offset in force just before the gap.
    pub fn to_canonical_instant(&self, local: NaiveDateTime, zone_id: &str) -> DateTime<Utc> {
        let tz = self.resolve_zone(zone_id);
        match tz.from_local_datetime(&local).earliest() {
            Some(dt) => dt.with_timezone(&Utc),
            None => {
                let before_gap = tz.offset_from_utc_datetime(&(local - Duration::hours(24))).fix();
                let utc = local - Duration::seconds(i64::from(before_gap.local_minus_utc()));
                Utc.from_utc_datetime(&utc)
            }
        }
    }

    /// Renders an instant as wall-clock time in `zone_id`.
    pub fn to_local_wall_clock(&self, instant: DateTime<Utc>, zone_id: &str) -> NaiveDateTime {
        instant.with_timezone(&self.resolve_zone(zone_id)).naive_local()
    }

    /// Name of the zone an id actually resolves to (after fallback).
    pub fn effective_zone_name(&self, zone_id: &str) -> &'static str {
        self.resolve_zone(zone_id).name()
    }
}

/// Parses a zone-less wall-clock string such as `2025-09-03T08:46`.
pub fn parse_wall_clock(input: &str) -> Result<NaiveDateTime, AppError> {
    let input = input.trim();
    WALL_CLOCK_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Invalid local time '{}', expected YYYY-MM-DDTHH:MM",
                input
            ))
        })
}

pub fn format_wall_clock(local: NaiveDateTime) -> String {
    if local.second() == 0 {
        local.format("%Y-%m-%dT%H:%M").to_string()
    } else {
        local.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}
