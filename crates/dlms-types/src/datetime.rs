// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of the FluxION DLMS/COSEM bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! COSEM `date-time` (12 octets)

use crate::error::{TypesError, TypesResult};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const YEAR_NOT_SPECIFIED: u16 = 0xFFFF;
const NOT_SPECIFIED: u8 = 0xFF;
const DEVIATION_NOT_SPECIFIED: i16 = i16::MIN;

/// Raw COSEM date-time with the "not specified" markers preserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlmsDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
    /// Minutes, `i16::MIN` when not specified
    pub deviation: i16,
    pub clock_status: u8,
}

impl DlmsDateTime {
    pub const LEN: usize = 12;

    pub fn from_bytes(bytes: &[u8]) -> TypesResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(TypesError::InvalidDateTimeLength(bytes.len()));
        }

        Ok(Self {
            year: u16::from_be_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day: bytes[3],
            weekday: bytes[4],
            hour: bytes[5],
            minute: bytes[6],
            second: bytes[7],
            hundredths: bytes[8],
            deviation: i16::from_be_bytes([bytes[9], bytes[10]]),
            clock_status: bytes[11],
        })
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let year = self.year.to_be_bytes();
        let deviation = self.deviation.to_be_bytes();
        [
            year[0],
            year[1],
            self.month,
            self.day,
            self.weekday,
            self.hour,
            self.minute,
            self.second,
            self.hundredths,
            deviation[0],
            deviation[1],
            self.clock_status,
        ]
    }

    /// Build a date-time from a UTC-offset aware chrono value
    pub fn from_datetime(value: &DateTime<FixedOffset>) -> Self {
        use chrono::{Datelike, Timelike};

        let offset_minutes = value.offset().local_minus_utc() / 60;
        Self {
            year: value.year() as u16,
            month: value.month() as u8,
            day: value.day() as u8,
            weekday: value.weekday().number_from_monday() as u8,
            hour: value.hour() as u8,
            minute: value.minute() as u8,
            second: value.second() as u8,
            hundredths: (value.nanosecond() / 10_000_000) as u8,
            deviation: -(offset_minutes as i16),
            clock_status: 0,
        }
    }

    pub fn has_deviation(&self) -> bool {
        self.deviation != DEVIATION_NOT_SPECIFIED
    }

    /// Local wall-clock time, `None` when the date or the time of day is wildcarded
    pub fn naive(&self) -> Option<NaiveDateTime> {
        if self.year == YEAR_NOT_SPECIFIED
            || !(1..=12).contains(&self.month)
            || !(1..=31).contains(&self.day)
            || self.hour == NOT_SPECIFIED
            || self.minute == NOT_SPECIFIED
        {
            return None;
        }

        let second = if self.second == NOT_SPECIFIED {
            0
        } else {
            self.second
        };
        let hundredths = if self.hundredths == NOT_SPECIFIED {
            0
        } else {
            self.hundredths
        };

        let date = NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?;
        let time = NaiveTime::from_hms_milli_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(second),
            u32::from(hundredths) * 10,
        )?;
        Some(date.and_time(time))
    }

    /// Resolve to an absolute timestamp
    ///
    /// The deviation is the number of minutes UTC is ahead of local time, so a
    /// meter on CET reports `-60`. Without a deviation the wall-clock time is
    /// interpreted in `fallback_tz` (UTC when absent).
    pub fn to_datetime(&self, fallback_tz: Option<Tz>) -> Option<DateTime<FixedOffset>> {
        let naive = self.naive()?;

        if self.has_deviation() {
            let offset = FixedOffset::east_opt(-i32::from(self.deviation) * 60)?;
            return offset.from_local_datetime(&naive).single();
        }

        match fallback_tz {
            Some(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
            None => Some(Utc.from_utc_datetime(&naive).fixed_offset()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cet_sample() -> [u8; 12] {
        // 2024-03-15 (Friday) 13:45:30.50, deviation -60, status 0
        [0x07, 0xE8, 3, 15, 5, 13, 45, 30, 50, 0xFF, 0xC4, 0x00]
    }

    #[test]
    fn test_parse_fields() {
        let dt = DlmsDateTime::from_bytes(&cet_sample()).unwrap();
        assert_eq!(dt.year, 2024);
        assert_eq!(dt.month, 3);
        assert_eq!(dt.day, 15);
        assert_eq!(dt.hour, 13);
        assert_eq!(dt.deviation, -60);
        assert!(dt.has_deviation());
        assert_eq!(dt.to_bytes(), cet_sample());
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(
            DlmsDateTime::from_bytes(&[0; 5]),
            Err(TypesError::InvalidDateTimeLength(5))
        );
    }

    #[test]
    fn test_deviation_applied() {
        let dt = DlmsDateTime::from_bytes(&cet_sample()).unwrap();
        let resolved = dt.to_datetime(None).unwrap();
        assert_eq!(resolved.offset().local_minus_utc(), 3600);
        assert_eq!(
            resolved.with_timezone(&Utc).to_rfc3339(),
            "2024-03-15T12:45:30.500+00:00"
        );
    }

    #[test]
    fn test_unspecified_deviation_uses_fallback_zone() {
        let mut bytes = cet_sample();
        bytes[9] = 0x80;
        bytes[10] = 0x00;
        let dt = DlmsDateTime::from_bytes(&bytes).unwrap();
        assert!(!dt.has_deviation());

        let utc = dt.to_datetime(None).unwrap();
        assert_eq!(utc.offset().local_minus_utc(), 0);

        let prague = dt.to_datetime(Some(chrono_tz::Europe::Prague)).unwrap();
        assert_eq!(prague.offset().local_minus_utc(), 3600);
        assert_eq!(
            prague.with_timezone(&Utc).to_rfc3339(),
            "2024-03-15T12:45:30.500+00:00"
        );
    }

    #[test]
    fn test_wildcards() {
        let mut bytes = cet_sample();
        bytes[7] = 0xFF;
        bytes[8] = 0xFF;
        let dt = DlmsDateTime::from_bytes(&bytes).unwrap();
        let naive = dt.naive().unwrap();
        assert_eq!(naive.to_string(), "2024-03-15 13:45:00");

        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        let no_year = DlmsDateTime::from_bytes(&bytes).unwrap();
        assert!(no_year.to_datetime(None).is_none());
    }

    #[test]
    fn test_from_datetime() {
        let value = DateTime::parse_from_rfc3339("2024-03-15T13:45:30.5+01:00").unwrap();
        let dt = DlmsDateTime::from_datetime(&value);
        assert_eq!(dt.to_bytes(), cet_sample());
    }
}
