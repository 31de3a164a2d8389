use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, Timelike};
use std::time::SystemTime;

use crate::errors::{DosError, DosResult};

// Guest-settable wall clock. INT 21h 2Bh/2Dh move the guest's idea of the
// date and time without touching the host, so date and time keep separate
// offsets against host now.

pub struct VirtualClock {
    date_offset: Duration,
    time_offset: Duration,
}

impl VirtualClock {
    pub fn new() -> Self {
        VirtualClock { date_offset: Duration::zero(), time_offset: Duration::zero() }
    }

    pub fn date(&self) -> NaiveDate {
        (Local::now() + self.date_offset).date_naive()
    }

    pub fn time(&self) -> NaiveTime {
        (Local::now() + self.time_offset).time()
    }

    /// Hundredths of a second within the current virtual second.
    pub fn centiseconds(&self) -> u8 {
        ((Local::now() + self.time_offset).nanosecond() / 10_000_000) as u8
    }

    /// Day of week, 0 = Sunday.
    pub fn weekday(&self) -> u8 {
        self.date().weekday().num_days_from_sunday() as u8
    }

    pub fn set_date(&mut self, year: u16, month: u8, day: u8) -> DosResult<()> {
        if !(1980..=2107).contains(&year) {
            return Err(DosError::DataInvalid);
        }
        let target = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .ok_or(DosError::DataInvalid)?;
        self.date_offset = target.signed_duration_since(Local::now().date_naive());
        Ok(())
    }

    pub fn set_time(&mut self, hour: u8, minute: u8, second: u8, centis: u8) -> DosResult<()> {
        let target = NaiveTime::from_hms_milli_opt(
            hour as u32,
            minute as u32,
            second as u32,
            centis as u32 * 10,
        )
        .ok_or(DosError::DataInvalid)?;
        self.time_offset = target.signed_duration_since(Local::now().time());
        Ok(())
    }
}

/// Packs a date the way FAT and the find-first DTA record expect it.
pub fn encode_dos_date(date: NaiveDate) -> u16 {
    let day = date.day() as u16 & 0x1F;
    let month = date.month() as u16 & 0x0F;
    let year = (date.year() as u16).wrapping_sub(1980) & 0x7F;
    day | (month << 5) | (year << 9)
}

pub fn decode_dos_date(raw: u16) -> Option<NaiveDate> {
    let day = (raw & 0x1F) as u32;
    let month = ((raw >> 5) & 0x0F) as u32;
    let year = ((raw >> 9) & 0x7F) as i32 + 1980;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Packs a time of day; two-second granularity.
pub fn encode_dos_time(time: NaiveTime) -> u16 {
    let seconds = (time.second() as u16 / 2) & 0x1F;
    let minutes = time.minute() as u16 & 0x3F;
    let hours = time.hour() as u16 & 0x1F;
    seconds | (minutes << 5) | (hours << 11)
}

pub fn decode_dos_time(raw: u16) -> Option<NaiveTime> {
    let seconds = ((raw & 0x1F) * 2) as u32;
    let minutes = ((raw >> 5) & 0x3F) as u32;
    let hours = ((raw >> 11) & 0x1F) as u32;
    NaiveTime::from_hms_opt(hours, minutes, seconds)
}

/// DOS (date, time) stamp of a host file modification time.
pub fn dos_stamp(mtime: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = mtime.into();
    (encode_dos_date(local.date_naive()), encode_dos_time(local.time()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_encoding_is_bit_exact() {
        let d = NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
        assert_eq!(encode_dos_date(d), 0x0021);
        let d = NaiveDate::from_ymd_opt(2000, 12, 31).unwrap();
        assert_eq!(encode_dos_date(d), (20 << 9) | (12 << 5) | 31);
    }

    #[test]
    fn time_encoding_truncates_to_two_seconds() {
        let t = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        let raw = encode_dos_time(t);
        assert_eq!(raw, (23 << 11) | (59 << 5) | 29);
        assert_eq!(decode_dos_time(raw).unwrap(), NaiveTime::from_hms_opt(23, 59, 58).unwrap());
    }

    #[test]
    fn dates_round_trip_across_the_whole_range() {
        let mut d = NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2107, 12, 31).unwrap();
        while d <= end {
            assert_eq!(decode_dos_date(encode_dos_date(d)), Some(d));
            d = d + Duration::days(1);
        }
    }

    #[test]
    fn set_date_rejects_out_of_range() {
        let mut clock = VirtualClock::new();
        assert_eq!(clock.set_date(1979, 12, 31), Err(DosError::DataInvalid));
        assert_eq!(clock.set_date(1990, 2, 30), Err(DosError::DataInvalid));
        assert!(clock.set_date(1995, 6, 15).is_ok());
        assert_eq!(clock.date(), NaiveDate::from_ymd_opt(1995, 6, 15).unwrap());
    }
}
