// src/gps/nmea.rs
//! NMEA sentence parsing

use super::fix::GpsFix;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

/// Parse a single NMEA sentence into `fix`.
///
/// Returns true when the sentence carried a position, i.e. a new sample
/// may be taken from the fix.
pub fn parse_nmea_sentence(fix: &mut GpsFix, line: &str) -> bool {
    let line = line.trim();
    if !checksum_ok(line) {
        return false;
    }

    let body = line.split('*').next().unwrap_or(line);
    let parts: Vec<&str> = body.split(',').collect();
    let talker_type = parts[0].get(3..).unwrap_or("");

    match talker_type {
        "GGA" => parse_gga(fix, &parts),
        "RMC" => parse_rmc(fix, &parts),
        _ => false,
    }
}

/// Verify the `*hh` checksum when present. Sentences without one pass.
fn checksum_ok(line: &str) -> bool {
    let Some(body) = line.strip_prefix('$') else {
        return false;
    };
    match body.split_once('*') {
        None => true,
        Some((payload, checksum)) => {
            let expected = payload.bytes().fold(0u8, |acc, b| acc ^ b);
            u8::from_str_radix(checksum.trim(), 16).map_or(false, |c| c == expected)
        }
    }
}

/// Convert `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed degrees.
fn parse_angle(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let angle = degrees + minutes / 60.0;
    match hemisphere {
        "S" | "W" => Some(-angle),
        "N" | "E" => Some(angle),
        _ => None,
    }
}

/// Parse GGA (Global Positioning System Fix Data) sentence
fn parse_gga(fix: &mut GpsFix, parts: &[&str]) -> bool {
    if parts.len() < 10 {
        return false;
    }

    // GGA carries only the time of day (field 1); the date comes from RMC
    fix.time = NaiveTime::parse_from_str(parts[1], "%H%M%S%.f")
        .ok()
        .and_then(|time| {
            let previous = fix.time?;
            let mut stamped = Utc.from_utc_datetime(&previous.date_naive().and_time(time));
            if previous - stamped > chrono::Duration::hours(12) {
                // Crossed midnight since the last dated sentence
                stamped += chrono::Duration::days(1);
            }
            Some(stamped)
        });

    // Fix quality (field 6)
    fix.fix_quality = parts[6].parse::<u8>().ok();

    // Number of satellites (field 7)
    if let Ok(sats) = parts[7].parse::<u8>() {
        fix.satellites = Some(sats);
    }

    // HDOP (field 8)
    if let Ok(hdop) = parts[8].parse::<f64>() {
        fix.hdop = Some(hdop);
    }

    // Latitude (fields 2, 3) and longitude (fields 4, 5)
    match (parse_angle(parts[2], parts[3]), parse_angle(parts[4], parts[5])) {
        (Some(lat), Some(lon)) => {
            fix.latitude = Some(lat);
            fix.longitude = Some(lon);
            fix.fix_quality != Some(0)
        }
        _ => false,
    }
}

/// Parse RMC (Recommended Minimum) sentence
fn parse_rmc(fix: &mut GpsFix, parts: &[&str]) -> bool {
    if parts.len() < 10 {
        return false;
    }

    // Status (field 2): A = valid, V = void
    let valid = parts[2] == "A";
    fix.status_valid = Some(valid);

    // Time (field 1) and date (field 9)
    let date = NaiveDate::parse_from_str(parts[9], "%d%m%y").ok();
    let time = NaiveTime::parse_from_str(parts[1], "%H%M%S%.f").ok();
    if let (Some(date), Some(time)) = (date, time) {
        fix.time = Some(Utc.from_utc_datetime(&date.and_time(time)));
    }

    match (parse_angle(parts[3], parts[4]), parse_angle(parts[5], parts[6])) {
        (Some(lat), Some(lon)) => {
            fix.latitude = Some(lat);
            fix.longitude = Some(lon);
            valid
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_gga_parsing() {
        let mut fix = GpsFix::new();
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

        assert!(parse_nmea_sentence(&mut fix, gga));

        assert!((fix.latitude.unwrap() - 48.1173).abs() < 1e-4);
        assert!((fix.longitude.unwrap() - 11.516667).abs() < 1e-4);
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.hdop, Some(0.9));
        assert_eq!(fix.fix_quality, Some(1));
        assert!(fix.has_fix());
    }

    #[test]
    fn test_rmc_parsing() {
        let mut fix = GpsFix::new();
        let rmc = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

        assert!(parse_nmea_sentence(&mut fix, rmc));

        assert_eq!(fix.status_valid, Some(true));
        let time = fix.time.unwrap();
        assert_eq!((time.year(), time.month(), time.day()), (1994, 3, 23));
        assert_eq!((time.hour(), time.minute(), time.second()), (12, 35, 19));
    }

    #[test]
    fn test_gga_time_uses_rmc_date() {
        let mut fix = GpsFix::new();
        let rmc = "$GPRMC,120000,A,4807.000,N,01131.000,E,000.0,000.0,010124,,*11";
        let gga = "$GPGGA,120100,4808.000,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*4C";

        assert!(parse_nmea_sentence(&mut fix, rmc));
        assert!(parse_nmea_sentence(&mut fix, gga));

        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap();
        assert_eq!(fix.time, Some(expected));
        let sample = fix.to_sample(Utc::now()).unwrap();
        assert_eq!(sample.timestamp, expected);
    }

    #[test]
    fn test_gga_time_crosses_midnight() {
        let mut fix = GpsFix::new();
        let rmc = "$GPRMC,235959,A,4807.000,N,01131.000,E,000.0,000.0,311224,,*12";
        let gga = "$GPGGA,000001,4807.001,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*41";

        assert!(parse_nmea_sentence(&mut fix, rmc));
        assert!(parse_nmea_sentence(&mut fix, gga));
        assert_eq!(
            fix.time,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap())
        );
    }

    #[test]
    fn test_gga_without_date_falls_back_to_clock() {
        let mut fix = GpsFix::new();
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

        assert!(parse_nmea_sentence(&mut fix, gga));
        assert!(fix.time.is_none());

        let fallback = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(fix.to_sample(fallback).unwrap().timestamp, fallback);
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let mut fix = GpsFix::new();
        let gga = "$GNGGA,001043.00,3352.1280,S,15112.5580,W,1,06,1.2,10.0,M,0.0,M,,";

        assert!(parse_nmea_sentence(&mut fix, gga));
        assert!(fix.latitude.unwrap() < 0.0);
        assert!(fix.longitude.unwrap() < 0.0);
    }

    #[test]
    fn test_no_fix_sentence() {
        let mut fix = GpsFix::new();
        let gga = "$GPGGA,123519,,,,,0,00,,,M,,M,,";

        assert!(!parse_nmea_sentence(&mut fix, gga));
        assert!(!fix.has_fix());
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut fix = GpsFix::new();
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00";

        assert!(!parse_nmea_sentence(&mut fix, gga));
        assert!(fix.latitude.is_none());
    }

    #[test]
    fn test_invalid_sentence() {
        let mut fix = GpsFix::new();

        assert!(!parse_nmea_sentence(&mut fix, "$INVALID,123,456"));
        assert!(!parse_nmea_sentence(&mut fix, "garbage"));
        assert!(!parse_nmea_sentence(&mut fix, ""));

        assert!(fix.latitude.is_none());
        assert!(fix.longitude.is_none());
    }
}
