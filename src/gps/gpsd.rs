// src/gps/gpsd.rs
//! GPSD client implementation

use super::fix::GpsFix;
use crate::error::{Result, WalkError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| {
            WalkError::Connection(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e))
        })?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| WalkError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON data.
///
/// Returns true when the line was a TPV report carrying a position.
pub fn parse_gpsd_json(fix: &mut GpsFix, line: &str) -> Result<bool> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| WalkError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    let has_position = match msg.class.as_str() {
        "TPV" => parse_tpv_message(fix, &msg.data),
        "VERSION" => {
            if let Some(version) = msg.data.get("release").and_then(|v| v.as_str()) {
                info!("Connected to gpsd version: {}", version);
            }
            false
        }
        "DEVICES" => {
            let count = msg
                .data
                .get("devices")
                .and_then(|v| v.as_array())
                .map_or(0, |d| d.len());
            debug!("gpsd managing {} device(s)", count);
            false
        }
        _ => false,
    };

    Ok(has_position)
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(fix: &mut GpsFix, msg_data: &HashMap<String, serde_json::Value>) -> bool {
    if let Some(mode) = msg_data.get("mode").and_then(|v| v.as_u64()) {
        fix.mode = Some(mode as u8);
    }

    if let Some(time) = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        fix.time = Some(time.with_timezone(&Utc));
    }

    let lat = msg_data.get("lat").and_then(|v| v.as_f64());
    let lon = msg_data.get("lon").and_then(|v| v.as_f64());

    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            fix.latitude = Some(lat);
            fix.longitude = Some(lon);
            fix.has_fix()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_tpv_parsing() {
        let mut fix = GpsFix::new();
        let json = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"time":"2023-01-01T12:00:00.000Z","ept":0.005,"lat":48.117,"lon":11.517,"alt":545.4,"epx":15.319,"epy":17.054,"epv":124.484,"track":10.3797,"speed":0.091,"climb":10.7,"eps":34.11,"epc":248.97}"#;

        assert!(parse_gpsd_json(&mut fix, json).unwrap());

        assert_eq!(fix.latitude, Some(48.117));
        assert_eq!(fix.longitude, Some(11.517));
        assert_eq!(fix.mode, Some(3));
        assert_eq!(fix.time.unwrap().hour(), 12);
    }

    #[test]
    fn test_tpv_without_fix() {
        let mut fix = GpsFix::new();
        let json = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":1}"#;

        assert!(!parse_gpsd_json(&mut fix, json).unwrap());
        assert!(!fix.has_fix());
    }

    #[test]
    fn test_sky_is_not_a_position() {
        let mut fix = GpsFix::new();
        let json = r#"{"class":"SKY","device":"/dev/ttyUSB0","hdop":1.2,"satellites":[{"PRN":1,"ss":42,"used":true}]}"#;

        assert!(!parse_gpsd_json(&mut fix, json).unwrap());
        assert!(fix.latitude.is_none());
    }

    #[test]
    fn test_invalid_json() {
        let mut fix = GpsFix::new();
        let invalid_json = r#"{"invalid": json"#;

        let result = parse_gpsd_json(&mut fix, invalid_json);
        assert!(result.is_err());
    }
}
