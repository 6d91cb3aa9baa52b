//! Device metadata frame (JSON text).
//!
//! Sent to a client when it binds, and returned by the settings endpoint.
//!
//! ```text
//! {"name":"vRadar 1a2b","mac":"..","base":24125000000,"xFov":80,"yFov":34,
//!  "enable":1,"audible":0,"sampling":{..},"chirp":{..}}
//! ```

use alloc::format;
use alloc::string::String;

use serde::Serialize;

use crate::config::{ChirpSettings, SamplingSettings, Settings, BASE_FREQUENCY_HZ, X_FOV_DEG, Y_FOV_DEG};

/// Short device name derived from MAC bytes 1 and 4.
pub fn device_name(mac: &[u8; 6]) -> String {
    format!("vRadar {:02x}{:02x}", mac[1], mac[4])
}

/// Colon-separated lowercase hex MAC.
pub fn mac_string(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub name: String,
    pub mac: String,
    pub base: i64,
    #[serde(rename = "xFov")]
    pub x_fov: u32,
    #[serde(rename = "yFov")]
    pub y_fov: u32,
    pub enable: u8,
    pub audible: u8,
    pub sampling: SamplingSettings,
    pub chirp: ChirpSettings,
}

impl Metadata {
    pub fn new(mac: &[u8; 6], settings: &Settings) -> Self {
        Self {
            name: device_name(mac),
            mac: mac_string(mac),
            base: BASE_FREQUENCY_HZ,
            x_fov: X_FOV_DEG,
            y_fov: Y_FOV_DEG,
            enable: settings.enabled as u8,
            audible: settings.audible as u8,
            sampling: settings.sampling,
            chirp: settings.chirp,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x24, 0x1a, 0x00, 0x7f, 0x2b, 0xff];

    #[test]
    fn test_device_name_uses_bytes_1_and_4() {
        assert_eq!(device_name(&MAC), "vRadar 1a2b");
    }

    #[test]
    fn test_mac_string() {
        assert_eq!(mac_string(&MAC), "24:1a:00:7f:2b:ff");
    }

    #[test]
    fn test_json_keys() {
        let mut settings = Settings::default();
        settings.audible = true;
        let json = Metadata::new(&MAC, &settings).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["name"], "vRadar 1a2b");
        assert_eq!(value["base"], BASE_FREQUENCY_HZ);
        assert_eq!(value["xFov"], 80);
        assert_eq!(value["yFov"], 34);
        assert_eq!(value["enable"], 1);
        assert_eq!(value["audible"], 1);
        assert_eq!(value["sampling"]["frequency"], 40_000);
        assert_eq!(value["sampling"]["attenuation"], 3);
        assert_eq!(value["chirp"]["prf"], 2000);
        assert_eq!(value["chirp"]["duration"], 1000);
    }
}
