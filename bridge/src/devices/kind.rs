//! Device kind classification used by the discovery filters

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::settings::DeviceFilters;

/// Coarse device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Button,
    Climate,
    MediaPlayer,
    Cover,
    Light,
    Switch,
    Sensor,
}

const CLIMATE_CAPS: &[&str] = &[
    "thermostat",
    "thermostatCoolingSetpoint",
    "thermostatHeatingSetpoint",
    "airConditioner",
];
const MEDIA_CAPS: &[&str] = &["mediaPlayback", "audioVolume", "tvChannel", "mediaTrackControl"];
const COVER_CAPS: &[&str] = &["doorControl", "windowShade", "garageDoorControl"];
const LIGHT_CAPS: &[&str] = &["switchLevel", "colorControl", "colorTemperature"];
const NOT_LIGHT_CAPS: &[&str] = &[
    "lock",
    "doorControl",
    "windowShade",
    "garageDoorControl",
    "thermostat",
    "mediaPlayback",
    "audioVolume",
    "dryerOperatingState",
    "washerOperatingState",
    "ovenOperatingState",
];
const LIGHT_WORDS: &[&str] = &["light", "lamp", "bulb", "led", "fixture", "sconce", "chandelier"];
const SENSOR_CAPS: &[&str] = &[
    "contactSensor",
    "motionSensor",
    "presenceSensor",
    "temperatureMeasurement",
    "relativeHumidityMeasurement",
    "illuminanceMeasurement",
    "battery",
    "powerMeter",
    "energyMeter",
    "carbonMonoxideDetector",
    "smokeDetector",
    "waterSensor",
    "accelerationSensor",
    "threeAxis",
    "ultravioletIndex",
];
const NOT_SWITCH_CAPS: &[&str] = &[
    "switchLevel",
    "colorControl",
    "colorTemperature",
    "doorControl",
    "windowShade",
    "garageDoorControl",
    "thermostat",
    "thermostatCoolingSetpoint",
    "thermostatHeatingSetpoint",
    "mediaPlayback",
    "audioVolume",
    "button",
];

impl DeviceKind {
    /// Classify a device from its capability ids and display name.
    /// The first matching rule wins.
    pub fn classify(capabilities: &[&str], name: &str) -> Option<Self> {
        let has = |cap: &str| capabilities.iter().any(|c| *c == cap);
        let any = |caps: &[&str]| caps.iter().any(|c| has(c));

        if has("button") || has("momentary") {
            return Some(DeviceKind::Button);
        }
        if any(CLIMATE_CAPS) {
            return Some(DeviceKind::Climate);
        }
        if any(MEDIA_CAPS) {
            return Some(DeviceKind::MediaPlayer);
        }
        if any(COVER_CAPS) {
            return Some(DeviceKind::Cover);
        }
        // locks are controlled as switches
        if has("lock") && !has("switch") {
            return Some(DeviceKind::Switch);
        }
        if any(LIGHT_CAPS) && !any(NOT_LIGHT_CAPS) {
            return Some(DeviceKind::Light);
        }
        let name = name.to_lowercase();
        if has("switch") && LIGHT_WORDS.iter().any(|w| name.contains(w)) {
            return Some(DeviceKind::Light);
        }
        if any(SENSOR_CAPS) {
            return Some(DeviceKind::Sensor);
        }
        if has("switch") && !any(NOT_SWITCH_CAPS) {
            return Some(DeviceKind::Switch);
        }
        None
    }

    /// Whether the device-type filters keep this kind
    pub fn included_by(&self, filters: &DeviceFilters) -> bool {
        match self {
            DeviceKind::Button => filters.include_buttons,
            DeviceKind::Climate => filters.include_climate,
            DeviceKind::MediaPlayer => filters.include_media_players,
            DeviceKind::Cover => filters.include_covers,
            DeviceKind::Light => filters.include_lights,
            DeviceKind::Switch => filters.include_switches,
            DeviceKind::Sensor => filters.include_sensors,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Button => "button",
            DeviceKind::Climate => "climate",
            DeviceKind::MediaPlayer => "media_player",
            DeviceKind::Cover => "cover",
            DeviceKind::Light => "light",
            DeviceKind::Switch => "switch",
            DeviceKind::Sensor => "sensor",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
