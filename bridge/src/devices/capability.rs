//! Device capabilities and optimistic predictions

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::errors::BridgeError;

/// Attribute key -> value. Keys are `<capability>.<attribute>`.
pub type StateMap = BTreeMap<String, Value>;

/// Key of an attribute in a [`StateMap`]
pub fn state_key(capability: &str, attribute: &str) -> String {
    format!("{}.{}", capability, attribute)
}

/// Capabilities the bridge knows how to read and command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Switch,
    SwitchLevel,
    ColorControl,
    ColorTemperature,
    FanSpeed,
    Lock,
    DoorControl,
    GarageDoorControl,
    WindowShade,
    WindowShadeLevel,
    Thermostat,
    ThermostatMode,
    ThermostatHeatingSetpoint,
    ThermostatCoolingSetpoint,
    AudioVolume,
    AudioMute,
    MediaPlayback,
    Momentary,
    Button,
    ContactSensor,
    MotionSensor,
    PresenceSensor,
    TemperatureMeasurement,
    RelativeHumidityMeasurement,
    IlluminanceMeasurement,
    PowerMeter,
    EnergyMeter,
    Battery,
}

const ALL: [Capability; 28] = [
    Capability::Switch,
    Capability::SwitchLevel,
    Capability::ColorControl,
    Capability::ColorTemperature,
    Capability::FanSpeed,
    Capability::Lock,
    Capability::DoorControl,
    Capability::GarageDoorControl,
    Capability::WindowShade,
    Capability::WindowShadeLevel,
    Capability::Thermostat,
    Capability::ThermostatMode,
    Capability::ThermostatHeatingSetpoint,
    Capability::ThermostatCoolingSetpoint,
    Capability::AudioVolume,
    Capability::AudioMute,
    Capability::MediaPlayback,
    Capability::Momentary,
    Capability::Button,
    Capability::ContactSensor,
    Capability::MotionSensor,
    Capability::PresenceSensor,
    Capability::TemperatureMeasurement,
    Capability::RelativeHumidityMeasurement,
    Capability::IlluminanceMeasurement,
    Capability::PowerMeter,
    Capability::EnergyMeter,
    Capability::Battery,
];

impl Capability {
    /// Look up a capability by its cloud id
    pub fn from_id(id: &str) -> Option<Self> {
        ALL.iter().copied().find(|c| c.id() == id)
    }

    /// Like [`Capability::from_id`], rejecting unknown ids
    pub fn parse(id: &str) -> Result<Self, BridgeError> {
        Self::from_id(id).ok_or_else(|| BridgeError::UnsupportedCapability(id.to_string()))
    }

    pub fn id(&self) -> &'static str {
        match self {
            Capability::Switch => "switch",
            Capability::SwitchLevel => "switchLevel",
            Capability::ColorControl => "colorControl",
            Capability::ColorTemperature => "colorTemperature",
            Capability::FanSpeed => "fanSpeed",
            Capability::Lock => "lock",
            Capability::DoorControl => "doorControl",
            Capability::GarageDoorControl => "garageDoorControl",
            Capability::WindowShade => "windowShade",
            Capability::WindowShadeLevel => "windowShadeLevel",
            Capability::Thermostat => "thermostat",
            Capability::ThermostatMode => "thermostatMode",
            Capability::ThermostatHeatingSetpoint => "thermostatHeatingSetpoint",
            Capability::ThermostatCoolingSetpoint => "thermostatCoolingSetpoint",
            Capability::AudioVolume => "audioVolume",
            Capability::AudioMute => "audioMute",
            Capability::MediaPlayback => "mediaPlayback",
            Capability::Momentary => "momentary",
            Capability::Button => "button",
            Capability::ContactSensor => "contactSensor",
            Capability::MotionSensor => "motionSensor",
            Capability::PresenceSensor => "presenceSensor",
            Capability::TemperatureMeasurement => "temperatureMeasurement",
            Capability::RelativeHumidityMeasurement => "relativeHumidityMeasurement",
            Capability::IlluminanceMeasurement => "illuminanceMeasurement",
            Capability::PowerMeter => "powerMeter",
            Capability::EnergyMeter => "energyMeter",
            Capability::Battery => "battery",
        }
    }

    /// Attributes kept in the state cache
    pub fn attributes(&self) -> &'static [&'static str] {
        match self {
            Capability::Switch => &["switch"],
            Capability::SwitchLevel => &["level"],
            Capability::ColorControl => &["hue", "saturation"],
            Capability::ColorTemperature => &["colorTemperature"],
            Capability::FanSpeed => &["fanSpeed"],
            Capability::Lock => &["lock"],
            Capability::DoorControl | Capability::GarageDoorControl => &["door"],
            Capability::WindowShade => &["windowShade"],
            Capability::WindowShadeLevel => &["shadeLevel"],
            Capability::Thermostat => &[
                "thermostatMode",
                "heatingSetpoint",
                "coolingSetpoint",
                "thermostatOperatingState",
            ],
            Capability::ThermostatMode => &["thermostatMode"],
            Capability::ThermostatHeatingSetpoint => &["heatingSetpoint"],
            Capability::ThermostatCoolingSetpoint => &["coolingSetpoint"],
            Capability::AudioVolume => &["volume"],
            Capability::AudioMute => &["mute"],
            Capability::MediaPlayback => &["playbackStatus"],
            Capability::Momentary => &[],
            Capability::Button => &["button"],
            Capability::ContactSensor => &["contact"],
            Capability::MotionSensor => &["motion"],
            Capability::PresenceSensor => &["presence"],
            Capability::TemperatureMeasurement => &["temperature"],
            Capability::RelativeHumidityMeasurement => &["humidity"],
            Capability::IlluminanceMeasurement => &["illuminance"],
            Capability::PowerMeter => &["power"],
            Capability::EnergyMeter => &["energy"],
            Capability::Battery => &["battery"],
        }
    }

    /// Read-only capabilities accept no commands
    pub fn is_controllable(&self) -> bool {
        !matches!(
            self,
            Capability::Button
                | Capability::ContactSensor
                | Capability::MotionSensor
                | Capability::PresenceSensor
                | Capability::TemperatureMeasurement
                | Capability::RelativeHumidityMeasurement
                | Capability::IlluminanceMeasurement
                | Capability::PowerMeter
                | Capability::EnergyMeter
                | Capability::Battery
        )
    }

    /// Predicted attribute values after `command`.
    ///
    /// An empty map means the command has no prediction; it is still
    /// dispatched and verified. Malformed arguments are rejected.
    pub fn predict(&self, command: &str, args: &[Value]) -> Result<StateMap, BridgeError> {
        if !self.is_controllable() {
            return Err(BridgeError::UnsupportedCapability(format!(
                "{} is read-only",
                self.id()
            )));
        }

        let cap = self.id();
        let mut state = StateMap::new();
        let mut set = |attribute: &str, value: Value| {
            state.insert(state_key(cap, attribute), value);
        };

        match (self, command) {
            (Capability::Switch, "on") => set("switch", json!("on")),
            (Capability::Switch, "off") => set("switch", json!("off")),
            (Capability::SwitchLevel, "setLevel") => {
                set("level", json!(number_arg(command, args, 0, 0.0, 100.0)?))
            }
            (Capability::ColorTemperature, "setColorTemperature") => set(
                "colorTemperature",
                json!(number_arg(command, args, 0, 1000.0, 30000.0)?),
            ),
            (Capability::ColorControl, "setHue") => {
                set("hue", json!(number_arg(command, args, 0, 0.0, 100.0)?))
            }
            (Capability::ColorControl, "setSaturation") => {
                set("saturation", json!(number_arg(command, args, 0, 0.0, 100.0)?))
            }
            (Capability::ColorControl, "setColor") => {
                let color = args.first().and_then(Value::as_object).ok_or_else(|| {
                    BridgeError::InvalidCommand("setColor expects a color map".to_string())
                })?;
                for attribute in ["hue", "saturation"] {
                    if let Some(value) = color.get(attribute) {
                        set(attribute, value.clone());
                    }
                }
            }
            (Capability::FanSpeed, "setFanSpeed") => {
                set("fanSpeed", json!(number_arg(command, args, 0, 0.0, 5.0)?))
            }
            (Capability::Lock, "lock") => set("lock", json!("locked")),
            (Capability::Lock, "unlock") => set("lock", json!("unlocked")),
            (Capability::DoorControl | Capability::GarageDoorControl, "open") => {
                set("door", json!("opening"))
            }
            (Capability::DoorControl | Capability::GarageDoorControl, "close") => {
                set("door", json!("closing"))
            }
            (Capability::WindowShade, "open") => set("windowShade", json!("opening")),
            (Capability::WindowShade, "close") => set("windowShade", json!("closing")),
            (Capability::WindowShadeLevel, "setShadeLevel") => {
                set("shadeLevel", json!(number_arg(command, args, 0, 0.0, 100.0)?))
            }
            (Capability::Thermostat | Capability::ThermostatMode, "setThermostatMode") => {
                set("thermostatMode", json!(string_arg(command, args, 0)?))
            }
            (
                Capability::Thermostat | Capability::ThermostatMode,
                mode @ ("heat" | "cool" | "auto" | "off" | "emergencyHeat"),
            ) => set("thermostatMode", json!(mode)),
            (
                Capability::Thermostat | Capability::ThermostatHeatingSetpoint,
                "setHeatingSetpoint",
            ) => set(
                "heatingSetpoint",
                json!(number_arg(command, args, 0, -50.0, 150.0)?),
            ),
            (
                Capability::Thermostat | Capability::ThermostatCoolingSetpoint,
                "setCoolingSetpoint",
            ) => set(
                "coolingSetpoint",
                json!(number_arg(command, args, 0, -50.0, 150.0)?),
            ),
            (Capability::AudioVolume, "setVolume") => {
                set("volume", json!(number_arg(command, args, 0, 0.0, 100.0)?))
            }
            (Capability::AudioMute, "mute") => set("mute", json!("muted")),
            (Capability::AudioMute, "unmute") => set("mute", json!("unmuted")),
            (Capability::AudioMute, "setMute") => {
                set("mute", json!(string_arg(command, args, 0)?))
            }
            (Capability::MediaPlayback, "play") => set("playbackStatus", json!("playing")),
            (Capability::MediaPlayback, "pause") => set("playbackStatus", json!("paused")),
            (Capability::MediaPlayback, "stop") => set("playbackStatus", json!("stopped")),
            _ => {}
        }

        Ok(state)
    }
}

fn number_arg(command: &str, args: &[Value], index: usize, min: f64, max: f64) -> Result<Value, BridgeError> {
    let value = args.get(index).cloned().ok_or_else(|| {
        BridgeError::InvalidCommand(format!("{} expects argument {}", command, index))
    })?;
    let n = value.as_f64().ok_or_else(|| {
        BridgeError::InvalidCommand(format!("{} expects a number, got {}", command, value))
    })?;
    if !(min..=max).contains(&n) {
        return Err(BridgeError::InvalidCommand(format!(
            "{} argument {} outside {}..={}",
            command, n, min, max
        )));
    }
    Ok(value)
}

fn string_arg(command: &str, args: &[Value], index: usize) -> Result<String, BridgeError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::InvalidCommand(format!("{} expects a string argument", command)))
}
