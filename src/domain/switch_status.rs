use serde_json::{Map, Value};
use thiserror::Error;

/// Point-in-time reading of one relay channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStatus {
    pub output: Option<bool>,
    pub apower_w: f64,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
    pub energy_total_wh: Option<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("payload must be a JSON object")]
    InvalidPayloadType,
    #[error("missing switch component: {0}")]
    MissingComponent(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field {0} is not a finite non-negative number")]
    InvalidPower(&'static str),
}

const APOWER_KEYS: &[&str] = &["apower", "power"];
const VOLTAGE_KEYS: &[&str] = &["voltage"];
const CURRENT_KEYS: &[&str] = &["current"];

/// Accepts a `Switch.GetStatus` object, a full `Shelly.GetStatus` object keyed by
/// `switch:<id>`, or the legacy `{"switch": [..]}` array form.
pub fn parse_switch_status(payload: &Value, switch_id: u8) -> Result<SwitchStatus, ParseError> {
    let object = payload.as_object().ok_or(ParseError::InvalidPayloadType)?;
    let component = find_component(object, switch_id)?;

    let apower_w = find_number(component, APOWER_KEYS).ok_or(ParseError::MissingField("apower"))?;
    if !apower_w.is_finite() || apower_w < 0.0 {
        return Err(ParseError::InvalidPower("apower"));
    }

    let energy_total_wh = component
        .get("aenergy")
        .and_then(Value::as_object)
        .and_then(|energy| find_number(energy, &["total"]));

    Ok(SwitchStatus {
        output: component.get("output").and_then(Value::as_bool),
        apower_w,
        voltage_v: find_number(component, VOLTAGE_KEYS),
        current_a: find_number(component, CURRENT_KEYS),
        energy_total_wh,
    })
}

fn find_component(
    object: &Map<String, Value>,
    switch_id: u8,
) -> Result<&Map<String, Value>, ParseError> {
    if APOWER_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Ok(object);
    }

    let keyed = format!("switch:{switch_id}");
    if let Some(component) = object.get(&keyed) {
        return component
            .as_object()
            .ok_or(ParseError::MissingComponent(keyed));
    }

    object
        .get("switch")
        .and_then(Value::as_array)
        .and_then(|channels| channels.get(usize::from(switch_id)))
        .and_then(Value::as_object)
        .ok_or(ParseError::MissingComponent(keyed))
}

fn find_number(object: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .find_map(|alias| object.get(*alias))
        .and_then(parse_f64)
}

fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
}
