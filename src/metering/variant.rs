//! Meter variant descriptors.
//!
//! One firmware image serves every utility; the variant is picked from
//! config at startup and only changes the identity the node advertises.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterVariant {
    Electric,
    Gas,
    Water,
}

/// Identity attributes published for a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantDescriptor {
    /// Metering UnitofMeasure (0 = kWh, 1 = m³).
    pub unit_of_measure: u8,
    /// MeteringDeviceType (0 = electric, 1 = gas, 2 = water).
    pub device_type: u8,
    pub model_id: &'static str,
}

const DESCRIPTORS: [(MeterVariant, VariantDescriptor); 3] = [
    (
        MeterVariant::Electric,
        VariantDescriptor {
            unit_of_measure: 0,
            device_type: 0,
            model_id: "ESP32-PulseMeter-Electric",
        },
    ),
    (
        MeterVariant::Gas,
        VariantDescriptor {
            unit_of_measure: 1,
            device_type: 1,
            model_id: "ESP32-PulseMeter-Gas",
        },
    ),
    (
        MeterVariant::Water,
        VariantDescriptor {
            unit_of_measure: 1,
            device_type: 2,
            model_id: "ESP32-PulseMeter-Water",
        },
    ),
];

impl MeterVariant {
    pub fn descriptor(self) -> &'static VariantDescriptor {
        DESCRIPTORS
            .iter()
            .find_map(|(v, d)| (*v == self).then_some(d))
            .unwrap_or(&DESCRIPTORS[0].1)
    }
}

pub const MANUFACTURER_NAME: &str = "Custom";
