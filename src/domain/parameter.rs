// Hydrological parameter domain model
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One tracked hydrological quantity. Parameters are processed identically but never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    Inflow,
    Outflow,
    Level,
    Load,
}

/// Fixed y-axis range for parameters that should not be auto-scaled
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayRange {
    pub min: f64,
    pub max: f64,
}

impl Parameter {
    pub const ALL: [Parameter; 4] = [
        Parameter::Inflow,
        Parameter::Outflow,
        Parameter::Level,
        Parameter::Load,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
            Self::Level => "level",
            Self::Load => "load",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inflow => "Inflow",
            Self::Outflow => "Outflow",
            Self::Level => "Reservoir Level",
            Self::Load => "Generated Load",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Inflow | Self::Outflow => "m³/s",
            Self::Level => "m",
            Self::Load => "MW",
        }
    }

    /// Only the reservoir level has a tight fixed range; everything else is auto-scaled.
    pub fn display_range(&self) -> Option<DisplayRange> {
        match self {
            Self::Level => Some(DisplayRange {
                min: 75.0,
                max: 85.0,
            }),
            _ => None,
        }
    }

    /// The inflow meter can report negative flow for a quantity that is physically never negative.
    pub fn coerces_magnitude(&self) -> bool {
        matches!(self, Self::Inflow)
    }

    /// Apply the per-parameter value policy to a raw reading
    pub fn normalize_value(&self, value: f64) -> f64 {
        if self.coerces_magnitude() {
            value.abs()
        } else {
            value
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown parameter: {0}")]
pub struct UnknownParameter(pub String);

impl FromStr for Parameter {
    type Err = UnknownParameter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inflow" => Ok(Self::Inflow),
            "outflow" => Ok(Self::Outflow),
            "level" => Ok(Self::Level),
            "load" => Ok(Self::Load),
            other => Err(UnknownParameter(other.to_string())),
        }
    }
}
