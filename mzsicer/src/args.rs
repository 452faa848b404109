use std::fmt::Display;
use std::num::ParseFloatError;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mzpeaks::Tolerance;
use mzsic::options::EvictionPolicy;
use mzsic::reporter::ReporterIonMassMode;

pub(crate) fn non_negative_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}

#[derive(Debug, Error)]
pub enum ArgToleranceParseError {
    #[error("Failed to parse tolerance value {0}")]
    MalformedValue(#[from] ParseFloatError),
    #[error("Unknown tolerance unit `{0}`, expected `ppm` or `da`")]
    UnknownUnit(String),
    #[error("The tolerance must be positive, got {0}")]
    NotPositive(f64),
}

/// A mass tolerance written as a number followed by `ppm` or `da`, e.g. `10ppm` or
/// `0.02da`. A bare number is read as ppm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArgTolerance {
    pub value: f64,
    pub is_ppm: bool,
}

impl From<ArgTolerance> for Tolerance {
    fn from(value: ArgTolerance) -> Self {
        if value.is_ppm {
            Tolerance::PPM(value.value)
        } else {
            Tolerance::Da(value.value)
        }
    }
}

impl FromStr for ArgTolerance {
    type Err = ArgToleranceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let value: f64 = number.trim().parse()?;
        if value <= 0.0 {
            return Err(ArgToleranceParseError::NotPositive(value));
        }
        let is_ppm = match unit.to_ascii_lowercase().as_str() {
            "" | "ppm" => true,
            "da" | "th" => false,
            _ => return Err(ArgToleranceParseError::UnknownUnit(unit.to_string())),
        };
        Ok(Self { value, is_ppm })
    }
}

impl TryFrom<String> for ArgTolerance {
    type Error = ArgToleranceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArgTolerance> for String {
    fn from(value: ArgTolerance) -> Self {
        value.to_string()
    }
}

impl Display for ArgTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ppm {
            write!(f, "{}ppm", self.value)
        } else {
            write!(f, "{}da", self.value)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgEvictionPolicy {
    /// Overwrite the oldest spectrum in the pool
    Array,
    /// Evict the least recently used spectrum in the pool
    Lru,
}

impl From<ArgEvictionPolicy> for EvictionPolicy {
    fn from(value: ArgEvictionPolicy) -> Self {
        match value {
            ArgEvictionPolicy::Array => EvictionPolicy::Array,
            ArgEvictionPolicy::Lru => EvictionPolicy::LeastRecentlyUsed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgReporterIons {
    Tmt2,
    Tmt6,
    Tmt10,
    Itraq4,
    Itraq8,
}

impl From<ArgReporterIons> for ReporterIonMassMode {
    fn from(value: ArgReporterIons) -> Self {
        match value {
            ArgReporterIons::Tmt2 => ReporterIonMassMode::Tmt2,
            ArgReporterIons::Tmt6 => ReporterIonMassMode::Tmt6,
            ArgReporterIons::Tmt10 => ReporterIonMassMode::Tmt10,
            ArgReporterIons::Itraq4 => ReporterIonMassMode::Itraq4,
            ArgReporterIons::Itraq8 => ReporterIonMassMode::Itraq8,
        }
    }
}

impl Display for ArgReporterIons {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_tolerance() -> Result<(), ArgToleranceParseError> {
        let t: ArgTolerance = "10ppm".parse()?;
        assert_eq!(Tolerance::from(t), Tolerance::PPM(10.0));
        let t: ArgTolerance = "0.02 Da".parse()?;
        assert_eq!(Tolerance::from(t), Tolerance::Da(0.02));
        let t: ArgTolerance = "5".parse()?;
        assert!(t.is_ppm);
        assert_eq!(t.to_string(), "5ppm");

        assert!(matches!(
            "5 furlongs".parse::<ArgTolerance>(),
            Err(ArgToleranceParseError::UnknownUnit(_))
        ));
        assert!(matches!(
            "ppm".parse::<ArgTolerance>(),
            Err(ArgToleranceParseError::MalformedValue(_))
        ));
        let t: ArgTolerance = serde_json::from_str("\"20ppm\"").unwrap();
        assert_eq!(t.to_string(), "20ppm");

        assert!(matches!(
            "-1da".parse::<ArgTolerance>(),
            Err(ArgToleranceParseError::NotPositive(_))
        ));
        Ok(())
    }

    #[test]
    fn test_non_negative_float() {
        assert_eq!(non_negative_float("2.5"), Ok(2.5));
        assert!(non_negative_float("-2.5").is_err());
    }
}
