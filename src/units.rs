// src/units.rs - Physical variables and engineering unit conversion
//
// Every unit is a linear map onto the base unit of its variable:
//     base = value * factor + offset
// which covers the offset temperature scales as well as plain ratios.

use crate::error::{PlcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical dimension of a tag. Determines which units are legal for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variable {
    Pressure,
    Temperature,
    Length,
    Mass,
    Time,
    Density,
    MassFlow,
    VolumetricFlow,
    Volume,
    Percentage,
    Adimentional,
}

#[derive(Debug, Clone, Copy)]
struct UnitDef {
    symbol: &'static str,
    factor: f64,
    offset: f64,
}

const fn unit(symbol: &'static str, factor: f64) -> UnitDef {
    UnitDef {
        symbol,
        factor,
        offset: 0.0,
    }
}

const PRESSURE: &[UnitDef] = &[
    unit("Pa", 1.0),
    unit("kPa", 1.0e3),
    unit("MPa", 1.0e6),
    unit("bar", 1.0e5),
    unit("mbar", 100.0),
    unit("psi", 6_894.757_293_168),
    unit("atm", 101_325.0),
    unit("mmHg", 133.322_387_415),
    unit("inH2O", 249.088_91),
];

const TEMPERATURE: &[UnitDef] = &[
    unit("K", 1.0),
    UnitDef {
        symbol: "degC",
        factor: 1.0,
        offset: 273.15,
    },
    UnitDef {
        symbol: "degF",
        factor: 5.0 / 9.0,
        offset: 459.67 * 5.0 / 9.0,
    },
    unit("degR", 5.0 / 9.0),
];

const LENGTH: &[UnitDef] = &[
    unit("m", 1.0),
    unit("mm", 1.0e-3),
    unit("cm", 1.0e-2),
    unit("km", 1.0e3),
    unit("in", 0.0254),
    unit("ft", 0.3048),
    unit("yd", 0.9144),
    unit("mi", 1_609.344),
];

const MASS: &[UnitDef] = &[
    unit("kg", 1.0),
    unit("g", 1.0e-3),
    unit("mg", 1.0e-6),
    unit("t", 1.0e3),
    unit("lb", 0.453_592_37),
    unit("oz", 0.028_349_523_125),
];

const TIME: &[UnitDef] = &[
    unit("s", 1.0),
    unit("ms", 1.0e-3),
    unit("min", 60.0),
    unit("h", 3_600.0),
    unit("d", 86_400.0),
];

const DENSITY: &[UnitDef] = &[
    unit("kg/m^3", 1.0),
    unit("g/cm^3", 1.0e3),
    unit("kg/L", 1.0e3),
    unit("lb/ft^3", 16.018_463_37),
];

const MASS_FLOW: &[UnitDef] = &[
    unit("kg/s", 1.0),
    unit("kg/min", 1.0 / 60.0),
    unit("kg/h", 1.0 / 3_600.0),
    unit("t/h", 1.0e3 / 3_600.0),
    unit("lb/s", 0.453_592_37),
    unit("lb/h", 0.453_592_37 / 3_600.0),
];

const VOLUMETRIC_FLOW: &[UnitDef] = &[
    unit("m^3/s", 1.0),
    unit("m^3/h", 1.0 / 3_600.0),
    unit("L/s", 1.0e-3),
    unit("L/min", 1.0e-3 / 60.0),
    unit("gal/min", 0.003_785_411_784 / 60.0),
    unit("bbl/d", 0.158_987_294_928 / 86_400.0),
];

const VOLUME: &[UnitDef] = &[
    unit("m^3", 1.0),
    unit("L", 1.0e-3),
    unit("gal", 0.003_785_411_784),
    unit("bbl", 0.158_987_294_928),
    unit("ft^3", 0.028_316_846_592),
];

const PERCENTAGE: &[UnitDef] = &[unit("%", 1.0), unit("fraction", 100.0)];

const ADIMENTIONAL: &[UnitDef] = &[unit("adim", 1.0)];

impl Variable {
    pub const ALL: [Variable; 11] = [
        Variable::Pressure,
        Variable::Temperature,
        Variable::Length,
        Variable::Mass,
        Variable::Time,
        Variable::Density,
        Variable::MassFlow,
        Variable::VolumetricFlow,
        Variable::Volume,
        Variable::Percentage,
        Variable::Adimentional,
    ];

    fn table(&self) -> &'static [UnitDef] {
        match self {
            Variable::Pressure => PRESSURE,
            Variable::Temperature => TEMPERATURE,
            Variable::Length => LENGTH,
            Variable::Mass => MASS,
            Variable::Time => TIME,
            Variable::Density => DENSITY,
            Variable::MassFlow => MASS_FLOW,
            Variable::VolumetricFlow => VOLUMETRIC_FLOW,
            Variable::Volume => VOLUME,
            Variable::Percentage => PERCENTAGE,
            Variable::Adimentional => ADIMENTIONAL,
        }
    }

    /// Unit every other unit of this variable converts through
    pub fn base_unit(&self) -> &'static str {
        self.table()[0].symbol
    }

    /// Legal unit symbols for this variable
    pub fn units(&self) -> Vec<&'static str> {
        self.table().iter().map(|u| u.symbol).collect()
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.lookup(unit).is_some()
    }

    fn lookup(&self, unit: &str) -> Option<&'static UnitDef> {
        self.table().iter().find(|u| u.symbol == unit)
    }

    fn require(&self, unit: &str) -> Result<&'static UnitDef> {
        self.lookup(unit).ok_or_else(|| PlcError::InvalidUnit {
            unit: unit.to_string(),
            variable: self.to_string(),
        })
    }

    /// Check that `unit` belongs to this variable.
    pub fn validate_unit(&self, unit: &str) -> Result<()> {
        self.require(unit).map(|_| ())
    }

    /// Convert `value` expressed in `from` into `to`.
    ///
    /// ```rust
    /// use plc_runtime::units::Variable;
    ///
    /// let kpa = Variable::Pressure.convert(150_000.0, "Pa", "kPa").unwrap();
    /// assert!((kpa - 150.0).abs() < 1e-9);
    /// ```
    pub fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64> {
        let from = self.require(from)?;
        let to = self.require(to)?;
        if from.symbol == to.symbol {
            return Ok(value);
        }
        let base = value * from.factor + from.offset;
        Ok((base - to.offset) / to.factor)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Variable {
    type Err = PlcError;

    fn from_str(s: &str) -> Result<Self> {
        Variable::ALL
            .iter()
            .copied()
            .find(|v| v.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| PlcError::Config(format!("Unknown variable '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_temperature_offsets() {
        let t = Variable::Temperature;
        assert!(close(t.convert(100.0, "degC", "degF").unwrap(), 212.0));
        assert!(close(t.convert(32.0, "degF", "degC").unwrap(), 0.0));
        assert!(close(t.convert(0.0, "degC", "K").unwrap(), 273.15));
    }

    #[test]
    fn test_pressure_ratios() {
        let p = Variable::Pressure;
        assert!(close(p.convert(1.0, "bar", "kPa").unwrap(), 100.0));
        assert!(close(p.convert(1.0, "atm", "Pa").unwrap(), 101_325.0));
    }

    #[test]
    fn test_unit_from_other_variable_is_rejected() {
        let err = Variable::Pressure.convert(1.0, "Pa", "degC").unwrap_err();
        assert!(matches!(err, PlcError::InvalidUnit { .. }));
        assert!(!Variable::Length.contains("kg"));
    }

    #[test]
    fn test_every_base_unit_has_unit_factor() {
        for v in Variable::ALL {
            assert!(close(v.convert(7.0, v.base_unit(), v.base_unit()).unwrap(), 7.0));
            assert_eq!(v.to_string().parse::<Variable>().unwrap(), v);
        }
    }
}
