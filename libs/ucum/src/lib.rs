//! Fixed-table UCUM canonicalisation.
//!
//! Quantity search needs to compare `5 mg` against `0.005 g`. Doing that
//! requires a conversion to a canonical unit per dimension. A full UCUM
//! implementation (grammar, prefixes, essence database) is far more than the
//! engine needs, so this crate ships a closed table covering the dimensions
//! that actually occur in clinical quantities: mass, volume, time, length,
//! temperature, pressure, and frequency.
//!
//! A unit outside the table simply has no canonical form; callers fall back
//! to unit-exact comparison.

use rust_decimal::Decimal;
use thiserror::Error;

/// The UCUM code system URI quantities must carry for canonicalisation.
pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown UCUM unit '{0}'")]
    UnknownUnit(String),
}

/// A value converted to its dimension's canonical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub value: Decimal,
    pub code: &'static str,
}

/// Conversion entry: `canonical = value * factor + offset`.
struct UnitDef {
    code: &'static str,
    canonical_code: &'static str,
    factor: Decimal,
    offset: Decimal,
}

macro_rules! unit {
    ($code:expr, $canon:expr, $factor:expr) => {
        UnitDef {
            code: $code,
            canonical_code: $canon,
            factor: $factor,
            offset: Decimal::ZERO,
        }
    };
    ($code:expr, $canon:expr, $factor:expr, $offset:expr) => {
        UnitDef {
            code: $code,
            canonical_code: $canon,
            factor: $factor,
            offset: $offset,
        }
    };
}

fn dec(mantissa: i64, scale: u32) -> Decimal {
    Decimal::new(mantissa, scale)
}

fn units() -> &'static [UnitDef] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<Vec<UnitDef>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            // Mass, canonical gram
            unit!("g", "g", Decimal::ONE),
            unit!("kg", "g", dec(1000, 0)),
            unit!("mg", "g", dec(1, 3)),
            unit!("ug", "g", dec(1, 6)),
            unit!("ng", "g", dec(1, 9)),
            unit!("[lb_av]", "g", dec(45359237, 5)),
            unit!("[oz_av]", "g", dec(28349523125, 9)),
            // Volume, canonical litre
            unit!("L", "L", Decimal::ONE),
            unit!("l", "L", Decimal::ONE),
            unit!("dL", "L", dec(1, 1)),
            unit!("cL", "L", dec(1, 2)),
            unit!("mL", "L", dec(1, 3)),
            unit!("uL", "L", dec(1, 6)),
            unit!("[foz_us]", "L", dec(295735295625, 13)),
            // Time, canonical second
            unit!("s", "s", Decimal::ONE),
            unit!("ms", "s", dec(1, 3)),
            unit!("min", "s", dec(60, 0)),
            unit!("h", "s", dec(3600, 0)),
            unit!("d", "s", dec(86400, 0)),
            unit!("wk", "s", dec(604800, 0)),
            unit!("mo", "s", dec(2629800, 0)),
            unit!("a", "s", dec(31557600, 0)),
            // Length, canonical metre
            unit!("m", "m", Decimal::ONE),
            unit!("km", "m", dec(1000, 0)),
            unit!("cm", "m", dec(1, 2)),
            unit!("mm", "m", dec(1, 3)),
            unit!("um", "m", dec(1, 6)),
            unit!("[in_i]", "m", dec(254, 4)),
            unit!("[ft_i]", "m", dec(3048, 4)),
            // Temperature, canonical kelvin
            unit!("K", "K", Decimal::ONE),
            unit!("Cel", "K", Decimal::ONE, dec(27315, 2)),
            unit!("[degF]", "K", dec(5555555556, 10), dec(2553722222, 7)),
            // Pressure, canonical pascal
            unit!("Pa", "Pa", Decimal::ONE),
            unit!("kPa", "Pa", dec(1000, 0)),
            unit!("bar", "Pa", dec(100000, 0)),
            unit!("mm[Hg]", "Pa", dec(133322387415, 9)),
            // Frequency, canonical per-second
            unit!("/s", "/s", Decimal::ONE),
            unit!("/min", "/s", Decimal::ONE / dec(60, 0)),
            unit!("/h", "/s", Decimal::ONE / dec(3600, 0)),
        ]
    })
}

fn lookup(code: &str) -> Result<&'static UnitDef, Error> {
    units()
        .iter()
        .find(|u| u.code == code)
        .ok_or_else(|| Error::UnknownUnit(code.to_string()))
}

/// Convert `value` in unit `code` to the dimension's canonical unit.
///
/// Returns `None` for units outside the table; the caller then compares
/// unit-exact only.
pub fn canonicalize(value: Decimal, code: &str) -> Option<Canonical> {
    let def = lookup(code).ok()?;
    Some(Canonical {
        value: value * def.factor + def.offset,
        code: def.canonical_code,
    })
}

/// True when two unit codes share a canonical dimension in the table.
pub fn comparable(a: &str, b: &str) -> bool {
    match (lookup(a), lookup(b)) {
        (Ok(ua), Ok(ub)) => ua.canonical_code == ub.canonical_code,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(value: &str, code: &str) -> Canonical {
        canonicalize(value.parse().unwrap(), code).unwrap()
    }

    #[test]
    fn mass_converts_to_grams() {
        assert_eq!(canon("5", "mg").value, dec(5, 3));
        assert_eq!(canon("5", "mg").code, "g");
        assert_eq!(canon("0.005", "g").value, dec(5, 3));
        assert_eq!(canon("2", "kg").value, dec(2000, 0));
    }

    #[test]
    fn equivalent_quantities_share_canonical_value() {
        let a = canon("5", "mg");
        let b = canon("0.005", "g");
        assert_eq!(a.code, b.code);
        assert_eq!(a.value.normalize(), b.value.normalize());
    }

    #[test]
    fn temperature_is_affine() {
        assert_eq!(canon("0", "Cel").value, dec(27315, 2));
        assert_eq!(canon("100", "Cel").value, dec(37315, 2));
        // 32 degF == 0 Cel, up to table rounding.
        let freezing = canon("32", "[degF]").value;
        assert!((freezing - dec(27315, 2)).abs() < dec(1, 3));
    }

    #[test]
    fn time_and_volume() {
        assert_eq!(canon("2", "h").value, dec(7200, 0));
        assert_eq!(canon("1", "wk").value, dec(604800, 0));
        assert_eq!(canon("250", "mL").value, dec(250, 3));
    }

    #[test]
    fn unknown_units_have_no_canonical_form() {
        assert!(canonicalize(Decimal::ONE, "{beats}").is_none());
        assert!(canonicalize(Decimal::ONE, "mmol/L").is_none());
    }

    #[test]
    fn comparable_respects_dimensions() {
        assert!(comparable("mg", "kg"));
        assert!(comparable("Cel", "[degF]"));
        assert!(!comparable("mg", "mL"));
        assert!(!comparable("mg", "{score}"));
    }
}
