use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Energy-performance certificate class, A (best) through G (worst), or
/// `N` for "not provided" (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "dpe_class_enum")]
pub enum DpeClass {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    N,
}

impl DpeClass {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "A" => DpeClass::A,
            "B" => DpeClass::B,
            "C" => DpeClass::C,
            "D" => DpeClass::D,
            "E" => DpeClass::E,
            "F" => DpeClass::F,
            "G" => DpeClass::G,
            _ => DpeClass::N,
        }
    }

    /// Stage 6 price-estimate adjustment: +5/+3/+1/0/-2/-5/-8% for A..G,
    /// 0 for `N` (no adjustment without a known class).
    pub fn price_adjustment(&self) -> f64 {
        match self {
            DpeClass::A => 0.05,
            DpeClass::B => 0.03,
            DpeClass::C => 0.01,
            DpeClass::D => 0.00,
            DpeClass::E => -0.02,
            DpeClass::F => -0.05,
            DpeClass::G => -0.08,
            DpeClass::N => 0.00,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dpe {
    pub id: Uuid,
    pub address_id: Uuid,
    pub construction_year: Option<i32>,
    pub dpe_date: NaiveDate,
    pub energy_class: DpeClass,
    pub ges_class: DpeClass,
    pub dpe_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_class_defaults_to_n() {
        assert_eq!(DpeClass::parse("?"), DpeClass::N);
        assert_eq!(DpeClass::parse(""), DpeClass::N);
    }

    #[test]
    fn worst_class_has_negative_adjustment() {
        assert!(DpeClass::G.price_adjustment() < 0.0);
        assert_eq!(DpeClass::D.price_adjustment(), 0.0);
    }
}
