//! Vehicle feature records and their domain validation.
//!
//! A [`FeatureRecord`] is the immutable input to every prediction. Records are
//! validated against the documented field domains *before* cache key encoding,
//! so an out-of-range record is rejected at the boundary and never touches the
//! cache or the model.
//!
//! Enum fields parse case-insensitively and accept the spellings found in the
//! source listings dataset (`"CNG"`, `"Trustmark Dealer"`,
//! `"Fourth & Above Owner"`), collapsing them onto one canonical token each so
//! that casing differences cannot fragment the cache.

pub mod key;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced by feature record validation and enum parsing.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeatureError {
    /// Manufacturer name is empty or whitespace.
    #[error("company must not be empty")]
    EmptyCompany,

    /// Registration year outside the accepted 1900..=2030 window.
    #[error("invalid year: {0}, must be between 1900 and 2030")]
    YearOutOfRange(u16),

    /// Seat count outside the accepted 2..=10 window.
    #[error("invalid seats: {0}, must be between 2 and 10")]
    SeatsOutOfRange(u8),

    /// Mileage is negative, NaN, or infinite.
    #[error("invalid mileage_mpg: {0}, must be a non-negative finite number")]
    InvalidMileage(f64),

    /// Engine displacement must be strictly positive.
    #[error("invalid engine_cc: 0, must be positive")]
    ZeroEngineCapacity,

    /// Power is non-positive, NaN, or infinite.
    #[error("invalid max_power_bhp: {0}, must be a positive finite number")]
    InvalidPower(f64),

    /// Torque is non-positive, NaN, or infinite.
    #[error("invalid torque_nm: {0}, must be a positive finite number")]
    InvalidTorque(f64),

    /// A categorical field value is not one of the documented variants.
    #[error("unknown {field} value: {value}")]
    UnknownVariant { field: &'static str, value: String },
}

impl FeatureError {
    /// Stable snake_case token for metrics labels.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::EmptyCompany => "empty_company",
            Self::YearOutOfRange(_) => "year_out_of_range",
            Self::SeatsOutOfRange(_) => "seats_out_of_range",
            Self::InvalidMileage(_) => "invalid_mileage",
            Self::ZeroEngineCapacity => "zero_engine_capacity",
            Self::InvalidPower(_) => "invalid_power",
            Self::InvalidTorque(_) => "invalid_torque",
            Self::UnknownVariant { .. } => "unknown_variant",
        }
    }
}

macro_rules! categorical {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal, {
            $($variant:ident => $canon:literal, [$($alias:literal),*]),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Canonical lowercase token used for cache key encoding.
            #[must_use]
            pub fn canonical(&self) -> &'static str {
                match self {
                    $(Self::$variant => $canon,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = FeatureError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let folded = s.trim().to_lowercase();
                match folded.as_str() {
                    $($canon $(| $alias)* => Ok(Self::$variant),)+
                    _ => Err(FeatureError::UnknownVariant {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.canonical())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.canonical())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

categorical! {
    /// Number of previous owners.
    Owner, "owner", {
        First => "first", ["first owner", "1st"],
        Second => "second", ["second owner", "2nd"],
        Third => "third", ["third owner", "3rd"],
        FourthAndAbove => "fourth_and_above", ["fourth & above owner", "fourth+", "fourth"],
    }
}

categorical! {
    /// Fuel type of the vehicle.
    Fuel, "fuel", {
        Petrol => "petrol", [],
        Diesel => "diesel", [],
        Cng => "cng", [],
        Lpg => "lpg", [],
        Electric => "electric", [],
    }
}

categorical! {
    /// Who is selling the vehicle.
    SellerType, "seller_type", {
        Individual => "individual", [],
        Dealer => "dealer", [],
        TrustmarkDealer => "trustmark_dealer", ["trustmark dealer", "trustmarkdealer"],
    }
}

categorical! {
    /// Gearbox type.
    Transmission, "transmission", {
        Manual => "manual", [],
        Automatic => "automatic", [],
    }
}

/// Immutable description of one used vehicle, as submitted for prediction.
///
/// All twelve fields are required. [`FeatureRecord::validate`] must pass
/// before the record is encoded into a cache key or handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Manufacturer, e.g. "Maruti".
    pub company: String,
    /// Registration year.
    pub year: u16,
    pub owner: Owner,
    pub fuel: Fuel,
    pub seller_type: SellerType,
    pub transmission: Transmission,
    /// Odometer reading in kilometres.
    pub km_driven: u64,
    /// Fuel economy in miles per gallon.
    pub mileage_mpg: f64,
    /// Engine displacement in cubic centimetres.
    pub engine_cc: u32,
    pub max_power_bhp: f64,
    pub torque_nm: f64,
    pub seats: u8,
}

impl FeatureRecord {
    /// Checks every field against its documented domain.
    ///
    /// # Errors
    ///
    /// Returns the first [`FeatureError`] encountered, in field declaration
    /// order. Categorical fields are already constrained by parsing, so only
    /// the free-form and numeric fields are checked here.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.company.trim().is_empty() {
            return Err(FeatureError::EmptyCompany);
        }
        if !(1900..=2030).contains(&self.year) {
            return Err(FeatureError::YearOutOfRange(self.year));
        }
        if !self.mileage_mpg.is_finite() || self.mileage_mpg < 0.0 {
            return Err(FeatureError::InvalidMileage(self.mileage_mpg));
        }
        if self.engine_cc == 0 {
            return Err(FeatureError::ZeroEngineCapacity);
        }
        if !self.max_power_bhp.is_finite() || self.max_power_bhp <= 0.0 {
            return Err(FeatureError::InvalidPower(self.max_power_bhp));
        }
        if !self.torque_nm.is_finite() || self.torque_nm <= 0.0 {
            return Err(FeatureError::InvalidTorque(self.torque_nm));
        }
        if !(2..=10).contains(&self.seats) {
            return Err(FeatureError::SeatsOutOfRange(self.seats));
        }
        Ok(())
    }

    /// Vehicle age in years relative to `reference_year`, saturating at zero.
    #[must_use]
    pub fn age(&self, reference_year: u16) -> u16 {
        reference_year.saturating_sub(self.year)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_record() -> FeatureRecord {
        FeatureRecord {
            company: "Maruti".to_string(),
            year: 2015,
            owner: Owner::Second,
            fuel: Fuel::Petrol,
            seller_type: SellerType::Individual,
            transmission: Transmission::Automatic,
            km_driven: 200_000,
            mileage_mpg: 55.0,
            engine_cc: 1250,
            max_power_bhp: 80.0,
            torque_nm: 200.0,
            seats: 5,
        }
    }

    #[test]
    fn test_sample_record_is_valid() {
        assert!(sample_record().validate().is_ok());
    }

    #[test]
    fn test_enum_parsing_case_insensitive() {
        assert_eq!("Petrol".parse::<Fuel>().unwrap(), Fuel::Petrol);
        assert_eq!("PETROL".parse::<Fuel>().unwrap(), Fuel::Petrol);
        assert_eq!("cng".parse::<Fuel>().unwrap(), Fuel::Cng);
        assert_eq!("CNG".parse::<Fuel>().unwrap(), Fuel::Cng);
        assert_eq!("Automatic".parse::<Transmission>().unwrap(), Transmission::Automatic);
    }

    #[test]
    fn test_enum_parsing_dataset_spellings() {
        assert_eq!("Second Owner".parse::<Owner>().unwrap(), Owner::Second);
        assert_eq!(
            "Fourth & Above Owner".parse::<Owner>().unwrap(),
            Owner::FourthAndAbove
        );
        assert_eq!(
            "Trustmark Dealer".parse::<SellerType>().unwrap(),
            SellerType::TrustmarkDealer
        );
    }

    #[test]
    fn test_enum_parsing_rejects_unknown() {
        let err = "hydrogen".parse::<Fuel>().unwrap_err();
        assert_eq!(
            err,
            FeatureError::UnknownVariant { field: "fuel", value: "hydrogen".to_string() }
        );
    }

    #[test]
    fn test_record_deserializes_from_json() {
        let record: FeatureRecord = serde_json::from_str(
            r#"{
                "company": "Maruti",
                "year": 2015,
                "owner": "Second",
                "fuel": "Petrol",
                "seller_type": "Individual",
                "transmission": "Automatic",
                "km_driven": 200000,
                "mileage_mpg": 55,
                "engine_cc": 1250,
                "max_power_bhp": 80,
                "torque_nm": 200,
                "seats": 5
            }"#,
        )
        .unwrap();

        assert_eq!(record, sample_record());
    }

    #[test]
    fn test_record_rejects_unknown_enum_in_json() {
        let result: Result<FeatureRecord, _> = serde_json::from_str(
            r#"{
                "company": "Maruti",
                "year": 2015,
                "owner": "Fifth",
                "fuel": "Petrol",
                "seller_type": "Individual",
                "transmission": "Automatic",
                "km_driven": 200000,
                "mileage_mpg": 55,
                "engine_cc": 1250,
                "max_power_bhp": 80,
                "torque_nm": 200,
                "seats": 5
            }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_domain_fields() {
        let mut record = sample_record();
        record.company = "   ".to_string();
        assert_eq!(record.validate(), Err(FeatureError::EmptyCompany));

        let mut record = sample_record();
        record.year = 1899;
        assert_eq!(record.validate(), Err(FeatureError::YearOutOfRange(1899)));

        let mut record = sample_record();
        record.year = 2031;
        assert_eq!(record.validate(), Err(FeatureError::YearOutOfRange(2031)));

        let mut record = sample_record();
        record.seats = 1;
        assert_eq!(record.validate(), Err(FeatureError::SeatsOutOfRange(1)));

        let mut record = sample_record();
        record.mileage_mpg = -1.0;
        assert!(matches!(record.validate(), Err(FeatureError::InvalidMileage(_))));

        let mut record = sample_record();
        record.mileage_mpg = f64::NAN;
        assert!(matches!(record.validate(), Err(FeatureError::InvalidMileage(_))));

        let mut record = sample_record();
        record.engine_cc = 0;
        assert_eq!(record.validate(), Err(FeatureError::ZeroEngineCapacity));

        let mut record = sample_record();
        record.max_power_bhp = 0.0;
        assert!(matches!(record.validate(), Err(FeatureError::InvalidPower(_))));

        let mut record = sample_record();
        record.torque_nm = -10.0;
        assert!(matches!(record.validate(), Err(FeatureError::InvalidTorque(_))));
    }

    #[test]
    fn test_age_saturates() {
        let record = sample_record();
        assert_eq!(record.age(2025), 10);
        assert_eq!(record.age(2010), 0);
    }

    #[test]
    fn test_metric_tokens_are_stable() {
        assert_eq!(FeatureError::EmptyCompany.as_metric_str(), "empty_company");
        assert_eq!(
            FeatureError::UnknownVariant { field: "fuel", value: "x".into() }.as_metric_str(),
            "unknown_variant"
        );
    }
}
