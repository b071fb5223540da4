//! Built-in hedonic pricing model.
//!
//! A deterministic scorer used when no external model artifact is wired in:
//! a synthetic new-vehicle price from the drivetrain figures, discounted by
//! age and odometer, then adjusted by the categorical fields. The absolute
//! numbers are calibrated to look plausible for the source listings dataset,
//! not to be accurate; the pipeline only requires the function to be
//! deterministic and total over validated records.

use crate::features::{FeatureRecord, Fuel, Owner, SellerType, Transmission};
use crate::inference::{PredictorError, PricePredictor};
use async_trait::async_trait;

/// Year that age is measured against. Fixed rather than taken from the wall
/// clock so identical records keep identical prices across process restarts.
const REFERENCE_YEAR: u16 = 2026;

/// Price floor: even a scrap-tier record appraises above zero.
const MINIMUM_PRICE: f64 = 30_000.0;

/// Annual retention factor applied per year of age.
const YEARLY_RETENTION: f64 = 0.88;

/// Odometer reading beyond which no further mileage discount accrues.
const KM_SATURATION: f64 = 400_000.0;

pub struct BaselinePricer {
    version: String,
}

impl BaselinePricer {
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into() }
    }

    fn score(record: &FeatureRecord) -> f64 {
        let new_price = 250_000.0 +
            f64::from(record.engine_cc) * 180.0 +
            record.max_power_bhp * 3_200.0 +
            record.torque_nm * 450.0 +
            f64::from(record.seats) * 12_000.0;

        let age_factor = YEARLY_RETENTION.powi(i32::from(record.age(REFERENCE_YEAR)));

        #[allow(clippy::cast_precision_loss)]
        let km = (record.km_driven as f64).min(KM_SATURATION);
        let usage_factor = 1.0 - (km / KM_SATURATION) * 0.45;

        let economy_factor = (1.0 + (record.mileage_mpg - 40.0) * 0.002).clamp(0.90, 1.15);

        let owner_factor = match record.owner {
            Owner::First => 1.0,
            Owner::Second => 0.92,
            Owner::Third => 0.85,
            Owner::FourthAndAbove => 0.76,
        };

        let fuel_factor = match record.fuel {
            Fuel::Electric => 1.18,
            Fuel::Diesel => 1.04,
            Fuel::Petrol => 1.0,
            Fuel::Cng => 0.94,
            Fuel::Lpg => 0.90,
        };

        let transmission_factor = match record.transmission {
            Transmission::Automatic => 1.08,
            Transmission::Manual => 1.0,
        };

        let seller_factor = match record.seller_type {
            SellerType::TrustmarkDealer => 1.10,
            SellerType::Dealer => 1.05,
            SellerType::Individual => 1.0,
        };

        let price = new_price *
            age_factor *
            usage_factor *
            economy_factor *
            owner_factor *
            fuel_factor *
            transmission_factor *
            seller_factor;

        price.max(MINIMUM_PRICE)
    }
}

impl Default for BaselinePricer {
    fn default() -> Self {
        Self::new("baseline-1")
    }
}

#[async_trait]
impl PricePredictor for BaselinePricer {
    async fn predict(&self, record: &FeatureRecord) -> Result<f64, PredictorError> {
        Ok(Self::score(record))
    }

    fn version(&self) -> &str {
        &self.version
    }
}
