//! Canonical cache key encoding.
//!
//! Two records that are field-wise equal after normalization must always map
//! to the same key, so the canonical form fixes everything a caller could
//! plausibly vary without changing meaning: field order (sorted by name),
//! string casing, and floating-point noise beyond two decimal places.

use crate::features::FeatureRecord;
use sha2::{Digest, Sha256};
use std::fmt;

/// Decimal places retained for float fields before digesting.
const FLOAT_PRECISION: u32 = 2;

/// Opaque, fixed-length identifier for a normalized [`FeatureRecord`].
///
/// Internally a hex-encoded SHA-256 digest (64 characters), which makes
/// operational collisions between semantically distinct records negligible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Encodes a record into its cache key.
    ///
    /// Pure and deterministic. Callers are expected to have run
    /// [`FeatureRecord::validate`] first; encoding does not re-validate.
    #[must_use]
    pub fn from_record(record: &FeatureRecord) -> Self {
        let canonical = canonical_form(record);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rounds to [`FLOAT_PRECISION`] decimals and renders with a fixed width.
///
/// Negative zero collapses onto zero so "-0.00" can never appear in the
/// canonical form.
fn canonical_float(value: f64) -> String {
    let scale = 10f64.powi(FLOAT_PRECISION as i32);
    let rounded = (value * scale).round() / scale;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.2}")
}

/// Serializes the record with sorted field names and normalized values.
fn canonical_form(record: &FeatureRecord) -> String {
    // Field names in sorted order; keep in sync with FeatureRecord.
    format!(
        "company={}\nengine_cc={}\nfuel={}\nkm_driven={}\nmax_power_bhp={}\n\
         mileage_mpg={}\nowner={}\nseats={}\nseller_type={}\ntorque_nm={}\n\
         transmission={}\nyear={}",
        record.company.trim().to_lowercase(),
        record.engine_cc,
        record.fuel.canonical(),
        record.km_driven,
        canonical_float(record.max_power_bhp),
        canonical_float(record.mileage_mpg),
        record.owner.canonical(),
        record.seats,
        record.seller_type.canonical(),
        canonical_float(record.torque_nm),
        record.transmission.canonical(),
        record.year,
    )
}
