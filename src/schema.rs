//! Feature schema shared by the generator, the ensemble, and the attribution engine.
//!
//! Field order is part of the model contract: trees and attributions index features
//! positionally, so `Feature::ALL` must never be reordered without bumping the
//! artifact format version.

use serde::de::Error as SerdeDeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Number of features in every [`FeatureVector`].
pub const FEATURE_COUNT: usize = 8;
/// Name of the trailing label column in dataset files.
pub const LABEL_COLUMN: &str = "creditworthy";
/// Allowed location cluster ids.
pub const LOCATION_CLUSTERS: [i64; 3] = [0, 1, 2];
const BINARY_VALUES: [i64; 2] = [0, 1];

/// Errors raised when a feature payload does not match the schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// A required feature is absent from the request.
    #[error("missing feature `{0}`")]
    Missing(&'static str),
    /// The request names a feature the schema does not define.
    #[error("unknown feature `{0}`")]
    Unknown(String),
    /// A feature value has the wrong JSON type.
    #[error("feature `{feature}` expects {expected}, got {found}")]
    Mistyped {
        feature: &'static str,
        expected: &'static str,
        found: String,
    },
    /// A feature value lies outside its declared domain.
    #[error("feature `{feature}` value {value} is outside its domain ({domain})")]
    OutOfDomain {
        feature: &'static str,
        value: f64,
        domain: &'static str,
    },
    /// A positional row has the wrong number of values.
    #[error("expected {expected} feature values, got {found}")]
    Arity { expected: usize, found: usize },
}

/// Named features in model order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    MonthlyIncome,
    PhoneBillPaidOnTime,
    ElectricityUsage,
    NumAppsInstalled,
    SocialMediaHours,
    UpiTxnCount,
    SmsNotifs,
    LocationCluster,
}

/// Value type of a feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureKind {
    /// Non-negative integer count or amount.
    Count,
    /// `0` or `1`.
    Binary,
    /// Non-negative real number.
    NonNegativeReal,
    /// One of a fixed set of integer ids.
    Categorical(&'static [i64]),
}

/// Distribution used by the synthetic generator for a feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    /// Uniform integer in `[low, high)`.
    IntRange { low: i64, high: i64 },
    /// Uniform choice from a fixed set.
    Choice(&'static [i64]),
    /// Uniform real in `[low, high)` rounded to `decimals` places.
    RoundedUniform { low: f64, high: f64, decimals: i32 },
}

impl Feature {
    /// All features in positional order.
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::MonthlyIncome,
        Feature::PhoneBillPaidOnTime,
        Feature::ElectricityUsage,
        Feature::NumAppsInstalled,
        Feature::SocialMediaHours,
        Feature::UpiTxnCount,
        Feature::SmsNotifs,
        Feature::LocationCluster,
    ];

    /// Position of the feature inside a [`FeatureVector`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Column / JSON field name.
    pub fn name(self) -> &'static str {
        match self {
            Feature::MonthlyIncome => "monthly_income",
            Feature::PhoneBillPaidOnTime => "phone_bill_paid_on_time",
            Feature::ElectricityUsage => "electricity_usage",
            Feature::NumAppsInstalled => "num_apps_installed",
            Feature::SocialMediaHours => "social_media_hours",
            Feature::UpiTxnCount => "upi_txn_count",
            Feature::SmsNotifs => "sms_notifs",
            Feature::LocationCluster => "location_cluster",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|feature| feature.name() == name)
    }

    pub fn kind(self) -> FeatureKind {
        match self {
            Feature::PhoneBillPaidOnTime => FeatureKind::Binary,
            Feature::SocialMediaHours => FeatureKind::NonNegativeReal,
            Feature::LocationCluster => FeatureKind::Categorical(&LOCATION_CLUSTERS),
            _ => FeatureKind::Count,
        }
    }

    /// Generator distribution for this feature.
    pub fn sampling(self) -> Sampling {
        match self {
            Feature::MonthlyIncome => Sampling::IntRange {
                low: 10_000,
                high: 100_000,
            },
            Feature::PhoneBillPaidOnTime => Sampling::Choice(&BINARY_VALUES),
            Feature::ElectricityUsage => Sampling::IntRange { low: 100, high: 1_000 },
            Feature::NumAppsInstalled => Sampling::IntRange { low: 10, high: 200 },
            Feature::SocialMediaHours => Sampling::RoundedUniform {
                low: 0.0,
                high: 10.0,
                decimals: 1,
            },
            Feature::UpiTxnCount => Sampling::IntRange { low: 0, high: 50 },
            Feature::SmsNotifs => Sampling::IntRange { low: 0, high: 20 },
            Feature::LocationCluster => Sampling::Choice(&LOCATION_CLUSTERS),
        }
    }

    /// Check a raw value against this feature's domain.
    pub fn check(self, value: f64) -> Result<(), SchemaError> {
        let out_of_domain = |domain: &'static str| SchemaError::OutOfDomain {
            feature: self.name(),
            value,
            domain,
        };
        if !value.is_finite() {
            return Err(out_of_domain("finite number"));
        }
        match self.kind() {
            FeatureKind::Count => {
                if value < 0.0 || value.fract() != 0.0 {
                    return Err(out_of_domain("non-negative integer"));
                }
            }
            FeatureKind::Binary => {
                if value != 0.0 && value != 1.0 {
                    return Err(out_of_domain("0 or 1"));
                }
            }
            FeatureKind::NonNegativeReal => {
                if value < 0.0 {
                    return Err(out_of_domain("non-negative number"));
                }
            }
            FeatureKind::Categorical(choices) => {
                if value.fract() != 0.0 || !choices.contains(&(value as i64)) {
                    return Err(out_of_domain("known location cluster"));
                }
            }
        }
        Ok(())
    }

    fn expected_type(self) -> &'static str {
        match self.kind() {
            FeatureKind::Binary => "0/1 or boolean",
            FeatureKind::NonNegativeReal => "number",
            FeatureKind::Count | FeatureKind::Categorical(_) => "integer",
        }
    }

    fn value_from_json(self, value: &Value) -> Result<f64, SchemaError> {
        let mistyped = || SchemaError::Mistyped {
            feature: self.name(),
            expected: self.expected_type(),
            found: value.to_string(),
        };
        let number = match (self.kind(), value) {
            (FeatureKind::Binary, Value::Bool(flag)) => {
                if *flag {
                    1.0
                } else {
                    0.0
                }
            }
            (_, Value::Number(number)) => number.as_f64().ok_or_else(mistyped)?,
            _ => return Err(mistyped()),
        };
        if !matches!(self.kind(), FeatureKind::NonNegativeReal) && number.fract() != 0.0 {
            return Err(mistyped());
        }
        self.check(number)?;
        Ok(number)
    }
}

/// Schema-valid, positionally ordered feature values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Build a vector from positional values, validating every field.
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Result<Self, SchemaError> {
        for feature in Feature::ALL {
            feature.check(values[feature.index()])?;
        }
        Ok(Self(values))
    }

    /// Wrap values already known to be schema-valid (generator output, parsed rows).
    pub(crate) fn new_unchecked(values: [f64; FEATURE_COUNT]) -> Self {
        debug_assert!(Self::from_values(values).is_ok());
        Self(values)
    }

    /// Build a vector from a slice, rejecting the wrong arity.
    pub fn from_slice(values: &[f64]) -> Result<Self, SchemaError> {
        let array: [f64; FEATURE_COUNT] =
            values.try_into().map_err(|_| SchemaError::Arity {
                expected: FEATURE_COUNT,
                found: values.len(),
            })?;
        Self::from_values(array)
    }

    /// Build a vector from a JSON object keyed by feature name.
    ///
    /// Missing, unknown, and mistyped fields are rejected before any model sees them.
    pub fn from_json_map(map: &Map<String, Value>) -> Result<Self, SchemaError> {
        if let Some(unknown) = map.keys().find(|key| Feature::from_name(key).is_none()) {
            return Err(SchemaError::Unknown(unknown.clone()));
        }
        let mut values = [0.0; FEATURE_COUNT];
        for feature in Feature::ALL {
            let raw = map
                .get(feature.name())
                .ok_or(SchemaError::Missing(feature.name()))?;
            values[feature.index()] = feature.value_from_json(raw)?;
        }
        Ok(Self(values))
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        Feature::ALL
            .into_iter()
            .map(|feature| (feature.name().to_string(), json_number(feature, self.get(feature))))
            .collect()
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.index()]
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

fn json_number(feature: Feature, value: f64) -> Value {
    match feature.kind() {
        FeatureKind::NonNegativeReal => serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        _ => Value::from(value as i64),
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for feature in Feature::ALL {
            map.serialize_entry(feature.name(), &json_number(feature, self.get(feature)))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_json_map(&map).map_err(D::Error::custom)
    }
}

/// Typed view of one applicant's features, convenient for callers that build
/// inputs in code rather than from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreditProfile {
    pub monthly_income: u32,
    pub phone_bill_paid_on_time: bool,
    pub electricity_usage: u32,
    pub num_apps_installed: u32,
    pub social_media_hours: f64,
    pub upi_txn_count: u32,
    pub sms_notifs: u32,
    pub location_cluster: u8,
}

impl CreditProfile {
    pub fn to_vector(&self) -> Result<FeatureVector, SchemaError> {
        FeatureVector::from_values([
            f64::from(self.monthly_income),
            if self.phone_bill_paid_on_time { 1.0 } else { 0.0 },
            f64::from(self.electricity_usage),
            f64::from(self.num_apps_installed),
            self.social_media_hours,
            f64::from(self.upi_txn_count),
            f64::from(self.sms_notifs),
            f64::from(self.location_cluster),
        ])
    }
}

/// Deterministic ground-truth rule used to label synthetic data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRule {
    /// Income must be strictly greater than this.
    pub income_above: f64,
    /// Whether the phone bill must have been paid on time.
    pub require_bill_paid: bool,
    /// UPI transaction count must be strictly greater than this.
    pub upi_above: f64,
}

/// Rule applied by the synthetic generator.
pub const SYNTHETIC_LABEL_RULE: LabelRule = LabelRule {
    income_above: 30_000.0,
    require_bill_paid: true,
    upi_above: 5.0,
};

impl LabelRule {
    pub fn label(&self, features: &FeatureVector) -> u8 {
        let income_ok = features.get(Feature::MonthlyIncome) > self.income_above;
        let bill_ok =
            !self.require_bill_paid || features.get(Feature::PhoneBillPaidOnTime) == 1.0;
        let upi_ok = features.get(Feature::UpiTxnCount) > self.upi_above;
        u8::from(income_ok && bill_ok && upi_ok)
    }
}

/// Feature names in model order.
pub fn feature_names() -> Vec<String> {
    Feature::ALL
        .iter()
        .map(|feature| feature.name().to_string())
        .collect()
}
