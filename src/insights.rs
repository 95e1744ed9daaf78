//! Applicant-facing summaries derived from a feature vector and its decision.

use serde::{Deserialize, Serialize};

use crate::schema::{Feature, FeatureVector};

/// Income-based trust tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Bronze,
    Silver,
    Gold,
}

impl TrustTier {
    pub fn for_income(monthly_income: f64) -> Self {
        if monthly_income < 30_000.0 {
            TrustTier::Bronze
        } else if monthly_income < 70_000.0 {
            TrustTier::Silver
        } else {
            TrustTier::Gold
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrustTier::Bronze => "Bronze",
            TrustTier::Silver => "Silver",
            TrustTier::Gold => "Gold",
        }
    }
}

/// Scale credit points are reported on.
pub const CREDIT_POINTS_SCALE: u32 = 100;
/// Most points the rules can award.
pub const MAX_CREDIT_POINTS: u32 = 80;

/// Behavioral points, reported out of [`CREDIT_POINTS_SCALE`].
pub fn credit_points(x: &FeatureVector) -> u32 {
    let mut points = 0;
    if x.get(Feature::PhoneBillPaidOnTime) == 1.0 {
        points += 20;
    }
    if x.get(Feature::UpiTxnCount) > 10.0 {
        points += 20;
    }
    if x.get(Feature::SmsNotifs) > 5.0 {
        points += 10;
    }
    if x.get(Feature::SocialMediaHours) < 4.0 {
        points += 10;
    }
    if x.get(Feature::MonthlyIncome) > 50_000.0 {
        points += 20;
    }
    points
}

/// Concrete suggestions for an applicant who was declined.
pub fn improvement_tips(x: &FeatureVector, label: u8) -> Vec<&'static str> {
    if label == 1 {
        return Vec::new();
    }
    let mut tips = Vec::new();
    if x.get(Feature::MonthlyIncome) < 30_000.0 {
        tips.push("Increase monthly income above 30,000.");
    }
    if x.get(Feature::UpiTxnCount) < 5.0 {
        tips.push("Use digital payments (UPI) more regularly.");
    }
    if x.get(Feature::PhoneBillPaidOnTime) == 0.0 {
        tips.push("Pay phone bills on time.");
    }
    if x.get(Feature::SocialMediaHours) > 5.0 {
        tips.push("Reduce daily social media usage.");
    }
    tips
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub tier: TrustTier,
    pub credit_points: u32,
    pub tips: Vec<String>,
}

impl Insights {
    pub fn compute(x: &FeatureVector, label: u8) -> Self {
        Self {
            tier: TrustTier::for_income(x.get(Feature::MonthlyIncome)),
            credit_points: credit_points(x),
            tips: improvement_tips(x, label)
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}
