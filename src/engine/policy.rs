use chrono::Duration;
use tracing::warn;

use crate::model::{CancellationPolicy, DateRange};

use super::{Engine, EngineError};

/// Percentage refunded when cancelling `remaining` before arrival.
///
/// Full refund while at least `window_days` remain, the policy's percentage after.
pub fn refund_percentage(remaining: Duration, policy: &CancellationPolicy) -> f64 {
    if remaining >= Duration::days(policy.window_days) {
        100.0
    } else {
        policy.refund_percentage
    }
}

/// Nightly price times nights.
pub fn total_price(price_per_night: u64, stay: &DateRange) -> u64 {
    let nights = u64::try_from(stay.nights()).unwrap_or(0);
    price_per_night.saturating_mul(nights)
}

pub fn refund_amount(total: u64, percentage: f64) -> f64 {
    total as f64 * percentage / 100.0
}

impl Engine {
    /// Country policy, or the configured default when the country has none.
    /// A failing lookup is an error, never a silent default.
    pub async fn resolve_policy(&self, country: &str) -> Result<CancellationPolicy, EngineError> {
        match self.policies.lookup(country).await? {
            Some(policy) => Ok(policy),
            None => {
                warn!("no cancellation policy for country {country:?}, using default");
                Ok(self.settings.default_policy)
            }
        }
    }
}
