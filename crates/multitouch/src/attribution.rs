//! Credit allocation across a journey's touchpoints.

use crate::config::DEFAULT_HALF_LIFE_DAYS;
use crate::types::{
    days_between, AttributionModel, AttributionResult, Channel, ModelAttributions, Touchpoint,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Share of credit the first and the last touchpoint each receive under the
/// position-based model.
const POSITION_ENDPOINT_SHARE: f64 = 0.4;

/// Channel-level credit totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCredit {
    pub channel: Channel,
    pub credit: f64,
    pub value: f64,
}

/// Computes all attribution models for a conversion.
#[derive(Debug, Clone, Copy)]
pub struct AttributionCalculator {
    half_life_days: f64,
}

impl Default for AttributionCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_HALF_LIFE_DAYS)
    }
}

impl AttributionCalculator {
    /// Create a calculator whose time-decay weight halves every
    /// `half_life_days` before the conversion.
    pub fn new(half_life_days: f64) -> Self {
        Self { half_life_days }
    }

    pub fn half_life_days(&self) -> f64 {
        self.half_life_days
    }

    /// Compute every model for `touchpoints`, which must be in chronological
    /// order. An empty slice yields empty results.
    pub fn calculate_all(
        &self,
        touchpoints: &[Touchpoint],
        conversion_value: f64,
        converted_at: DateTime<Utc>,
    ) -> ModelAttributions {
        ModelAttributions {
            first_touch: self.calculate(
                AttributionModel::FirstTouch,
                touchpoints,
                conversion_value,
                converted_at,
            ),
            last_touch: self.calculate(
                AttributionModel::LastTouch,
                touchpoints,
                conversion_value,
                converted_at,
            ),
            linear: self.calculate(
                AttributionModel::Linear,
                touchpoints,
                conversion_value,
                converted_at,
            ),
            time_decay: self.calculate(
                AttributionModel::TimeDecay,
                touchpoints,
                conversion_value,
                converted_at,
            ),
            position_based: self.calculate(
                AttributionModel::PositionBased,
                touchpoints,
                conversion_value,
                converted_at,
            ),
        }
    }

    /// Compute a single model.
    pub fn calculate(
        &self,
        model: AttributionModel,
        touchpoints: &[Touchpoint],
        conversion_value: f64,
        converted_at: DateTime<Utc>,
    ) -> Vec<AttributionResult> {
        let n = touchpoints.len();
        if n == 0 {
            return Vec::new();
        }

        match model {
            AttributionModel::FirstTouch => {
                vec![credit(&touchpoints[0], 1.0, conversion_value)]
            }
            AttributionModel::LastTouch => {
                vec![credit(&touchpoints[n - 1], 1.0, conversion_value)]
            }
            AttributionModel::Linear => {
                let share = 1.0 / n as f64;
                touchpoints
                    .iter()
                    .map(|tp| credit(tp, share, conversion_value))
                    .collect()
            }
            AttributionModel::TimeDecay => {
                let weights: Vec<f64> = touchpoints
                    .iter()
                    .map(|tp| {
                        let age = days_between(tp.timestamp, converted_at).max(0.0);
                        (-age / self.half_life_days).exp2()
                    })
                    .collect();
                let total: f64 = weights.iter().sum();
                touchpoints
                    .iter()
                    .zip(weights)
                    .map(|(tp, w)| {
                        let share = if total > 0.0 { w / total } else { 1.0 / n as f64 };
                        credit(tp, share, conversion_value)
                    })
                    .collect()
            }
            AttributionModel::PositionBased => {
                let middle_share = if n > 2 {
                    (1.0 - 2.0 * POSITION_ENDPOINT_SHARE) / (n - 2) as f64
                } else {
                    0.0
                };
                touchpoints
                    .iter()
                    .enumerate()
                    .map(|(i, tp)| {
                        let share = match n {
                            1 => 1.0,
                            2 => 0.5,
                            _ if i == 0 || i == n - 1 => POSITION_ENDPOINT_SHARE,
                            _ => middle_share,
                        };
                        credit(tp, share, conversion_value)
                    })
                    .collect()
            }
        }
    }
}

fn credit(touchpoint: &Touchpoint, share: f64, conversion_value: f64) -> AttributionResult {
    AttributionResult {
        touchpoint_id: touchpoint.id,
        channel: touchpoint.channel,
        source: touchpoint.source.clone(),
        credit: share,
        value: share * conversion_value,
    }
}

/// Compute every model with the default seven-day half-life.
pub fn calculate_all_attributions(
    touchpoints: &[Touchpoint],
    conversion_value: f64,
    converted_at: DateTime<Utc>,
) -> ModelAttributions {
    AttributionCalculator::default().calculate_all(touchpoints, conversion_value, converted_at)
}

/// Sum credit and value per channel, highest value first.
pub fn aggregate_by_channel<'a>(
    results: impl IntoIterator<Item = &'a AttributionResult>,
) -> Vec<ChannelCredit> {
    let mut totals: HashMap<Channel, ChannelCredit> = HashMap::new();
    for result in results {
        let entry = totals.entry(result.channel).or_insert(ChannelCredit {
            channel: result.channel,
            credit: 0.0,
            value: 0.0,
        });
        entry.credit += result.credit;
        entry.value += result.value;
    }

    let mut credits: Vec<ChannelCredit> = totals.into_values().collect();
    credits.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then(b.credit.total_cmp(&a.credit))
            .then(a.channel.cmp(&b.channel))
    });
    credits
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    const EPS: f64 = 1e-9;

    fn at(days: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::days(days)
    }

    fn tp(channel: Channel, source: &str, ts: DateTime<Utc>) -> Touchpoint {
        Touchpoint {
            id: Uuid::new_v4(),
            timestamp: ts,
            url: "https://example.com/".into(),
            path: "/".into(),
            title: String::new(),
            referrer: String::new(),
            channel,
            source: source.into(),
            utm_params: None,
            time_on_page: None,
            scroll_depth: None,
            engaged: None,
        }
    }

    fn journey(n: usize) -> Vec<Touchpoint> {
        (0..n)
            .map(|i| tp(Channel::Direct, "direct", at(i as i64)))
            .collect()
    }

    fn total_credit(results: &[AttributionResult]) -> f64 {
        results.iter().map(|r| r.credit).sum()
    }

    #[test]
    fn test_three_touch_scenario() {
        let touchpoints = vec![
            tp(Channel::OrganicSearch, "google", at(0)),
            tp(Channel::Direct, "direct", at(1)),
            tp(Channel::OrganicSocial, "facebook", at(2)),
        ];

        let all = calculate_all_attributions(&touchpoints, 100.0, at(2));

        for r in &all.linear {
            assert!((r.credit - 1.0 / 3.0).abs() < EPS);
            assert!((r.value - 100.0 / 3.0).abs() < EPS);
        }

        assert_eq!(all.first_touch.len(), 1);
        assert_eq!(all.first_touch[0].channel, Channel::OrganicSearch);
        assert_eq!(all.first_touch[0].value, 100.0);

        assert_eq!(all.last_touch[0].channel, Channel::OrganicSocial);

        let values: Vec<f64> = all.position_based.iter().map(|r| r.value).collect();
        assert!((values[0] - 40.0).abs() < EPS);
        assert!((values[1] - 20.0).abs() < EPS);
        assert!((values[2] - 40.0).abs() < EPS);
    }

    #[test]
    fn test_empty_journey_yields_empty_results() {
        let all = calculate_all_attributions(&[], 50.0, at(0));

        for model in AttributionModel::ALL {
            assert!(all.get(model).is_empty());
        }
        assert!(aggregate_by_channel(&all.linear).is_empty());
    }

    #[test]
    fn test_first_and_last_touch_reference_endpoints() {
        for n in 1..8 {
            let touchpoints = journey(n);
            let all = calculate_all_attributions(&touchpoints, 10.0, at(n as i64));

            assert_eq!(all.first_touch.len(), 1);
            assert_eq!(all.first_touch[0].touchpoint_id, touchpoints[0].id);
            assert_eq!(all.first_touch[0].credit, 1.0);
            assert_eq!(all.last_touch[0].touchpoint_id, touchpoints[n - 1].id);
            assert_eq!(all.last_touch[0].credit, 1.0);
        }
    }

    #[test]
    fn test_credit_conservation() {
        for n in 1..12 {
            let touchpoints = journey(n);
            let all = calculate_all_attributions(&touchpoints, 250.0, at(30));
            for model in AttributionModel::ALL {
                let sum = total_credit(all.get(model));
                assert!((sum - 1.0).abs() < EPS, "{model:?} n={n} sum={sum}");
            }
        }
    }

    #[test]
    fn test_position_based_boundaries() {
        let calc = AttributionCalculator::default();

        let one = calc.calculate(AttributionModel::PositionBased, &journey(1), 1.0, at(1));
        assert_eq!(one[0].credit, 1.0);

        let two = calc.calculate(AttributionModel::PositionBased, &journey(2), 1.0, at(2));
        assert_eq!(two[0].credit, 0.5);
        assert_eq!(two[1].credit, 0.5);

        let five = calc.calculate(AttributionModel::PositionBased, &journey(5), 1.0, at(5));
        assert!((five[0].credit - 0.4).abs() < EPS);
        assert!((five[4].credit - 0.4).abs() < EPS);
        for middle in &five[1..4] {
            assert!((middle.credit - 0.2 / 3.0).abs() < EPS);
        }
    }

    #[test]
    fn test_time_decay_half_life() {
        let touchpoints = vec![
            tp(Channel::Email, "newsletter", at(0)),
            tp(Channel::Direct, "direct", at(7)),
        ];
        let results = AttributionCalculator::new(7.0).calculate(
            AttributionModel::TimeDecay,
            &touchpoints,
            90.0,
            at(7),
        );

        // weights 0.5 and 1.0
        assert!((results[0].credit - 1.0 / 3.0).abs() < EPS);
        assert!((results[1].credit - 2.0 / 3.0).abs() < EPS);
        assert!((results[1].value - 60.0).abs() < EPS);
    }

    #[test]
    fn test_time_decay_is_monotonic() {
        let touchpoints: Vec<Touchpoint> = [0, 1, 1, 5, 12, 20]
            .into_iter()
            .map(|d| tp(Channel::Direct, "direct", at(d)))
            .collect();
        let results = AttributionCalculator::default().calculate(
            AttributionModel::TimeDecay,
            &touchpoints,
            1.0,
            at(21),
        );

        assert!(results.windows(2).all(|w| w[0].credit <= w[1].credit));
    }

    #[test]
    fn test_time_decay_touchpoint_after_conversion_gets_full_weight() {
        let touchpoints = vec![
            tp(Channel::Direct, "direct", at(0)),
            tp(Channel::Direct, "direct", at(3)),
        ];
        let results = AttributionCalculator::default().calculate(
            AttributionModel::TimeDecay,
            &touchpoints,
            1.0,
            at(1),
        );

        assert!(results[1].credit > results[0].credit);
        assert!((total_credit(&results) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_aggregate_by_channel() {
        let touchpoints = vec![
            tp(Channel::OrganicSearch, "google", at(0)),
            tp(Channel::Direct, "direct", at(1)),
            tp(Channel::OrganicSearch, "bing", at(2)),
            tp(Channel::Email, "newsletter", at(3)),
        ];
        let all = calculate_all_attributions(&touchpoints, 200.0, at(3));

        let by_channel = aggregate_by_channel(&all.linear);

        assert_eq!(by_channel.len(), 3);
        assert_eq!(by_channel[0].channel, Channel::OrganicSearch);
        assert!((by_channel[0].credit - 0.5).abs() < EPS);
        assert!((by_channel[0].value - 100.0).abs() < EPS);
        let total: f64 = by_channel.iter().map(|c| c.value).sum();
        assert!((total - 200.0).abs() < EPS);
    }
}
