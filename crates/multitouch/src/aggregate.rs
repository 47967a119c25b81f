//! Channel-level performance rollups.
//!
//! Recomputed from scratch on each query; cost is linear in the number of
//! touchpoints plus conversions.

use crate::types::{AttributionModel, AttributionResult, Channel, Conversion, Touchpoint};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// How many sources are listed per channel.
const TOP_SOURCES: usize = 5;

/// Visits, conversions and revenue for one source within a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePerformance {
    pub source: String,
    pub visits: u64,
    pub conversions: u64,
    pub revenue: f64,
}

/// Performance of one marketing channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPerformance {
    pub channel: Channel,
    pub label: &'static str,
    pub visits: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    /// Linear-model revenue.
    pub total_revenue: f64,
    pub revenue_per_visit: f64,
    pub first_touch_revenue: f64,
    pub last_touch_revenue: f64,
    pub linear_revenue: f64,
    pub top_sources: Vec<SourcePerformance>,
}

#[derive(Default)]
struct ChannelTally {
    visits: u64,
    conversions: u64,
    first_touch_revenue: f64,
    last_touch_revenue: f64,
    linear_revenue: f64,
    sources: HashMap<String, SourceTally>,
}

#[derive(Default)]
struct SourceTally {
    visits: u64,
    conversions: u64,
    revenue: f64,
}

/// Divide, returning 0 instead of NaN or infinity.
pub(crate) fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Roll up visits, conversions and attributed revenue per channel.
///
/// Channels come from `touchpoints` plus any channel credited by a
/// conversion's linear model, so a conversion whose touchpoints fall outside
/// the visit window still shows up. A conversion counts once per channel
/// (and once per source) it received non-zero linear credit in.
pub fn calculate_channel_performance(
    conversions: &[Conversion],
    touchpoints: &[Touchpoint],
) -> Vec<ChannelPerformance> {
    let mut tallies: BTreeMap<Channel, ChannelTally> = BTreeMap::new();

    for tp in touchpoints {
        let tally = tallies.entry(tp.channel).or_default();
        tally.visits += 1;
        tally.sources.entry(tp.source.clone()).or_default().visits += 1;
    }

    for conversion in conversions {
        let attribution = &conversion.attribution;

        let mut credited_channels = HashSet::new();
        let mut credited_sources = HashSet::new();
        for result in credited(&attribution.linear) {
            let tally = tallies.entry(result.channel).or_default();
            tally.linear_revenue += result.value;
            tally
                .sources
                .entry(result.source.clone())
                .or_default()
                .revenue += result.value;

            if credited_channels.insert(result.channel) {
                tally.conversions += 1;
            }
            if credited_sources.insert((result.channel, result.source.as_str())) {
                tally
                    .sources
                    .entry(result.source.clone())
                    .or_default()
                    .conversions += 1;
            }
        }

        for result in attribution.get(AttributionModel::FirstTouch) {
            tallies.entry(result.channel).or_default().first_touch_revenue += result.value;
        }
        for result in attribution.get(AttributionModel::LastTouch) {
            tallies.entry(result.channel).or_default().last_touch_revenue += result.value;
        }
    }

    let mut performance: Vec<ChannelPerformance> = tallies
        .into_iter()
        .map(|(channel, tally)| {
            let visits = tally.visits as f64;
            ChannelPerformance {
                channel,
                label: channel.label(),
                visits: tally.visits,
                conversions: tally.conversions,
                conversion_rate: ratio(tally.conversions as f64, visits),
                total_revenue: tally.linear_revenue,
                revenue_per_visit: ratio(tally.linear_revenue, visits),
                first_touch_revenue: tally.first_touch_revenue,
                last_touch_revenue: tally.last_touch_revenue,
                linear_revenue: tally.linear_revenue,
                top_sources: top_sources(tally.sources),
            }
        })
        .collect();

    performance.sort_by(|a, b| {
        b.total_revenue
            .total_cmp(&a.total_revenue)
            .then(b.visits.cmp(&a.visits))
            .then(a.channel.cmp(&b.channel))
    });
    performance
}

fn credited(results: &[AttributionResult]) -> impl Iterator<Item = &AttributionResult> {
    results.iter().filter(|r| r.credit > 0.0)
}

fn top_sources(sources: HashMap<String, SourceTally>) -> Vec<SourcePerformance> {
    let mut ranked: Vec<SourcePerformance> = sources
        .into_iter()
        .map(|(source, t)| SourcePerformance {
            source,
            visits: t.visits,
            conversions: t.conversions,
            revenue: t.revenue,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.visits
            .cmp(&a.visits)
            .then(b.revenue.total_cmp(&a.revenue))
            .then(a.source.cmp(&b.source))
    });
    ranked.truncate(TOP_SOURCES);
    ranked
}
