//! Analytics query over a time window.

use crate::aggregate::{calculate_channel_performance, ratio, ChannelPerformance};
use crate::attribution::aggregate_by_channel;
use crate::types::{days_between, AttributionModel, Channel, Conversion, Journey, Touchpoint};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// How many pages are listed in a report.
const TOP_PAGES: usize = 10;

/// Headline numbers for a reporting window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_visits: u64,
    pub unique_visitors: u64,
    pub total_conversions: u64,
    /// Conversions per unique visitor.
    pub conversion_rate: f64,
    pub average_touchpoints: f64,
    pub average_days_to_convert: f64,
    pub total_revenue: f64,
}

/// One channel's share of credit under the selected model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionBreakdown {
    pub channel: Channel,
    pub label: &'static str,
    pub credit: f64,
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStats {
    pub path: String,
    pub views: u64,
    pub unique_visitors: u64,
    pub conversions: u64,
}

/// Full analytics response for a window and a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub model: AttributionModel,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
    pub summary: AnalyticsSummary,
    pub channel_performance: Vec<ChannelPerformance>,
    pub attribution_breakdown: Vec<AttributionBreakdown>,
    pub top_pages: Vec<PageStats>,
}

/// Build a report over journeys and conversions, limited to `start..=end`.
pub fn analytics_report(
    journeys: &[Journey],
    conversions: &[Conversion],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    model: AttributionModel,
) -> AnalyticsReport {
    let in_window = |ts: DateTime<Utc>| ts >= start && ts <= end;

    let visits: Vec<(&Journey, &Touchpoint)> = journeys
        .iter()
        .flat_map(|j| j.touchpoints.iter().map(move |tp| (j, tp)))
        .filter(|(_, tp)| in_window(tp.timestamp))
        .collect();
    let conversions: Vec<Conversion> = conversions
        .iter()
        .filter(|c| in_window(c.timestamp))
        .cloned()
        .collect();

    let touchpoints: Vec<Touchpoint> = visits.iter().map(|(_, tp)| (*tp).clone()).collect();
    let unique_visitors = visits
        .iter()
        .map(|(j, _)| j.user_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u64;

    AnalyticsReport {
        model,
        start,
        end,
        summary: summarize(touchpoints.len() as u64, unique_visitors, &conversions),
        channel_performance: calculate_channel_performance(&conversions, &touchpoints),
        attribution_breakdown: breakdown(&conversions, model),
        top_pages: top_pages(&visits, &conversions),
    }
}

fn summarize(total_visits: u64, unique_visitors: u64, conversions: &[Conversion]) -> AnalyticsSummary {
    let count = conversions.len() as f64;
    let touchpoints: usize = conversions
        .iter()
        .map(|c| c.journey.touchpoint_count())
        .sum();
    let days: f64 = conversions.iter().map(days_to_convert).sum();

    AnalyticsSummary {
        total_visits,
        unique_visitors,
        total_conversions: conversions.len() as u64,
        conversion_rate: ratio(count, unique_visitors as f64),
        average_touchpoints: ratio(touchpoints as f64, count),
        average_days_to_convert: ratio(days, count),
        total_revenue: conversions.iter().map(|c| c.value).sum(),
    }
}

fn breakdown(conversions: &[Conversion], model: AttributionModel) -> Vec<AttributionBreakdown> {
    let credits = aggregate_by_channel(conversions.iter().flat_map(|c| c.attribution.get(model)));
    let total_credit: f64 = credits.iter().map(|c| c.credit).sum();

    credits
        .into_iter()
        .map(|c| AttributionBreakdown {
            channel: c.channel,
            label: c.channel.label(),
            credit: c.credit,
            value: c.value,
            percentage: ratio(c.credit, total_credit) * 100.0,
        })
        .collect()
}

fn top_pages(visits: &[(&Journey, &Touchpoint)], conversions: &[Conversion]) -> Vec<PageStats> {
    let converted: HashSet<&str> = conversions.iter().map(|c| c.user_id.as_str()).collect();

    let mut pages: HashMap<&str, (u64, HashSet<&str>)> = HashMap::new();
    for (journey, tp) in visits {
        let page = pages.entry(tp.path.as_str()).or_default();
        page.0 += 1;
        page.1.insert(journey.user_id.as_str());
    }

    let mut stats: Vec<PageStats> = pages
        .into_iter()
        .map(|(path, (views, visitors))| PageStats {
            path: path.to_string(),
            views,
            unique_visitors: visitors.len() as u64,
            conversions: visitors.iter().filter(|v| converted.contains(*v)).count() as u64,
        })
        .collect();
    stats.sort_by(|a, b| b.views.cmp(&a.views).then(a.path.cmp(&b.path)));
    stats.truncate(TOP_PAGES);
    stats
}

/// Fractional days between a journey's first touchpoint and its conversion.
pub fn days_to_convert(conversion: &Conversion) -> f64 {
    conversion
        .journey
        .touchpoints
        .first()
        .map(|first| days_between(first.timestamp, conversion.timestamp).max(0.0))
        .unwrap_or(0.0)
}
