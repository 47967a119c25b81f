//! Data model and wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Marketing channel a touchpoint is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    OrganicSearch,
    PaidSearch,
    PaidSocial,
    OrganicSocial,
    Email,
    Direct,
    Referral,
    Display,
    Affiliate,
    Other,
}

impl Channel {
    /// Every channel, in display order.
    pub const ALL: [Channel; 10] = [
        Channel::OrganicSearch,
        Channel::PaidSearch,
        Channel::PaidSocial,
        Channel::OrganicSocial,
        Channel::Email,
        Channel::Direct,
        Channel::Referral,
        Channel::Display,
        Channel::Affiliate,
        Channel::Other,
    ];

    /// Wire identifier, e.g. `organic-search`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::OrganicSearch => "organic-search",
            Channel::PaidSearch => "paid-search",
            Channel::PaidSocial => "paid-social",
            Channel::OrganicSocial => "organic-social",
            Channel::Email => "email",
            Channel::Direct => "direct",
            Channel::Referral => "referral",
            Channel::Display => "display",
            Channel::Affiliate => "affiliate",
            Channel::Other => "other",
        }
    }

    /// Human-readable label for dashboards.
    pub fn label(&self) -> &'static str {
        match self {
            Channel::OrganicSearch => "Organic Search",
            Channel::PaidSearch => "Paid Search",
            Channel::PaidSocial => "Paid Social",
            Channel::OrganicSocial => "Organic Social",
            Channel::Email => "Email",
            Channel::Direct => "Direct",
            Channel::Referral => "Referral",
            Channel::Display => "Display",
            Channel::Affiliate => "Affiliate",
            Channel::Other => "Other",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Campaign parameters captured from `utm_*` query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtmParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UtmParams {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }
}

/// Engagement metrics reported when a visitor leaves a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    /// Seconds spent on the page.
    #[serde(
        default,
        deserialize_with = "seconds_from_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_on_page: Option<u64>,
    /// Maximum scroll depth, percent.
    #[serde(
        default,
        deserialize_with = "percent_from_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub scroll_depth: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engaged: Option<bool>,
}

// Browsers report these as plain JS numbers, so fractions, negatives and
// out-of-range values are rounded and clamped rather than rejected.

fn seconds_from_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = Option::<f64>::deserialize(deserializer)?;
    Ok(secs.filter(|s| s.is_finite()).map(|s| s.max(0.0).round() as u64))
}

fn percent_from_number<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let percent = Option::<f64>::deserialize(deserializer)?;
    Ok(percent
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0).round() as u8))
}

/// One recorded page visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Touchpoint {
    pub id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub path: String,
    #[serde(default)]
    pub title: String,
    /// Empty for direct navigation.
    pub referrer: String,
    pub channel: Channel,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm_params: Option<UtmParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_on_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_depth: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engaged: Option<bool>,
}

impl Touchpoint {
    /// Apply an engagement update. Fields absent from the update are kept.
    pub fn apply_engagement(&mut self, engagement: &Engagement) {
        if let Some(secs) = engagement.time_on_page {
            self.time_on_page = Some(secs);
        }
        if let Some(depth) = engagement.scroll_depth {
            self.scroll_depth = Some(depth.min(100));
        }
        if let Some(engaged) = engagement.engaged {
            self.engaged = Some(engaged);
        }
    }
}

/// Ordered touchpoint history of one visitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Journey {
    pub user_id: String,
    pub touchpoints: Vec<Touchpoint>,
    pub converted: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Journey {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            touchpoints: Vec::new(),
            converted: false,
            created_at: Utc::now(),
        }
    }

    pub fn touchpoint_count(&self) -> usize {
        self.touchpoints.len()
    }

    /// Fractional days between the first touchpoint and `now`; 0 when empty.
    pub fn days_since_first_touch(&self, now: DateTime<Utc>) -> f64 {
        match self.touchpoints.first() {
            Some(first) => days_between(first.timestamp, now),
            None => 0.0,
        }
    }

    /// Timestamp of the latest touchpoint, or creation time when empty.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.touchpoints
            .last()
            .map(|tp| tp.timestamp)
            .unwrap_or(self.created_at)
    }
}

/// Fractional days from `from` to `to` (negative when `to` is earlier).
pub(crate) fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MS_PER_DAY
}

/// Attribution model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributionModel {
    FirstTouch,
    LastTouch,
    Linear,
    TimeDecay,
    PositionBased,
}

impl AttributionModel {
    pub const ALL: [AttributionModel; 5] = [
        AttributionModel::FirstTouch,
        AttributionModel::LastTouch,
        AttributionModel::Linear,
        AttributionModel::TimeDecay,
        AttributionModel::PositionBased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionModel::FirstTouch => "first-touch",
            AttributionModel::LastTouch => "last-touch",
            AttributionModel::Linear => "linear",
            AttributionModel::TimeDecay => "time-decay",
            AttributionModel::PositionBased => "position-based",
        }
    }
}

impl FromStr for AttributionModel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributionModel::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::Config(format!("unknown attribution model: {s}")))
    }
}

/// Credit assigned to one touchpoint under one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionResult {
    /// Id of the credited touchpoint in the conversion's journey snapshot.
    pub touchpoint_id: Uuid,
    pub channel: Channel,
    pub source: String,
    pub credit: f64,
    pub value: f64,
}

/// Results of all five models for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAttributions {
    pub first_touch: Vec<AttributionResult>,
    pub last_touch: Vec<AttributionResult>,
    pub linear: Vec<AttributionResult>,
    pub time_decay: Vec<AttributionResult>,
    pub position_based: Vec<AttributionResult>,
}

impl ModelAttributions {
    pub fn get(&self, model: AttributionModel) -> &[AttributionResult] {
        match model {
            AttributionModel::FirstTouch => &self.first_touch,
            AttributionModel::LastTouch => &self.last_touch,
            AttributionModel::Linear => &self.linear,
            AttributionModel::TimeDecay => &self.time_decay,
            AttributionModel::PositionBased => &self.position_based,
        }
    }
}

/// A value-producing event attributed back across a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub conversion_type: String,
    pub value: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_data: Option<HashMap<String, serde_json::Value>>,
    /// Journey as it was when the conversion was recorded.
    pub journey: Journey,
    pub attribution: ModelAttributions,
}

// ============================================
// INBOUND EVENTS
// ============================================

/// Raw page-visit event from the site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub referrer: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Engagement update sent when a visitor leaves a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementUpdate {
    pub user_id: String,
    #[serde(flatten)]
    pub engagement: Engagement,
}

/// Conversion event, e.g. a contact-form submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionEvent {
    pub user_id: String,
    #[serde(rename = "type")]
    pub conversion_type: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_data: Option<HashMap<String, serde_json::Value>>,
}

// ============================================
// EXPORT
// ============================================

/// Source type for exported batches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Server,
}

/// Payload sent to the export collector.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub source: SourceType,
    pub conversions: Vec<Conversion>,
}

/// Response from the export collector.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub success: bool,
    pub processed: u32,
    #[serde(default)]
    pub errors: Option<Vec<ExportError>>,
}

/// Per-conversion error reported by the collector.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportError {
    pub index: usize,
    pub message: String,
}
