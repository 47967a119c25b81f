//! Event builders for fluent API.

use crate::types::{ConversionEvent, Engagement, EngagementUpdate, PageVisit};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

// ============================================
// PAGE VISIT BUILDER
// ============================================

/// Builder for page-visit events.
#[derive(Debug)]
pub struct PageVisitBuilder {
    user_id: String,
    url: String,
    title: String,
    referrer: String,
    user_agent: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl PageVisitBuilder {
    pub(crate) fn new(user_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            url: url.into(),
            title: String::new(),
            referrer: String::new(),
            user_agent: None,
            timestamp: None,
        }
    }

    /// Set the page title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the referring URL. Leave unset for direct navigation.
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    /// Set the visitor's user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set a custom timestamp. Defaults to now.
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Build the event.
    pub(crate) fn build(self) -> PageVisit {
        PageVisit {
            url: self.url,
            title: self.title,
            referrer: self.referrer,
            user_id: self.user_id,
            user_agent: self.user_agent,
            timestamp: self.timestamp,
        }
    }
}

// ============================================
// ENGAGEMENT BUILDER
// ============================================

/// Builder for engagement updates.
#[derive(Debug)]
pub struct EngagementBuilder {
    user_id: String,
    engagement: Engagement,
}

impl EngagementBuilder {
    pub(crate) fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            engagement: Engagement::default(),
        }
    }

    /// Seconds spent on the page.
    pub fn time_on_page(mut self, secs: u64) -> Self {
        self.engagement.time_on_page = Some(secs);
        self
    }

    /// Maximum scroll depth in percent; values above 100 are clamped.
    pub fn scroll_depth(mut self, percent: u8) -> Self {
        self.engagement.scroll_depth = Some(percent.min(100));
        self
    }

    pub fn engaged(mut self, engaged: bool) -> Self {
        self.engagement.engaged = Some(engaged);
        self
    }

    /// Build the event.
    pub(crate) fn build(self) -> EngagementUpdate {
        EngagementUpdate {
            user_id: self.user_id,
            engagement: self.engagement,
        }
    }
}

// ============================================
// CONVERSION BUILDER
// ============================================

/// Builder for conversion events.
#[derive(Debug)]
pub struct ConversionBuilder {
    user_id: String,
    conversion_type: String,
    value: f64,
    lead_data: HashMap<String, Value>,
}

impl ConversionBuilder {
    pub(crate) fn new(user_id: impl Into<String>, conversion_type: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversion_type: conversion_type.into(),
            value: 0.0,
            lead_data: HashMap::new(),
        }
    }

    /// Set the monetary value. Defaults to 0.
    pub fn value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Attach a lead field (name, company, message, ...).
    pub fn lead_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.lead_data.insert(key.into(), value.into());
        self
    }

    /// Build the event.
    pub(crate) fn build(self) -> ConversionEvent {
        ConversionEvent {
            user_id: self.user_id,
            conversion_type: self.conversion_type,
            value: self.value,
            lead_data: if self.lead_data.is_empty() {
                None
            } else {
                Some(self.lead_data)
            },
        }
    }
}
