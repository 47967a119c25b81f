//! Multi-touch marketing attribution for Rust.
//!
//! Page visits are classified into marketing channels and collected into
//! per-visitor journeys. When a visitor converts, credit for the conversion
//! is split across the journey under five models (first-touch, last-touch,
//! linear, time-decay, position-based) and stored with the conversion, so
//! reports stay stable whichever model is selected later.
//!
//! # Example
//!
//! ```rust,ignore
//! use multitouch::{AttributionModel, Tracker};
//! use chrono::{Duration, Utc};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), multitouch::Error> {
//!     let tracker = Tracker::builder()
//!         .retention(std::time::Duration::from_secs(30 * 24 * 3600))
//!         .build()?;
//!
//!     tracker.page_visit("visitor_1", "https://example.com/")
//!         .referrer("https://www.google.com/")
//!         .send()
//!         .await?;
//!
//!     tracker.conversion("visitor_1", "contact-form")
//!         .value(1000.0)
//!         .send()
//!         .await?;
//!
//!     let now = Utc::now();
//!     let report = tracker.analytics(now - Duration::days(7), now, AttributionModel::TimeDecay);
//!
//!     tracker.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod analytics;
pub mod attribution;
mod builders;
pub mod classifier;
mod client;
mod config;
mod error;
mod queue;
pub mod store;
mod transport;
pub mod types;

pub use aggregate::{calculate_channel_performance, ChannelPerformance, SourcePerformance};
pub use analytics::{AnalyticsReport, AnalyticsSummary, AttributionBreakdown, PageStats};
pub use attribution::{
    aggregate_by_channel, calculate_all_attributions, AttributionCalculator, ChannelCredit,
};
pub use builders::{ConversionBuilder, EngagementBuilder, PageVisitBuilder};
pub use classifier::classify;
pub use client::{SendableConversion, SendableEngagement, SendablePageVisit, Tracker};
pub use config::{Config, ExportConfig, TrackerBuilder};
pub use error::Error;
pub use store::{Evicted, JourneyStore};
pub use types::{
    AttributionModel, AttributionResult, Channel, Conversion, ConversionEvent, Engagement,
    EngagementUpdate, ExportPayload, Journey, ModelAttributions, PageVisit, SourceType,
    Touchpoint, UtmParams,
};

impl TrackerBuilder {
    /// Build the tracker. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Tracker, Error> {
        let config = self.build_config()?;
        Tracker::from_config(config)
    }
}
