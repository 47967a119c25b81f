//! Tracker client implementation.

use crate::analytics::{analytics_report, AnalyticsReport};
use crate::attribution::AttributionCalculator;
use crate::builders::{ConversionBuilder, EngagementBuilder, PageVisitBuilder};
use crate::classifier::{direct_touchpoint, touchpoint_from_visit};
use crate::config::{Config, TrackerBuilder};
use crate::queue::ExportQueue;
use crate::store::{Evicted, JourneyStore};
use crate::transport::HttpExporter;
use crate::types::{
    AttributionModel, Conversion, ConversionEvent, EngagementUpdate, ExportPayload, Journey,
    PageVisit, SourceType, Touchpoint,
};
use crate::Error;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Conversion export plumbing, present only when an export target is set.
struct Export {
    queue: Arc<ExportQueue>,
    transport: Arc<HttpExporter>,
}

/// Multi-touch attribution tracker.
///
/// Owns the journey store. Page visits become classified touchpoints,
/// engagement updates land on the visitor's latest touchpoint, and each
/// conversion is attributed across the visitor's journey under all five
/// models at the moment it is recorded.
///
/// # Example
///
/// ```rust,no_run
/// use multitouch::{AttributionModel, Tracker};
/// use chrono::{Duration, Utc};
///
/// #[tokio::main]
/// async fn main() -> Result<(), multitouch::Error> {
///     let tracker = Tracker::builder().build()?;
///
///     tracker.page_visit("visitor_1", "https://example.com/?utm_source=newsletter&utm_medium=email")
///         .title("Home")
///         .send()
///         .await?;
///
///     tracker.conversion("visitor_1", "contact-form")
///         .value(500.0)
///         .send()
///         .await?;
///
///     let now = Utc::now();
///     let report = tracker.analytics(now - Duration::days(30), now, AttributionModel::Linear);
///     println!("{}", report.summary.total_revenue);
///
///     tracker.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Tracker {
    config: Config,
    store: Arc<JourneyStore>,
    calculator: AttributionCalculator,
    export: Option<Export>,
    is_shutdown: Arc<AtomicBool>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Tracker {
    /// Create a new builder.
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::new()
    }

    /// Create a new tracker from config. Must be called inside a tokio
    /// runtime.
    pub(crate) fn from_config(config: Config) -> Result<Self, Error> {
        let store = Arc::new(JourneyStore::new());
        let is_shutdown = Arc::new(AtomicBool::new(false));

        let export = match config.export() {
            Some(target) => Some(Export {
                queue: Arc::new(ExportQueue::new(config.max_batch_size())),
                transport: Arc::new(HttpExporter::new(&config, target)?),
            }),
            None => None,
        };

        let queue = export.as_ref().map(|e| e.queue.clone());
        let mut timers = vec![start_eviction_timer(&config, &store, queue, &is_shutdown)];
        if let Some(export) = &export {
            timers.push(start_flush_timer(&config, export, &is_shutdown));
        }

        info!(
            retention_secs = config.retention().as_secs(),
            half_life_days = config.half_life_days(),
            export = export.is_some(),
            "tracker started"
        );

        Ok(Self {
            calculator: AttributionCalculator::new(config.half_life_days()),
            config,
            store,
            export,
            is_shutdown,
            timers: Mutex::new(timers),
        })
    }

    /// Get the tracker configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct access to the underlying journey store.
    pub fn store(&self) -> &JourneyStore {
        &self.store
    }

    /// Get the number of conversions waiting to be exported.
    pub async fn pending_export_count(&self) -> usize {
        match &self.export {
            Some(export) => export.queue.len().await,
            None => 0,
        }
    }

    // ============================================
    // PAGE VISITS
    // ============================================

    /// Record a page visit.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use multitouch::Tracker;
    /// # async fn example(tracker: &Tracker) -> Result<(), multitouch::Error> {
    /// tracker.page_visit("visitor_1", "https://example.com/services")
    ///     .title("Services")
    ///     .referrer("https://www.google.com/search?q=sales+agency")
    ///     .send()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn page_visit(
        &self,
        user_id: impl Into<String>,
        url: impl Into<String>,
    ) -> SendablePageVisit<'_> {
        SendablePageVisit {
            builder: PageVisitBuilder::new(user_id, url),
            tracker: self,
        }
    }

    /// Classify a raw page visit and append it to the visitor's journey.
    ///
    /// Returns the stored touchpoint, or `None` when the visit has no user id.
    pub fn ingest_page_visit(&self, visit: PageVisit) -> Result<Option<Touchpoint>, Error> {
        self.ensure_not_shutdown()?;

        if visit.user_id.trim().is_empty() {
            warn!(url = %visit.url, "page visit without user id dropped");
            return Ok(None);
        }

        let touchpoint = touchpoint_from_visit(&visit, Utc::now());
        Ok(self.store.add_touchpoint(&visit.user_id, touchpoint))
    }

    // ============================================
    // ENGAGEMENT
    // ============================================

    /// Report engagement on the visitor's current page.
    pub fn engagement(&self, user_id: impl Into<String>) -> SendableEngagement<'_> {
        SendableEngagement {
            builder: EngagementBuilder::new(user_id),
            tracker: self,
        }
    }

    /// Apply an engagement update to the visitor's latest touchpoint.
    ///
    /// Returns `false` when the visitor has no touchpoint to update.
    pub fn ingest_engagement(&self, update: EngagementUpdate) -> Result<bool, Error> {
        self.ensure_not_shutdown()?;
        Ok(self
            .store
            .update_last_touchpoint(&update.user_id, &update.engagement))
    }

    // ============================================
    // CONVERSIONS
    // ============================================

    /// Record a conversion.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use multitouch::Tracker;
    /// # async fn example(tracker: &Tracker) -> Result<(), multitouch::Error> {
    /// let conversion = tracker.conversion("visitor_1", "contact-form")
    ///     .value(2500.0)
    ///     .lead_data("company", "Acme")
    ///     .send()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn conversion(
        &self,
        user_id: impl Into<String>,
        conversion_type: impl Into<String>,
    ) -> SendableConversion<'_> {
        SendableConversion {
            builder: ConversionBuilder::new(user_id, conversion_type),
            tracker: self,
        }
    }

    /// Attribute a conversion across the visitor's journey and store it.
    ///
    /// A visitor with no recorded touchpoints gets a synthesized `direct`
    /// touchpoint at the conversion instant, so every model credits direct
    /// traffic in full. Returns `None` when the event has no user id.
    pub async fn ingest_conversion(
        &self,
        event: ConversionEvent,
    ) -> Result<Option<Conversion>, Error> {
        self.ensure_not_shutdown()?;

        if event.user_id.trim().is_empty() {
            warn!(conversion_type = %event.conversion_type, "conversion without user id dropped");
            return Ok(None);
        }

        let converted_at = Utc::now();
        let calculator = self.calculator;
        let ConversionEvent {
            user_id,
            conversion_type,
            value,
            lead_data,
        } = event;

        let conversion = self.store.with_journey_mut(&user_id, |journey| {
            if journey.touchpoints.is_empty() {
                debug!(user_id = %journey.user_id, "synthesizing direct touchpoint for conversion");
                journey.touchpoints.push(direct_touchpoint(converted_at));
            }
            journey.converted = true;

            Conversion {
                id: Uuid::new_v4(),
                user_id: journey.user_id.clone(),
                conversion_type,
                value,
                timestamp: converted_at,
                lead_data,
                attribution: calculator.calculate_all(&journey.touchpoints, value, converted_at),
                journey: journey.clone(),
            }
        });
        let Some(conversion) = conversion else {
            return Ok(None);
        };

        info!(
            conversion_id = %conversion.id,
            user_id = %conversion.user_id,
            conversion_type = %conversion.conversion_type,
            value = conversion.value,
            touchpoints = conversion.journey.touchpoint_count(),
            "conversion attributed"
        );

        self.store.record_conversion(conversion.clone());

        // The conversion is stored at this point; export failures stay queued
        // or logged and never reach the caller.
        if let Some(export) = &self.export {
            export.queue.enqueue(conversion.clone()).await;
            if export.queue.should_flush().await {
                if let Err(e) = flush_export(&export.queue, &export.transport).await {
                    error!(error = %e, conversion_id = %conversion.id, "batch export failed");
                }
            }
        }

        Ok(Some(conversion))
    }

    // ============================================
    // QUERIES
    // ============================================

    /// Snapshot of one visitor's journey.
    pub fn journey(&self, user_id: &str) -> Option<Journey> {
        self.store.journey(user_id)
    }

    /// Every recorded conversion, oldest first.
    pub fn conversions(&self) -> Vec<Conversion> {
        self.store.conversions()
    }

    /// Analytics report for `start..=end` under `model`.
    #[instrument(skip(self))]
    pub fn analytics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        model: AttributionModel,
    ) -> AnalyticsReport {
        let journeys = self.store.journeys();
        let conversions = self.store.conversions();
        debug!(
            journeys = journeys.len(),
            conversions = conversions.len(),
            "building analytics report"
        );
        analytics_report(&journeys, &conversions, start, end, model)
    }

    // ============================================
    // LIFECYCLE
    // ============================================

    /// Run a retention sweep now.
    #[instrument(skip(self))]
    pub async fn evict_expired(&self) -> Evicted {
        let queue = self.export.as_ref().map(|e| e.queue.as_ref());
        let evicted = sweep(&self.store, queue, self.config.retention()).await;
        if evicted != Evicted::default() {
            info!(
                journeys = evicted.journeys,
                conversions = evicted.conversions,
                queued = evicted.queued,
                "evicted expired records"
            );
        }
        evicted
    }

    /// Export all pending conversions immediately.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<(), Error> {
        let Some(export) = &self.export else {
            return Ok(());
        };
        flush_export(export.queue.as_ref(), export.transport.as_ref()).await
    }

    /// Shutdown the tracker gracefully.
    ///
    /// Stops the background timers and exports remaining conversions.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("shutting down tracker");

        for handle in self.timers.lock().await.drain(..) {
            handle.abort();
        }

        self.flush().await
    }

    // ============================================
    // INTERNAL
    // ============================================

    fn ensure_not_shutdown(&self) -> Result<(), Error> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        Ok(())
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        for handle in self.timers.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Send queued conversions one batch at a time until the queue is empty.
///
/// A batch that fails with a retryable error goes back to the head of the
/// queue and stops the flush; a batch the collector refuses outright is
/// dropped.
async fn flush_export(queue: &ExportQueue, transport: &HttpExporter) -> Result<(), Error> {
    loop {
        let batch = queue.next_batch().await;
        if batch.is_empty() {
            return Ok(());
        }

        info!(conversion_count = batch.len(), "exporting conversions");

        let payload = ExportPayload {
            source: SourceType::Server,
            conversions: batch,
        };

        if let Err(e) = transport.send(&payload).await {
            if e.is_retryable() {
                warn!(error = %e, "export failed, requeuing batch");
                queue.requeue(payload.conversions).await;
            } else {
                error!(
                    error = %e,
                    dropped = payload.conversions.len(),
                    "collector refused batch, dropping it"
                );
            }
            return Err(e);
        }
    }
}

async fn sweep(store: &JourneyStore, queue: Option<&ExportQueue>, retention: Duration) -> Evicted {
    let now = Utc::now();
    let mut evicted = store.evict_expired(retention, now);
    if let Some(queue) = queue {
        evicted.queued = queue.evict_expired(retention, now).await;
    }
    evicted
}

fn start_eviction_timer(
    config: &Config,
    store: &Arc<JourneyStore>,
    queue: Option<Arc<ExportQueue>>,
    is_shutdown: &Arc<AtomicBool>,
) -> JoinHandle<()> {
    let store = store.clone();
    let is_shutdown = is_shutdown.clone();
    let retention = config.retention();
    let every = config.eviction_interval();

    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + every, every);

        loop {
            timer.tick().await;

            if is_shutdown.load(Ordering::SeqCst) {
                break;
            }

            let evicted = sweep(&store, queue.as_deref(), retention).await;
            if evicted != Evicted::default() {
                info!(
                    journeys = evicted.journeys,
                    conversions = evicted.conversions,
                    queued = evicted.queued,
                    "periodic eviction"
                );
            }
        }
    })
}

fn start_flush_timer(
    config: &Config,
    export: &Export,
    is_shutdown: &Arc<AtomicBool>,
) -> JoinHandle<()> {
    let queue = export.queue.clone();
    let transport = export.transport.clone();
    let is_shutdown = is_shutdown.clone();
    let flush_interval = config.flush_interval();

    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + flush_interval, flush_interval);

        loop {
            timer.tick().await;

            if is_shutdown.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = flush_export(&queue, &transport).await {
                debug!(error = %e, "periodic export failed");
            }
        }
    })
}

// ============================================
// SENDABLE WRAPPERS
// ============================================

/// Sendable page-visit builder.
pub struct SendablePageVisit<'a> {
    builder: PageVisitBuilder,
    tracker: &'a Tracker,
}

impl<'a> SendablePageVisit<'a> {
    /// Set the page title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.builder = self.builder.title(title);
        self
    }

    /// Set the referring URL.
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.builder = self.builder.referrer(referrer);
        self
    }

    /// Set the visitor's user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.builder = self.builder.user_agent(user_agent);
        self
    }

    /// Set custom timestamp.
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.builder = self.builder.timestamp(ts);
        self
    }

    /// Record the visit.
    pub async fn send(self) -> Result<Option<Touchpoint>, Error> {
        self.tracker.ingest_page_visit(self.builder.build())
    }
}

/// Sendable engagement builder.
pub struct SendableEngagement<'a> {
    builder: EngagementBuilder,
    tracker: &'a Tracker,
}

impl<'a> SendableEngagement<'a> {
    /// Seconds spent on the page.
    pub fn time_on_page(mut self, secs: u64) -> Self {
        self.builder = self.builder.time_on_page(secs);
        self
    }

    /// Maximum scroll depth in percent.
    pub fn scroll_depth(mut self, percent: u8) -> Self {
        self.builder = self.builder.scroll_depth(percent);
        self
    }

    pub fn engaged(mut self, engaged: bool) -> Self {
        self.builder = self.builder.engaged(engaged);
        self
    }

    /// Apply the update.
    pub async fn send(self) -> Result<bool, Error> {
        self.tracker.ingest_engagement(self.builder.build())
    }
}

/// Sendable conversion builder.
pub struct SendableConversion<'a> {
    builder: ConversionBuilder,
    tracker: &'a Tracker,
}

impl<'a> SendableConversion<'a> {
    /// Set the monetary value.
    pub fn value(mut self, value: f64) -> Self {
        self.builder = self.builder.value(value);
        self
    }

    /// Attach a lead field.
    pub fn lead_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.builder = self.builder.lead_data(key, value);
        self
    }

    /// Record the conversion.
    pub async fn send(self) -> Result<Option<Conversion>, Error> {
        self.tracker.ingest_conversion(self.builder.build()).await
    }
}
