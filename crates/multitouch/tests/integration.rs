//! Integration tests for the tracker.

use chrono::{Duration as ChronoDuration, Utc};
use multitouch::{AttributionModel, Channel, ConversionEvent, EngagementUpdate, PageVisit, Tracker};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EPS: f64 = 1e-9;

#[tokio::test]
async fn test_three_touch_journey_end_to_end() {
    let tracker = Tracker::builder().build().unwrap();
    let start = Utc::now() - ChronoDuration::days(3);

    tracker
        .page_visit("alice", "https://agency.example.com/")
        .referrer("https://www.google.com/search?q=commission+sales")
        .timestamp(start)
        .send()
        .await
        .unwrap();
    tracker
        .page_visit("alice", "https://agency.example.com/services")
        .timestamp(start + ChronoDuration::days(1))
        .send()
        .await
        .unwrap();
    tracker
        .page_visit("alice", "https://agency.example.com/contact")
        .referrer("https://www.facebook.com/")
        .timestamp(start + ChronoDuration::days(2))
        .send()
        .await
        .unwrap();

    let conversion = tracker
        .conversion("alice", "contact-form")
        .value(100.0)
        .lead_data("company", "Acme")
        .send()
        .await
        .unwrap()
        .unwrap();

    let channels: Vec<Channel> = conversion
        .journey
        .touchpoints
        .iter()
        .map(|tp| tp.channel)
        .collect();
    assert_eq!(
        channels,
        vec![Channel::OrganicSearch, Channel::Direct, Channel::OrganicSocial]
    );

    let linear = &conversion.attribution.linear;
    assert!(linear.iter().all(|r| (r.value - 100.0 / 3.0).abs() < EPS));

    let first = &conversion.attribution.first_touch;
    assert_eq!(first[0].channel, Channel::OrganicSearch);
    assert_eq!(first[0].value, 100.0);

    let position: Vec<f64> = conversion
        .attribution
        .position_based
        .iter()
        .map(|r| r.value)
        .collect();
    assert!((position[0] - 40.0).abs() < EPS);
    assert!((position[1] - 20.0).abs() < EPS);
    assert!((position[2] - 40.0).abs() < EPS);

    let report = tracker.analytics(
        start - ChronoDuration::hours(1),
        Utc::now() + ChronoDuration::hours(1),
        AttributionModel::PositionBased,
    );
    assert_eq!(report.summary.total_visits, 3);
    assert_eq!(report.summary.total_conversions, 1);
    assert!((report.summary.conversion_rate - 1.0).abs() < EPS);
    assert!((report.summary.total_revenue - 100.0).abs() < EPS);

    let direct = report
        .attribution_breakdown
        .iter()
        .find(|b| b.channel == Channel::Direct)
        .unwrap();
    assert!((direct.percentage - 20.0).abs() < EPS);
}

#[tokio::test]
async fn test_engagement_updates_latest_touchpoint() {
    let tracker = Tracker::builder().build().unwrap();

    tracker
        .page_visit("bob", "https://agency.example.com/")
        .send()
        .await
        .unwrap();
    tracker
        .page_visit("bob", "https://agency.example.com/pricing")
        .send()
        .await
        .unwrap();

    let updated = tracker
        .engagement("bob")
        .time_on_page(42)
        .scroll_depth(75)
        .engaged(true)
        .send()
        .await
        .unwrap();
    assert!(updated);

    let journey = tracker.journey("bob").unwrap();
    assert_eq!(journey.touchpoints[0].time_on_page, None);
    assert_eq!(journey.touchpoints[1].time_on_page, Some(42));
    assert_eq!(journey.touchpoints[1].scroll_depth, Some(75));

    let ghost = tracker
        .ingest_engagement(EngagementUpdate {
            user_id: "nobody".into(),
            engagement: Default::default(),
        })
        .unwrap();
    assert!(!ghost);
}

#[tokio::test]
async fn test_ingest_collaborator_payloads() {
    let tracker = Tracker::builder().build().unwrap();

    let visit: PageVisit = serde_json::from_value(json!({
        "url": "https://agency.example.com/?utm_source=newsletter&utm_medium=email",
        "title": "Home",
        "referrer": "",
        "userId": "carol"
    }))
    .unwrap();
    let tp = tracker.ingest_page_visit(visit).unwrap().unwrap();
    assert_eq!(tp.channel, Channel::Email);
    assert_eq!(tp.source, "newsletter");

    let event: ConversionEvent = serde_json::from_value(json!({
        "userId": "carol",
        "type": "contact-form",
        "value": 25.0,
        "leadData": { "name": "Carol" }
    }))
    .unwrap();
    let conversion = tracker.ingest_conversion(event).await.unwrap().unwrap();

    assert_eq!(conversion.attribution.last_touch[0].channel, Channel::Email);
    assert_eq!(conversion.lead_data.unwrap()["name"], "Carol");
}

#[tokio::test]
async fn test_retention_evicts_idle_journeys() {
    let tracker = Tracker::builder()
        .retention(Duration::from_secs(24 * 60 * 60))
        .build()
        .unwrap();

    tracker
        .page_visit("old", "https://agency.example.com/")
        .timestamp(Utc::now() - ChronoDuration::days(3))
        .send()
        .await
        .unwrap();
    tracker
        .page_visit("new", "https://agency.example.com/")
        .send()
        .await
        .unwrap();

    let evicted = tracker.evict_expired().await;

    assert_eq!(evicted.journeys, 1);
    assert!(tracker.journey("old").is_none());
    assert!(tracker.journey("new").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_visits_across_visitors() {
    let tracker = Arc::new(Tracker::builder().build().unwrap());
    let mut handles = vec![];

    for visitor in 0..10 {
        for page in 0..20 {
            let t = tracker.clone();
            handles.push(tokio::spawn(async move {
                t.page_visit(
                    format!("visitor_{visitor}"),
                    format!("https://agency.example.com/p{page}"),
                )
                .send()
                .await
                .unwrap();
            }));
        }
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(tracker.store().len(), 10);
    for visitor in 0..10 {
        let journey = tracker.journey(&format!("visitor_{visitor}")).unwrap();
        assert_eq!(journey.touchpoint_count(), 20);
        assert!(journey
            .touchpoints
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

// ============================================
// EXPORT
// ============================================

#[tokio::test]
async fn test_conversion_export_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/ek_test/conversions"))
        .and(body_partial_json(json!({ "source": "server" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "processed": 1
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tracker = Tracker::builder()
        .export_to(mock_server.uri(), "ek_test")
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    tracker
        .conversion("dave", "contact-form")
        .value(10.0)
        .send()
        .await
        .unwrap();
    assert_eq!(tracker.pending_export_count().await, 1);

    tracker.flush().await.unwrap();
    assert_eq!(tracker.pending_export_count().await, 0);
}

/// Custom responder that counts calls
struct CountingResponder {
    counter: Arc<AtomicUsize>,
}

impl wiremock::Respond for CountingResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        self.counter.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "processed": 1
        }))
    }
}

#[tokio::test]
async fn test_export_on_shutdown() {
    let mock_server = MockServer::start().await;
    let received = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .respond_with(CountingResponder {
            counter: received.clone(),
        })
        .mount(&mock_server)
        .await;

    let tracker = Tracker::builder()
        .export_to(mock_server.uri(), "ek_test")
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    tracker
        .conversion("erin", "contact-form")
        .send()
        .await
        .unwrap();

    assert_eq!(received.load(Ordering::SeqCst), 0);

    tracker.shutdown().await.unwrap();

    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_export_at_max_batch_size() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "processed": 3
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tracker = Tracker::builder()
        .export_to(mock_server.uri(), "ek_test")
        .max_batch_size(3)
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    for i in 0..3 {
        tracker
            .conversion(format!("visitor_{i}"), "contact-form")
            .send()
            .await
            .unwrap();
    }

    assert_eq!(tracker.pending_export_count().await, 0);
}

#[tokio::test]
async fn test_failed_export_is_requeued() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&mock_server)
        .await;

    let tracker = Tracker::builder()
        .export_to(mock_server.uri(), "ek_test")
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    tracker
        .conversion("frank", "contact-form")
        .send()
        .await
        .unwrap();

    let result = tracker.flush().await;

    assert!(matches!(
        result,
        Err(multitouch::Error::Export { status: 503, .. })
    ));
    assert_eq!(tracker.pending_export_count().await, 1);
    // the conversion itself is kept regardless of export
    assert_eq!(tracker.conversions().len(), 1);
}

#[tokio::test]
async fn test_export_failure_does_not_fail_conversion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&mock_server)
        .await;

    let tracker = Tracker::builder()
        .export_to(mock_server.uri(), "ek_test")
        .max_batch_size(1)
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    tracker
        .page_visit("grace", "https://agency.example.com/")
        .send()
        .await
        .unwrap();

    let result = tracker
        .conversion("grace", "contact-form")
        .value(75.0)
        .send()
        .await;

    assert!(result.unwrap().is_some());
    assert_eq!(tracker.conversions().len(), 1);
    assert_eq!(tracker.pending_export_count().await, 1);
}

#[tokio::test]
async fn test_export_queue_is_bounded_while_collector_is_down() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let tracker = Tracker::builder()
        .export_to(mock_server.uri(), "ek_test")
        .max_batch_size(2)
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    for i in 0..50 {
        tracker
            .conversion(format!("visitor_{i}"), "contact-form")
            .send()
            .await
            .unwrap();
        assert!(tracker.pending_export_count().await <= 20);
    }

    assert_eq!(tracker.pending_export_count().await, 20);
    assert_eq!(tracker.conversions().len(), 50);
}

#[tokio::test]
async fn test_refused_batch_is_dropped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("malformed"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tracker = Tracker::builder()
        .export_to(mock_server.uri(), "ek_test")
        .flush_interval(Duration::from_secs(100))
        .build()
        .unwrap();

    tracker
        .conversion("heidi", "contact-form")
        .send()
        .await
        .unwrap();

    let result = tracker.flush().await;

    assert!(matches!(
        result,
        Err(multitouch::Error::Export { status: 400, .. })
    ));
    assert_eq!(tracker.pending_export_count().await, 0);
    assert_eq!(tracker.conversions().len(), 1);
}
