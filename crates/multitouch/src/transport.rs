//! HTTP delivery of attributed conversions to an export collector.

use crate::config::{Config, ExportConfig};
use crate::types::{ExportPayload, ExportResponse};
use crate::Error;
use tracing::{debug, warn};

/// Posts conversion batches to `{host}/api/v1/{key}/conversions`.
#[derive(Debug)]
pub struct HttpExporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExporter {
    pub fn new(config: &Config, export: &ExportConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let endpoint = format!(
            "{}/api/v1/{}/conversions",
            export.host().trim_end_matches('/'),
            export.key()
        );

        Ok(Self { client, endpoint })
    }

    /// Post one batch.
    ///
    /// A non-2xx status is an [`Error::Export`]. Conversions refused one by
    /// one inside an accepted batch are logged by id and not retried.
    pub async fn send(&self, payload: &ExportPayload) -> Result<ExportResponse, Error> {
        let batch = payload.conversions.len();
        debug!(endpoint = %self.endpoint, batch, "posting conversion batch");

        let response = self.client.post(&self.endpoint).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Export {
                status: status.as_u16(),
                body,
            });
        }

        let result: ExportResponse = response.json().await?;

        for rejected in result.errors.iter().flatten() {
            match payload.conversions.get(rejected.index) {
                Some(conversion) => warn!(
                    conversion_id = %conversion.id,
                    user_id = %conversion.user_id,
                    message = %rejected.message,
                    "collector rejected conversion"
                ),
                None => warn!(
                    index = rejected.index,
                    message = %rejected.message,
                    "collector rejected conversion outside the batch"
                ),
            }
        }

        debug!(processed = result.processed, batch, "conversion batch delivered");

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerBuilder;
    use crate::types::SourceType;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exporter(host: &str) -> HttpExporter {
        let config = TrackerBuilder::new()
            .export_to(host, "ek_test_123")
            .build_config()
            .unwrap();
        HttpExporter::new(&config, config.export().unwrap()).unwrap()
    }

    fn empty_payload() -> ExportPayload {
        ExportPayload {
            source: SourceType::Server,
            conversions: vec![],
        }
    }

    #[test]
    fn test_endpoint_ignores_trailing_slash() {
        assert_eq!(
            exporter("https://collector.example.com/").endpoint,
            "https://collector.example.com/api/v1/ek_test_123/conversions"
        );
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ek_test_123/conversions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad batch"))
            .mount(&server)
            .await;

        let err = exporter(&server.uri())
            .send(&empty_payload())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Export { status: 400, ref body } if body == "bad batch"
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_partial_rejection_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "processed": 0,
                "errors": [{ "index": 3, "message": "duplicate" }]
            })))
            .mount(&server)
            .await;

        let response = exporter(&server.uri())
            .send(&empty_payload())
            .await
            .unwrap();

        assert_eq!(response.errors.unwrap().len(), 1);
    }
}
