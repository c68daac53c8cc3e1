//! API client for the forecast model service

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

/// Training or serving input read from disk
///
/// `.json` files hold an array of records and go to the JSON routes; anything
/// else is sent as-is to the semicolon-CSV routes.
#[derive(Debug, Clone)]
pub enum Upload {
    Csv(String),
    Json(Vec<Value>),
}

impl Upload {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            let records: Vec<Value> = serde_json::from_str(&content).with_context(|| {
                format!("{} must contain a JSON array of records", path.display())
            })?;
            Ok(Upload::Json(records))
        } else {
            Ok(Upload::Csv(content))
        }
    }
}

/// API client for the forecast model service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid API URL: {}", base_url);
        }

        Ok(Self { client, base_url })
    }

    /// Base URL plus percent-encoded path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid API URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => anyhow::bail!("API error ({}, {}): {}", status, err.code, err.error),
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }

        response.json().await.context("Failed to parse response")
    }

    /// POST an upload to `segments` (JSON) or `segments` + `/csv` (CSV)
    async fn post_upload<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        params: &[(&str, Value)],
        upload: &Upload,
    ) -> Result<T> {
        let request = match upload {
            Upload::Json(records) => {
                let mut body: serde_json::Map<String, Value> = params
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.clone()))
                    .collect();
                body.insert("records".to_string(), json!(records));
                self.client.post(self.endpoint(segments)?).json(&body)
            }
            Upload::Csv(text) => {
                let mut with_csv = segments.to_vec();
                with_csv.push("csv");
                let query: Vec<(&str, String)> = params
                    .iter()
                    .map(|(key, value)| match value {
                        Value::String(s) => (*key, s.clone()),
                        other => (*key, other.to_string()),
                    })
                    .collect();
                self.client
                    .post(self.endpoint(&with_csv)?)
                    .query(&query)
                    .header("content-type", "text/csv")
                    .body(text.clone())
            }
        };
        self.send(request).await
    }

    pub async fn train_forecast(
        &self,
        app_id: &str,
        target_column: &str,
        upload: &Upload,
    ) -> Result<TrainingAccepted> {
        self.post_upload(
            &["forecast", app_id, "train"],
            &[("target_column", json!(target_column))],
            upload,
        )
        .await
    }

    pub async fn train_anomaly(&self, app_id: &str, upload: &Upload) -> Result<TrainingAccepted> {
        self.post_upload(&["anomaly", app_id, "train"], &[], upload)
            .await
    }

    pub async fn predict(
        &self,
        app_id: &str,
        target_column: &str,
        steps: i64,
        upload: &Upload,
    ) -> Result<ForecastResponse> {
        self.post_upload(
            &["forecast", app_id, "predict"],
            &[
                ("target_column", json!(target_column)),
                ("n_predict_steps", json!(steps)),
            ],
            upload,
        )
        .await
    }

    pub async fn detect(&self, app_id: &str, upload: &Upload) -> Result<DetectionResponse> {
        self.post_upload(&["anomaly", app_id, "detect"], &[], upload)
            .await
    }

    pub async fn list_models(&self) -> Result<BTreeMap<String, ProductionEntry>> {
        self.send(self.client.get(self.endpoint(&["models"])?)).await
    }

    pub async fn get_model(&self, model_id: &str) -> Result<ProductionEntry> {
        self.send(self.client.get(self.endpoint(&["models", model_id])?))
            .await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingAccepted {
    pub message: String,
    pub model_id: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub forecast: BTreeMap<String, f64>,
    pub model_id: String,
    pub model_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedRow {
    pub timestamp: String,
    /// `-1` outlier, `1` inlier
    pub anomaly: i8,
    #[serde(flatten)]
    pub fields: BTreeMap<String, f64>,
}

impl DetectedRow {
    pub fn is_outlier(&self) -> bool {
        self.anomaly == -1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub message: String,
    pub model_id: String,
    pub model_version: String,
    pub anomalies: Vec<DetectedRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionEntry {
    pub version: String,
    pub path: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_list_models() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/models")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"store1_Autorizada": {"version": "v2", "path": "models/store1_Autorizada_model_v2.json", "metrics": {"rmse": 1.5, "mae": 1.0}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let models = client.list_models().await.unwrap();

        mock.assert_async().await;
        assert_eq!(models["store1_Autorizada"].version, "v2");
        assert_eq!(models["store1_Autorizada"].metrics["rmse"], 1.5);
        assert!(models["store1_Autorizada"].promoted_at.is_none());
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models/missing_Autorizada")
            .with_status(404)
            .with_body(r#"{"error": "no production model for 'missing_Autorizada'", "code": "not_found"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get_model("missing_Autorizada").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("not_found"));
        assert!(message.contains("missing_Autorizada"));
    }

    #[tokio::test]
    async fn test_csv_upload_goes_to_csv_route() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/forecast/store1/predict/csv")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("target_column".into(), "Autorizada".into()),
                Matcher::UrlEncoded("n_predict_steps".into(), "2".into()),
            ]))
            .match_header("content-type", "text/csv")
            .with_status(200)
            .with_body(
                r#"{"forecast": {"2023-01-06 00:00:00": 15.2, "2023-01-07 00:00:00": 16.0}, "model_id": "store1_Autorizada", "model_version": "v1"}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let upload = Upload::Csv("DIA;HORA;Autorizada\n01/01/2023;00;10\n".to_string());
        let response = client
            .predict("store1", "Autorizada", 2, &upload)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.forecast.len(), 2);
        assert_eq!(response.model_version, "v1");
    }

    #[tokio::test]
    async fn test_json_upload_carries_params_in_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/forecast/store1/train")
            .match_body(Matcher::PartialJson(json!({
                "target_column": "Autorizada",
                "records": [{"DIA": "01/01/2023", "HORA": "00", "Autorizada": 10}]
            })))
            .with_status(202)
            .with_body(
                r#"{"message": "started", "model_id": "store1_Autorizada", "rows": 1}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let upload = Upload::Json(vec![
            json!({"DIA": "01/01/2023", "HORA": "00", "Autorizada": 10}),
        ]);
        let accepted = client
            .train_forecast("store1", "Autorizada", &upload)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(accepted.rows, 1);
    }

    #[tokio::test]
    async fn test_detection_rows_keep_their_fields() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/anomaly/store1/detect/csv")
            .with_status(200)
            .with_body(
                r#"{"message": "ok", "model_id": "store1_multivariate_anomaly", "model_version": "v3",
                    "anomalies": [
                        {"timestamp": "2023-01-04 11:00:00", "Autorizada": 11000.0, "anomaly": -1},
                        {"timestamp": "2023-01-04 12:00:00", "Autorizada": 104.0, "anomaly": 1}
                    ]}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let response = client
            .detect("store1", &Upload::Csv(String::new()))
            .await
            .unwrap();

        assert_eq!(response.anomalies.len(), 2);
        assert!(response.anomalies[0].is_outlier());
        assert_eq!(response.anomalies[0].fields["Autorizada"], 11000.0);
        assert!(!response.anomalies[1].is_outlier());
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = ApiClient::new("http://localhost:8000/api/").unwrap();
        let url = client.endpoint(&["models", "a b"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/models/a%20b");
    }

    #[test]
    fn test_upload_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let csv = dir.path().join("rows.csv");
        std::fs::write(&csv, "DIA;HORA\n").unwrap();
        assert!(matches!(Upload::from_path(&csv).unwrap(), Upload::Csv(_)));

        let json_path = dir.path().join("rows.JSON");
        std::fs::write(&json_path, r#"[{"DIA": "01/01/2023", "HORA": "00"}]"#).unwrap();
        match Upload::from_path(&json_path).unwrap() {
            Upload::Json(records) => assert_eq!(records.len(), 1),
            Upload::Csv(_) => panic!("expected JSON upload"),
        }

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"DIA": "01/01/2023"}"#).unwrap();
        assert!(Upload::from_path(&bad).is_err());
    }
}
