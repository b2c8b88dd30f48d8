//! Recommendation predictor client
//!
//! Provides a unified interface over the external GNN service:
//! - HTTP client speaking the service's JSON dialect
//! - Scripted mock for tests and local runs
//!
//! The service ranks diplomas for a student profile. Items are decoded one by
//! one so a single malformed entry does not sink the whole response.

use crate::config::{PredictorConfig, ScoreScale};
use crate::errors::{AppError, Result};
use crate::graph::{DiplomaAttributes, MatchScore, Profile};
use crate::metrics;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One scored diploma suggested by the predictor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub attributes: DiplomaAttributes,
    pub score: MatchScore,
}

impl Prediction {
    pub fn new(attributes: DiplomaAttributes, score: MatchScore) -> Self {
        Self { attributes, score }
    }
}

/// Per-item decode outcome; the list position is the predictor rank.
pub type PredictedItem = Result<Prediction>;

/// Trait for recommendation prediction
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Ranked suggestions for a profile. An empty list means no suggestions.
    async fn predict(&self, profile: &Profile) -> Result<Vec<PredictedItem>>;

    /// Ask the service to retrain its model
    async fn retrain(&self) -> Result<()>;

    /// Get the provider name
    fn provider(&self) -> &str;
}

// ============================================================================
// HTTP predictor
// ============================================================================

/// Client for the GNN recommendation service
pub struct HttpPredictor {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    call_deadline: Duration,
    max_retries: u32,
    score_scale: ScoreScale,
}

#[derive(Serialize)]
struct RecommendRequest<'a> {
    #[serde(rename = "Matieres_Etudiant")]
    subjects: &'a [String],

    #[serde(rename = "Career")]
    careers: &'a [String],

    #[serde(rename = "Filiere")]
    filiere: Option<&'a str>,

    #[serde(rename = "Durée")]
    duration: Option<i32>,

    #[serde(rename = "Mention_Bac")]
    mention: Option<&'a str>,
}

#[derive(Deserialize)]
struct PredictedDiploma {
    #[serde(rename = "Nom_Diplôme")]
    name: Option<String>,

    #[serde(rename = "Ecole")]
    school: Option<String>,

    #[serde(rename = "Ville")]
    city: Option<String>,

    #[serde(rename = "Durée")]
    duration: Option<f64>,

    #[serde(rename = "Matieres_Diplome")]
    subjects: Option<Vec<String>>,

    #[serde(rename = "Ancienne_Diplome")]
    previous_diplomas: Option<Vec<String>>,

    #[serde(rename = "Employement_Opportunities")]
    employment_opportunities: Option<Vec<String>>,

    #[serde(rename = "Matieres_Etudiant")]
    student_subjects: Option<Vec<String>>,

    #[serde(rename = "Career")]
    careers: Option<Vec<String>>,

    #[serde(rename = "Filiere")]
    filieres: Option<Vec<String>>,

    #[serde(rename = "Mention_Bac")]
    mention: Option<String>,

    match_percentage: Option<f64>,
}

impl PredictedDiploma {
    fn into_prediction(self, scale: ScoreScale) -> Result<Prediction> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AppError::MissingField {
                field: "Nom_Diplôme".to_string(),
            })?;

        let raw = self.match_percentage.ok_or_else(|| AppError::MissingField {
            field: "match_percentage".to_string(),
        })?;
        let score = MatchScore::from_scaled(raw, scale).map_err(|e| {
            AppError::validation("match_percentage", format!("{}: {}", name, e))
        })?;

        let duration = match self.duration {
            Some(d) if d.is_finite() && d.fract() == 0.0 && d.abs() <= i32::MAX as f64 => {
                Some(d as i32)
            }
            Some(d) => {
                return Err(AppError::validation(
                    "duration",
                    format!("{}: {} is not a whole number of years", name, d),
                ))
            }
            None => None,
        };

        Ok(Prediction {
            attributes: DiplomaAttributes {
                name,
                city: self.city,
                school: self.school,
                duration,
                mention: self.mention,
                careers: self.careers.unwrap_or_default(),
                employment_opportunities: self.employment_opportunities.unwrap_or_default(),
                filieres: self.filieres.unwrap_or_default(),
                subjects: self.subjects.unwrap_or_default(),
                student_subjects: self.student_subjects.unwrap_or_default(),
                previous_diplomas: self.previous_diplomas.unwrap_or_default(),
            },
            score,
        })
    }
}

impl HttpPredictor {
    /// Create a client from configuration
    pub fn new(config: &PredictorConfig) -> Result<Self> {
        Self::from_parts(
            &config.base_url,
            config.timeout(),
            config.call_deadline(),
            config.max_retries,
            config.score_scale,
        )
    }

    pub fn from_parts(
        base_url: &str,
        timeout: Duration,
        call_deadline: Duration,
        max_retries: u32,
        score_scale: ScoreScale,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: timeout,
            call_deadline,
            max_retries,
            score_scale,
        })
    }

    /// Run `op` with exponential backoff under the overall call deadline.
    ///
    /// Transport failures are retried, at most `max_retries` times.
    async fn with_retry<T, F, Fut>(&self, endpoint: &'static str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let op = &op;

        let policy = ExponentialBackoff {
            current_interval: Duration::from_millis(200),
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.call_deadline),
            ..Default::default()
        };

        let call = retry(policy, || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            match op().await {
                Ok(value) => Ok(value),
                // A malformed body will not fix itself on an immediate retry
                Err(e @ AppError::InvalidPredictorPayload { .. }) => Err(backoff::Error::permanent(e)),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        endpoint,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Predictor request failed, retrying"
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        });

        let result = match tokio::time::timeout(self.call_deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::PredictorTimeout {
                timeout_ms: self.call_deadline.as_millis() as u64,
            }),
        };

        metrics::record_predictor(endpoint, started.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn post_recommend(&self, request: &RecommendRequest<'_>) -> Result<Vec<PredictedItem>> {
        let url = format!("{}/api/recommend/", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::PredictorUnavailable {
                message: format!("recommend returned {}: {}", status, body),
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e)
            } else {
                AppError::InvalidPredictorPayload {
                    message: format!("Failed to parse response: {}", e),
                }
            }
        })?;

        decode_items(body, self.score_scale)
    }

    async fn get_retrain(&self) -> Result<()> {
        let url = format!("{}/api/retrain/", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(AppError::PredictorUnavailable {
                message: format!("retrain returned {}", response.status()),
            });
        }
        Ok(())
    }

    fn transport_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::PredictorTimeout {
                timeout_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            AppError::PredictorUnavailable {
                message: format!("Request failed: {}", e),
            }
        }
    }
}

/// Split a response body into per-item outcomes.
fn decode_items(body: serde_json::Value, scale: ScoreScale) -> Result<Vec<PredictedItem>> {
    let serde_json::Value::Array(items) = body else {
        return Err(AppError::InvalidPredictorPayload {
            message: "expected a JSON array of diplomas".to_string(),
        });
    };

    Ok(items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<PredictedDiploma>(item)
                .map_err(|e| AppError::InvalidPredictorPayload {
                    message: format!("malformed item: {}", e),
                })
                .and_then(|raw| raw.into_prediction(scale))
        })
        .collect())
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, profile: &Profile) -> Result<Vec<PredictedItem>> {
        let request = RecommendRequest {
            subjects: &profile.subjects,
            careers: &profile.career_aspirations,
            filiere: profile.filiere.as_deref(),
            duration: profile.duration,
            mention: profile.mention.as_deref(),
        };

        let request = &request;
        let items = self
            .with_retry("recommend", move || self.post_recommend(request))
            .await?;

        debug!(email = %profile.email, items = items.len(), "Predictor responded");
        Ok(items)
    }

    async fn retrain(&self) -> Result<()> {
        self.with_retry("retrain", || self.get_retrain()).await
    }

    fn provider(&self) -> &str {
        "http"
    }
}

// ============================================================================
// Mock predictor
// ============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Items(Vec<std::result::Result<Prediction, String>>),
    Unavailable(String),
}

/// Mock predictor for testing
///
/// Answers from a per-email script; unknown emails get no suggestions.
#[derive(Default)]
pub struct MockPredictor {
    scripts: Mutex<HashMap<String, Scripted>>,
    fail_retrain: bool,
    predict_calls: AtomicUsize,
    retrain_calls: AtomicUsize,
}

impl MockPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose retrain call always fails
    pub fn with_failing_retrain() -> Self {
        Self {
            fail_retrain: true,
            ..Self::default()
        }
    }

    /// Script a successful response
    pub fn respond(&self, email: &str, predictions: Vec<Prediction>) {
        self.script(email, Scripted::Items(predictions.into_iter().map(Ok).collect()));
    }

    /// Script a response where some items fail to decode
    pub fn respond_items(&self, email: &str, items: Vec<std::result::Result<Prediction, String>>) {
        self.script(email, Scripted::Items(items));
    }

    /// Script an unavailable predictor for this email
    pub fn fail(&self, email: &str, message: &str) {
        self.script(email, Scripted::Unavailable(message.to_string()));
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::Relaxed)
    }

    pub fn retrain_calls(&self) -> usize {
        self.retrain_calls.load(Ordering::Relaxed)
    }

    fn script(&self, email: &str, scripted: Scripted) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.insert(email.to_string(), scripted);
    }
}

#[async_trait]
impl Predictor for MockPredictor {
    async fn predict(&self, profile: &Profile) -> Result<Vec<PredictedItem>> {
        self.predict_calls.fetch_add(1, Ordering::Relaxed);

        let scripted = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&profile.email)
            .cloned();

        match scripted {
            None => Ok(Vec::new()),
            Some(Scripted::Unavailable(message)) => Err(AppError::PredictorUnavailable { message }),
            Some(Scripted::Items(items)) => Ok(items
                .into_iter()
                .map(|item| item.map_err(|message| AppError::InvalidPredictorPayload { message }))
                .collect()),
        }
    }

    async fn retrain(&self) -> Result<()> {
        self.retrain_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_retrain {
            return Err(AppError::PredictorUnavailable {
                message: "retrain failed".to_string(),
            });
        }
        Ok(())
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

/// Create a predictor based on configuration
pub fn create_predictor(config: &PredictorConfig) -> Result<Arc<dyn Predictor>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpPredictor::new(config)?)),
        "mock" => {
            warn!("Using mock predictor, every user gets an empty recommendation set");
            Ok(Arc::new(MockPredictor::new()))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown predictor provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: &str, max_retries: u32) -> HttpPredictor {
        HttpPredictor::from_parts(
            base_url,
            Duration::from_millis(300),
            Duration::from_secs(5),
            max_retries,
            ScoreScale::Percent,
        )
        .unwrap()
    }

    fn profile() -> Profile {
        Profile {
            subjects: vec!["Maths".into()],
            career_aspirations: vec!["Engineer".into()],
            filiere: Some("Sciences Maths".into()),
            duration: Some(5),
            mention: Some("Bien".into()),
            ..Profile::new("a@x.com")
        }
    }

    #[tokio::test]
    async fn test_decodes_items_independently() {
        let router = Router::new().route(
            "/api/recommend/",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["Matieres_Etudiant"], json!(["Maths"]));
                assert_eq!(body["Durée"], json!(5));
                assert_eq!(body["Mention_Bac"], json!("Bien"));
                Json(json!([
                    {
                        "Nom_Diplôme": "CS-BSc",
                        "Ecole": "ENSIAS",
                        "Ville": "Rabat",
                        "Durée": 3,
                        "Career": ["Software Engineer"],
                        "Matieres_Diplome": ["Algorithms", "Algorithms"],
                        "Ancienne_Diplome": null,
                        "match_percentage": 92.456
                    },
                    { "Nom_Diplôme": "Broken", "match_percentage": 140.0 },
                    { "Ecole": "nameless", "match_percentage": 50.0 },
                    { "Nom_Diplôme": "Math-BSc", "match_percentage": 61 }
                ]))
            }),
        );
        let predictor = client(&serve(router).await, 0);

        let items = predictor.predict(&profile()).await.unwrap();
        assert_eq!(items.len(), 4);

        let first = items[0].as_ref().unwrap();
        assert_eq!(first.attributes.name, "CS-BSc");
        assert_eq!(first.attributes.city.as_deref(), Some("Rabat"));
        assert_eq!(first.attributes.duration, Some(3));
        assert_eq!(first.score.basis_points(), 9246);

        assert!(matches!(items[1], Err(AppError::Validation { .. })));
        assert!(matches!(items[2], Err(AppError::MissingField { .. })));
        assert_eq!(items[3].as_ref().unwrap().score.basis_points(), 6100);
    }

    #[tokio::test]
    async fn test_non_array_body_is_invalid_payload() {
        let router = Router::new().route(
            "/api/recommend/",
            post(|| async { Json(json!({ "error": "nope" })) }),
        );
        let predictor = client(&serve(router).await, 0);

        let err = predictor.predict(&profile()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPredictorPayload { .. }));
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_unavailable() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/api/recommend/",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded")
                }
            }),
        );
        let predictor = client(&serve(router).await, 2);

        let err = predictor.predict(&profile()).await.unwrap_err();
        assert!(matches!(err, AppError::PredictorUnavailable { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let router = Router::new().route(
            "/api/recommend/",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!([]))
            }),
        );
        let predictor = client(&serve(router).await, 0);

        let err = predictor.predict(&profile()).await.unwrap_err();
        assert!(matches!(err, AppError::PredictorTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_retrain_hits_endpoint() {
        let router = Router::new().route("/api/retrain/", get(|| async { "ok" }));
        let predictor = client(&serve(router).await, 0);
        predictor.retrain().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let predictor = client("http://127.0.0.1:9", 0);
        let err = predictor.retrain().await.unwrap_err();
        assert!(matches!(err, AppError::PredictorUnavailable { .. }));
    }

    #[test]
    fn test_fraction_scale() {
        let items = decode_items(
            json!([{ "Nom_Diplôme": "CS-BSc", "match_percentage": 0.5 }]),
            ScoreScale::Fraction,
        )
        .unwrap();
        assert_eq!(items[0].as_ref().unwrap().score.basis_points(), 5000);
    }

    #[tokio::test]
    async fn test_mock_scripts() {
        let mock = MockPredictor::new();
        mock.respond(
            "a@x.com",
            vec![Prediction::new(
                DiplomaAttributes::named("CS-BSc"),
                MatchScore::from_percent(92.0).unwrap(),
            )],
        );
        mock.fail("b@x.com", "down");

        assert_eq!(mock.predict(&profile()).await.unwrap().len(), 1);
        assert!(mock.predict(&Profile::new("b@x.com")).await.is_err());
        assert!(mock.predict(&Profile::new("c@x.com")).await.unwrap().is_empty());
        assert_eq!(mock.predict_calls(), 3);
    }

    #[test]
    fn test_create_predictor_rejects_unknown_provider() {
        let config = PredictorConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_predictor(&config),
            Err(AppError::Configuration { .. })
        ));

        let mock = PredictorConfig {
            provider: "mock".into(),
            ..Default::default()
        };
        assert_eq!(create_predictor(&mock).unwrap().provider(), "mock");
    }
}
