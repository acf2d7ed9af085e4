use axum::{
    Router,
    extract::{Json, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::core::{
    AcceleratedCalculator, DEFAULT_BLOCK_WIDTH, DriftReport, EngineError, ExecutionConfig,
    PayrollField, Plan, PlanSummary, PolicySet, Record, ReferenceCalculator, TaxResult, compare,
    population,
};

pub mod cli;

pub use cli::{Cli, Command, RunConfig, build_run_config, load_policies};

/// Column sums over a computed batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTotals {
    pub federal_tax: f64,
    pub jurisdiction_tax: f64,
    pub payroll: BTreeMap<&'static str, f64>,
    pub ledger: BTreeMap<String, f64>,
}

impl BatchTotals {
    pub fn from_results(results: &[TaxResult<'_>], ledger_names: &[String]) -> Self {
        let mut totals = Self::default();
        for field in PayrollField::ALL {
            totals.payroll.insert(field.name(), 0.0);
        }
        for result in results {
            totals.federal_tax += result.federal_tax;
            totals.jurisdiction_tax += result.jurisdiction_tax;
            for field in PayrollField::ALL {
                *totals.payroll.entry(field.name()).or_default() += field.get(result);
            }
            for (name, posting) in ledger_names.iter().zip(result.ledger.iter().flatten()) {
                *totals.ledger.entry(name.clone()).or_default() += posting;
            }
        }
        totals
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub records: usize,
    pub seed: u64,
    pub repeats: usize,
    pub execution: ExecutionConfig,
    pub plan: PlanSummary,
    pub totals: BatchTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub within_tolerance: Option<bool>,
}

/// Generates the configured population and computes it `repeat` times with
/// one set of buffers and result objects.
pub fn run_batch(config: &RunConfig, policies: &PolicySet) -> Result<BatchReport, EngineError> {
    let plan = Plan::build(policies)?;
    let records = population::generate(config.records, config.seed);
    let calculator = AcceleratedCalculator::new(&plan, config.execution)?;

    let buckets = plan.ledger_rates().len();
    let mut results: Vec<TaxResult<'_>> = records
        .iter()
        .map(|record| match config.execution.include_ledger {
            true => TaxResult::with_ledger(record, buckets),
            false => TaxResult::new(record),
        })
        .collect();
    let mut buffers = calculator.buffers(records.len())?;
    for pass in 0..config.repeat {
        calculator.compute_into(&records, &mut buffers, &mut results)?;
        tracing::debug!(pass, "batch pass complete");
    }

    let totals = BatchTotals::from_results(&results, plan.ledger_names());
    let (drift, within_tolerance) = match config.verify {
        Some(options) => {
            let reference = ReferenceCalculator::new(policies)
                .with_ledger(config.execution.include_ledger)
                .compute(&records);
            let report = compare(&results, &reference, options.sample_stride)?;
            let within = report.within(options.tolerance);
            if !within {
                tracing::warn!(
                    max_rel_delta = report.max_rel_delta,
                    tolerance = options.tolerance,
                    "accelerated results drifted from reference"
                );
            }
            (Some(report), Some(within))
        }
        None => (None, None),
    };

    tracing::info!(
        records = records.len(),
        repeats = config.repeat,
        federal_tax = totals.federal_tax,
        "batch finished"
    );
    Ok(BatchReport {
        records: records.len(),
        seed: config.seed,
        repeats: config.repeat,
        execution: config.execution,
        plan: plan.summary(),
        totals,
        drift,
        within_tolerance,
    })
}

/// Policies and their compiled plan, shared read-only by every request.
pub struct AppState {
    policies: PolicySet,
    plan: Plan,
}

impl AppState {
    pub fn new(policies: PolicySet) -> Result<Self, EngineError> {
        let plan = Plan::build(&policies)?;
        Ok(Self { policies, plan })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputePayload {
    records: Vec<Record>,
    block_width: Option<usize>,
    include_ledger: Option<bool>,
    #[serde(default)]
    verify: bool,
    sample_stride: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeResponse<'a> {
    results: Vec<TaxResult<'a>>,
    totals: BatchTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    drift: Option<DriftReport>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn compute_batch<'a>(
    state: &AppState,
    payload: &'a ComputePayload,
) -> Result<ComputeResponse<'a>, EngineError> {
    let config = ExecutionConfig {
        block_width: payload.block_width.unwrap_or(DEFAULT_BLOCK_WIDTH),
        include_ledger: payload.include_ledger.unwrap_or(true),
    };
    let results = AcceleratedCalculator::new(&state.plan, config)?.compute(&payload.records)?;
    let drift = match payload.verify {
        true => {
            let reference = ReferenceCalculator::new(&state.policies)
                .with_ledger(config.include_ledger)
                .compute(&payload.records);
            Some(compare(
                &results,
                &reference,
                payload.sample_stride.unwrap_or(1),
            )?)
        }
        false => None,
    };
    let totals = BatchTotals::from_results(&results, state.plan.ledger_names());
    Ok(ComputeResponse {
        results,
        totals,
        drift,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/plan", get(plan_handler))
        .route("/api/compute", post(compute_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16, state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(Arc::new(state));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "taxmatrix HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn plan_handler(State(state): State<Arc<AppState>>) -> Response {
    json_response(StatusCode::OK, state.plan.summary())
}

async fn compute_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ComputePayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    match compute_batch(&state, &payload) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn compute_payload_from_json(json: &str) -> Result<ComputePayload, String> {
    serde_json::from_str::<ComputePayload>(json).map_err(|e| format!("Invalid API JSON payload: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::cli::VerifyOptions;
    use crate::core::Jurisdiction;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_state() -> AppState {
        AppState::new(PolicySet::standard().expect("standard policies")).expect("plan builds")
    }

    fn sample_config() -> RunConfig {
        RunConfig {
            records: 300,
            seed: 11,
            execution: ExecutionConfig::default(),
            policy: None,
            verify: Some(VerifyOptions {
                sample_stride: 1,
                tolerance: 1e-9,
            }),
            repeat: 2,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn compute_payload_parses_web_keys() {
        let payload = compute_payload_from_json(
            r#"{
                "records": [
                    {"id": 1, "name": "Avery Chen", "jurisdiction": "NY", "income": 85000.0}
                ],
                "blockWidth": 4,
                "includeLedger": false,
                "verify": true,
                "sampleStride": 2
            }"#,
        )
        .expect("valid payload");
        assert_eq!(payload.records[0].jurisdiction, Jurisdiction::NewYork);
        assert_eq!(payload.block_width, Some(4));
        assert_eq!(payload.include_ledger, Some(false));
        assert!(payload.verify);
        assert_eq!(payload.sample_stride, Some(2));
    }

    #[test]
    fn compute_payload_rejects_unknown_jurisdiction() {
        let err = compute_payload_from_json(
            r#"{"records": [{"id": 1, "name": "X", "jurisdiction": "ZZ", "income": 1.0}]}"#,
        )
        .expect_err("unknown jurisdiction");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn compute_batch_matches_reference_and_totals() {
        let state = sample_state();
        let payload = ComputePayload {
            records: population::generate(40, 5),
            block_width: Some(3),
            include_ledger: None,
            verify: true,
            sample_stride: None,
        };
        let response = compute_batch(&state, &payload).expect("valid batch");
        let drift = response.drift.expect("verification requested");
        assert_eq!(drift.checked, 40);
        assert!(drift.within(1e-9));

        let expected: f64 = response.results.iter().map(|r| r.federal_tax).sum();
        assert_approx(response.totals.federal_tax, expected);
        assert_eq!(response.totals.ledger.len(), 4);
    }

    #[test]
    fn compute_batch_rejects_negative_income() {
        let state = sample_state();
        let mut records = population::generate(3, 1);
        records[2].income = -5.0;
        let payload = ComputePayload {
            records,
            block_width: None,
            include_ledger: None,
            verify: false,
            sample_stride: None,
        };
        let err = compute_batch(&state, &payload).expect_err("negative income");
        assert!(err.to_string().contains("income"));
    }

    #[test]
    fn run_batch_reuses_buffers_across_repeats() {
        let policies = PolicySet::standard().expect("standard policies");
        let mut config = sample_config();
        let repeated = run_batch(&config, &policies).expect("batch runs");
        config.repeat = 1;
        let single = run_batch(&config, &policies).expect("batch runs");

        assert_eq!(repeated.totals, single.totals);
        assert_eq!(repeated.within_tolerance, Some(true));
        assert_eq!(repeated.repeats, 2);
    }

    #[test]
    fn run_batch_without_ledger_reports_no_ledger_totals() {
        let policies = PolicySet::standard().expect("standard policies");
        let mut config = sample_config();
        config.execution.include_ledger = false;
        config.verify = None;
        let report = run_batch(&config, &policies).expect("batch runs");
        assert!(report.totals.ledger.is_empty());
        assert!(report.drift.is_none());
        assert_eq!(report.totals.payroll.len(), PayrollField::ALL.len());
    }

    #[test]
    fn batch_report_serialization_contains_expected_fields() {
        let policies = PolicySet::standard().expect("standard policies");
        let report = run_batch(&sample_config(), &policies).expect("batch runs");
        let value = serde_json::to_value(&report).expect("serializable");
        for key in ["records", "execution", "plan", "totals", "drift", "withinTolerance"] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["execution"]["blockWidth"], DEFAULT_BLOCK_WIDTH);
        assert!(value["totals"]["payroll"].get("employeeSocialSecurity").is_some());
    }

    #[tokio::test]
    async fn plan_endpoint_returns_summary() {
        let state = Arc::new(sample_state());
        let response = plan_handler(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        let body = body_json(response).await;
        assert_eq!(
            body["featureCount"],
            serde_json::json!(state.plan.feature_count())
        );
    }

    #[tokio::test]
    async fn compute_endpoint_reports_contract_errors_as_bad_request() {
        let state = Arc::new(sample_state());
        let payload = ComputePayload {
            records: population::generate(2, 3),
            block_width: Some(0),
            include_ledger: None,
            verify: false,
            sample_stride: None,
        };
        let response = compute_handler(State(state), Ok(Json(payload))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().is_some_and(|msg| !msg.is_empty()));
    }

    #[tokio::test]
    async fn unknown_routes_are_json_not_found() {
        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Not found");
    }
}
