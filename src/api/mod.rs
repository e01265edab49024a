use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    CGT_ANNUAL_EXCLUSION, CGT_INCLUSION_RATE, IncomeTaxResult, PRIMARY_RESIDENCE_EXCLUSION,
    ProjectionConfig, ProjectionYearResult, REBATES, TAX_BRACKETS, calculate_income_tax,
    run_projection, weighted_average_return,
};

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IncomeTaxPayload {
    annual_taxable_income: f64,
    age: i32,
    years_from_base: u32,
    bracket_inflation_rate_pct: f64,
}

impl Default for IncomeTaxPayload {
    fn default() -> Self {
        Self {
            annual_taxable_income: 0.0,
            age: 0,
            years_from_base: 0,
            bracket_inflation_rate_pct: 2.0,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionSummary {
    final_total: f64,
    weighted_average_return: f64,
    portfolio_depleted: bool,
    years_simulated: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionResponse {
    years: Vec<ProjectionYearResult>,
    summary: ProjectionSummary,
}

/// Wire view of a tax bracket; the open-ended top bracket serializes its
/// bound as `null` rather than an unrepresentable infinity.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BracketView {
    min: f64,
    max: Option<f64>,
    rate: f64,
    base: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RebatesView {
    primary: f64,
    secondary: f64,
    tertiary: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CgtConstantsView {
    annual_exclusion: f64,
    inclusion_rate: f64,
    primary_residence_exclusion: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BracketsResponse {
    brackets: Vec<BracketView>,
    rebates: RebatesView,
    cgt: CgtConstantsView,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn validate_config(config: &ProjectionConfig) -> Result<(), String> {
    if config.target_year < config.current_year {
        return Err("targetYear must be >= currentYear".to_string());
    }

    let mut seen = HashSet::new();
    for acc in &config.accounts {
        if acc.account_id.is_empty() {
            return Err("every account needs a non-empty accountId".to_string());
        }
        if !seen.insert(acc.account_id.as_str()) {
            return Err(format!("duplicate accountId: {}", acc.account_id));
        }
        if !acc.current_value.is_finite() || acc.current_value < 0.0 {
            return Err(format!(
                "account {} currentValue must be >= 0",
                acc.account_id
            ));
        }
    }

    let mut member_ids = HashSet::new();
    for m in &config.members {
        if !member_ids.insert(m.member_id.as_str()) {
            return Err(format!("duplicate memberId: {}", m.member_id));
        }
    }

    Ok(())
}

fn projection_response(config: &ProjectionConfig) -> Result<ProjectionResponse, String> {
    validate_config(config)?;

    let years = run_projection(config);
    let summary = ProjectionSummary {
        final_total: years.last().map_or(0.0, |y| y.total),
        weighted_average_return: weighted_average_return(&config.accounts),
        portfolio_depleted: years.iter().any(|y| y.portfolio_depleted),
        years_simulated: years.len(),
    };

    Ok(ProjectionResponse { years, summary })
}

fn brackets_response() -> BracketsResponse {
    BracketsResponse {
        brackets: TAX_BRACKETS
            .iter()
            .map(|b| BracketView {
                min: b.min,
                max: b.max.is_finite().then_some(b.max),
                rate: b.rate,
                base: b.base,
            })
            .collect(),
        rebates: RebatesView {
            primary: REBATES.primary,
            secondary: REBATES.secondary,
            tertiary: REBATES.tertiary,
        },
        cgt: CgtConstantsView {
            annual_exclusion: CGT_ANNUAL_EXCLUSION,
            inclusion_rate: CGT_INCLUSION_RATE,
            primary_residence_exclusion: PRIMARY_RESIDENCE_EXCLUSION,
        },
    }
}

fn income_tax_response(payload: &IncomeTaxPayload) -> Result<IncomeTaxResult, String> {
    if !payload.annual_taxable_income.is_finite() {
        return Err("annualTaxableIncome must be a finite number".to_string());
    }
    if !(0.0..=100.0).contains(&payload.bracket_inflation_rate_pct) {
        return Err("bracketInflationRatePct must be between 0 and 100".to_string());
    }

    Ok(calculate_income_tax(
        payload.annual_taxable_income,
        payload.age,
        payload.years_from_base,
        payload.bracket_inflation_rate_pct / 100.0,
    ))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    println!("Projection HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/projection", post(projection_handler))
        .route("/api/tax/income", post(income_tax_handler))
        .route("/api/tax/brackets", get(brackets_handler))
        .fallback(not_found_handler)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn projection_handler(Json(config): Json<ProjectionConfig>) -> Response {
    match projection_response(&config) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn income_tax_handler(Json(payload): Json<IncomeTaxPayload>) -> Response {
    match income_tax_response(&payload) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn brackets_handler() -> Response {
    json_response(StatusCode::OK, brackets_response())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
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
mod tests {
    use super::*;
    use crate::core::{AccountInput, AccountType};

    fn sample_config() -> ProjectionConfig {
        let raw = r#"{
            "accounts": [
                {
                    "accountId": "broker",
                    "accountName": "Brokerage",
                    "accountType": "non-retirement",
                    "currentValue": 300000,
                    "annualReturnPct": 10
                },
                {
                    "accountId": "tfsa",
                    "accountName": "Tax-free savings",
                    "accountType": "tax-free",
                    "currentValue": 100000,
                    "annualReturnPct": 2
                }
            ],
            "currentYear": 2025,
            "targetYear": 2027
        }"#;
        serde_json::from_str(raw).expect("sample config must parse")
    }

    #[test]
    fn projection_response_summarizes_the_run() {
        let config = sample_config();
        let response = projection_response(&config).expect("valid config");

        assert_eq!(response.summary.years_simulated, 3);
        assert_eq!(response.years.len(), 3);
        assert_eq!(
            response.summary.final_total,
            response.years.last().unwrap().total
        );
        // 300k at 10% and 100k at 2%, value-weighted.
        assert!((response.summary.weighted_average_return - 8.0).abs() < 1e-9);
        assert!(!response.summary.portfolio_depleted);
    }

    #[test]
    fn projection_rejects_reversed_year_range() {
        let mut config = sample_config();
        config.target_year = 2020;
        let err = projection_response(&config).expect_err("must reject");
        assert!(err.contains("targetYear"));
    }

    #[test]
    fn projection_rejects_duplicate_account_ids() {
        let mut config = sample_config();
        config.accounts.push(AccountInput {
            account_id: "broker".into(),
            account_name: "Duplicate".into(),
            account_type: AccountType::NonRetirement,
            ..AccountInput::default()
        });
        let err = projection_response(&config).expect_err("must reject");
        assert!(err.contains("duplicate accountId"));
    }

    #[test]
    fn projection_rejects_negative_account_values() {
        let mut config = sample_config();
        config.accounts[0].current_value = -1.0;
        let err = projection_response(&config).expect_err("must reject");
        assert!(err.contains("currentValue"));
    }

    #[test]
    fn income_tax_payload_parses_camel_case_with_defaults() {
        let payload: IncomeTaxPayload =
            serde_json::from_str(r#"{"annualTaxableIncome": 300000, "age": 40}"#)
                .expect("must parse");
        assert_eq!(payload.annual_taxable_income, 300_000.0);
        assert_eq!(payload.age, 40);
        assert_eq!(payload.years_from_base, 0);
        assert_eq!(payload.bracket_inflation_rate_pct, 2.0);

        let result = income_tax_response(&payload).expect("valid payload");
        assert_eq!(result.net_tax, 41_797.0);
    }

    #[test]
    fn income_tax_rejects_out_of_range_inflation_rate() {
        let payload = IncomeTaxPayload {
            bracket_inflation_rate_pct: 250.0,
            ..IncomeTaxPayload::default()
        };
        let err = income_tax_response(&payload).expect_err("must reject");
        assert!(err.contains("bracketInflationRatePct"));
    }

    #[test]
    fn brackets_response_leaves_the_top_bracket_open_ended() {
        let response = brackets_response();
        assert_eq!(response.brackets.len(), 7);
        assert_eq!(response.brackets[0].max, Some(237_100.0));
        assert_eq!(response.brackets[6].max, None);
        assert_eq!(response.rebates.primary, 17_235.0);
        assert_eq!(response.cgt.annual_exclusion, 40_000.0);
        assert_eq!(response.cgt.inclusion_rate, 0.4);

        let json = serde_json::to_string(&response).expect("must serialize");
        assert!(json.contains("\"max\":null"));
        assert!(json.contains("\"rebates\""));
        assert!(json.contains("\"annualExclusion\""));
    }

    #[test]
    fn projection_response_serializes_camel_case_year_rows() {
        let response = projection_response(&sample_config()).expect("valid config");
        let json = serde_json::to_string(&response).expect("must serialize");
        assert!(json.contains("\"years\""));
        assert!(json.contains("\"summary\""));
        assert!(json.contains("\"finalTotal\""));
        assert!(json.contains("\"netCashFlow\""));
        assert!(json.contains("\"accountDetails\""));
    }
}
