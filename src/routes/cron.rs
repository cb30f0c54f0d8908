//! Settlement Trigger Endpoint
//!
//! 외부 스케줄러(cron)가 주기적으로 호출한다. `X-CRON-KEY` 공유 비밀로 보호.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::{error::ApiError, services::settlement, AppState};

use super::CRON_KEY_HEADER;

#[derive(Debug, Serialize)]
pub struct CronResponse {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// 헤더의 키가 설정된 키와 같은지 확인. 키가 설정되지 않았으면 항상 거부.
pub fn cron_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let provided = headers
        .get(CRON_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    matches!((provided, expected), (Some(p), Some(e)) if !e.is_empty() && p == e)
}

/// POST /cron/daily-returns
pub async fn daily_returns(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CronResponse>, ApiError> {
    if !cron_authorized(&headers, state.config.cron_key.as_deref()) {
        tracing::warn!("Rejected settlement trigger with invalid cron key");
        return Err(ApiError::Unauthorized);
    }

    let report = settlement::run_daily_settlement(state.db.as_ref(), chrono::Utc::now()).await?;

    Ok(Json(CronResponse {
        processed: report.processed,
        skipped: report.skipped,
        failed: report.failed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cron_key_check() {
        let mut headers = HeaderMap::new();
        assert!(!cron_authorized(&headers, Some("secret")));

        headers.insert(CRON_KEY_HEADER, HeaderValue::from_static("wrong"));
        assert!(!cron_authorized(&headers, Some("secret")));

        headers.insert(CRON_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(cron_authorized(&headers, Some("secret")));
        assert!(!cron_authorized(&headers, None));
    }
}
