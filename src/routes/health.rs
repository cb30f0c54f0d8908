//! Health Check Endpoint
//!
//! # Interview Q&A
//!
//! Q: DB 연결 상태도 체크하는 이유는?
//! A: "깊은 헬스체크"(deep health check) 패턴
//!    - 단순 200 OK: 프로세스 살아있음
//!    - DB 체크: 원장 쓰기가 실제로 가능한 상태
//!    - 로드밸런서가 degraded 인스턴스로 webhook 을 보내지 않게 한다
//!
//! Q: 게이트웨이는 왜 호출해 보지 않는가?
//! A: 헬스체크마다 외부 API 를 부르면 rate limit 을 소모한다.
//!    자격 증명 설정 여부만 보고한다.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: DatabaseStatus,
    pub gateway_configured: bool,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

/// GET /health
pub async fn health_check(
    State(state): State<AppState>,
) -> Json<HealthResponse> {
    let db_start = std::time::Instant::now();
    let database = match state.db.health_check().await {
        Ok(_) => DatabaseStatus {
            connected: true,
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::error!("Health check database error: {:?}", e);
            DatabaseStatus {
                connected: false,
                latency_ms: None,
            }
        }
    };

    let gateway = &state.config.gateway;

    Json(HealthResponse {
        status: if database.connected { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        gateway_configured: gateway.client_id.is_some() && gateway.client_secret.is_some(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
