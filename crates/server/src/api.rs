//! Admin and execution HTTP handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use meridian_common::models::{ErrorBody, EvictionResponse, ExecuteRequest};
use meridian_common::value::Value;
use meridian_error::{ErrorCategory, ErrorCode, MeridianError};
use meridian_plan::{ExecutionPlan, MapParameterAccessor};
use meridian_relational::{PoolRegistry, PoolStats, RegistrySnapshot};
use meridian_runtime::{Executor, TdsFraming};
use serde_json::json;

use crate::EXECUTION_COUNT;

pub struct AppState {
    pub server_name: String,
    pub registry: Arc<PoolRegistry>,
    pub executor: Arc<Executor>,
}

pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/server/v1/executorInfo", get(executor_info))
        .route(
            "/server/v1/executorInfo/relational/pools/{pool_name}",
            get(pool_stats).delete(evict_pool),
        )
        .route(
            "/server/v1/executorInfo/relational/{user}",
            get(pools_for_user),
        )
        .route("/server/v1/execute", post(execute_plan))
}

/// `MeridianError` mapped onto an HTTP response.
#[derive(Debug)]
pub struct ApiError(MeridianError);

impl From<MeridianError> for ApiError {
    fn from(err: MeridianError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        tracing::error!(target: "errors", code = %err.code, message = %err.message);

        let status = match err.code {
            ErrorCode::PoolNotFound => StatusCode::NOT_FOUND,
            ErrorCode::PoolExhausted | ErrorCode::PoolClosed | ErrorCode::ConnectionFailed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => match err.code.category() {
                ErrorCategory::Config => StatusCode::BAD_REQUEST,
                ErrorCategory::Execution => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        let body = ErrorBody {
            code: err.code.as_str(),
            message: err.message,
            hint: err.hint,
        };
        (status, Json(body)).into_response()
    }
}

async fn executor_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot: RegistrySnapshot = state.registry.snapshot();
    Json(json!({
        "serverName": state.server_name,
        "relational": snapshot,
    }))
}

async fn pool_stats(
    State(state): State<Arc<AppState>>,
    Path(pool_name): Path<String>,
) -> Result<Json<PoolStats>, ApiError> {
    let pool = state.registry.find_by_name(&pool_name).ok_or_else(|| {
        MeridianError::new(
            ErrorCode::PoolNotFound,
            format!("No pool named '{}'", pool_name),
        )
        .with_hint("GET /server/v1/executorInfo lists known pools")
    })?;
    Ok(Json(pool.stats()))
}

async fn evict_pool(
    State(state): State<Arc<AppState>>,
    Path(pool_name): Path<String>,
) -> Result<Json<EvictionResponse>, ApiError> {
    let (evicted_idle, remaining_active) = state.registry.soft_evict(&pool_name).await?;
    Ok(Json(EvictionResponse {
        pool: pool_name,
        evicted_idle,
        remaining_active,
    }))
}

async fn pools_for_user(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Json<serde_json::Value> {
    let pools = state.registry.pools_for_user(&user);
    Json(json!({ "user": user, "pools": pools }))
}

async fn execute_plan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    let user = headers
        .get("x-meridian-user")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let plan = ExecutionPlan::from_json(&request.plan)?;
    let accessor = MapParameterAccessor::new(scalar_params(&request.params));
    let framing = match request.format.as_deref() {
        Some("default") => TdsFraming::Default,
        _ => TdsFraming::Pure,
    };

    let result = state
        .executor
        .execute(&plan, &accessor, &request.params, &user)
        .await?;
    EXECUTION_COUNT.inc();

    let body = result.stream(Vec::new(), framing)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

/// Typed view over the raw parameter map: scalars only, non-scalars are
/// left to the selector's raw-parameter fallback.
fn scalar_params(raw: &HashMap<String, serde_json::Value>) -> HashMap<String, Value> {
    raw.iter()
        .filter_map(|(k, v)| Value::try_from(v).ok().map(|value| (k.clone(), value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meridian_common::config::PoolSettings;
    use meridian_error::Result;
    use meridian_relational::vendor::sqlite::SqliteManager;
    use meridian_relational::{
        AuthenticationStrategyKey, ConnectionKey, ConnectionOpener, Credential,
        DataSourceSpecificationKey, DatabaseManager, LiveConnection, RowSet,
        StaticCredentialProvider, VendorRegistry,
    };

    struct EchoConnection;

    #[async_trait]
    impl LiveConnection for EchoConnection {
        async fn execute(&self, _sql: &str) -> Result<RowSet> {
            Ok(RowSet {
                columns: vec!["id".to_string()],
                rows: vec![vec![Value::Integer(1)]],
            })
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct EchoOpener;

    #[async_trait]
    impl ConnectionOpener for EchoOpener {
        async fn open(
            &self,
            _url: &str,
            _credential: &Credential,
        ) -> Result<Box<dyn LiveConnection>> {
            Ok(Box::new(EchoConnection))
        }
    }

    fn state() -> Arc<AppState> {
        let vendors = Arc::new(
            VendorRegistry::builder()
                .register(Arc::new(SqliteManager::new(Arc::new(EchoOpener))))
                .build(),
        );
        let registry = Arc::new(PoolRegistry::new());
        let executor = Arc::new(Executor::new(
            vendors,
            Arc::clone(&registry),
            Arc::new(StaticCredentialProvider::new("svc", "")),
            PoolSettings::default(),
        ));
        Arc::new(AppState {
            server_name: "test".to_string(),
            registry,
            executor,
        })
    }

    fn seed_pool(state: &Arc<AppState>) -> String {
        let manager: Arc<dyn DatabaseManager> =
            Arc::new(SqliteManager::new(Arc::new(EchoOpener)));
        let key = ConnectionKey::new(
            DataSourceSpecificationKey::Embedded {
                path: "/tmp/t.db".to_string(),
            },
            AuthenticationStrategyKey::Anonymous,
        );
        let pool = state
            .registry
            .get_or_create(
                key,
                2,
                &manager,
                Arc::new(StaticCredentialProvider::new("svc", "")),
                "alice",
            )
            .unwrap();
        pool.name().to_string()
    }

    #[tokio::test]
    async fn test_executor_info_snapshot() {
        let state = state();
        seed_pool(&state);

        let Json(body) = executor_info(State(Arc::clone(&state))).await;
        assert_eq!(body["serverName"], "test");
        assert_eq!(body["relational"]["pools"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pool_stats_unknown_pool_is_404() {
        let state = state();
        let err = pool_stats(State(state), Path("missing".to_string()))
            .await
            .err()
            .unwrap();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_evict_pool_reports_counts() {
        let state = state();
        let name = seed_pool(&state);

        let Json(body) = evict_pool(State(state), Path(name.clone())).await.unwrap();
        assert_eq!(body.pool, name);
        assert_eq!(body.evicted_idle, 0);
        assert_eq!(body.remaining_active, 0);
    }

    #[tokio::test]
    async fn test_pools_grouped_by_user() {
        let state = state();
        seed_pool(&state);

        let Json(body) = pools_for_user(State(Arc::clone(&state)), Path("alice".to_string())).await;
        assert_eq!(body["pools"].as_array().unwrap().len(), 1);

        let Json(body) = pools_for_user(State(state), Path("bob".to_string())).await;
        assert!(body["pools"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_plan_streams_tds() {
        let state = state();
        let request = ExecuteRequest {
            plan: json!({
                "root": {
                    "_type": "relational",
                    "vendor": "sqlite",
                    "datasource": { "_type": "embedded", "path": "/tmp/t.db" },
                    "auth": { "_type": "anonymous" },
                    "statements": [ { "sql": "SELECT id FROM t" } ]
                }
            }),
            params: HashMap::new(),
            format: None,
        };

        let response = execute_plan(State(state), HeaderMap::new(), Json(request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["rows"][0]["values"], json!([1]));
    }

    #[tokio::test]
    async fn test_malformed_plan_is_bad_request() {
        let state = state();
        let request = ExecuteRequest {
            plan: json!({ "root": 42 }),
            params: HashMap::new(),
            format: None,
        };

        let err = execute_plan(State(state), HeaderMap::new(), Json(request))
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
