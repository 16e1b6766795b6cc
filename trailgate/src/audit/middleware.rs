//! リクエストインターセプタ
//!
//! 全HTTPハンドラーを包み、処理時間・識別情報・ステータスを1リクエスト1レコードで記録する。
//! 静的アセット・ヘルスチェック等の除外パスはログ・トレースを出さない。
//! ボディはステータスが400以上の場合のみレコードに載せる。

use crate::audit::context::{api_key_header, session_cookie, RequestContext, ResolvedActor};
use crate::common::error::{TrailError, TrailResult};
use crate::config::LoggingConfig;
use crate::db::identity::IdentityResolver;
use crate::logging::record::{ErrorDetail, LogRecord};
use crate::monitoring::store::TraceRow;
use crate::AppState;
use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::FutureExt;
use regex::RegexSet;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, warn};

/// ログに載せるボディの最大サイズ
pub const MAX_CAPTURED_BODY_BYTES: usize = 64 * 1024;

/// デフォルトの除外パス（正規表現）
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    r"\.(?:js|mjs|css|map|png|jpe?g|gif|svg|ico|webp|woff2?|ttf|eot)$",
    r"^/health$",
    r"^/_next/",
    r"^/static/",
    r"^/api/auth/",
];

/// 除外パスの判定
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    set: RegexSet,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            set: RegexSet::new(DEFAULT_EXCLUDE_PATTERNS).unwrap_or_else(|_| RegexSet::empty()),
        }
    }
}

impl ExclusionRules {
    /// パターン列から作成する
    pub fn new<I, S>(patterns: I) -> TrailResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = RegexSet::new(patterns).map_err(|e| {
            TrailError::Configuration(format!("Invalid log exclude pattern: {}", e))
        })?;
        Ok(Self { set })
    }

    /// 設定から作成する（未設定ならデフォルト）
    pub fn from_config(config: &LoggingConfig) -> TrailResult<Self> {
        match &config.exclude_patterns {
            Some(patterns) => Self::new(patterns),
            None => Ok(Self::default()),
        }
    }

    /// 記録対象外のパスか
    pub fn is_excluded(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

/// 識別情報を解決する
///
/// `x-api-key` を優先し、提示されたが無効なら `InvalidApiKey`。
/// 次にセッションCookieを参照する。リゾルバのエラーは識別なしとして扱う。
pub async fn resolve_actor(
    resolver: Option<&dyn IdentityResolver>,
    headers: &HeaderMap,
) -> ResolvedActor {
    let Some(resolver) = resolver else {
        return ResolvedActor::Anonymous;
    };

    if let Some(key) = api_key_header(headers) {
        return match resolver.resolve_api_key(&key).await {
            Ok(Some(identity)) => ResolvedActor::ApiKey {
                key_id: identity.key_id,
                owner_id: identity.owner_id,
            },
            Ok(None) => ResolvedActor::InvalidApiKey,
            Err(e) => {
                warn!("API key lookup failed: {}", e);
                ResolvedActor::Anonymous
            }
        };
    }

    if let Some(token) = session_cookie(headers) {
        match resolver.resolve_session(&token).await {
            Ok(Some(session)) => {
                return ResolvedActor::Session {
                    user_id: session.user_id,
                    session_id: session.session_id,
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Session lookup failed: {}", e),
        }
    }

    ResolvedActor::Anonymous
}

/// リクエストログミドルウェア
///
/// 除外パスでも識別情報の解決とパニック時の500変換は行い、記録だけを省く。
pub async fn request_log_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let excluded = state.exclusions.is_excluded(&path);

    let start = Instant::now();
    let method = request.method().to_string();
    let headers = request.headers().clone();

    let actor = resolve_actor(state.identity.as_deref(), &headers).await;
    let context = RequestContext::from_headers(&headers).with_actor(&actor);
    request.extensions_mut().insert(actor.clone());
    request.extensions_mut().insert(context);

    let (request, request_body) = if excluded {
        (request, None)
    } else {
        capture_request_body(request).await
    };

    let (response, error) = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => (response, None),
        Err(payload) => {
            let detail = ErrorDetail {
                name: "panic".to_string(),
                message: panic_message(payload.as_ref()),
                stack: None,
            };
            (internal_error_response(), Some(detail))
        }
    };

    if excluded {
        if let Some(detail) = error {
            warn!("Handler panicked on {} {}: {}", method, path, detail.message);
        }
        return response;
    }

    let status = response.status().as_u16();
    let (response, response_body) = if status >= 400 {
        capture_response_body(response).await
    } else {
        (response, None)
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let mut record =
        LogRecord::for_request(&method, &path, status, elapsed_ms).with_bodies(request_body, response_body);
    record.actor_id = actor.log_label();
    record.error = error;
    state.request_logger.emit(record);

    state.metrics.record_trace(TraceRow {
        method,
        uri: path,
        status,
        elapsed_ms,
        actor_id: actor.log_label(),
        recorded_at: Utc::now(),
    });

    response
}

fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
}

fn body_kind(headers: &HeaderMap) -> Option<BodyKind> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())?
        .to_ascii_lowercase();
    if content_type.starts_with("application/json") || content_type.contains("+json") {
        Some(BodyKind::Json)
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        Some(BodyKind::Form)
    } else {
        None
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn parse_body(kind: BodyKind, bytes: &Bytes) -> Option<Value> {
    match kind {
        BodyKind::Json => serde_json::from_slice(bytes).ok(),
        BodyKind::Form => serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes)
            .ok()
            .map(|pairs| {
                let map: Map<String, Value> = pairs
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Value::Object(map)
            }),
    }
}

/// リクエストボディを読み取り、同じ内容でリクエストを組み立て直す
///
/// JSON/フォーム以外、長さ不明、上限超過のボディは読まずにそのまま渡す。
async fn capture_request_body(request: Request) -> (Request, Option<Value>) {
    let Some(kind) = body_kind(request.headers()) else {
        return (request, None);
    };
    match content_length(request.headers()) {
        Some(len) if len <= MAX_CAPTURED_BODY_BYTES => {}
        _ => return (request, None),
    }

    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, MAX_CAPTURED_BODY_BYTES).await {
        Ok(bytes) => {
            let parsed = parse_body(kind, &bytes);
            (Request::from_parts(parts, Body::from(bytes)), parsed)
        }
        Err(e) => {
            debug!("Failed to read request body: {}", e);
            (Request::from_parts(parts, Body::empty()), None)
        }
    }
}

/// エラーレスポンスのボディを読み取り、同じ内容でレスポンスを組み立て直す
async fn capture_response_body(response: Response) -> (Response, Option<Value>) {
    let (parts, body) = response.into_parts();
    let bounded = body
        .size_hint()
        .upper()
        .is_some_and(|n| n <= MAX_CAPTURED_BODY_BYTES as u64);
    if !bounded {
        return (Response::from_parts(parts, body), None);
    }

    match axum::body::to_bytes(body, MAX_CAPTURED_BODY_BYTES).await {
        Ok(bytes) => {
            let parsed = serde_json::from_slice::<Value>(&bytes).ok().or_else(|| {
                std::str::from_utf8(&bytes)
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
            });
            (Response::from_parts(parts, Body::from(bytes)), parsed)
        }
        Err(e) => {
            debug!("Failed to read response body: {}", e);
            (Response::from_parts(parts, Body::empty()), None)
        }
    }
}
