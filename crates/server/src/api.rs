//! JSON API over the request workflow.
//!
//! - `POST  /api/v1/requests`                    create a request for the caller
//! - `GET   /api/v1/requests`                    list with filters and paging
//! - `GET   /api/v1/requests/{id}`               fetch one request with its items
//! - `POST  /api/v1/requests/{id}/review`        approve or reject
//! - `POST  /api/v1/requests/{id}/cancel`        cancel (original requester only)
//! - `POST  /api/v1/requests/{id}/fulfill`       record fulfilled quantities
//! - `PATCH /api/v1/request-items/{item_id}`     adjust one fulfilled quantity
//!
//! The caller is identified by the `x-user-id` header. Errors share one body shape:
//! `{kind, message, correlation_id}`.

use std::sync::Arc;

use almox_core::domain::material::MaterialId;
use almox_core::domain::principal::UserId;
use almox_core::domain::request::{
    MaterialRequest, NewLineItem, RequestFilter, RequestId, RequestItemId, RequestPage,
    RequestStatus, UnitId,
};
use almox_core::errors::{ApplicationError, DomainError, InterfaceError};
use almox_core::quantities::FulfilledQuantity;
use almox_workflow::{AdjustmentReceipt, FulfillmentInput, RequestWorkflowService, ReviewDecision};
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

const USER_HEADER: &str = "x-user-id";
const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    pub workflow: Arc<RequestWorkflowService>,
}

pub fn router(workflow: Arc<RequestWorkflowService>) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create_request).get(list_requests))
        .route("/api/v1/requests/{id}", get(get_request))
        .route("/api/v1/requests/{id}/review", post(review_request))
        .route("/api/v1/requests/{id}/cancel", post(cancel_request))
        .route("/api/v1/requests/{id}/fulfill", post(fulfill_request))
        .route("/api/v1/request-items/{item_id}", patch(adjust_item))
        .with_state(ApiState { workflow })
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub unit_id: String,
    pub items: Vec<CreateItemBody>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemBody {
    pub material_id: String,
    pub quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub unit_id: Option<String>,
    pub requester_id: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub status: String,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FulfillBody {
    pub items: Vec<FulfillItemBody>,
}

#[derive(Debug, Deserialize)]
pub struct FulfillItemBody {
    pub id: String,
    pub fulfilled_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    pub fulfilled_quantity: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// Caller and errors
// ---------------------------------------------------------------------------

/// Identity and correlation taken from request headers.
pub struct RequestCaller {
    pub user_id: UserId,
    pub correlation_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(&parts.headers);
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_owned()));

        match user_id {
            Some(user_id) => Ok(Self { user_id, correlation_id }),
            None => Err(ApiError {
                status: StatusCode::UNAUTHORIZED,
                kind: "missing_caller",
                message: format!("the `{USER_HEADER}` header is required"),
                correlation_id,
            }),
        }
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("api-{}", Uuid::new_v4()))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    correlation_id: String,
}

impl ApiError {
    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        let kind = error.kind();
        let interface = error.into_interface(correlation_id);
        let status = match &interface {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                kind,
                error = %interface.message(),
                "request failed"
            );
            interface.user_message().to_owned()
        } else {
            warn!(
                event_name = "api.request.refused",
                correlation_id = %correlation_id,
                kind,
                error = %interface.message(),
                "request refused"
            );
            interface.message().to_owned()
        };

        Self { status, kind, message, correlation_id: interface.correlation_id().to_owned() }
    }

    fn validation(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::from_application(DomainError::Validation(message.into()).into(), correlation_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            kind: self.kind.to_owned(),
            message: self.message,
            correlation_id: self.correlation_id,
        };
        (self.status, Json(body)).into_response()
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>, correlation_id: &str) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text(), correlation_id))
}

fn quantity(value: i64, correlation_id: &str) -> Result<u32, ApiError> {
    u32::try_from(value).map_err(|_| {
        ApiError::validation(
            format!("quantity {value} must be a non-negative integer"),
            correlation_id,
        )
    })
}

/// Accepts RFC 3339 timestamps or plain dates. A plain upper bound covers its whole day.
fn parse_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time).and_utc())
}

impl ListQuery {
    fn into_filter(self, correlation_id: &str) -> Result<RequestFilter, ApiError> {
        let status = match self.status.as_deref().filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => Some(RequestStatus::parse(raw).ok_or_else(|| {
                ApiError::validation(format!("unknown status `{raw}`"), correlation_id)
            })?),
            None => None,
        };
        let bound = |raw: Option<String>, end_of_day: bool| match raw {
            Some(raw) if !raw.trim().is_empty() => {
                parse_bound(raw.trim(), end_of_day).map(Some).ok_or_else(|| {
                    ApiError::validation(format!("invalid date `{raw}`"), correlation_id)
                })
            }
            _ => Ok(None),
        };

        Ok(RequestFilter {
            status,
            unit_id: self.unit_id.filter(|value| !value.is_empty()).map(UnitId),
            requester_id: self.requester_id.filter(|value| !value.is_empty()).map(UserId),
            created_from: bound(self.created_from, false)?,
            created_to: bound(self.created_to, true)?,
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(0),
        })
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<ApiState>,
    caller: RequestCaller,
    body: Result<Json<CreateRequestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<MaterialRequest>), ApiError> {
    let cid = caller.correlation_id.as_str();
    let body = json_body(body, cid)?;

    let items = body
        .items
        .into_iter()
        .map(|item| {
            Ok(NewLineItem {
                material_id: MaterialId(item.material_id),
                quantity: quantity(item.quantity, cid)?,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let request = state
        .workflow
        .create_request(&caller.user_id, UnitId(body.unit_id), items, body.notes)
        .await
        .map_err(|error| ApiError::from_application(error, cid))?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<RequestPage>, ApiError> {
    let cid = correlation_id(&headers);
    let filter = query.into_filter(&cid)?;
    let page = state
        .workflow
        .list_requests(filter)
        .await
        .map_err(|error| ApiError::from_application(error, &cid))?;
    Ok(Json(page))
}

async fn get_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MaterialRequest>, ApiError> {
    let cid = correlation_id(&headers);
    let request = state
        .workflow
        .get_request(&RequestId(id))
        .await
        .map_err(|error| ApiError::from_application(error, &cid))?;
    Ok(Json(request))
}

async fn review_request(
    State(state): State<ApiState>,
    caller: RequestCaller,
    Path(id): Path<String>,
    body: Result<Json<ReviewBody>, JsonRejection>,
) -> Result<Json<MaterialRequest>, ApiError> {
    let cid = caller.correlation_id.as_str();
    let body = json_body(body, cid)?;
    let status = RequestStatus::parse(&body.status).ok_or_else(|| {
        ApiError::validation(format!("unknown review status `{}`", body.status), cid)
    })?;

    let request = state
        .workflow
        .approve_or_reject(
            &RequestId(id),
            ReviewDecision { status, rejection_reason: body.rejection_reason },
            &caller.user_id,
        )
        .await
        .map_err(|error| ApiError::from_application(error, cid))?;
    Ok(Json(request))
}

async fn cancel_request(
    State(state): State<ApiState>,
    caller: RequestCaller,
    Path(id): Path<String>,
) -> Result<Json<MaterialRequest>, ApiError> {
    let request = state
        .workflow
        .cancel(&RequestId(id), &caller.user_id)
        .await
        .map_err(|error| ApiError::from_application(error, &caller.correlation_id))?;
    Ok(Json(request))
}

async fn fulfill_request(
    State(state): State<ApiState>,
    caller: RequestCaller,
    Path(id): Path<String>,
    body: Result<Json<FulfillBody>, JsonRejection>,
) -> Result<Json<MaterialRequest>, ApiError> {
    let cid = caller.correlation_id.as_str();
    let body = json_body(body, cid)?;
    let items = body
        .items
        .into_iter()
        .map(|item| {
            Ok(FulfilledQuantity {
                item_id: RequestItemId(item.id),
                fulfilled_quantity: quantity(item.fulfilled_quantity, cid)?,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let request = state
        .workflow
        .fulfill(&RequestId(id), FulfillmentInput { items }, &caller.user_id)
        .await
        .map_err(|error| ApiError::from_application(error, cid))?;
    Ok(Json(request))
}

async fn adjust_item(
    State(state): State<ApiState>,
    caller: RequestCaller,
    Path(item_id): Path<String>,
    body: Result<Json<AdjustBody>, JsonRejection>,
) -> Result<Json<AdjustmentReceipt>, ApiError> {
    let cid = caller.correlation_id.as_str();
    let body = json_body(body, cid)?;
    let new_quantity = quantity(body.fulfilled_quantity, cid)?;

    let role = state
        .workflow
        .effective_role(&caller.user_id)
        .await
        .map_err(|error| ApiError::from_application(error, cid))?;
    let receipt = state
        .workflow
        .adjust_fulfilled_quantity(&RequestItemId(item_id), new_quantity, role)
        .await
        .map_err(|error| ApiError::from_application(error, cid))?;
    Ok(Json(receipt))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use almox_core::domain::material::{Material, MaterialId};
    use almox_core::domain::principal::{Principal, Role, UserId};
    use almox_core::domain::request::{MaterialRequest, RequestPage, RequestStatus};
    use almox_core::notifications::NotificationDispatcher;
    use almox_db::repositories::{
        InMemoryMaterialRepository, InMemoryPrincipalDirectory, InMemoryRequestRepository,
        MaterialRepository, PrincipalDirectory,
    };
    use almox_workflow::{AdjustmentReceipt, RequestWorkflowService};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use rust_decimal::Decimal;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{parse_bound, router, ErrorBody};

    async fn app() -> Router {
        let principals = InMemoryPrincipalDirectory::default();
        for (id, role) in [
            ("u-approver", Role::Approver),
            ("u-gerente", Role::FulfillmentManager),
            ("u-requester", Role::Requester),
        ] {
            principals
                .save(Principal {
                    id: UserId(id.to_string()),
                    display_name: id.to_string(),
                    roles: vec![role],
                    active: true,
                })
                .await
                .expect("save principal");
        }
        let materials = InMemoryMaterialRepository::default();
        materials
            .save(Material {
                id: MaterialId("7".to_string()),
                name: "Luva nitrílica".to_string(),
                unit_of_measure: "cx".to_string(),
                unit_price: Decimal::new(3990, 2),
                active: true,
            })
            .await
            .expect("save material");

        let workflow = RequestWorkflowService::new(
            Arc::new(InMemoryRequestRepository::default()),
            Arc::new(materials),
            Arc::new(principals),
            NotificationDispatcher::disabled(),
        );
        router(Arc::new(workflow))
    }

    async fn call<T: DeserializeOwned>(
        app: &Router,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, T) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    async fn create(app: &Router) -> MaterialRequest {
        let (status, request): (_, MaterialRequest) = call(
            app,
            Method::POST,
            "/api/v1/requests",
            Some("u-requester"),
            Some(json!({"unit_id": "unit-north", "items": [{"material_id": "7", "quantity": 3}]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        request
    }

    #[tokio::test]
    async fn create_review_and_adjust_over_http() {
        let app = app().await;
        let request = create(&app).await;
        assert_eq!(request.status, RequestStatus::Pending);

        let (status, approved): (_, MaterialRequest) = call(
            &app,
            Method::POST,
            &format!("/api/v1/requests/{}/review", request.id.0),
            Some("u-approver"),
            Some(json!({"status": "approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved.items[0].fulfilled_quantity, Some(3));

        let item_uri = format!("/api/v1/request-items/{}", request.items[0].id.0);
        let (status, error): (_, ErrorBody) = call(
            &app,
            Method::PATCH,
            &item_uri,
            Some("u-gerente"),
            Some(json!({"fulfilled_quantity": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.kind, "privilege_violation");

        let (status, receipt): (_, AdjustmentReceipt) = call(
            &app,
            Method::PATCH,
            &item_uri,
            Some("u-gerente"),
            Some(json!({"fulfilled_quantity": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(receipt.success);
        assert_eq!(receipt.item.fulfilled_quantity, Some(2));
    }

    #[tokio::test]
    async fn error_kinds_map_to_status_codes() {
        let app = app().await;
        let request = create(&app).await;
        let review_uri = format!("/api/v1/requests/{}/review", request.id.0);

        let (status, error): (_, ErrorBody) = call(
            &app,
            Method::POST,
            &review_uri,
            Some("u-approver"),
            Some(json!({"status": "rejected", "rejection_reason": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.kind, "validation_error");
        assert!(!error.correlation_id.is_empty());

        let (status, error): (_, ErrorBody) = call(
            &app,
            Method::POST,
            &review_uri,
            Some("u-requester"),
            Some(json!({"status": "approved"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error.kind, "unauthorized");

        let (status, error): (_, ErrorBody) = call(
            &app,
            Method::POST,
            &format!("/api/v1/requests/{}/fulfill", request.id.0),
            Some("u-approver"),
            Some(json!({"items": []})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error.kind, "invalid_state_transition");

        let (status, error): (_, ErrorBody) =
            call(&app, Method::GET, "/api/v1/requests/REQ-nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error.kind, "not_found");

        let (status, error): (_, ErrorBody) = call(
            &app,
            Method::POST,
            &format!("/api/v1/requests/{}/cancel", request.id.0),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.kind, "missing_caller");
    }

    #[tokio::test]
    async fn negative_and_malformed_bodies_are_validation_errors() {
        let app = app().await;

        let (status, error): (_, ErrorBody) = call(
            &app,
            Method::POST,
            "/api/v1/requests",
            Some("u-requester"),
            Some(json!({"unit_id": "unit-north", "items": [{"material_id": "7", "quantity": -1}]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.kind, "validation_error");

        let (status, error): (_, ErrorBody) = call(
            &app,
            Method::POST,
            "/api/v1/requests",
            Some("u-requester"),
            Some(json!({"items": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.kind, "validation_error");
    }

    #[tokio::test]
    async fn list_filters_by_status_and_cancel_by_owner() {
        let app = app().await;
        let first = create(&app).await;
        create(&app).await;

        let (status, cancelled): (_, MaterialRequest) = call(
            &app,
            Method::POST,
            &format!("/api/v1/requests/{}/cancel", first.id.0),
            Some("u-requester"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled.status, RequestStatus::Cancelled);

        let (status, page): (_, RequestPage) = call(
            &app,
            Method::GET,
            "/api/v1/requests?status=pending&page=1&page_size=10",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page.total, 1);
        assert_eq!(page.page_size, 10);

        let (status, error): (_, ErrorBody) =
            call(&app, Method::GET, "/api/v1/requests?created_from=yesterday", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error.kind, "validation_error");
    }

    #[test]
    fn plain_date_upper_bound_covers_the_whole_day() {
        let from = parse_bound("2026-03-01", false).expect("from");
        let to = parse_bound("2026-03-01", true).expect("to");

        assert_eq!(from.to_rfc3339(), "2026-03-01T00:00:00+00:00");
        assert!(to > from);
        assert_eq!(to.date_naive(), from.date_naive());
        assert!(parse_bound("2026-03-01T10:00:00Z", true).is_some());
    }
}
