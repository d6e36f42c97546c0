use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing,
};
use rearch::Container;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    api::{Error, ShortenPayload, UrlView},
    shorten_service::{SubmitError, ValidationError, shorten_service_capsule},
    stats_service::{Dashboard, stats_service_capsule},
    url_repo::timestamp_now,
};

pub fn router(container: Container) -> Router {
    Router::new()
        .route("/urls", routing::get(get_urls).post(post_url))
        .route("/urls/{id}", routing::delete(delete_url))
        .route("/urls/{id}/clicks", routing::post(post_click))
        .route("/stats", routing::get(get_stats))
        .with_state(container)
}

fn client_error(status: StatusCode, message: String) -> Response {
    let err_uuid = Uuid::new_v4();
    info!(?err_uuid, %status, error = %message, "User submitted a bad request");
    (
        status,
        Json(Error {
            error: message,
            error_id: err_uuid.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(error: &anyhow::Error) -> Response {
    let err_uuid = Uuid::new_v4();
    error!(?err_uuid, ?error, "Encountered an error during a request");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Error {
            error: "Internal server error".to_owned(),
            error_id: err_uuid.to_string(),
        }),
    )
        .into_response()
}

fn dashboard_response(dashboard: anyhow::Result<Dashboard>) -> Response {
    match dashboard {
        Ok(dashboard) => Json(dashboard).into_response(),
        Err(err) => internal_error(&err),
    }
}

#[instrument(skip(container))]
async fn get_urls(State(container): State<Container>) -> Response {
    match container.read(stats_service_capsule).list().await {
        Ok(urls) => {
            let now = timestamp_now();
            let views: Vec<_> = urls.into_iter().map(|url| UrlView::new(url, now)).collect();
            Json(views).into_response()
        }
        Err(err) => internal_error(&err),
    }
}

#[instrument(skip(container))]
async fn post_url(
    State(container): State<Container>,
    payload: Result<Json<ShortenPayload>, JsonRejection>,
) -> Response {
    let ShortenPayload {
        long_url,
        custom_shortcode,
        expiry_minutes,
    } = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => return client_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let result = container
        .read(shorten_service_capsule)
        .submit(
            &long_url,
            custom_shortcode.as_deref(),
            expiry_minutes.as_deref(),
        )
        .await;

    match result {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(SubmitError::Validation(validation_error)) => {
            let status = match validation_error {
                ValidationError::ShortcodeTaken => StatusCode::CONFLICT,
                ValidationError::EmptyUrl
                | ValidationError::InvalidUrl(_)
                | ValidationError::InvalidShortcode(_)
                | ValidationError::InvalidExpiry => StatusCode::BAD_REQUEST,
            };
            client_error(status, validation_error.to_string())
        }
        Err(SubmitError::Internal(err)) => internal_error(&err),
    }
}

#[instrument(skip(container))]
async fn get_stats(State(container): State<Container>) -> Response {
    dashboard_response(container.read(stats_service_capsule).dashboard().await)
}

#[instrument(skip(container))]
async fn delete_url(State(container): State<Container>, Path(id): Path<String>) -> Response {
    let stats_service = container.read(stats_service_capsule);
    let Ok(id) = Uuid::parse_str(&id) else {
        info!("Ignoring malformed record id");
        return dashboard_response(stats_service.dashboard().await);
    };
    dashboard_response(stats_service.delete_record(id).await)
}

#[instrument(skip(container))]
async fn post_click(State(container): State<Container>, Path(id): Path<String>) -> Response {
    let stats_service = container.read(stats_service_capsule);
    let Ok(id) = Uuid::parse_str(&id) else {
        info!("Ignoring malformed record id");
        return dashboard_response(stats_service.dashboard().await);
    };
    dashboard_response(stats_service.simulate_click(id).await)
}
