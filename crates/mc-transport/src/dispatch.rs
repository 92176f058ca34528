//! REST dispatch: one engine handler per HTTP request.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use mc_protocol::{ExecutionContext, HandlerResponse, LogLevel, LogSubSystem};
use tracing::{Instrument, debug, info_span, warn};

use crate::error::DispatchError;
use crate::form::{FormData, bind_fields};

/// Serve one request against the execution context.
///
/// The CORS and cache headers are added by the router for every response,
/// including the ones produced here.
pub async fn dispatch(context: &Arc<dyn ExecutionContext>, request: Request) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    let path = request.uri().path().to_owned();
    let span = info_span!(
        "request",
        id = %uuid::Uuid::new_v4(),
        method = %request.method(),
        path = %path,
    );

    async {
        match process(context, request).await {
            Ok(response) => {
                debug!(status = %response.status(), "request handled");
                response
            }
            Err(err) => {
                warn!(error = %err, "request failed");
                context.log(
                    &format!("Fatal error on {path}: {err}"),
                    LogSubSystem::Network,
                    LogLevel::Message,
                );
                plain_text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal Server Error: {err}").into_bytes(),
                )
            }
        }
    }
    .instrument(span)
    .await
}

async fn process(
    context: &Arc<dyn ExecutionContext>,
    request: Request,
) -> Result<Response, DispatchError> {
    let (parts, body) = request.into_parts();

    let authorization = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let mut handler =
        context.create_handler(parts.uri.path(), parts.method.as_str(), authorization)?;

    let mut body = Some(body);
    let raw_body = if handler.expects_raw_body()? {
        let bytes = axum::body::to_bytes(body.take().unwrap_or_default(), usize::MAX)
            .await
            .map_err(DispatchError::Body)?;
        debug!(bytes = bytes.len(), "raw body read");
        bytes
    } else {
        Bytes::new()
    };

    let (field_count, expects_form) = handler.expects_form_data()?;
    let form = if expects_form {
        // A handler asking for both keeps the raw bytes; the form is parsed from a copy.
        let form_body = body.take().unwrap_or_else(|| Body::from(raw_body.clone()));
        Some(FormData::parse(&parts.headers, &parts.uri, form_body).await?)
    } else {
        None
    };

    // Binding may read spooled uploads back from disk.
    let (handler, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = match &form {
            Some(form) => bind_fields(handler.as_mut(), form, field_count),
            None => Ok(()),
        }
        .and_then(|()| handler.handle(&raw_body).map_err(DispatchError::from));
        (handler, outcome)
    })
    .await?;
    let outcome = outcome?;
    let payload = handler.result_payload()?;

    write_response(outcome, payload)
}

fn write_response(outcome: HandlerResponse, payload: Vec<u8>) -> Result<Response, DispatchError> {
    if outcome.status == 200 {
        let content_type = HeaderValue::from_str(&outcome.content_type)
            .map_err(|_| DispatchError::ContentType(outcome.content_type.clone()))?;
        return Ok(([(CONTENT_TYPE, content_type)], payload).into_response());
    }

    let status = u16::try_from(outcome.status)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or(DispatchError::Status(outcome.status))?;
    Ok(plain_text(status, payload))
}

/// Plain-text error body, newline terminated.
fn plain_text(status: StatusCode, mut body: Vec<u8>) -> Response {
    body.push(b'\n');
    (
        status,
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        ],
        body,
    )
        .into_response()
}
