//! HTTP handler for credit-metered code generation.

use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use crate::{
    AppState,
    api::models::{
        generate::{GenerateRequest, GenerateResponse},
        users::CurrentUser,
    },
    db::{Store, errors::DbError, models::projects::ProjectCreateDBRequest},
    errors::{Error, Result},
    generation::{
        GenerationInput,
        relay::{StreamOutcome, relay_stream},
        strip_code_fences,
        upstream::UpstreamError,
    },
    types::abbrev_uuid,
};

fn record_generation(mode: &'static str, outcome: &'static str) {
    metrics::counter!("pagecraft_generations_total", "mode" => mode, "outcome" => outcome).increment(1);
}

/// Generate website code from a prompt or sketch
#[utoipa::path(
    post,
    path = "/api/generate",
    tag = "generation",
    summary = "Generate website code",
    description = "Generates HTML/Tailwind code for the prompt and charges the configured cost once the \
                   result has been saved. With `stream: true` the provider's event stream is relayed \
                   unchanged as `text/event-stream`; nothing is charged unless the stream completes.",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Generated code (or an event stream when `stream` is set)", body = GenerateResponse),
        (status = 400, description = "Missing or invalid prompt or image"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient credits"),
        (status = 502, description = "Model provider failed"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id), stream = request.stream))]
pub async fn generate(State(state): State<AppState>, user: CurrentUser, Json(request): Json<GenerateRequest>) -> Result<Response> {
    let input = GenerationInput::parse(&request.prompt, request.image.as_deref(), &state.config.generation)?;
    let cost = state.config.credits.cost_per_generation;

    // Poor users never reach the provider. The debit itself is re-checked atomically on save.
    if user.credits < cost {
        record_generation(mode(request.stream), "insufficient_credits");
        return Err(Error::PaymentRequired {
            required: cost,
            balance: user.credits,
        });
    }

    if request.stream {
        stream_generation(state, user, input, cost).await
    } else {
        complete_generation(state, user, input, cost).await.map(IntoResponse::into_response)
    }
}

fn mode(stream: bool) -> &'static str {
    if stream { "stream" } else { "blocking" }
}

async fn complete_generation(state: AppState, user: CurrentUser, input: GenerationInput, cost: i64) -> Result<Json<GenerateResponse>> {
    let config = &state.config.generation;
    let model = input.model(config).to_string();

    let raw = state.upstream.complete(&input.to_request(config, false)).await.inspect_err(|_| {
        record_generation("blocking", "upstream_failed");
    })?;
    let code = strip_code_fences(&raw);
    if code.is_empty() {
        record_generation("blocking", "empty");
        return Err(UpstreamError::EmptyCompletion.into());
    }

    let project = ProjectCreateDBRequest::new(user.id, &input.prompt, code.clone(), &model, input.source());
    match state.store.complete_generation(&project, cost).await {
        Ok(receipt) => {
            record_generation("blocking", "completed");
            metrics::counter!("pagecraft_credits_debited_total").increment(cost as u64);
            info!(project_id = %receipt.project.id, balance = receipt.balance_after, "Saved generated project");

            Ok(Json(GenerateResponse {
                success: true,
                text: code.clone(),
                code,
                remaining_credits: receipt.balance_after,
                project_id: Some(receipt.project.id),
            }))
        }
        Err(DbError::InsufficientCredits { required, balance }) => {
            // Balance was spent concurrently between the pre-check and the debit
            record_generation("blocking", "insufficient_credits");
            Err(Error::PaymentRequired { required, balance })
        }
        Err(e) => {
            // Nothing was charged; the user still gets the code.
            error!(error = %e, "Failed to save generated project");
            record_generation("blocking", "persist_failed");
            let balance = match state.store.get_user(user.id).await {
                Ok(Some(current)) => current.credits,
                _ => user.credits,
            };

            Ok(Json(GenerateResponse {
                success: true,
                text: code.clone(),
                code,
                remaining_credits: balance,
                project_id: None,
            }))
        }
    }
}

async fn stream_generation(state: AppState, user: CurrentUser, input: GenerationInput, cost: i64) -> Result<Response> {
    let config = &state.config.generation;
    let model = input.model(config).to_string();

    // Provider errors surface as a normal JSON error before any byte is relayed
    let upstream = state.upstream.stream(&input.to_request(config, true)).await.inspect_err(|_| {
        record_generation("stream", "upstream_failed");
    })?;

    let store = state.store.clone();
    let user_id = user.id;
    let on_finish = move |outcome: StreamOutcome| async move {
        let text = match outcome {
            StreamOutcome::Completed { text } => text,
            other => {
                info!(outcome = other.label(), "Stream ended without a complete generation, nothing charged");
                record_generation("stream", other.label());
                return;
            }
        };

        let project = ProjectCreateDBRequest::new(user_id, &input.prompt, text, &model, input.source());
        match store.complete_generation(&project, cost).await {
            Ok(receipt) => {
                record_generation("stream", "completed");
                metrics::counter!("pagecraft_credits_debited_total").increment(cost as u64);
                info!(project_id = %receipt.project.id, balance = receipt.balance_after, "Saved streamed project");
            }
            Err(DbError::InsufficientCredits { required, balance }) => {
                record_generation("stream", "insufficient_credits");
                warn!(required, balance, "Balance spent during stream, result discarded");
            }
            Err(e) => {
                record_generation("stream", "persist_failed");
                error!(error = %e, "Failed to save streamed project");
            }
        }
    };

    let body = relay_stream(upstream.bytes_stream(), config.stream_buffer, on_finish);

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response())
}
