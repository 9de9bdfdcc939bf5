use api_types::response::{Envelope, Status};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;
use engine::{EngineError, SagaOutcome};
use serde::Serialize;

pub use server::{AdminAccess, ServerState, router, run_with_listener};

mod channels;
mod server;
mod users;

pub mod types {
    pub mod user {
        pub use api_types::user::{UserNew, UserUpdate, UserView};
    }

    pub mod channel {
        pub use api_types::channel::{ChannelNew, ChannelUpdate, ChannelView};
    }

    pub mod response {
        pub use api_types::response::{Envelope, Status};
    }
}

pub enum ServerError {
    Engine(EngineError),
    Payload(JsonRejection),
    Unauthorized,
}

/// JSON request body whose rejection is answered with an envelope.
pub(crate) type JsonBody<T> = WithRejection<Json<T>, ServerError>;

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::ExistingKey(_) => StatusCode::CONFLICT,
        EngineError::Transport(_) => StatusCode::BAD_GATEWAY,
        EngineError::PartialFailure { .. } | EngineError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn envelope_for_engine_error(err: EngineError) -> Envelope<()> {
    match err {
        EngineError::NotFound(_) => Envelope::error(Status::NotFound, err.to_string()),
        EngineError::Validation(_) | EngineError::ExistingKey(_) => {
            Envelope::error(Status::ClientError, err.to_string())
        }
        EngineError::Transport(detail) => {
            tracing::error!("provider error: {detail}");
            Envelope::error(Status::ServerError, "backend provider request failed")
        }
        EngineError::Config(detail) => {
            tracing::error!("configuration error: {detail}");
            Envelope::error(Status::ServerError, "internal server error")
        }
        EngineError::PartialFailure {
            saga,
            completed,
            failed,
            detail,
        } => {
            tracing::error!(saga, %failed, "partial failure: {detail}");
            let mut envelope = Envelope::error(
                Status::PartialFailure,
                format!("{saga} stopped at {failed} and could not be rolled back"),
            );
            envelope.completed_steps =
                Some(completed.iter().map(|step| step.to_string()).collect());
            envelope.failed_step = Some(failed.to_string());
            envelope
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::Engine(err) => {
                let status = status_for_engine_error(&err);
                (status, Json(envelope_for_engine_error(err))).into_response()
            }
            ServerError::Payload(rejection) => {
                let status = match rejection {
                    JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    _ => StatusCode::BAD_REQUEST,
                };
                (
                    status,
                    Json(Envelope::<()>::error(
                        Status::ClientError,
                        rejection.body_text(),
                    )),
                )
                    .into_response()
            }
            ServerError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"console\""))],
                Json(Envelope::<()>::error(
                    Status::ClientError,
                    "authentication required",
                )),
            )
                .into_response(),
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<JsonRejection> for ServerError {
    fn from(value: JsonRejection) -> Self {
        Self::Payload(value)
    }
}

/// Response for a committed saga: `status` when every reverse list was
/// updated, 207 with the unsynced IDs otherwise.
fn saga_reply<T: Serialize>(status: StatusCode, detail: &str, outcome: SagaOutcome<T>) -> Response {
    let status = if outcome.is_degraded() {
        tracing::warn!(unsynced = ?outcome.unsynced, "{detail} with unsynchronized memberships");
        StatusCode::MULTI_STATUS
    } else {
        status
    };
    (
        status,
        Json(Envelope::committed(detail, outcome.value, outcome.unsynced)),
    )
        .into_response()
}
