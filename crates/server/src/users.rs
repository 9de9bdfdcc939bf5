//! User API endpoints

use api_types::{
    response::Envelope,
    user::{UserNew, UserUpdate, UserView},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use axum_extra::extract::WithRejection;
use engine::{UserChanges, UserDraft, UserRecord};

use crate::{JsonBody, ServerError, saga_reply, server::ServerState};

fn view(record: UserRecord) -> UserView {
    UserView {
        uid: record.uid,
        username: record.username,
        role: record.role,
        active: record.active,
        allowed_channels: record.allowed_channels,
        created_at: record.created_at,
    }
}

/// Handle requests for listing every user
pub async fn list(
    State(state): State<ServerState>,
) -> Result<Json<Envelope<Vec<UserView>>>, ServerError> {
    let users: Vec<UserView> = state
        .engine
        .list_users()
        .await?
        .into_iter()
        .map(view)
        .collect();
    Ok(Json(Envelope::success(
        format!("{} users", users.len()),
        users,
    )))
}

/// Handle requests for creating a new user
pub async fn create(
    State(state): State<ServerState>,
    WithRejection(Json(payload), _): JsonBody<UserNew>,
) -> Result<Response, ServerError> {
    let outcome = state
        .engine
        .create_user(UserDraft {
            username: payload.username,
            password: payload.password,
            role: payload.role,
            active: payload.active,
            allowed_channels: payload.allowed_channels,
        })
        .await?;
    Ok(saga_reply(StatusCode::CREATED, "user created", outcome.map(view)))
}

pub async fn retrieve(
    State(state): State<ServerState>,
    Path(uid): Path<String>,
) -> Result<Json<Envelope<UserView>>, ServerError> {
    let user = state.engine.retrieve_user(&uid).await?;
    Ok(Json(Envelope::success("user found", view(user))))
}

/// Handle requests for updating a user; absent fields are left untouched
pub async fn update(
    State(state): State<ServerState>,
    Path(uid): Path<String>,
    WithRejection(Json(payload), _): JsonBody<UserUpdate>,
) -> Result<Response, ServerError> {
    let outcome = state
        .engine
        .update_user(
            &uid,
            UserChanges {
                username: payload.username,
                password: payload.password,
                role: payload.role,
                active: payload.active,
                allowed_channels: payload.allowed_channels,
            },
        )
        .await?;
    Ok(saga_reply(StatusCode::OK, "user updated", outcome.map(view)))
}

pub async fn destroy(
    State(state): State<ServerState>,
    Path(uid): Path<String>,
) -> Result<Response, ServerError> {
    let outcome = state.engine.delete_user(&uid).await?;
    Ok(saga_reply(StatusCode::OK, "user deleted", outcome.map(view)))
}
