//! Channel API endpoints

use api_types::{
    channel::{ChannelNew, ChannelUpdate, ChannelView},
    response::Envelope,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use axum_extra::extract::WithRejection;
use engine::{ChannelChanges, ChannelDraft, ChannelRecord};

use crate::{JsonBody, ServerError, saga_reply, server::ServerState};

fn view(record: ChannelRecord) -> ChannelView {
    ChannelView {
        uid: record.uid,
        channel_id: record.channel_id,
        name: record.name,
        allowed_users: record.allowed_users,
        created_at: record.created_at,
    }
}

/// Handle requests for listing every channel
pub async fn list(
    State(state): State<ServerState>,
) -> Result<Json<Envelope<Vec<ChannelView>>>, ServerError> {
    let channels: Vec<ChannelView> = state
        .engine
        .list_channels()
        .await?
        .into_iter()
        .map(view)
        .collect();
    Ok(Json(Envelope::success(
        format!("{} channels", channels.len()),
        channels,
    )))
}

/// Handle requests for creating a new channel
pub async fn create(
    State(state): State<ServerState>,
    WithRejection(Json(payload), _): JsonBody<ChannelNew>,
) -> Result<Response, ServerError> {
    let outcome = state
        .engine
        .create_channel(ChannelDraft {
            name: payload.name,
            allowed_users: payload.allowed_users,
        })
        .await?;
    Ok(saga_reply(
        StatusCode::CREATED,
        "channel created",
        outcome.map(view),
    ))
}

pub async fn retrieve(
    State(state): State<ServerState>,
    Path(uid): Path<String>,
) -> Result<Json<Envelope<ChannelView>>, ServerError> {
    let channel = state.engine.retrieve_channel(&uid).await?;
    Ok(Json(Envelope::success("channel found", view(channel))))
}

pub async fn update(
    State(state): State<ServerState>,
    Path(uid): Path<String>,
    WithRejection(Json(payload), _): JsonBody<ChannelUpdate>,
) -> Result<Response, ServerError> {
    let outcome = state
        .engine
        .update_channel(
            &uid,
            ChannelChanges {
                name: payload.name,
                allowed_users: payload.allowed_users,
            },
        )
        .await?;
    Ok(saga_reply(StatusCode::OK, "channel updated", outcome.map(view)))
}

/// Handle requests for deleting a channel; users that still list it are
/// reported as unsynced
pub async fn destroy(
    State(state): State<ServerState>,
    Path(uid): Path<String>,
) -> Result<Response, ServerError> {
    let outcome = state.engine.delete_channel(&uid).await?;
    Ok(saga_reply(StatusCode::OK, "channel deleted", outcome.map(view)))
}
