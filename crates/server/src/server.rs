use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};

use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::{ServerError, channels, users};
use engine::Engine;

/// Operator credentials accepted on protected routes.
#[derive(Clone, Debug)]
pub struct AdminAccess {
    pub username: String,
    pub password: String,
    /// Also require credentials on `/users` routes.
    pub protect_users: bool,
}

impl AdminAccess {
    fn accepts(&self, credentials: &Authorization<Basic>) -> bool {
        let username = credentials
            .username()
            .as_bytes()
            .ct_eq(self.username.as_bytes());
        let password = credentials
            .password()
            .as_bytes()
            .ct_eq(self.password.as_bytes());
        !self.username.is_empty() && bool::from(username & password)
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub admin: Arc<AdminAccess>,
}

async fn auth(
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(TypedHeader(credentials)) = auth_header else {
        return Err(ServerError::Unauthorized);
    };
    if !state.admin.accepts(&credentials) {
        tracing::warn!(
            username = credentials.username(),
            path = %request.uri().path(),
            "rejected admin credentials"
        );
        return Err(ServerError::Unauthorized);
    }
    Ok(next.run(request).await)
}

pub fn router(state: ServerState) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.clone(), auth);

    let channel_routes = Router::new()
        .route("/channels", get(channels::list).post(channels::create))
        .route(
            "/channels/{uid}",
            get(channels::retrieve)
                .put(channels::update)
                .patch(channels::update)
                .delete(channels::destroy),
        )
        .route_layer(auth_layer.clone());

    let mut user_routes = Router::new()
        .route("/users", get(users::list).post(users::create))
        .route(
            "/users/{uid}",
            get(users::retrieve)
                .put(users::update)
                .patch(users::update)
                .delete(users::destroy),
        );
    if state.admin.protect_users {
        user_routes = user_routes.route_layer(auth_layer);
    }

    Router::new()
        .merge(user_routes)
        .merge(channel_routes)
        .with_state(state)
}

pub async fn run_with_listener(
    engine: Engine,
    admin: AdminAccess,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    let state = ServerState {
        engine: Arc::new(engine),
        admin: Arc::new(admin),
    };

    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AdminAccess {
        AdminAccess {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            protect_users: false,
        }
    }

    #[test]
    fn accepts_only_matching_credentials() {
        let admin = admin();
        assert!(admin.accepts(&Authorization::basic("admin", "hunter2")));
        assert!(!admin.accepts(&Authorization::basic("admin", "hunter")));
        assert!(!admin.accepts(&Authorization::basic("root", "hunter2")));
        assert!(!admin.accepts(&Authorization::basic("admin", "")));
    }

    #[test]
    fn empty_username_never_matches() {
        let admin = AdminAccess {
            username: String::new(),
            ..admin()
        };
        assert!(!admin.accepts(&Authorization::basic("", "hunter2")));
    }
}
