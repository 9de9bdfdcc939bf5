mod common;

use common::{
    engine_with_provider, identity_email, ids, new_channel, new_user, row_exists, stored_list,
};
use engine::{EngineError, Method, Step, Table, UserChanges, UserDraft};

#[tokio::test]
async fn create_user_drops_unknown_channels_and_links_known_ones() {
    let (engine, provider) = engine_with_provider();
    let news = new_channel(&engine, "news").await;

    let outcome = engine
        .create_user(UserDraft {
            username: "alice".to_string(),
            password: "secret".to_string(),
            allowed_channels: vec![news.uid.clone(), "missing-channel".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    let alice = outcome.value.clone();
    assert!(!outcome.is_degraded());
    assert_eq!(alice.username, "alice");
    assert_eq!(alice.role, "regular");
    assert!(alice.active);
    assert_eq!(alice.allowed_channels, vec![news.uid.clone()]);
    assert_eq!(
        stored_list(&provider, Table::Channels, &news.uid),
        vec![alice.uid.clone()]
    );
    assert_eq!(
        identity_email(&provider, &alice.uid).as_deref(),
        Some("alice@example.com")
    );
    assert_eq!(
        outcome.steps,
        vec![
            Step::ValidateRelations,
            Step::CreateIdentity,
            Step::CreateRow,
            Step::AttachMemberships,
        ]
    );
}

#[tokio::test]
async fn create_user_keeps_email_usernames() {
    let (engine, provider) = engine_with_provider();
    let bob = new_user(&engine, "bob@corp.io", Vec::new()).await;

    assert_eq!(bob.username, "bob@corp.io");
    assert_eq!(
        identity_email(&provider, &bob.uid).as_deref(),
        Some("bob@corp.io")
    );
}

#[tokio::test]
async fn create_user_strips_the_identity_domain() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice@example.com", Vec::new()).await;

    assert_eq!(alice.username, "alice");
    assert_eq!(
        identity_email(&provider, &alice.uid).as_deref(),
        Some("alice@example.com")
    );
}

#[tokio::test]
async fn create_user_requires_username_and_password() {
    let (engine, provider) = engine_with_provider();

    let err = engine
        .create_user(UserDraft {
            username: "  ".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .create_user(UserDraft {
            username: "alice".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(provider.identity_count(), 0);
}

#[tokio::test]
async fn failed_row_insert_deletes_the_identity() {
    let (engine, provider) = engine_with_provider();
    provider.fail_on(Method::POST, "/rest/v1/users");

    let err = engine
        .create_user(UserDraft {
            username: "alice".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Transport(_)));
    assert_eq!(provider.identity_count(), 0);
    assert!(provider.rows(Table::Users).is_empty());
}

#[tokio::test]
async fn failed_identity_create_writes_nothing() {
    let (engine, provider) = engine_with_provider();
    let news = new_channel(&engine, "news").await;
    provider.fail_on(Method::POST, "/auth/v1/admin/users");

    let err = engine
        .create_user(UserDraft {
            username: "alice".to_string(),
            password: "secret".to_string(),
            allowed_channels: vec![news.uid.clone()],
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Transport(_)));
    assert!(provider.rows(Table::Users).is_empty());
    assert!(stored_list(&provider, Table::Channels, &news.uid).is_empty());
}

#[tokio::test]
async fn create_user_reports_channels_it_could_not_update() {
    let (engine, provider) = engine_with_provider();
    let news = new_channel(&engine, "news").await;
    let music = new_channel(&engine, "music").await;
    provider.fail_on(Method::PATCH, &format!("/rest/v1/channels?uid=eq.{}", music.uid));

    let outcome = engine
        .create_user(UserDraft {
            username: "alice".to_string(),
            password: "secret".to_string(),
            allowed_channels: vec![news.uid.clone(), music.uid.clone()],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(outcome.is_degraded());
    assert_eq!(outcome.unsynced, vec![music.uid.clone()]);
    assert!(row_exists(&provider, Table::Users, &outcome.value.uid));
    assert_eq!(
        stored_list(&provider, Table::Channels, &news.uid),
        vec![outcome.value.uid.clone()]
    );
}

#[tokio::test]
async fn update_user_moves_between_channels() {
    let (engine, provider) = engine_with_provider();
    let news = new_channel(&engine, "news").await;
    let music = new_channel(&engine, "music").await;
    let alice = new_user(&engine, "alice", vec![news.uid.clone()]).await;

    let outcome = engine
        .update_user(
            &alice.uid,
            UserChanges {
                allowed_channels: Some(vec![music.uid.clone()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!outcome.is_degraded());
    assert_eq!(outcome.value.allowed_channels, vec![music.uid.clone()]);
    assert!(stored_list(&provider, Table::Channels, &news.uid).is_empty());
    assert_eq!(
        stored_list(&provider, Table::Channels, &music.uid),
        vec![alice.uid.clone()]
    );
}

#[tokio::test]
async fn update_user_renames_the_identity() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice", Vec::new()).await;

    let outcome = engine
        .update_user(
            &alice.uid,
            UserChanges {
                username: Some("alicia@example.com".to_string()),
                password: Some("undefined".to_string()),
                role: Some("admin".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.value.username, "alicia");
    assert_eq!(outcome.value.role, "admin");
    assert_eq!(
        identity_email(&provider, &alice.uid).as_deref(),
        Some("alicia@example.com")
    );
}

#[tokio::test]
async fn failed_row_update_restores_the_identity_email() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice", Vec::new()).await;
    provider.fail_on(Method::PATCH, "/rest/v1/users");

    let err = engine
        .update_user(
            &alice.uid,
            UserChanges {
                username: Some("alicia".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Transport(_)));
    assert_eq!(
        identity_email(&provider, &alice.uid).as_deref(),
        Some("alice@example.com")
    );
    provider.clear_failures();
    assert_eq!(engine.retrieve_user(&alice.uid).await.unwrap().username, "alice");
}

#[tokio::test]
async fn password_change_before_failed_row_update_is_partial_failure() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice", Vec::new()).await;
    provider.fail_on(Method::PATCH, "/rest/v1/users");

    let err = engine
        .update_user(
            &alice.uid,
            UserChanges {
                password: Some("new-secret".to_string()),
                role: Some("admin".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    match &err {
        EngineError::PartialFailure {
            saga,
            completed,
            failed,
            ..
        } => {
            assert_eq!(*saga, "update_user");
            assert_eq!(*failed, Step::PatchRow);
            assert_eq!(completed, &vec![Step::FetchCurrent, Step::UpdateIdentity]);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    provider.clear_failures();
    assert_eq!(engine.retrieve_user(&alice.uid).await.unwrap().role, "regular");
}

#[tokio::test]
async fn rename_with_password_restores_email_and_reports_partial_failure() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice", Vec::new()).await;
    provider.fail_on(Method::PATCH, "/rest/v1/users");

    let err = engine
        .update_user(
            &alice.uid,
            UserChanges {
                username: Some("alicia".to_string()),
                password: Some("new-secret".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::PartialFailure {
            failed: Step::PatchRow,
            ..
        }
    ));
    assert_eq!(
        identity_email(&provider, &alice.uid).as_deref(),
        Some("alice@example.com")
    );
}

#[tokio::test]
async fn failed_identity_update_leaves_the_row_untouched() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice", Vec::new()).await;
    provider.fail_on(Method::PUT, "/auth/v1/admin/users");

    let err = engine
        .update_user(
            &alice.uid,
            UserChanges {
                username: Some("alicia".to_string()),
                role: Some("admin".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Transport(_)));
    provider.clear_failures();
    let stored = engine.retrieve_user(&alice.uid).await.unwrap();
    assert_eq!(stored.username, "alice");
    assert_eq!(stored.role, "regular");
    assert_eq!(
        identity_email(&provider, &alice.uid).as_deref(),
        Some("alice@example.com")
    );
}

#[tokio::test]
async fn update_missing_user_is_not_found() {
    let (engine, _provider) = engine_with_provider();
    let err = engine
        .update_user("nobody", UserChanges::default())
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::NotFound("user nobody".to_string()));
}

#[tokio::test]
async fn delete_user_detaches_every_channel() {
    let (engine, provider) = engine_with_provider();
    let news = new_channel(&engine, "news").await;
    let music = new_channel(&engine, "music").await;
    let alice = new_user(&engine, "alice", vec![news.uid.clone()]).await;
    // One-sided reference the user's own list does not know about.
    provider.insert_row(
        Table::Channels,
        serde_json::json!({"uid": "stale", "name": "stale", "allowed_users": [alice.uid]}),
    );

    let outcome = engine.delete_user(&alice.uid).await.unwrap();

    assert!(!outcome.is_degraded());
    assert!(!row_exists(&provider, Table::Users, &alice.uid));
    assert!(provider.identity(&alice.uid).is_none());
    assert!(stored_list(&provider, Table::Channels, &news.uid).is_empty());
    assert!(stored_list(&provider, Table::Channels, "stale").is_empty());
    assert!(stored_list(&provider, Table::Channels, &music.uid).is_empty());
}

#[tokio::test]
async fn failed_identity_delete_reattaches_channels() {
    let (engine, provider) = engine_with_provider();
    let news = new_channel(&engine, "news").await;
    let alice = new_user(&engine, "alice", vec![news.uid.clone()]).await;
    provider.fail_on(Method::DELETE, "/auth/v1/admin/users");

    let err = engine.delete_user(&alice.uid).await.unwrap_err();

    assert!(matches!(err, EngineError::Transport(_)));
    assert!(row_exists(&provider, Table::Users, &alice.uid));
    assert_eq!(
        stored_list(&provider, Table::Channels, &news.uid),
        vec![alice.uid.clone()]
    );
}

#[tokio::test]
async fn failed_row_delete_is_a_partial_failure() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice", Vec::new()).await;
    provider.fail_on(Method::DELETE, "/rest/v1/users");

    let err = engine.delete_user(&alice.uid).await.unwrap_err();

    match &err {
        EngineError::PartialFailure {
            saga,
            completed,
            failed,
            ..
        } => {
            assert_eq!(*saga, "delete_user");
            assert_eq!(*failed, Step::DeleteRow);
            assert_eq!(completed, &vec![Step::FetchCurrent, Step::DeleteIdentity]);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    assert!(provider.identity(&alice.uid).is_none());
    assert!(row_exists(&provider, Table::Users, &alice.uid));
}

#[tokio::test]
async fn delete_user_tolerates_a_missing_identity() {
    let (engine, provider) = engine_with_provider();
    let alice = new_user(&engine, "alice", ids(&[])).await;
    engine.delete_user(&alice.uid).await.unwrap();

    // Row re-inserted by hand: the identity is already gone.
    provider.insert_row(
        Table::Users,
        serde_json::json!({"uid": alice.uid, "username": "alice"}),
    );
    let outcome = engine.delete_user(&alice.uid).await.unwrap();
    assert!(outcome.steps.contains(&Step::DeleteRow));
    assert!(!row_exists(&provider, Table::Users, &alice.uid));
}
