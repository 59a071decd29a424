mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use docbase::{
    memory::{InMemoryConnector, InMemoryStore},
    prelude::*,
};

use common::{MemoryManager, Order, User, config, connect, connect_with, prepared_store};

#[tokio::test]
async fn empty_uri_is_a_configuration_error() {
    let config = ConnectionConfig::new("", "app");

    let result = MemoryManager::connect(&config, &InMemoryConnector::new()).await;

    assert!(matches!(result, Err(DocumentStoreError::Configuration(_))));
}

#[tokio::test]
async fn empty_default_database_is_a_configuration_error() {
    let config = ConnectionConfig::new("memory://local", " ");

    let result = MemoryManager::connect(&config, &InMemoryConnector::new()).await;

    assert!(matches!(result, Err(DocumentStoreError::Configuration(_))));
}

#[tokio::test]
async fn failed_liveness_check_is_a_connection_error() {
    let result = MemoryManager::connect(&config(), &InMemoryConnector::new().unreachable()).await;

    assert!(matches!(result, Err(DocumentStoreError::Connection(_))));
}

#[tokio::test]
async fn slow_connect_times_out() {
    let config = config().with_connect_timeout(Duration::from_millis(20));
    let connector = InMemoryConnector::new().with_latency(Duration::from_millis(500));

    let result = MemoryManager::connect(&config, &connector).await;

    assert!(matches!(result, Err(DocumentStoreError::Connection(_))));
}

#[tokio::test]
async fn cancelled_parent_scope_aborts_connect() {
    let parent = CancellationScope::new();
    parent.cancel();

    let result = MemoryManager::connect_with_scope(&config(), &InMemoryConnector::new(), &parent).await;

    assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
}

#[tokio::test]
async fn database_handles_are_cached_by_name() {
    let manager = connect().await;

    assert_eq!(manager.core_database().await.unwrap().name(), "app");
    assert_eq!(manager.database("").await.unwrap().name(), "app");
    assert_eq!(manager.database("reports").await.unwrap().name(), "reports");

    let user_database = manager.user_database().await.unwrap().unwrap();
    assert_eq!(user_database.name(), "accounts");
    assert!(manager.user_store().await.unwrap().is_some());
}

#[tokio::test]
async fn user_database_is_absent_unless_configured() {
    let manager = connect_with(&ConnectionConfig::new("memory://local", "app")).await;

    assert!(manager.user_database_name().is_none());
    assert!(manager.user_database().await.unwrap().is_none());
    assert!(manager.user_store().await.unwrap().is_none());
}

#[tokio::test]
async fn databases_are_listed_once_written() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    store.save(&mut User::new("Ada", 36), None).await.unwrap();

    manager.ping().await.unwrap();
    assert!(manager.list_database_names().await.unwrap().contains(&"app".to_string()));
}

#[tokio::test]
async fn committed_transaction_publishes_writes() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let tx_store = store.clone();
    manager
        .with_session(move |session| async move {
            let store = tx_store.with_session(session);
            store.save(&mut User::new("Ada", 36), None).await?;
            store.save(&mut User::new("Bob", 41), None).await?;

            assert_eq!(store.count_documents::<User>(None).await?, 2);
            Ok::<(), DocumentStoreError>(())
        })
        .await
        .unwrap();

    assert!(manager.active_session().await.is_some());
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 0);

    manager.commit_transaction().await.unwrap();

    assert!(manager.active_session().await.is_none());
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 2);
}

#[tokio::test]
async fn aborted_transaction_discards_writes() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let tx_store = store.clone();
    manager
        .with_session(move |session| async move {
            tx_store
                .with_session(session)
                .save(&mut User::new("Ada", 36), None)
                .await?;
            Ok::<(), DocumentStoreError>(())
        })
        .await
        .unwrap();

    manager.abort_transaction().await.unwrap();

    assert!(manager.active_session().await.is_none());
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 0);
}

#[tokio::test]
async fn body_error_is_returned_and_session_stays_open() {
    let manager = connect().await;

    let result = manager
        .with_session(|_session| async { Err::<(), _>(DocumentStoreError::Backend("body failed".into())) })
        .await;

    assert!(matches!(result, Err(DocumentStoreError::Backend(_))));
    assert!(manager.active_session().await.is_some());

    manager.abort_transaction().await.unwrap();
}

#[tokio::test]
async fn collection_check_inside_transaction_assumes_existence() {
    let manager = connect().await;
    let store = manager.core_store().await.unwrap();

    let tx_store = store.clone();
    manager
        .with_session(move |session| async move {
            let store = tx_store.with_session(session);
            assert!(store.collection_exists::<Order>().await);
            Ok::<(), DocumentStoreError>(())
        })
        .await
        .unwrap();

    manager.abort_transaction().await.unwrap();

    assert!(!store.collection_exists::<Order>().await);
}

#[tokio::test]
async fn second_session_is_rejected_by_default() {
    let manager = connect().await;

    manager.with_session(|_| async { Ok(()) }).await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let result = manager
        .with_session(move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(DocumentStoreError::SessionAlreadyActive)));
    assert!(!ran.load(Ordering::SeqCst));

    manager.commit_transaction().await.unwrap();
}

#[tokio::test]
async fn second_session_is_skipped_when_configured() {
    let manager = connect_with(&config().with_session_conflict(SessionConflict::Skip)).await;

    manager.with_session(|_| async { Ok(()) }).await.unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    manager
        .with_session(move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    assert!(!ran.load(Ordering::SeqCst));

    manager.abort_transaction().await.unwrap();
}

#[tokio::test]
async fn commit_and_abort_need_an_active_session() {
    let manager = connect().await;

    assert!(matches!(manager.commit_transaction().await, Err(DocumentStoreError::NoActiveSession)));
    assert!(matches!(manager.abort_transaction().await, Err(DocumentStoreError::NoActiveSession)));
}

#[tokio::test]
async fn close_is_idempotent_and_ends_the_session() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let tx_store = store.clone();
    manager
        .with_session(move |session| async move {
            tx_store.with_session(session).save(&mut User::new("Ada", 36), None).await?;
            Ok::<(), DocumentStoreError>(())
        })
        .await
        .unwrap();

    manager.close().await.unwrap();
    manager.close().await.unwrap();

    assert!(manager.is_closed().await);
    assert!(manager.active_session().await.is_none());
    assert!(manager.scope().is_cancelled());
}

#[tokio::test]
async fn operations_fail_after_close() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    manager.close().await.unwrap();

    assert!(matches!(manager.core_store().await, Err(DocumentStoreError::ConnectionClosed)));
    assert!(matches!(manager.ping().await, Err(DocumentStoreError::ConnectionClosed)));
    assert!(matches!(
        store.save(&mut User::new("Late", 1), None).await,
        Err(DocumentStoreError::Cancelled)
    ));
}

#[tokio::test]
async fn managers_over_one_store_share_data() {
    let shared = InMemoryStore::new();

    let writer = MemoryManager::connect(&config(), &shared.connector()).await.unwrap();
    let reader = MemoryManager::connect(&config(), &shared.connector()).await.unwrap();

    prepared_store(&writer).await.save(&mut User::new("Ada", 36), None).await.unwrap();

    let store = reader.core_store().await.unwrap();
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 1);
}

#[tokio::test]
async fn transactions_of_two_managers_both_commit() {
    let shared = InMemoryStore::new();
    let first = MemoryManager::connect(&config(), &shared.connector()).await.unwrap();
    let second = MemoryManager::connect(&config(), &shared.connector()).await.unwrap();

    for (manager, name) in [(&first, "Ada"), (&second, "Bob")] {
        let store = manager.core_store().await.unwrap();
        manager
            .with_session(move |session| async move {
                store.with_session(session).save(&mut User::new(name, 30), None).await?;
                Ok::<(), DocumentStoreError>(())
            })
            .await
            .unwrap();
    }

    first.commit_transaction().await.unwrap();
    second.commit_transaction().await.unwrap();

    let store = first.core_store().await.unwrap();
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 2);
}

#[tokio::test]
async fn collections_ensured_inside_a_transaction_keep_their_indexes() {
    let manager = connect().await;
    let store = manager.core_store().await.unwrap();

    let tx_store = store.clone();
    manager
        .with_session(move |session| async move {
            let store = tx_store.with_session(session);
            store.ensure_collections(&[CollectionInfo::of::<User>()]).await?;
            store.save(&mut User::new("Ada", 36), None).await?;
            Ok::<(), DocumentStoreError>(())
        })
        .await
        .unwrap();

    manager.commit_transaction().await.unwrap();

    let err = store.save(&mut User::new("Ada", 52), None).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DuplicateKey(_)));
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 1);
}
