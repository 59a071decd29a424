mod common;

use bson::{Bson, doc, oid::ObjectId};
use std::cell::Cell;

use docbase::{audit::{CREATED_SUMMARY, UPDATED_SUMMARY}, memory::InMemoryDatabase, prelude::*};

use common::{Operator, Order, User, connect, prepared_store};

#[tokio::test]
async fn save_assigns_identity_and_round_trips() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let mut user = User::new("Ada", 36);
    let id = store.save(&mut user, None).await.unwrap();

    assert!(matches!(id, Bson::ObjectId(_)));
    assert_eq!(user.id, id.as_object_id());
    assert!(user.records.is_empty());

    let mut loaded = user.stub();
    store.find_by_id(&mut loaded).await.unwrap();

    assert_eq!(loaded, user);
}

#[tokio::test]
async fn save_with_actor_adds_exactly_one_record() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;
    let operator = Operator::new("Grace", "grace@ops");

    let mut user = User::new("Linus", 28);
    store.save(&mut user, Some(&operator)).await.unwrap();

    assert_eq!(user.records.len(), 1);
    let record = user.records.last().unwrap();
    assert_eq!(record.account, "grace@ops");
    assert_eq!(record.name, "Grace");
    assert_eq!(record.summary, CREATED_SUMMARY);

    let mut loaded = user.stub();
    store.find_by_id(&mut loaded).await.unwrap();
    assert_eq!(loaded.records.created_by(), Some("grace@ops"));
}

#[tokio::test]
async fn save_keeps_an_existing_identity() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let fixed = ObjectId::new();
    let mut user = User { id: Some(fixed), ..User::new("Ken", 50) };

    assert_eq!(store.save(&mut user, None).await.unwrap(), Bson::ObjectId(fixed));
    assert_eq!(user.id, Some(fixed));
}

#[tokio::test]
async fn batch_save_of_nothing_is_empty() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let outcome = store.batch_save(Vec::<User>::new(), None).await.unwrap();

    assert!(outcome.inserted_ids.is_empty());
    assert!(outcome.failed.is_empty());
    assert!(outcome.failures.is_empty());
}

#[tokio::test]
async fn batch_save_inserts_everything_in_order() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;
    let operator = Operator::new("Grace", "grace@ops");

    let users = vec![User::new("A", 1), User::new("B", 2), User::new("C", 3)];
    let outcome = store.batch_save(users, Some(&operator)).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.inserted_ids.len(), 3);

    let stored = store
        .find::<User>(Query::builder().sort("age", SortDirection::Asc).build())
        .await
        .unwrap();

    let ids = stored.iter().map(|user| Bson::ObjectId(user.id.unwrap())).collect::<Vec<_>>();
    assert_eq!(ids, outcome.inserted_ids);
    assert!(stored.iter().all(|user| user.records.len() == 1));
}

#[tokio::test]
async fn batch_save_reports_failed_inputs_by_position() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let mut existing = User::new("Taken", 40);
    store.save(&mut existing, None).await.unwrap();

    let mut clash = User::new("Other", 41);
    clash.email = existing.email.clone();

    let batch = vec![User::new("First", 20), clash.clone(), User::new("Third", 22)];
    let submitted = batch.len();
    let outcome = store.batch_save(batch, None).await.unwrap();

    assert!(outcome.is_partial());
    assert_eq!(outcome.inserted_ids.len() + outcome.failed.len(), submitted);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].name, clash.name);
    let failed_id = outcome.failed[0].id.map(Bson::ObjectId).unwrap();
    assert!(!outcome.inserted_ids.contains(&failed_id));
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 1);
    assert_eq!(outcome.failures[0].code, 11000);

    // The writes around the failure are kept.
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 3);
}

#[tokio::test]
async fn find_by_id_of_missing_document_is_not_found() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let mut ghost = User { id: Some(ObjectId::new()), ..User::new("Ghost", 99) };
    let before = ghost.clone();

    let err = store.find_by_id(&mut ghost).await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(ghost, before);
}

#[tokio::test]
async fn find_by_id_needs_an_identity() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let mut anonymous = User::new("Nobody", 0);

    assert!(matches!(
        store.find_by_id(&mut anonymous).await,
        Err(DocumentStoreError::Precondition(_))
    ));
}

#[tokio::test]
async fn find_one_honors_sort() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    store
        .batch_save(vec![User::new("Young", 20), User::new("Old", 70), User::new("Middle", 45)], None)
        .await
        .unwrap();

    let mut oldest = User::default();
    store
        .find_one(&mut oldest, Query::builder().sort("age", SortDirection::Desc).build())
        .await
        .unwrap();

    assert_eq!(oldest.name, "Old");
}

#[tokio::test]
async fn find_applies_filter_skip_and_limit() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let users = (1..=6).map(|age| User::new(&format!("U{age}"), age)).collect::<Vec<_>>();
    store.batch_save(users, None).await.unwrap();

    let page = store
        .find::<User>(
            Query::builder()
                .filter(Filter::gt("age", 1))
                .sort("age", SortDirection::Asc)
                .skip(1)
                .limit(3)
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(page.iter().map(|user| user.age).collect::<Vec<_>>(), vec![3, 4, 5]);

    let none = store.find::<User>(Filter::eq("name", "missing")).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn find_and_exec_visits_every_match_in_order() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let users = (1..=4).map(|age| User::new(&format!("U{age}"), age)).collect::<Vec<_>>();
    store.batch_save(users, None).await.unwrap();

    let mut seen = Vec::new();
    let mut last = User::default();
    store
        .find_and_exec(&mut last, Query::builder().sort("age", SortDirection::Asc).build(), |user: &User| {
            seen.push(user.age);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert_eq!(last.age, 4);
}

#[tokio::test]
async fn find_and_exec_stops_at_the_first_failure() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let users = (1..=5).map(|age| User::new(&format!("U{age}"), age)).collect::<Vec<_>>();
    store.batch_save(users, None).await.unwrap();

    let calls = Cell::new(0);
    let mut last = User::default();
    let result = store
        .find_and_exec(&mut last, Query::builder().sort("age", SortDirection::Asc).build(), |user: &User| {
            calls.set(calls.get() + 1);
            if user.age == 3 {
                return Err(DocumentStoreError::Backend("rejected".into()));
            }
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(DocumentStoreError::Backend(message)) if message == "rejected"));
    assert_eq!(calls.get(), 3);
}

#[tokio::test]
async fn update_one_sets_fields_and_appends_audit_record() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;
    let operator = Operator::new("Grace", "grace@ops");

    let mut user = User::new("Ada", 36);
    store.save(&mut user, Some(&operator)).await.unwrap();

    let modified = store
        .update_one(&mut user, doc! { "age": 37 }, Some(&operator))
        .await
        .unwrap();
    assert_eq!(modified, 1);
    assert_eq!(user.records.len(), 2);

    let mut loaded = user.stub();
    store.find_by_id(&mut loaded).await.unwrap();

    assert_eq!(loaded.age, 37);
    assert_eq!(loaded.name, "Ada");
    assert_eq!(loaded.email, "ada@example.com");
    assert_eq!(loaded.records.len(), 2);
    assert_eq!(loaded.records.last().unwrap().summary, UPDATED_SUMMARY);
}

#[tokio::test]
async fn update_one_without_actor_leaves_records_alone() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let mut user = User::new("Ada", 36);
    store.save(&mut user, None).await.unwrap();

    store.update_one(&mut user, doc! { "name": "Ada L." }, None).await.unwrap();

    let mut loaded = user.stub();
    store.find_by_id(&mut loaded).await.unwrap();
    assert_eq!(loaded.name, "Ada L.");
    assert!(loaded.records.is_empty());
}

#[tokio::test]
async fn update_one_of_unknown_identity_modifies_nothing() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    let mut ghost = User { id: Some(ObjectId::new()), ..User::new("Ghost", 1) };

    assert_eq!(store.update_one(&mut ghost, doc! { "age": 2 }, None).await.unwrap(), 0);
}

#[tokio::test]
async fn update_all_pushes_one_record_per_match() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;
    let operator = Operator::new("Grace", "grace@ops");

    let owner = {
        let mut owner = User::new("Owner", 30);
        store.save(&mut owner, None).await.unwrap();
        owner
    };

    let orders = vec![
        Order::new(&owner, 10, "open"),
        Order::new(&owner, 20, "open"),
        Order::new(&owner, 30, "shipped"),
    ];
    store.batch_save(orders, Some(&operator)).await.unwrap();

    let modified = store
        .update_all::<Order>(Filter::eq("status", "open"), doc! { "status": "cancelled" }, Some(&operator))
        .await
        .unwrap();
    assert_eq!(modified, 2);

    let cancelled = store.find::<Order>(Filter::eq("status", "cancelled")).await.unwrap();
    assert_eq!(cancelled.len(), 2);
    for order in cancelled {
        assert_eq!(order.history.len(), 2);
        assert_eq!(order.history.records()[0].summary, CREATED_SUMMARY);
        assert_eq!(order.history.records()[1].summary, UPDATED_SUMMARY);
        assert_eq!(order.history.records()[1].account, "grace@ops");
    }

    let shipped = store.find::<Order>(Filter::eq("status", "shipped")).await.unwrap();
    assert_eq!(shipped[0].history.len(), 1);
}

#[tokio::test]
async fn removes_and_counts() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;
    let operator = Operator::new("Grace", "grace@ops");

    let mut first = User::new("First", 10);
    store.save(&mut first, None).await.unwrap();
    store
        .batch_save(vec![User::new("Second", 20), User::new("Third", 30)], None)
        .await
        .unwrap();

    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 3);
    assert_eq!(store.count_documents::<User>(Some(Filter::gte("age", 20))).await.unwrap(), 2);

    assert_eq!(store.remove_by_id(&first, Some(&operator)).await.unwrap(), 1);
    assert_eq!(store.remove_by_id(&first, None).await.unwrap(), 0);

    assert_eq!(store.remove_all::<User>(Filter::gte("age", 20), None).await.unwrap(), 2);
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 0);
}

#[tokio::test]
async fn ensure_collections_is_idempotent() {
    let manager = connect().await;
    let store = manager.core_store().await.unwrap();

    assert!(!store.collection_exists::<User>().await);

    let collections = [CollectionInfo::of::<User>()];
    store.ensure_collections(&collections).await.unwrap();
    store.ensure_collections(&collections).await.unwrap();

    assert!(store.collection_exists::<User>().await);
    assert!(!store.collection_exists::<Order>().await);
}

#[tokio::test]
async fn unique_index_rejects_duplicate_saves() {
    let manager = connect().await;
    let store = prepared_store(&manager).await;

    store.save(&mut User::new("Ada", 36), None).await.unwrap();

    let result = store.save(&mut User::new("Ada", 37), None).await;
    assert!(matches!(result, Err(DocumentStoreError::DuplicateKey(_))));
}

#[tokio::test]
async fn detached_store_requires_a_database() {
    let manager = connect().await;
    let mut store = DocumentStore::<InMemoryDatabase>::detached();

    assert!(matches!(
        store.save(&mut User::new("Ada", 36), None).await,
        Err(DocumentStoreError::Precondition(_))
    ));
    assert!(!store.collection_exists::<User>().await);

    store.set_database(manager.core_database().await.unwrap());
    store.save(&mut User::new("Ada", 36), None).await.unwrap();
    assert_eq!(store.count_documents::<User>(None).await.unwrap(), 1);
}
