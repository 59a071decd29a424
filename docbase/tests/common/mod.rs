#![allow(dead_code)]

use bson::{Bson, oid::ObjectId};
use serde::{Deserialize, Serialize};

use docbase::{memory::{InMemoryConnector, InMemoryStore}, prelude::*};

pub type MemoryManager = ConnectionManager<InMemoryStore>;

pub struct Operator {
    pub name: String,
    pub account: String,
}

impl Operator {
    pub fn new(name: &str, account: &str) -> Self {
        Self { name: name.to_string(), account: account.to_string() }
    }
}

impl Actor for Operator {
    fn name(&self) -> &str {
        &self.name
    }

    fn account(&self) -> &str {
        &self.account
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    pub age: i32,
    #[serde(default)]
    pub records: AuditTrail,
}

impl User {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            age,
            ..Self::default()
        }
    }

    /// A value carrying only the identity of `self`, as a caller would build for a lookup.
    pub fn stub(&self) -> Self {
        Self { id: self.id, ..Self::default() }
    }
}

impl Document for User {
    fn collection_name() -> &'static str {
        "users"
    }

    fn id(&self) -> Option<Bson> {
        self.id.map(Bson::ObjectId)
    }

    fn set_id(&mut self, id: Bson) {
        self.id = id.as_object_id();
    }

    fn set_creator(&mut self, actor: &dyn Actor) {
        self.records.stamp_creator(actor);
    }

    fn add_audit_record(&mut self, actor: &dyn Actor, summary: &str) -> Vec<Record> {
        self.records.push(actor, summary).to_vec()
    }

    fn indexes() -> Vec<IndexDefinition> {
        vec![IndexDefinition::ascending("email").unique()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub owner_id: Option<ObjectId>,
    pub amount: i64,
    pub status: String,
    #[serde(default)]
    pub history: AuditTrail,
}

impl Order {
    pub fn new(owner: &User, amount: i64, status: &str) -> Self {
        Self { owner_id: owner.id, amount, status: status.to_string(), ..Self::default() }
    }
}

impl Document for Order {
    fn collection_name() -> &'static str {
        "orders"
    }

    fn id(&self) -> Option<Bson> {
        self.id.map(Bson::ObjectId)
    }

    fn set_id(&mut self, id: Bson) {
        self.id = id.as_object_id();
    }

    fn set_creator(&mut self, actor: &dyn Actor) {
        self.history.stamp_creator(actor);
    }

    fn add_audit_record(&mut self, actor: &dyn Actor, summary: &str) -> Vec<Record> {
        self.history.push(actor, summary).to_vec()
    }

    fn records_field() -> &'static str {
        "history"
    }
}

/// An order joined with its owner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderWithOwner {
    #[serde(rename = "_id")]
    pub id: Option<ObjectId>,
    pub amount: i64,
    pub status: String,
    pub owner: User,
}

impl Aggregation for OrderWithOwner {
    fn collection_name() -> &'static str {
        "orders"
    }

    fn pipeline(filter: Option<Expr>) -> Pipeline {
        Pipeline::new()
            .match_optional(filter)
            .lookup("users", "owner_id", "_id", "owner")
            .unwind("owner")
            .sort("amount", SortDirection::Asc)
    }
}

/// Order totals per owner, largest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnerTotals {
    #[serde(rename = "_id")]
    pub owner_id: Option<ObjectId>,
    pub total: i64,
    pub orders: i64,
}

impl Aggregation for OwnerTotals {
    fn collection_name() -> &'static str {
        "orders"
    }

    fn pipeline(filter: Option<Expr>) -> Pipeline {
        Pipeline::new()
            .match_optional(filter)
            .group(Some("owner_id"), [
                ("total", Accumulator::Sum("amount".into())),
                ("orders", Accumulator::Count),
            ])
            .sort("total", SortDirection::Desc)
    }
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new("memory://local", "app").with_user_database("accounts")
}

pub async fn connect() -> MemoryManager {
    ConnectionManager::connect(&config(), &InMemoryConnector::new())
        .await
        .expect("in-memory connection")
}

pub async fn connect_with(config: &ConnectionConfig) -> MemoryManager {
    ConnectionManager::connect(config, &InMemoryConnector::new())
        .await
        .expect("in-memory connection")
}

/// A store over the default database with the user collection and its indexes in place.
pub async fn prepared_store(manager: &MemoryManager) -> DocumentStore<docbase::memory::InMemoryDatabase> {
    let store = manager.core_store().await.expect("core store");

    store
        .ensure_collections(&[CollectionInfo::of::<User>(), CollectionInfo::of::<Order>()])
        .await
        .expect("collections");

    store
}
