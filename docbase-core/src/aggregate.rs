//! Aggregation capability.

use serde::de::DeserializeOwned;

use crate::{pipeline::Pipeline, query::Expr};

/// A type whose values are produced by running a pipeline over a collection.
///
/// The pipeline find operations run [`Aggregation::pipeline`] against
/// [`Aggregation::collection_name`] and decode every output document into `Self`.
///
/// ```ignore
/// #[derive(Debug, Clone, Deserialize)]
/// struct OrderWithOwner {
///     #[serde(rename = "_id")]
///     id: ObjectId,
///     amount: i64,
///     owner: User,
/// }
///
/// impl Aggregation for OrderWithOwner {
///     fn collection_name() -> &'static str {
///         "orders"
///     }
///
///     fn pipeline(filter: Option<Expr>) -> Pipeline {
///         Pipeline::new()
///             .match_optional(filter)
///             .lookup("users", "owner_id", "_id", "owner")
///             .unwind("owner")
///     }
/// }
/// ```
pub trait Aggregation: DeserializeOwned + Send + Sync + 'static {
    /// Collection the pipeline runs against.
    fn collection_name() -> &'static str;

    /// Builds the stages for the given caller filter.
    fn pipeline(filter: Option<Expr>) -> Pipeline;
}
