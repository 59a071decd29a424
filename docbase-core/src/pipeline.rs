//! Aggregation pipelines.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s executed server-side by the storage
//! engine. Types implementing [`Aggregation`](crate::aggregate::Aggregation) produce a
//! pipeline from a caller filter; the pipeline find operations of
//! [`DocumentStore`](crate::store::DocumentStore) run it and decode each output
//! document into the aggregation type.

use crate::query::{Expr, Sort, SortDirection};

/// Accumulator used by a [`Stage::Group`] output field.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Number of documents in the group.
    Count,
    /// Sum of a numeric field.
    Sum(String),
    /// Average of a numeric field.
    Avg(String),
    Min(String),
    Max(String),
    /// Value of a field in the first document of the group.
    First(String),
    /// Value of a field in the last document of the group.
    Last(String),
    /// All values of a field, in input order.
    Push(String),
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keeps documents matching the filter.
    Match(Expr),
    Sort(Vec<Sort>),
    Skip(usize),
    Limit(usize),
    /// Keeps only the listed fields (the identity is always kept).
    Project(Vec<String>),
    /// Emits one document per element of the array at the given path.
    Unwind(String),
    /// Left outer join against another collection of the same database.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// Groups documents by the value of `key` (all documents when `None`).
    ///
    /// The group key becomes the output `_id`.
    Group {
        key: Option<String>,
        accumulators: Vec<(String, Accumulator)>,
    },
    /// Replaces the stream with a single document holding the input count.
    Count(String),
}

/// An ordered list of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn push(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds a `Match` stage when a filter is given, leaves the pipeline untouched otherwise.
    pub fn match_optional(self, filter: Option<Expr>) -> Self {
        match filter {
            Some(filter) => self.push(Stage::Match(filter)),
            None => self,
        }
    }

    pub fn matching(self, filter: Expr) -> Self {
        self.push(Stage::Match(filter))
    }

    pub fn sort(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.push(Stage::Sort(vec![Sort::new(field, direction)]))
    }

    pub fn skip(self, skip: usize) -> Self {
        self.push(Stage::Skip(skip))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.push(Stage::Limit(limit))
    }

    pub fn project<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.push(Stage::Project(fields.into_iter().map(Into::into).collect()))
    }

    pub fn unwind(self, path: impl Into<String>) -> Self {
        self.push(Stage::Unwind(path.into()))
    }

    pub fn lookup(
        self,
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        self.push(Stage::Lookup {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        })
    }

    pub fn group<S: Into<String>>(
        self,
        key: Option<&str>,
        accumulators: impl IntoIterator<Item = (S, Accumulator)>,
    ) -> Self {
        self.push(Stage::Group {
            key: key.map(str::to_string),
            accumulators: accumulators
                .into_iter()
                .map(|(name, acc)| (name.into(), acc))
                .collect(),
        })
    }

    pub fn count(self, field: impl Into<String>) -> Self {
        self.push(Stage::Count(field.into()))
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Self { stages }
    }
}

/// Execution hints for aggregations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    /// Allow the engine to spill large stages to disk.
    pub allow_disk_use: Option<bool>,
    /// Cursor batch size.
    pub batch_size: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;

    #[test]
    fn optional_match_is_skipped_without_filter() {
        let pipeline = Pipeline::new().match_optional(None).limit(3);

        assert_eq!(pipeline.stages(), &[Stage::Limit(3)]);
    }

    #[test]
    fn builder_keeps_stage_order() {
        let pipeline = Pipeline::new()
            .match_optional(Some(Filter::eq("status", "open")))
            .lookup("users", "owner_id", "_id", "owner")
            .unwind("owner")
            .group(Some("owner.name"), [("total", Accumulator::Sum("amount".into()))]);

        let kinds = pipeline
            .stages()
            .iter()
            .map(|stage| match stage {
                Stage::Match(_) => "match",
                Stage::Lookup { .. } => "lookup",
                Stage::Unwind(_) => "unwind",
                Stage::Group { .. } => "group",
                _ => "other",
            })
            .collect::<Vec<_>>();

        assert_eq!(kinds, vec!["match", "lookup", "unwind", "group"]);
    }
}
