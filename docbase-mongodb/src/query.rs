//! Translation from docbase filters and pipelines to MongoDB syntax.
//!
//! This module translates docbase's abstract query expressions and pipeline stages
//! into BSON documents for execution by the MongoDB query engine.

use bson::{Bson, Document, doc};

use docbase_core::{
    error::DocumentStoreError,
    pipeline::{Accumulator, Stage},
    query::{Expr, FieldOp, QueryVisitor, Sort},
};


/// Translates docbase query expressions into MongoDB query documents.
///
/// This struct implements the [`QueryVisitor`] trait to convert abstract
/// query expressions into MongoDB's native BSON query syntax.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// The query document for an optional filter; no filter matches everything.
    pub fn filter(filter: Option<&Expr>) -> Result<Document, DocumentStoreError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    pub fn sort(keys: &[Sort]) -> Option<Document> {
        if keys.is_empty() {
            return None;
        }

        Some(
            keys.iter()
                .map(|key| (key.field.clone(), Bson::Int32(key.direction.as_i32())))
                .collect()
        )
    }

    /// Translates each stage into its MongoDB aggregation stage document.
    pub fn pipeline(stages: &[Stage]) -> Result<Vec<Document>, DocumentStoreError> {
        stages.iter().map(Self::stage).collect()
    }

    fn stage(stage: &Stage) -> Result<Document, DocumentStoreError> {
        Ok(match stage {
            Stage::Match(expr) => doc! { "$match": MongoQueryTranslator.visit_expr(expr)? },
            Stage::Sort(keys) => doc! { "$sort": Self::sort(keys).unwrap_or_default() },
            Stage::Skip(count) => doc! { "$skip": *count as i64 },
            Stage::Limit(count) => doc! { "$limit": *count as i64 },
            Stage::Project(fields) => doc! {
                "$project": fields
                    .iter()
                    .map(|field| (field.clone(), Bson::Int32(1)))
                    .collect::<Document>(),
            },
            Stage::Unwind(path) => doc! { "$unwind": format!("${path}") },
            Stage::Lookup { from, local_field, foreign_field, as_field } => doc! {
                "$lookup": {
                    "from": from,
                    "localField": local_field,
                    "foreignField": foreign_field,
                    "as": as_field,
                }
            },
            Stage::Group { key, accumulators } => {
                let mut group = Document::new();
                group.insert("_id", key.as_ref().map(|key| Bson::String(format!("${key}"))).unwrap_or(Bson::Null));

                for (name, accumulator) in accumulators {
                    group.insert(name.as_str(), Self::accumulator(accumulator));
                }

                doc! { "$group": group }
            }
            Stage::Count(field) => doc! { "$count": field },
        })
    }

    fn accumulator(accumulator: &Accumulator) -> Document {
        match accumulator {
            Accumulator::Count => doc! { "$sum": 1 },
            Accumulator::Sum(field) => doc! { "$sum": format!("${field}") },
            Accumulator::Avg(field) => doc! { "$avg": format!("${field}") },
            Accumulator::Min(field) => doc! { "$min": format!("${field}") },
            Accumulator::Max(field) => doc! { "$max": format!("${field}") },
            Accumulator::First(field) => doc! { "$first": format!("${field}") },
            Accumulator::Last(field) => doc! { "$last": format!("${field}") },
            Accumulator::Push(field) => doc! { "$push": format!("${field}") },
        }
    }
}

/// Escapes regular expression metacharacters so `value` matches literally.
fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for ch in value.chars() {
        if "\\^$.|?*+()[]{}".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    /// Top-level `$not` is not a valid query operator; `$nor` with one clause negates it.
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$eq": other },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::Backend("StartsWith operator requires a string value".to_string())),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::Backend("EndsWith operator requires a string value".to_string())),
                },
                FieldOp::AnyOf => doc! { "$in": value },
                FieldOp::NoneOf => doc! { "$nin": value },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbase_core::{
        pipeline::Pipeline,
        query::{Filter, SortDirection},
    };

    #[test]
    fn negation_uses_nor() {
        let translated = MongoQueryTranslator
            .visit_expr(&Filter::eq("status", "closed").not())
            .unwrap();

        assert_eq!(translated, doc! { "$nor": [{ "status": { "$eq": "closed" } }] });
    }

    #[test]
    fn string_operators_escape_metacharacters() {
        let translated = MongoQueryTranslator
            .visit_expr(&Filter::starts_with("name", "a.b"))
            .unwrap();

        assert_eq!(translated, doc! { "name": { "$regex": "^a\\.b" } });
    }

    #[test]
    fn missing_filter_matches_everything() {
        assert_eq!(MongoQueryTranslator::filter(None).unwrap(), Document::new());
    }

    #[test]
    fn sort_keys_keep_their_order() {
        let sort = MongoQueryTranslator::sort(&[
            Sort::new("team", SortDirection::Asc),
            Sort::new("score", SortDirection::Desc),
        ])
        .unwrap();

        assert_eq!(sort.keys().collect::<Vec<_>>(), vec!["team", "score"]);
        assert_eq!(sort.get_i32("score").unwrap(), -1);
    }

    #[test]
    fn pipeline_stages_translate() {
        let pipeline = Pipeline::new()
            .matching(Filter::eq("status", "open"))
            .lookup("users", "owner_id", "_id", "owner")
            .unwind("owner")
            .group(Some("owner.name"), [("total", Accumulator::Sum("amount".into())), ("n", Accumulator::Count)])
            .count("groups");

        let stages = MongoQueryTranslator::pipeline(pipeline.stages()).unwrap();

        assert_eq!(stages[1], doc! {
            "$lookup": { "from": "users", "localField": "owner_id", "foreignField": "_id", "as": "owner" }
        });
        assert_eq!(stages[2], doc! { "$unwind": "$owner" });
        assert_eq!(stages[3], doc! {
            "$group": { "_id": "$owner.name", "total": { "$sum": "$amount" }, "n": { "$sum": 1 } }
        });
        assert_eq!(stages[4], doc! { "$count": "groups" });
    }
}
