//! Filter evaluation, update application and sorting for in-memory documents.
//!
//! Field names are dotted paths into embedded documents.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docbase_core::{
    query::{Expr, FieldOp, ID_FIELD, QueryVisitor, Sort, SortDirection},
    error::{DocumentStoreError, DocumentStoreResult},
    update::Update,
};


/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position of the value's type in the cross-type sort order.
    fn type_rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: values of different types order by type rank.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match self.type_rank().cmp(&other.type_rank()) {
            Ordering::Equal => self.partial_cmp(other).unwrap_or(Ordering::Equal),
            unequal => unequal,
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path inside `document`.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Sets the value at a dotted path, creating intermediate documents.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));

            match child {
                Bson::Document(child) => set_path(child, rest, value),
                _ => Err(DocumentStoreError::InvalidDocument(format!(
                    "cannot create field '{rest}' inside non-document field '{head}'"
                ))),
            }
        }
    }
}

/// Appends to the array at a dotted path, creating the array when missing.
pub(crate) fn push_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let existing = get_path(document, path).cloned();

    match existing {
        None => set_path(document, path, Bson::Array(vec![value])),
        Some(Bson::Array(mut items)) => {
            items.push(value);
            set_path(document, path, Bson::Array(items))
        }
        Some(_) => Err(DocumentStoreError::InvalidDocument(format!(
            "the field '{path}' must be an array to push onto it"
        ))),
    }
}

/// Applies `update` in place. Returns whether the document changed.
pub(crate) fn apply_update(document: &mut Document, update: &Update) -> DocumentStoreResult<bool> {
    if let Some(new_id) = update.set.get(ID_FIELD)
        && document.get(ID_FIELD) != Some(new_id)
    {
        return Err(DocumentStoreError::Backend(
            "performing an update on the path '_id' would modify the immutable field '_id'".into(),
        ));
    }

    let before = document.clone();

    for (path, value) in update.set.iter() {
        set_path(document, path, value.clone())?;
    }
    for (path, value) in update.push.iter() {
        push_path(document, path, value.clone())?;
    }

    Ok(*document != before)
}

/// Stable multi-key sort. Missing fields sort as null.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &[Sort]) {
    if sort.is_empty() {
        return;
    }

    documents.sort_by(|a, b| {
        for key in sort {
            let left = get_path(a, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);
            let right = get_path(b, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);

            let ordering = match key.direction {
                SortDirection::Asc => left.sort_cmp(&right),
                SortDirection::Desc => right.sort_cmp(&left),
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });
}


pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Whether `document` matches the optional filter; no filter matches everything.
    pub fn matches(document: &Document, filter: Option<&Expr>) -> DocumentStoreResult<bool> {
        match filter {
            Some(expr) => DocumentEvaluator::new(document).evaluate(expr),
            None => Ok(true),
        }
    }
}

fn equals(field_value: &Bson, value: &Bson) -> bool {
    let left = Comparable::from(field_value);
    let right = Comparable::from(value);

    match (&left, &right) {
        (Comparable::Array(items), other) if !matches!(other, Comparable::Array(_)) => {
            items.iter().any(|item| item == other)
        }
        _ => left == right,
    }
}

fn any_match(field_value: &Bson, values: &Bson) -> bool {
    match values {
        Bson::Array(values) => values.iter().any(|value| equals(field_value, value)),
        single => equals(field_value, single),
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(get_path(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = get_path(self.document, field) else {
            return Ok(match op {
                FieldOp::Eq => *value == Bson::Null,
                FieldOp::Ne => *value != Bson::Null,
                FieldOp::NotContains | FieldOp::NoneOf => true,
                _ => false,
            });
        };

        match op {
            FieldOp::Eq => Ok(equals(field_value, value)),
            FieldOp::Ne => Ok(!equals(field_value, value)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                match Comparable::from(field_value).partial_cmp(&Comparable::from(value)) {
                    Some(ordering) => Ok(match op {
                        FieldOp::Gt => ordering == Ordering::Greater,
                        FieldOp::Gte => ordering != Ordering::Less,
                        FieldOp::Lt => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    }),
                    None => Ok(false),
                }
            },
            FieldOp::Contains | FieldOp::NotContains => {
                let contained = match (Comparable::from(field_value), Comparable::from(value)) {
                    (Comparable::Array(array), needle) => array.iter().any(|item| item == &needle),
                    (Comparable::String(left), Comparable::String(right)) => left.contains(right),
                    _ => false,
                };

                Ok(contained == matches!(op, FieldOp::Contains))
            },
            FieldOp::StartsWith => match (Comparable::from(field_value), Comparable::from(value)) {
                (Comparable::String(left), Comparable::String(right)) => Ok(left.starts_with(right)),
                _ => Ok(false),
            },
            FieldOp::EndsWith => match (Comparable::from(field_value), Comparable::from(value)) {
                (Comparable::String(left), Comparable::String(right)) => Ok(left.ends_with(right)),
                _ => Ok(false),
            },
            FieldOp::AnyOf => Ok(any_match(field_value, value)),
            FieldOp::NoneOf => Ok(!any_match(field_value, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docbase_core::query::Filter;

    fn sample() -> Document {
        doc! {
            "_id": 1,
            "name": "Ada",
            "age": 36,
            "tags": ["admin", "ops"],
            "address": { "city": "London" },
        }
    }

    fn eval(document: &Document, expr: Expr) -> bool {
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    #[test]
    fn dotted_paths_resolve_into_embedded_documents() {
        let document = sample();

        assert!(eval(&document, Filter::eq("address.city", "London")));
        assert!(!eval(&document, Filter::eq("address.zip", "N1")));
        assert!(eval(&document, Filter::not_exists("address.zip")));
    }

    #[test]
    fn scalar_equality_matches_array_elements() {
        let document = sample();

        assert!(eval(&document, Filter::eq("tags", "ops")));
        assert!(eval(&document, Filter::any_of("tags", ["dev", "admin"])));
        assert!(eval(&document, Filter::none_of("tags", ["dev"])));
    }

    #[test]
    fn missing_fields_follow_negated_operators() {
        let document = sample();

        assert!(eval(&document, Filter::ne("nickname", "x")));
        assert!(!eval(&document, Filter::gt("nickname", 1)));
        assert!(eval(&document, Filter::eq("nickname", Bson::Null)));
    }

    #[test]
    fn ranges_and_logic() {
        let document = sample();

        assert!(eval(&document, Filter::gte("age", 36).and(Filter::lt("age", 40))));
        assert!(eval(&document, Filter::eq("name", "Bob").or(Filter::starts_with("name", "A"))));
        assert!(!eval(&document, Filter::contains("name", "d").not()));
    }

    #[test]
    fn update_sets_nested_fields_and_pushes() {
        let mut document = sample();
        let update = Update::new()
            .set("address.zip", "N1")
            .push("records", doc! { "summary": "updated" });

        assert!(apply_update(&mut document, &update).unwrap());
        assert_eq!(get_path(&document, "address.zip"), Some(&Bson::String("N1".into())));
        assert_eq!(document.get_array("records").unwrap().len(), 1);

        let unchanged = Update::new().set("name", "Ada");
        assert!(!apply_update(&mut document, &unchanged).unwrap());
    }

    #[test]
    fn update_refuses_identity_change() {
        let mut document = sample();

        assert!(apply_update(&mut document, &Update::new().set("_id", 2)).is_err());
        assert!(apply_update(&mut document, &Update::new().push("name", "x")).is_err());
    }

    #[test]
    fn sort_uses_every_key() {
        let mut documents = vec![
            doc! { "team": "b", "score": 1 },
            doc! { "team": "a", "score": 1 },
            doc! { "team": "a", "score": 3 },
            doc! { "score": 2 },
        ];

        sort_documents(&mut documents, &[
            Sort::new("team", SortDirection::Asc),
            Sort::new("score", SortDirection::Desc),
        ]);

        let order = documents
            .iter()
            .map(|d| (d.get_str("team").unwrap_or("-").to_string(), d.get_i32("score").unwrap()))
            .collect::<Vec<_>>();

        assert_eq!(order, vec![
            ("-".to_string(), 2),
            ("a".to_string(), 3),
            ("a".to_string(), 1),
            ("b".to_string(), 1),
        ]);
    }
}
