//! Aggregation pipeline execution over in-memory documents.

use bson::{Bson, Document};
use std::cmp::Ordering;

use docbase_core::{
    error::DocumentStoreResult,
    pipeline::{Accumulator, Stage},
    query::ID_FIELD,
};

use crate::evaluator::{Comparable, DocumentEvaluator, get_path, set_path, sort_documents};

/// Runs `stages` over `input` in order.
///
/// `resolve` returns the documents of another collection for lookup stages.
pub(crate) fn execute<F>(stages: &[Stage], input: Vec<Document>, resolve: F) -> DocumentStoreResult<Vec<Document>>
where
    F: Fn(&str) -> Vec<Document>,
{
    let mut documents = input;

    for stage in stages {
        documents = match stage {
            Stage::Match(expr) => {
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if DocumentEvaluator::new(&document).evaluate(expr)? {
                        kept.push(document);
                    }
                }
                kept
            }
            Stage::Sort(keys) => {
                sort_documents(&mut documents, keys);
                documents
            }
            Stage::Skip(count) => documents.into_iter().skip(*count).collect(),
            Stage::Limit(count) => documents.into_iter().take(*count).collect(),
            Stage::Project(fields) => documents
                .iter()
                .map(|document| project(document, fields))
                .collect::<DocumentStoreResult<Vec<_>>>()?,
            Stage::Unwind(path) => unwind(documents, path)?,
            Stage::Lookup { from, local_field, foreign_field, as_field } => {
                let foreign = resolve(from);
                lookup(documents, &foreign, local_field, foreign_field, as_field)?
            }
            Stage::Group { key, accumulators } => group(&documents, key.as_deref(), accumulators),
            Stage::Count(field) => {
                if documents.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field.as_str(), documents.len() as i64);
                    vec![counted]
                }
            }
        };
    }

    Ok(documents)
}

fn project(document: &Document, fields: &[String]) -> DocumentStoreResult<Document> {
    let mut projected = Document::new();

    if let Some(id) = document.get(ID_FIELD) {
        projected.insert(ID_FIELD, id.clone());
    }

    for field in fields {
        if let Some(value) = get_path(document, field) {
            set_path(&mut projected, field, value.clone())?;
        }
    }

    Ok(projected)
}

fn unwind(documents: Vec<Document>, path: &str) -> DocumentStoreResult<Vec<Document>> {
    let mut output = Vec::new();

    for document in documents {
        match get_path(&document, path) {
            Some(Bson::Array(items)) => {
                for item in items.clone() {
                    let mut copy = document.clone();
                    set_path(&mut copy, path, item)?;
                    output.push(copy);
                }
            }
            Some(Bson::Null) | None => {}
            Some(_) => output.push(document),
        }
    }

    Ok(output)
}

fn lookup(
    documents: Vec<Document>,
    foreign: &[Document],
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
) -> DocumentStoreResult<Vec<Document>> {
    documents
        .into_iter()
        .map(|mut document| {
            let local = get_path(&document, local_field).cloned().unwrap_or(Bson::Null);
            let local = Comparable::from(&local);

            let joined = foreign
                .iter()
                .filter(|candidate| {
                    let value = get_path(candidate, foreign_field).cloned().unwrap_or(Bson::Null);
                    Comparable::from(&value) == local
                })
                .cloned()
                .map(Bson::Document)
                .collect::<Vec<_>>();

            set_path(&mut document, as_field, Bson::Array(joined))?;
            Ok(document)
        })
        .collect()
}

fn group(documents: &[Document], key: Option<&str>, accumulators: &[(String, Accumulator)]) -> Vec<Document> {
    let mut groups: Vec<(Bson, Vec<&Document>)> = Vec::new();

    for document in documents {
        let group_key = match key {
            Some(path) => get_path(document, path).cloned().unwrap_or(Bson::Null),
            None => Bson::Null,
        };

        match groups
            .iter_mut()
            .find(|(existing, _)| Comparable::from(&*existing) == Comparable::from(&group_key))
        {
            Some((_, members)) => members.push(document),
            None => groups.push((group_key, vec![document])),
        }
    }

    groups
        .into_iter()
        .map(|(group_key, members)| {
            let mut output = Document::new();
            output.insert(ID_FIELD, group_key);

            for (name, accumulator) in accumulators {
                output.insert(name.as_str(), accumulate(&members, accumulator));
            }

            output
        })
        .collect()
}

fn field_values<'a>(members: &[&'a Document], field: &str) -> Vec<&'a Bson> {
    members
        .iter()
        .filter_map(|document| get_path(document, field))
        .collect()
}

fn accumulate(members: &[&Document], accumulator: &Accumulator) -> Bson {
    match accumulator {
        Accumulator::Count => Bson::Int64(members.len() as i64),
        Accumulator::Sum(field) => sum(&field_values(members, field)),
        Accumulator::Avg(field) => {
            let numbers = field_values(members, field)
                .into_iter()
                .filter_map(as_f64)
                .collect::<Vec<_>>();

            match numbers.len() {
                0 => Bson::Null,
                count => Bson::Double(numbers.iter().sum::<f64>() / count as f64),
            }
        }
        Accumulator::Min(field) => extreme(&field_values(members, field), Ordering::Less),
        Accumulator::Max(field) => extreme(&field_values(members, field), Ordering::Greater),
        Accumulator::First(field) => members
            .first()
            .and_then(|document| get_path(document, field))
            .cloned()
            .unwrap_or(Bson::Null),
        Accumulator::Last(field) => members
            .last()
            .and_then(|document| get_path(document, field))
            .cloned()
            .unwrap_or(Bson::Null),
        Accumulator::Push(field) => Bson::Array(
            field_values(members, field)
                .into_iter()
                .cloned()
                .collect(),
        ),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Integer sums stay integral until they overflow `i64`; any double, or an
/// overflow, makes the sum a double.
fn sum(values: &[&Bson]) -> Bson {
    let mut integral = Some(0i64);
    let mut total = 0f64;
    let mut has_double = false;

    for value in values {
        let (exact, approx) = match value {
            Bson::Int32(v) => (Some(*v as i64), *v as f64),
            Bson::Int64(v) => (Some(*v), *v as f64),
            Bson::Double(v) => {
                has_double = true;
                (None, *v)
            }
            _ => continue,
        };

        total += approx;
        if let Some(exact) = exact {
            integral = integral.and_then(|sum| sum.checked_add(exact));
        }
    }

    match integral {
        Some(integral) if !has_double => Bson::Int64(integral),
        _ => Bson::Double(total),
    }
}

fn extreme(values: &[&Bson], wanted: Ordering) -> Bson {
    values
        .iter()
        .filter(|value| !matches!(value, Bson::Null))
        .copied()
        .reduce(|best, candidate| {
            if Comparable::from(candidate).sort_cmp(&Comparable::from(best)) == wanted {
                candidate
            } else {
                best
            }
        })
        .cloned()
        .unwrap_or(Bson::Null)
}
