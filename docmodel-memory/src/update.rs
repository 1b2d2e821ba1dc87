//! Update operators and projections applied to stored documents.

use bson::{Bson, Document};

use docmodel_core::{
    document::ID_KEY,
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::evaluator::values_equal;

/// Error code for `$inc` on a non-numeric value.
pub(crate) const TYPE_MISMATCH_CODE: i32 = 14;
/// Error code for a path that cannot be created through a scalar.
pub(crate) const PATH_NOT_VIABLE_CODE: i32 = 28;
/// Error code for an update that would change `_id`.
pub(crate) const IMMUTABLE_FIELD_CODE: i32 = 66;

fn immutable_id() -> DocumentStoreError {
    DocumentStoreError::backend_with_code(
        IMMUTABLE_FIELD_CODE,
        "Performing an update on the path '_id' would modify the immutable field '_id'",
    )
}

fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => document.get(path),
        Some((head, rest)) => match document.get(head) {
            Some(Bson::Document(inner)) => get_path(inner, rest),
            _ => None,
        },
    }
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }

    match document.get_mut(head) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        _ => Err(DocumentStoreError::backend_with_code(
            PATH_NOT_VIABLE_CODE,
            format!("Cannot create field '{rest}' in element '{head}'"),
        )),
    }
}

fn remove_path(document: &mut Document, path: &str) -> bool {
    match path.split_once('.') {
        None => document.remove(path).is_some(),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            _ => false,
        },
    }
}

fn operands<'a>(operator: &str, value: &'a Bson) -> DocumentStoreResult<&'a Document> {
    match value {
        Bson::Document(fields) => Ok(fields),
        _ => Err(DocumentStoreError::InvalidQuery(format!(
            "{operator} needs a document of fields"
        ))),
    }
}

/// Adds two numbers, widening `Int32` to `Int64` on overflow and to `Double` when either
/// side is a double.
fn add_numbers(current: &Bson, delta: &Bson) -> Option<Bson> {
    Some(match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or_else(|| Bson::Int64(*a as i64 + *b as i64)),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64((*a as i64).wrapping_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.wrapping_add(*b as i64)),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.wrapping_add(*b)),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + *b as f64),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => return None,
    })
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Applies an update document of operators (`$set`, `$inc`, `$unset`) in place.
///
/// Returns `true` if the document changed.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidQuery`] for plain fields or unknown operators, and a
/// coded backend error for `$inc` on non-numeric values or for changes to `_id`.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> DocumentStoreResult<bool> {
    let mut modified = false;

    for (operator, value) in update {
        match operator.as_str() {
            "$set" => {
                for (path, value) in operands(operator, value)? {
                    if path == ID_KEY {
                        match document.get(ID_KEY) {
                            Some(current) if values_equal(current, value) => continue,
                            _ => return Err(immutable_id()),
                        }
                    }

                    if get_path(document, path) != Some(value) {
                        set_path(document, path, value.clone())?;
                        modified = true;
                    }
                }
            }
            "$inc" => {
                for (path, delta) in operands(operator, value)? {
                    if path == ID_KEY {
                        return Err(immutable_id());
                    }

                    if !is_number(delta) {
                        return Err(DocumentStoreError::backend_with_code(
                            TYPE_MISMATCH_CODE,
                            format!("Cannot increment with non-numeric argument: {{{path}: {delta}}}"),
                        ));
                    }

                    let next = match get_path(document, path) {
                        None => delta.clone(),
                        Some(current) => add_numbers(current, delta).ok_or_else(|| {
                            DocumentStoreError::backend_with_code(
                                TYPE_MISMATCH_CODE,
                                format!("Cannot apply $inc to a value of non-numeric type at '{path}'"),
                            )
                        })?,
                    };

                    if get_path(document, path) != Some(&next) {
                        set_path(document, path, next)?;
                        modified = true;
                    }
                }
            }
            "$unset" => {
                for (path, _) in operands(operator, value)? {
                    if path == ID_KEY {
                        return Err(immutable_id());
                    }

                    modified |= remove_path(document, path);
                }
            }
            other if other.starts_with('$') => {
                return Err(DocumentStoreError::InvalidQuery(format!(
                    "unsupported update operator: {other}"
                )));
            }
            other => {
                return Err(DocumentStoreError::InvalidQuery(format!(
                    "update documents may only contain operators, found '{other}'"
                )));
            }
        }
    }

    Ok(modified)
}

/// Rejects replacement documents that contain update operators.
pub(crate) fn validate_replacement(replacement: &Document) -> DocumentStoreResult<()> {
    match replacement.keys().find(|key| key.starts_with('$')) {
        Some(key) => Err(DocumentStoreError::InvalidQuery(format!(
            "replacement documents may not contain operators, found '{key}'"
        ))),
        None => Ok(()),
    }
}

/// Builds the stored form of a replacement: `_id` comes first, kept from the existing
/// document when the replacement has none.
pub(crate) fn replacement_with_id(replacement: Document, id: Option<&Bson>) -> DocumentStoreResult<Document> {
    let mut stored = Document::new();

    match (replacement.get(ID_KEY), id) {
        (Some(new), Some(current)) if !values_equal(new, current) => return Err(immutable_id()),
        (Some(new), _) => {
            stored.insert(ID_KEY, new.clone());
        }
        (None, Some(current)) => {
            stored.insert(ID_KEY, current.clone());
        }
        (None, None) => {}
    }

    for (key, value) in replacement {
        if key != ID_KEY {
            stored.insert(key, value);
        }
    }

    Ok(stored)
}

fn inclusion(field: &str, value: &Bson) -> DocumentStoreResult<bool> {
    match value {
        Bson::Boolean(flag) => Ok(*flag),
        Bson::Int32(n) => Ok(*n != 0),
        Bson::Int64(n) => Ok(*n != 0),
        Bson::Double(n) => Ok(*n != 0.0),
        _ => Err(DocumentStoreError::InvalidQuery(format!(
            "unsupported projection for '{field}'"
        ))),
    }
}

/// Applies a projection.
///
/// Any inclusion switches to include mode, where only the listed fields are kept and `_id`
/// is kept unless explicitly excluded. Otherwise the listed fields are removed. Mixing
/// inclusions and exclusions of fields other than `_id` is rejected.
pub(crate) fn apply_projection(document: Document, projection: &Document) -> DocumentStoreResult<Document> {
    if projection.is_empty() {
        return Ok(document);
    }

    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    let mut keep_id = true;

    for (field, value) in projection {
        let included = inclusion(field, value)?;

        if field == ID_KEY {
            keep_id = included;
            if included {
                includes.push(field.as_str());
            }
        } else if included {
            includes.push(field.as_str());
        } else {
            excludes.push(field.as_str());
        }
    }

    let has_field_includes = includes.iter().any(|field| *field != ID_KEY);

    if has_field_includes && !excludes.is_empty() {
        return Err(DocumentStoreError::InvalidQuery(
            "projection cannot mix inclusion and exclusion".into(),
        ));
    }

    if !includes.is_empty() && excludes.is_empty() {
        let mut projected = Document::new();

        if keep_id {
            if let Some(id) = document.get(ID_KEY) {
                projected.insert(ID_KEY, id.clone());
            }
        }

        for field in includes.into_iter().filter(|field| *field != ID_KEY) {
            if let Some(value) = get_path(&document, field) {
                set_path(&mut projected, field, value.clone())?;
            }
        }

        return Ok(projected);
    }

    let mut projected = document;

    if !keep_id {
        projected.remove(ID_KEY);
    }

    for field in excludes {
        remove_path(&mut projected, field);
    }

    Ok(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_changes_and_creates_nested_fields() {
        let mut document = doc! { "_id": 1, "name": "a" };

        let modified = apply_update(&mut document, &doc! { "$set": { "name": "b", "address.city": "Oslo" } }).unwrap();

        assert!(modified);
        assert_eq!(document, doc! { "_id": 1, "name": "b", "address": { "city": "Oslo" } });
    }

    #[test]
    fn set_without_change_is_not_a_modification() {
        let mut document = doc! { "_id": 1, "name": "a" };

        assert!(!apply_update(&mut document, &doc! { "$set": { "_id": 1, "name": "a" } }).unwrap());
    }

    #[test]
    fn inc_preserves_and_widens_numbers() {
        let mut document = doc! { "a": 1, "b": i32::MAX, "c": 1.5 };

        apply_update(&mut document, &doc! { "$inc": { "a": 2, "b": 1, "c": 1, "d": 4_i64 } }).unwrap();

        assert_eq!(document.get("a"), Some(&Bson::Int32(3)));
        assert_eq!(document.get("b"), Some(&Bson::Int64(i32::MAX as i64 + 1)));
        assert_eq!(document.get("c"), Some(&Bson::Double(2.5)));
        assert_eq!(document.get("d"), Some(&Bson::Int64(4)));
    }

    #[test]
    fn inc_on_text_fails_with_code() {
        let mut document = doc! { "a": "x" };

        let err = apply_update(&mut document, &doc! { "$inc": { "a": 1 } }).unwrap_err();

        assert!(matches!(err, DocumentStoreError::Backend { code: Some(TYPE_MISMATCH_CODE), .. }));
    }

    #[test]
    fn id_changes_are_rejected() {
        let mut document = doc! { "_id": 1 };

        let err = apply_update(&mut document, &doc! { "$set": { "_id": 2 } }).unwrap_err();
        assert!(matches!(err, DocumentStoreError::Backend { code: Some(IMMUTABLE_FIELD_CODE), .. }));

        let err = replacement_with_id(doc! { "_id": 3 }, Some(&Bson::Int32(1))).unwrap_err();
        assert!(matches!(err, DocumentStoreError::Backend { code: Some(IMMUTABLE_FIELD_CODE), .. }));
    }

    #[test]
    fn unknown_operators_and_plain_fields_are_rejected() {
        let mut document = doc! {};

        assert!(matches!(
            apply_update(&mut document, &doc! { "$push": { "a": 1 } }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            apply_update(&mut document, &doc! { "a": 1 }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
        assert!(validate_replacement(&doc! { "$set": { "a": 1 } }).is_err());
    }

    #[test]
    fn replacement_keeps_existing_id_first() {
        let stored = replacement_with_id(doc! { "name": "a" }, Some(&Bson::Int32(7))).unwrap();

        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(stored, doc! { "_id": 7, "name": "a" });
    }

    #[test]
    fn projection_modes() {
        let document = doc! { "_id": 1, "a": 1, "b": { "c": 2, "d": 3 } };

        assert_eq!(apply_projection(document.clone(), &doc! { "a": 1 }).unwrap(), doc! { "_id": 1, "a": 1 });
        assert_eq!(apply_projection(document.clone(), &doc! { "a": 1, "_id": 0 }).unwrap(), doc! { "a": 1 });
        assert_eq!(apply_projection(document.clone(), &doc! { "b.c": 1 }).unwrap(), doc! { "_id": 1, "b": { "c": 2 } });
        assert_eq!(apply_projection(document.clone(), &doc! { "_id": 1 }).unwrap(), doc! { "_id": 1 });
        assert_eq!(
            apply_projection(document.clone(), &doc! { "b": 0, "_id": 0 }).unwrap(),
            doc! { "a": 1 }
        );
        assert!(apply_projection(document, &doc! { "a": 1, "b": 0 }).is_err());
    }
}
