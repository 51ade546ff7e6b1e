//! Filter evaluation and value ordering for select nodes.
//!
//! This module provides the `FilterEvaluator` that evaluates filter expressions
//! against document rows, and the comparison used when sorting them.

use std::cmp::Ordering;

use crate::error::Error;
use dagdb_proto::{Doc, FilterExpr, OrderDirection, OrderSpec, Value};

/// Evaluates filter expressions against document rows.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter expression against a row.
    ///
    /// Returns `true` if the row matches the filter, `false` otherwise.
    pub fn evaluate(filter: &FilterExpr, row: &Doc) -> Result<bool, Error> {
        match filter {
            FilterExpr::Eq { field, value } => {
                Self::compare_field(row, field, value, Self::values_equal)
            }
            FilterExpr::Ne { field, value } => {
                Self::compare_field(row, field, value, |a, b| !Self::values_equal(a, b))
            }
            FilterExpr::Lt { field, value } => Self::compare_field(row, field, value, |a, b| {
                Self::compare_values(a, b).is_some_and(Ordering::is_lt)
            }),
            FilterExpr::Le { field, value } => Self::compare_field(row, field, value, |a, b| {
                Self::compare_values(a, b).is_some_and(Ordering::is_le)
            }),
            FilterExpr::Gt { field, value } => Self::compare_field(row, field, value, |a, b| {
                Self::compare_values(a, b).is_some_and(Ordering::is_gt)
            }),
            FilterExpr::Ge { field, value } => Self::compare_field(row, field, value, |a, b| {
                Self::compare_values(a, b).is_some_and(Ordering::is_ge)
            }),
            FilterExpr::In { field, values } => match Self::get_field_value(row, field) {
                Some(fv) => Ok(values.iter().any(|v| Self::values_equal(fv, v))),
                None => Ok(false),
            },
            FilterExpr::IsNull { field } => Ok(matches!(
                Self::get_field_value(row, field),
                None | Some(Value::Null)
            )),
            FilterExpr::IsNotNull { field } => Ok(!matches!(
                Self::get_field_value(row, field),
                None | Some(Value::Null)
            )),
            FilterExpr::Like { field, pattern } => match Self::get_field_value(row, field) {
                Some(Value::String(s)) => Ok(Self::like_match(s, pattern)),
                _ => Ok(false),
            },
            FilterExpr::And(exprs) => {
                for expr in exprs {
                    if !Self::evaluate(expr, row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            FilterExpr::Or(exprs) => {
                for expr in exprs {
                    if Self::evaluate(expr, row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FilterExpr::Not(expr) => Ok(!Self::evaluate(expr, row)?),
        }
    }

    /// Resolve a possibly dotted field path against a row.
    ///
    /// `author.name` reads `name` from the document nested under `author`.
    pub fn get_field_value<'a>(row: &'a Doc, path: &str) -> Option<&'a Value> {
        let mut segments = path.split('.');
        let mut value = row.get(segments.next()?)?;
        for segment in segments {
            value = value.as_doc()?.get(segment)?;
        }
        Some(value)
    }

    /// Compare a field value with a comparator function.
    fn compare_field<F>(row: &Doc, field: &str, value: &Value, comparator: F) -> Result<bool, Error>
    where
        F: FnOnce(&Value, &Value) -> bool,
    {
        match Self::get_field_value(row, field) {
            Some(fv) => Ok(comparator(fv, value)),
            None => Ok(false), // Missing field doesn't match
        }
    }

    /// Check if two values are equal. Integers and floats compare numerically.
    fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            _ => a == b,
        }
    }

    /// Compare two values, returning their ordering if comparable.
    fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None, // Incompatible types
        }
    }

    /// Match a string against a SQL LIKE pattern.
    ///
    /// Supports:
    /// - `%` matches zero or more characters
    /// - `_` matches exactly one character
    /// - `\\%` matches literal `%`
    /// - `\\_` matches literal `_`
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let mut chars = value.chars().peekable();
        let mut pattern_chars = pattern.chars().peekable();

        Self::like_match_recursive(&mut chars, &mut pattern_chars)
    }

    fn like_match_recursive(
        chars: &mut std::iter::Peekable<std::str::Chars>,
        pattern: &mut std::iter::Peekable<std::str::Chars>,
    ) -> bool {
        loop {
            match (pattern.peek().copied(), chars.peek().copied()) {
                (None, None) => return true,
                (None, Some(_)) => return false,
                (Some('%'), _) => {
                    pattern.next();
                    if pattern.peek().is_none() {
                        return true;
                    }

                    // Try matching % with 0, 1, 2, ... characters
                    loop {
                        let mut pattern_clone = pattern.clone();
                        let mut chars_clone = chars.clone();
                        if Self::like_match_recursive(&mut chars_clone, &mut pattern_clone) {
                            return true;
                        }
                        if chars.next().is_none() {
                            return false;
                        }
                    }
                }
                (Some('_'), Some(_)) => {
                    pattern.next();
                    chars.next();
                }
                (Some('_'), None) => return false,
                (Some('\\'), _) => {
                    pattern.next();
                    match (pattern.peek().copied(), chars.peek().copied()) {
                        (Some(p), Some(c)) if p == c => {
                            pattern.next();
                            chars.next();
                        }
                        _ => return false,
                    }
                }
                (Some(p), Some(c)) => {
                    if p != c {
                        return false;
                    }
                    pattern.next();
                    chars.next();
                }
                (Some(_), None) => return false,
            }
        }
    }
}

/// Sort rows by a list of order specs. Missing and null values sort first.
pub fn sort_rows(rows: &mut [Doc], order_by: &[OrderSpec]) {
    if order_by.is_empty() {
        return;
    }

    rows.sort_by(|a, b| {
        for spec in order_by {
            let a_val = FilterEvaluator::get_field_value(a, &spec.field);
            let b_val = FilterEvaluator::get_field_value(b, &spec.field);

            let cmp = compare_values_opt(a_val, b_val);
            let cmp = match spec.direction {
                OrderDirection::Asc => cmp,
                OrderDirection::Desc => cmp.reverse(),
            };

            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
}

/// Compare two optional values for sorting.
fn compare_values_opt(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), Some(_)) => Ordering::Less, // NULLs first
        (Some(_), None | Some(Value::Null)) => Ordering::Greater,
        (Some(av), Some(bv)) => {
            // Incompatible types are considered equal
            FilterEvaluator::compare_values(av, bv).unwrap_or(Ordering::Equal)
        }
    }
}
