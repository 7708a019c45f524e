#![forbid(unsafe_code)]

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::StoreError;
use crate::store::Document;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Delete,
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    Increment(i64),
    /// Resolved by the store to its commit time.
    ServerTimestamp,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<(String, FieldOp)>,
}

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn op(mut self, field: &str, op: FieldOp) -> Self {
        self.ops.push((field.to_owned(), op));
        self
    }

    #[must_use]
    pub fn set(self, field: &str, value: impl Into<Value>) -> Self {
        self.op(field, FieldOp::Set(value.into()))
    }

    #[must_use]
    pub fn set_json<T: Serialize>(self, field: &str, value: &T) -> Self {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.op(field, FieldOp::Set(v))
    }

    #[must_use]
    pub fn delete(self, field: &str) -> Self {
        self.op(field, FieldOp::Delete)
    }

    #[must_use]
    pub fn array_union(self, field: &str, value: impl Into<Value>) -> Self {
        self.op(field, FieldOp::ArrayUnion(vec![value.into()]))
    }

    #[must_use]
    pub fn array_remove(self, field: &str, value: impl Into<Value>) -> Self {
        self.op(field, FieldOp::ArrayRemove(vec![value.into()]))
    }

    #[must_use]
    pub fn increment(self, field: &str, by: i64) -> Self {
        self.op(field, FieldOp::Increment(by))
    }

    #[must_use]
    pub fn server_timestamp(self, field: &str) -> Self {
        self.op(field, FieldOp::ServerTimestamp)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = (&str, &FieldOp)> {
        self.ops.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn touches(&self, field: &str) -> bool {
        self.ops.iter().any(|(k, _)| k == field)
    }

    pub fn apply_to(&self, doc: &mut Document, now: OffsetDateTime) -> Result<(), StoreError> {
        for (field, op) in &self.ops {
            match op {
                FieldOp::Set(v) => {
                    doc.insert(field.clone(), v.clone());
                }
                FieldOp::Delete => {
                    doc.remove(field);
                }
                FieldOp::ArrayUnion(values) => {
                    let arr = array_field(doc, field)?;
                    for v in values {
                        if !arr.contains(v) {
                            arr.push(v.clone());
                        }
                    }
                }
                FieldOp::ArrayRemove(values) => {
                    let arr = array_field(doc, field)?;
                    arr.retain(|v| !values.contains(v));
                }
                FieldOp::Increment(by) => {
                    let current = match doc.get(field) {
                        None | Some(Value::Null) => 0,
                        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                            StoreError::InvalidArgument(format!("{field} is not an integer"))
                        })?,
                        Some(_) => {
                            return Err(StoreError::InvalidArgument(format!(
                                "cannot increment non-numeric field {field}"
                            )));
                        }
                    };
                    doc.insert(field.clone(), Value::from(current.saturating_add(*by)));
                }
                FieldOp::ServerTimestamp => {
                    let ts = now
                        .format(&Rfc3339)
                        .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
                    doc.insert(field.clone(), Value::String(ts));
                }
            }
        }
        Ok(())
    }
}

fn array_field<'a>(doc: &'a mut Document, field: &str) -> Result<&'a mut Vec<Value>, StoreError> {
    let slot = doc
        .entry(field.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| StoreError::InvalidArgument(format!("{field} is not an array")))
}
