#![forbid(unsafe_code)]

use std::cmp::Ordering;

use serde_json::Value;

use crate::store::{Document, StoredDoc};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
}

impl Filter {
    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_owned(), value.into())
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq(field, expected) => doc.get(field).unwrap_or(&Value::Null) == expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    /// Cursor on the `order_by` field; only documents strictly after it are returned.
    pub start_after: Option<Value>,
}

impl Query {
    #[must_use]
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_owned(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_owned(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    #[must_use]
    pub fn start_after(mut self, cursor: impl Into<Value>) -> Self {
        self.start_after = Some(cursor.into());
        self
    }

    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    #[must_use]
    pub fn select<'a>(&self, docs: impl Iterator<Item = (&'a String, &'a Document)>) -> Vec<StoredDoc> {
        let mut rows: Vec<StoredDoc> = docs
            .filter(|(_, d)| self.matches(d))
            .map(|(id, d)| StoredDoc {
                id: id.clone(),
                data: d.clone(),
            })
            .collect();

        if let Some(order) = &self.order_by {
            rows.sort_by(|a, b| {
                let ord = compare_values(
                    a.data.get(&order.field).unwrap_or(&Value::Null),
                    b.data.get(&order.field).unwrap_or(&Value::Null),
                );
                let ord = match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                };
                ord.then_with(|| a.id.cmp(&b.id))
            });

            if let Some(cursor) = &self.start_after {
                rows.retain(|r| {
                    let v = r.data.get(&order.field).unwrap_or(&Value::Null);
                    match order.direction {
                        Direction::Asc => compare_values(v, cursor) == Ordering::Greater,
                        Direction::Desc => compare_values(v, cursor) == Ordering::Less,
                    }
                });
            }
        } else {
            rows.sort_by(|a, b| a.id.cmp(&b.id));
        }

        if let Some(n) = self.limit {
            rows.truncate(n);
        }
        rows
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
