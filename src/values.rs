//! Label-indexed output of one polling cycle

use serde::Serialize;

use crate::error::{PollError, PollResult};

/// A named scalar with positional label values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Value {
    pub name: String,
    pub value: f64,
    pub label_values: Vec<String>,
}

impl Value {
    pub fn new<I, S>(name: impl ToString, value: f64, label_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            value,
            label_values: label_values.into_iter().map(Into::into).collect(),
        }
    }
}

/// All values produced by one cycle of one source
///
/// `labels` is the schema: every value carries exactly one label value per
/// label, associated by position. Insertion order is preserved and duplicates
/// are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValueSet {
    labels: Vec<String>,
    values: Vec<Value>,
}

impl ValueSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            values: Vec::new(),
        }
    }

    /// Append a value, rejecting it if its label count does not match the schema
    pub fn add(&mut self, value: Value) -> PollResult<()> {
        if value.label_values.len() != self.labels.len() {
            return Err(PollError::SchemaMismatch {
                name: value.name,
                expected: self.labels.len(),
                actual: value.label_values.len(),
            });
        }

        self.values.push(value);
        Ok(())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values with the given name, in insertion order
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.values.iter().filter(move |value| value.name == name)
    }
}
