//! Column-oriented capture of experiment output.
//!
//! Two ways in:
//! - [`ColumnTable::from_columns`] builds a fixed-schema table from columns an
//!   owner already holds (the sweep's result accumulator does this).
//! - [`CaptureSubscriber`] is a `tracing` subscriber that turns info-level
//!   events into rows, one table per event target. The schema emerges from
//!   the fields that show up.
//!
//! Either way the result converts to a polars `DataFrame`.
//!
//! # Usage
//!
//! ```ignore
//! // In experiment code:
//! tracing::info!(target: "cell", pct, kl, normalized_error);
//!
//! // In a test:
//! let (result, capture) = instrument::capture(|| run_experiment());
//! let cells = &capture.tables["cell"];
//! ```

use std::cell::RefCell;
use std::collections::HashMap;

use polars::prelude::*;
pub use polars::prelude::{DataFrame, PolarsError, PolarsResult};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

/// One typed column of values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

/// A single cell value on its way into a [`Column`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// An empty column of this value's type, pre-filled with `rows` blanks.
    fn blank_column(&self, rows: usize) -> Column {
        let mut col = match self {
            Value::U64(_) => Column::U64(Vec::new()),
            Value::I64(_) => Column::I64(Vec::new()),
            Value::F64(_) => Column::F64(Vec::new()),
            Value::Bool(_) => Column::Bool(Vec::new()),
            Value::Str(_) => Column::Str(Vec::new()),
        };
        col.pad_to(rows);
        col
    }
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::U64(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u64(&self) -> Option<&[u64]> {
        match self {
            Column::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Column::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            Column::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Extend with blanks up to `len` rows. Floats pad with NaN so an absent
    /// measurement never reads as a real zero.
    fn pad_to(&mut self, len: usize) {
        let missing = len.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            Column::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Column::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Column::F64(v) => v.extend(std::iter::repeat_n(f64::NAN, missing)),
            Column::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            Column::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }

    /// Append a value of the matching type. A value of another type is
    /// dropped and the row gets padded instead.
    fn push(&mut self, value: Value) {
        match (self, value) {
            (Column::U64(v), Value::U64(x)) => v.push(x),
            (Column::I64(v), Value::I64(x)) => v.push(x),
            (Column::F64(v), Value::F64(x)) => v.push(x),
            (Column::Bool(v), Value::Bool(x)) => v.push(x),
            (Column::Str(v), Value::Str(x)) => v.push(x),
            _ => {}
        }
    }

    fn to_polars(&self, name: &str) -> polars::prelude::Column {
        let name: PlSmallStr = name.into();
        match self {
            Column::U64(v) => polars::prelude::Column::new(name, v),
            Column::I64(v) => polars::prelude::Column::new(name, v),
            Column::F64(v) => polars::prelude::Column::new(name, v),
            Column::Bool(v) => polars::prelude::Column::new(name, v),
            Column::Str(v) => polars::prelude::Column::new(name, v),
        }
    }
}

/// Named columns in insertion order, all of length `row_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnTable {
    columns: Vec<(String, Column)>,
    row_count: usize,
}

impl ColumnTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from pre-filled columns. Every column must have the same
    /// length; the first column's length sets the row count.
    pub fn from_columns(columns: Vec<(String, Column)>) -> PolarsResult<Self> {
        let row_count = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        if let Some((name, col)) = columns.iter().find(|(_, c)| c.len() != row_count) {
            return Err(PolarsError::ShapeMismatch(
                format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    col.len(),
                    row_count
                )
                .into(),
            ));
        }
        Ok(Self { columns, row_count })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, col)| col)
    }

    /// Append one row. Fields not seen before become new columns, back-filled
    /// with blanks; columns this row does not mention are padded.
    pub fn record_row(&mut self, fields: Vec<(String, Value)>) {
        for (name, value) in fields {
            let idx = match self.columns.iter().position(|(n, _)| *n == name) {
                Some(idx) => idx,
                None => {
                    let col = value.blank_column(self.row_count);
                    self.columns.push((name, col));
                    self.columns.len() - 1
                }
            };
            let col = &mut self.columns[idx].1;
            // A repeated field name within one row keeps the first value.
            if col.len() == self.row_count {
                col.push(value);
            }
        }
        self.row_count += 1;
        for (_, col) in &mut self.columns {
            col.pad_to(self.row_count);
        }
    }

    /// Convert to a polars DataFrame, preserving column order.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| col.to_polars(name))
            .collect();
        DataFrame::new(columns)
    }
}

/// Tables captured from tracing events, keyed by event target.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub tables: HashMap<String, ColumnTable>,
}

impl Capture {
    /// Convert every table to a DataFrame. The first table that fails to
    /// convert fails the whole call.
    pub fn to_dataframes(&self) -> PolarsResult<HashMap<String, DataFrame>> {
        self.tables
            .iter()
            .map(|(name, table)| Ok((name.clone(), table.to_dataframe()?)))
            .collect()
    }
}

thread_local! {
    static CAPTURE: RefCell<Capture> = RefCell::default();
}

/// Collects an event's fields in declaration order.
#[derive(Default)]
struct FieldCollector {
    fields: Vec<(String, Value)>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        self.fields.push((field.name().to_string(), value));
    }
}

impl Visit for FieldCollector {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::U64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::I64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::Str(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::Str(format!("{:?}", value)));
    }
}

/// Tracing subscriber that appends each info-level event as a row of the
/// table named after the event's target.
pub struct CaptureSubscriber;

impl Subscriber for CaptureSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let target = event.metadata().target().to_string();

        CAPTURE.with(|c| {
            c.borrow_mut()
                .tables
                .entry(target)
                .or_default()
                .record_row(collector.fields);
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Take everything captured on this thread so far.
pub fn drain() -> Capture {
    CAPTURE.with(|c| std::mem::take(&mut *c.borrow_mut()))
}

/// Discard everything captured on this thread.
pub fn clear() {
    CAPTURE.with(|c| *c.borrow_mut() = Capture::default());
}

/// Run `f` with [`CaptureSubscriber`] scoped to this thread and return its
/// result together with the events it emitted.
pub fn capture<T>(f: impl FnOnce() -> T) -> (T, Capture) {
    clear();
    let out = tracing::subscriber::with_default(CaptureSubscriber, f);
    (out, drain())
}
