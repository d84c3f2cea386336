//! Time-keyed column tables for measurement, forecast and input series.
//!
//! A [`Table`] always has a `time` column and any number of named value
//! columns. Values arrive as loosely typed JSON; a column stays
//! [`Column::Raw`] until [`Table::coerce_numeric`] turns it into
//! [`Column::Float`]. Missing values are `None`, never `NaN` or zero.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Write;

use serde_json::{Number, Value};

use crate::error::{BoptestError, BoptestResult};

/// Name of the time column in every BOPTEST series payload.
pub const TIME: &str = "time";

/// One value column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric values with explicit missing entries.
    Float(Vec<Option<f64>>),
    /// Values exactly as the server sent them.
    Raw(Vec<Value>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Raw(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of the column, if it has been coerced.
    pub fn as_float(&self) -> Option<&[Option<f64>]> {
        match self {
            Self::Float(v) => Some(v),
            Self::Raw(_) => None,
        }
    }

    /// Cell `i` as JSON.
    pub fn cell(&self, i: usize) -> Value {
        match self {
            Self::Float(v) => v.get(i).copied().flatten().map_or(Value::Null, float_value),
            Self::Raw(v) => v.get(i).cloned().unwrap_or(Value::Null),
        }
    }

    fn push_value(&mut self, value: Value) {
        match self {
            Self::Float(v) => match coerce_value(&value) {
                Ok(x) => v.push(x),
                Err(_) => {
                    let mut raw = self.take_raw();
                    raw.push(value);
                    *self = Self::Raw(raw);
                }
            },
            Self::Raw(v) => v.push(value),
        }
    }

    fn remove(&mut self, i: usize) {
        match self {
            Self::Float(v) => {
                v.remove(i);
            }
            Self::Raw(v) => {
                v.remove(i);
            }
        }
    }

    fn select(&self, indices: &[usize]) -> Self {
        match self {
            Self::Float(v) => Self::Float(indices.iter().map(|&i| v[i]).collect()),
            Self::Raw(v) => Self::Raw(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn take_raw(&mut self) -> Vec<Value> {
        match std::mem::replace(self, Self::Raw(Vec::new())) {
            Self::Float(v) => v
                .into_iter()
                .map(|x| x.map_or(Value::Null, float_value))
                .collect(),
            Self::Raw(v) => v,
        }
    }

    fn append(&mut self, other: Column) {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.extend(b),
            (this, mut other) => {
                let mut raw = this.take_raw();
                raw.extend(other.take_raw());
                *this = Self::Raw(raw);
            }
        }
    }
}

/// A column that could not be converted to `f64` and was left as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionWarning {
    pub column: String,
    pub reason: String,
}

impl fmt::Display for CoercionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "column `{}` kept unconverted: {}", self.column, self.reason)
    }
}

/// Instantaneous measurement values at one simulation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub time: f64,
    pub values: BTreeMap<String, Option<f64>>,
}

impl Snapshot {
    /// Parses a `name -> value` payload that carries a `time` entry.
    ///
    /// Values that are not numeric become `None`.
    ///
    /// # Errors
    ///
    /// Returns `DataShape` if the payload is not an object or `time` is
    /// missing or non-numeric.
    pub fn from_payload(payload: &Value) -> BoptestResult<Self> {
        let map = payload
            .as_object()
            .ok_or_else(|| BoptestError::shape("measurement snapshot is not a JSON object"))?;
        let time = map
            .get(TIME)
            .and_then(|v| coerce_value(v).ok().flatten())
            .ok_or_else(|| BoptestError::shape("measurement snapshot has no numeric `time`"))?;
        let values = map
            .iter()
            .filter(|(k, _)| k.as_str() != TIME)
            .map(|(k, v)| (k.clone(), coerce_value(v).ok().flatten()))
            .collect();
        Ok(Self { time, values })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }
}

/// Time-ordered series table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    time: Vec<f64>,
    columns: Vec<(String, Column)>,
}

impl Table {
    /// Creates an empty table with numeric columns of the given names.
    pub fn with_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            time: Vec::new(),
            columns: names
                .into_iter()
                .map(|n| (n.into(), Column::Float(Vec::new())))
                .collect(),
        }
    }

    /// Parses a `{"time": [...], "<name>": [...], ...}` payload.
    ///
    /// Value columns are kept raw; call [`Table::coerce_numeric`] to convert.
    ///
    /// # Errors
    ///
    /// Returns `DataShape` if the payload is not an object of arrays, if
    /// `time` is missing or non-numeric, or if column lengths differ.
    pub fn from_payload(payload: &Value) -> BoptestResult<Self> {
        let map = payload
            .as_object()
            .ok_or_else(|| BoptestError::shape("series payload is not a JSON object"))?;
        let raw_time = map
            .get(TIME)
            .and_then(Value::as_array)
            .ok_or_else(|| BoptestError::shape("series payload has no `time` array"))?;
        let time = raw_time
            .iter()
            .map(|v| coerce_value(v).ok().flatten())
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| BoptestError::shape("series `time` contains non-numeric values"))?;

        let mut columns = Vec::with_capacity(map.len().saturating_sub(1));
        for (name, values) in map.iter().filter(|(k, _)| k.as_str() != TIME) {
            let values = values
                .as_array()
                .ok_or_else(|| BoptestError::shape(format!("series `{name}` is not an array")))?;
            if values.len() != time.len() {
                return Err(BoptestError::shape(format!(
                    "series `{name}` has {} values for {} timestamps",
                    values.len(),
                    time.len()
                )));
            }
            columns.push((name.clone(), Column::Raw(values.clone())));
        }
        Ok(Self { time, columns })
    }

    /// Builds a table from measurement snapshots, keeping only `names`.
    pub fn from_snapshots<S: AsRef<str>>(names: &[S], snapshots: &[Snapshot]) -> Self {
        let mut table = Self::with_columns(names.iter().map(|n| n.as_ref().to_string()));
        for s in snapshots {
            table.push_snapshot(s);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.time
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Numeric values of a coerced column.
    pub fn values(&self, name: &str) -> Option<&[Option<f64>]> {
        self.column(name).and_then(Column::as_float)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Appends one row; columns absent from `values` get a missing entry.
    pub fn push_row(&mut self, time: f64, values: &BTreeMap<String, Option<f64>>) {
        self.time.push(time);
        for (name, col) in &mut self.columns {
            let v = values.get(name).copied().flatten();
            col.push_value(v.map_or(Value::Null, float_value));
        }
    }

    pub fn push_snapshot(&mut self, snapshot: &Snapshot) {
        self.push_row(snapshot.time, &snapshot.values);
    }

    /// Appends row `i` of `other`, matching columns by name.
    ///
    /// Does nothing if `i` is out of range.
    pub fn push_row_from(&mut self, other: &Table, i: usize) {
        let Some(&t) = other.time.get(i) else {
            return;
        };
        self.time.push(t);
        for (name, col) in &mut self.columns {
            let v = other.column(name).map_or(Value::Null, |c| c.cell(i));
            col.push_value(v);
        }
    }

    /// Removes the oldest row, if any.
    pub fn remove_first(&mut self) {
        if self.time.is_empty() {
            return;
        }
        self.time.remove(0);
        for (_, col) in &mut self.columns {
            col.remove(0);
        }
    }

    /// Concatenates tables, keeping only the columns present in all of them.
    ///
    /// Column order follows the first table. Rows are not reordered.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut iter = tables.into_iter();
        let Some(mut out) = iter.next() else {
            return Table::default();
        };
        for next in iter {
            let keep: HashSet<String> = next.columns.iter().map(|(n, _)| n.clone()).collect();
            out.columns.retain(|(n, _)| keep.contains(n));
            out.time.extend(next.time);
            let mut next_cols: BTreeMap<String, Column> = next.columns.into_iter().collect();
            for (name, col) in &mut out.columns {
                if let Some(other) = next_cols.remove(name) {
                    col.append(other);
                }
            }
        }
        out
    }

    /// Sorts rows by time (stable) and drops repeated timestamps, keeping
    /// the first occurrence.
    pub fn sort_dedup_by_time(&mut self) {
        let mut order: Vec<usize> = (0..self.time.len()).collect();
        order.sort_by(|&a, &b| self.time[a].total_cmp(&self.time[b]));

        let mut keep = Vec::with_capacity(order.len());
        let mut last: Option<f64> = None;
        for i in order {
            if last != Some(self.time[i]) {
                last = Some(self.time[i]);
                keep.push(i);
            }
        }
        if keep.len() == self.time.len() && keep.iter().enumerate().all(|(a, &b)| a == b) {
            return;
        }
        self.time = keep.iter().map(|&i| self.time[i]).collect();
        for (_, col) in &mut self.columns {
            *col = col.select(&keep);
        }
    }

    /// Converts every raw column to `f64` where possible.
    ///
    /// Columns containing non-numeric values are left untouched and reported
    /// as warnings. Never fails.
    pub fn coerce_numeric(&mut self) -> Vec<CoercionWarning> {
        let mut warnings = Vec::new();
        for (name, col) in &mut self.columns {
            let Column::Raw(values) = col else {
                continue;
            };
            match values.iter().map(coerce_value).collect::<Result<Vec<_>, _>>() {
                Ok(floats) => *col = Column::Float(floats),
                Err(reason) => warnings.push(CoercionWarning {
                    column: name.clone(),
                    reason,
                }),
            }
        }
        warnings
    }

    /// Writes the table as CSV with `time` as the first column.
    ///
    /// Missing values are written as empty cells.
    ///
    /// # Errors
    ///
    /// Returns a `csv::Error` if writing fails.
    pub fn write_csv(&self, writer: impl Write) -> Result<(), csv::Error> {
        let mut wtr = csv::WriterBuilder::new().from_writer(writer);

        let mut header = vec![TIME];
        header.extend(self.column_names());
        wtr.write_record(&header)?;

        for (i, t) in self.time.iter().enumerate() {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(t.to_string());
            for (_, col) in &self.columns {
                record.push(match col.cell(i) {
                    Value::Null => String::new(),
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            }
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }
}

/// Best-effort conversion of a JSON value to a float.
///
/// `null` and empty strings are missing; booleans map to 0/1.
pub fn coerce_value(v: &Value) -> Result<Option<f64>, String> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("number {n} is not representable as f64")),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("non-numeric value \"{s}\"")),
        other => Err(format!("non-numeric value {other}")),
    }
}

fn float_value(x: f64) -> Value {
    Number::from_f64(x).map_or(Value::Null, Value::Number)
}
