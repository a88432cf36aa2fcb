//! Parameter definitions and the tabular dataset they describe.

use crate::error::{Error, Result};

/// How a parameter partitions: along an ordered axis (`Metric`) or by
/// category membership (`Nominal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Metric,
    Nominal,
}

/// Storage kind of a parameter's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float64,
    Int64,
}

/// A single parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Float64(f64),
    Int64(i64),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Float64(v) => v,
            Value::Int64(v) => v as f64,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Value::Float64(v) => v as i64,
            Value::Int64(v) => v,
        }
    }
}

/// A borrowed dataset column. One column per parameter, one entry per
/// observation.
#[derive(Debug, Clone, Copy)]
pub enum Column<'a> {
    Float64(&'a [f64]),
    Int64(&'a [i64]),
}

impl<'a> Column<'a> {
    pub fn len(&self) -> usize {
        match self {
            Column::Float64(xs) => xs.len(),
            Column::Int64(xs) => xs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of observation `n` as a float.
    pub fn value_f64(&self, n: usize) -> f64 {
        match self {
            Column::Float64(xs) => xs[n],
            Column::Int64(xs) => xs[n] as f64,
        }
    }

    /// Value of observation `n` as an integer.
    pub fn value_i64(&self, n: usize) -> i64 {
        match self {
            Column::Float64(xs) => xs[n] as i64,
            Column::Int64(xs) => xs[n],
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            Column::Float64(_) => ValueKind::Float64,
            Column::Int64(_) => ValueKind::Int64,
        }
    }
}

/// A set of equally long columns.
#[derive(Debug, Clone)]
pub struct Dataset<'a> {
    columns: Vec<Column<'a>>,
    nrows: usize,
}

impl<'a> Dataset<'a> {
    /// Wraps `columns`, validating that all of them have the same length.
    pub fn new(columns: Vec<Column<'a>>) -> Result<Self> {
        let nrows = columns.first().map_or(0, Column::len);
        if columns.iter().any(|c| c.len() != nrows) {
            return Err(Error::InvalidArgument(
                "dataset columns have unequal lengths".to_string(),
            ));
        }
        Ok(Dataset { columns, nrows })
    }

    /// Number of observations.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of parameters.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn col(&self, k: usize) -> &Column<'a> {
        &self.columns[k]
    }
}

/// Definition of one parameter: its partitioning type, storage kind, domain
/// endpoints, and the optional quantisation step for metric parameters
/// (`fragment_size == 0` means continuous).
///
/// The table of parameter definitions is immutable for the lifetime of a
/// sampling run; the tree holds a reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub ptype: ParamType,
    pub kind: ValueKind,
    pub min: Value,
    pub max: Value,
    pub fragment_size: f64,
}

impl ParamDef {
    pub fn new(ptype: ParamType, kind: ValueKind) -> Self {
        let zero = match kind {
            ValueKind::Float64 => Value::Float64(0.),
            ValueKind::Int64 => Value::Int64(0),
        };
        ParamDef {
            ptype,
            kind,
            min: zero,
            max: zero,
            fragment_size: 0.,
        }
    }

    pub fn with_fragment_size(mut self, fragment_size: f64) -> Self {
        self.fragment_size = fragment_size;
        self
    }

    /// Populates `min` and `max` from a data column. NaN values are ignored;
    /// a non-finite result (empty or all-NaN column) collapses to 0. For a
    /// metric parameter with `fragment_size > 0` the endpoints are snapped to
    /// multiples of the fragment size.
    pub fn init(&mut self, column: &Column) {
        match column {
            Column::Float64(xs) => {
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                for &x in xs.iter() {
                    if x < min {
                        min = x;
                    }
                    if x > max {
                        max = x;
                    }
                }
                if !min.is_finite() {
                    min = 0.;
                }
                if !max.is_finite() {
                    max = 0.;
                }
                if self.ptype == ParamType::Metric && self.fragment_size > 0. {
                    min -= min % self.fragment_size;
                    max -= max % self.fragment_size;
                }
                self.min = Value::Float64(min);
                self.max = Value::Float64(max);
            }
            Column::Int64(xs) => {
                let mut min = xs.iter().copied().min().unwrap_or(0);
                let mut max = xs.iter().copied().max().unwrap_or(0);
                if self.ptype == ParamType::Metric && self.fragment_size > 0. {
                    let fs = self.fragment_size;
                    min = (min as f64 - (min as f64) % fs) as i64;
                    max = (max as f64 - (max as f64) % fs) as i64;
                }
                self.min = Value::Int64(min);
                self.max = Value::Int64(max);
            }
        }
    }

    /// Convenience constructor: a definition initialised from `column`.
    pub fn from_column(ptype: ParamType, fragment_size: f64, column: &Column) -> Self {
        let mut pd = ParamDef::new(ptype, column.kind()).with_fragment_size(fragment_size);
        pd.init(column);
        pd
    }

    /// Whether `min` and `max` are multiples of the fragment size. Checked
    /// at the start of a run.
    pub(crate) fn is_quantised(&self) -> bool {
        if self.fragment_size > 0. {
            let min = self.min.as_f64();
            let max = self.max.as_f64();
            if min - min % self.fragment_size != min {
                return false;
            }
            if max - max % self.fragment_size != max {
                return false;
            }
        }
        true
    }

    /// Number of categories of a nominal parameter.
    pub(crate) fn ncategories(&self) -> usize {
        (self.max.as_i64() - self.min.as_i64() + 1) as usize
    }

    pub(crate) fn matches(&self, column: &Column) -> bool {
        self.kind == column.kind()
    }
}
