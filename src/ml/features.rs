//! Time feature encoding for the availability models
//!
//! Splits timestamps into calendar fields and expands selected fields into
//! sine/cosine pairs so a model never sees a jump between the end of one
//! period and the start of the next.

use std::f64::consts::PI;

use chrono::{Datelike, NaiveDateTime, Timelike};
use ndarray::{Array2, s};

/// Calendar component derived from a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarField {
    Year,
    Month,
    Day,
    /// 0 = Monday
    DayOfWeek,
    /// 1-based
    DayOfYear,
    Hour,
    Minute,
}

impl CalendarField {
    /// Calendar columns in output order, without the year.
    pub const DEFAULT_COLUMNS: [CalendarField; 6] = [
        CalendarField::Month,
        CalendarField::Day,
        CalendarField::DayOfWeek,
        CalendarField::DayOfYear,
        CalendarField::Hour,
        CalendarField::Minute,
    ];

    /// Column name used in feature tables.
    pub fn name(&self) -> &'static str {
        match self {
            CalendarField::Year => "yr",
            CalendarField::Month => "mon",
            CalendarField::Day => "day",
            CalendarField::DayOfWeek => "dow",
            CalendarField::DayOfYear => "doy",
            CalendarField::Hour => "hr",
            CalendarField::Minute => "min",
        }
    }

    /// Value of this field for a timestamp.
    pub fn extract(&self, ts: &NaiveDateTime) -> f64 {
        match self {
            CalendarField::Year => ts.year() as f64,
            CalendarField::Month => ts.month() as f64,
            CalendarField::Day => ts.day() as f64,
            CalendarField::DayOfWeek => ts.weekday().num_days_from_monday() as f64,
            CalendarField::DayOfYear => ts.ordinal() as f64,
            CalendarField::Hour => ts.hour() as f64,
            CalendarField::Minute => ts.minute() as f64,
        }
    }
}

/// One field of a harmonics plan.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclicalTerm {
    pub field: CalendarField,
    pub period: f64,
    pub harmonics: Vec<u32>,
}

impl CyclicalTerm {
    pub fn new(field: CalendarField, period: f64, harmonics: &[u32]) -> Self {
        Self {
            field,
            period,
            harmonics: harmonics.to_vec(),
        }
    }
}

/// Which calendar fields get cyclical columns, with period and harmonics.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicsPlan {
    terms: Vec<CyclicalTerm>,
}

impl HarmonicsPlan {
    pub const DEFAULT_HARMONICS: [u32; 2] = [1, 2];

    pub fn new(terms: Vec<CyclicalTerm>) -> Self {
        Self { terms }
    }

    /// Default periods with custom harmonics.
    ///
    /// Day-of-week uses period 5 and hour period 10 because stations are only
    /// scored on weekday operating hours.
    pub fn with_harmonics(harmonics: &[u32]) -> Self {
        Self::new(vec![
            CyclicalTerm::new(CalendarField::DayOfYear, 365.25, harmonics),
            CyclicalTerm::new(CalendarField::DayOfWeek, 5.0, harmonics),
            CyclicalTerm::new(CalendarField::Hour, 10.0, harmonics),
            CyclicalTerm::new(CalendarField::Minute, 60.0, harmonics),
        ])
    }

    pub fn terms(&self) -> &[CyclicalTerm] {
        &self.terms
    }
}

impl Default for HarmonicsPlan {
    fn default() -> Self {
        Self::with_harmonics(&Self::DEFAULT_HARMONICS)
    }
}

/// Output shape options for [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Emit a leading `yr` calendar column.
    pub include_year: bool,
    /// Prepend the raw calendar columns to the cyclical ones.
    pub concat: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            include_year: false,
            concat: true,
        }
    }
}

/// Named feature matrix: one row per sample, one named column per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureTable {
    /// Build a table, checking that names and matrix width agree.
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Option<Self> {
        (columns.len() == values.ncols()).then_some(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    /// Index of a named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a column holding the same value in every row.
    pub fn push_constant(&mut self, name: impl Into<String>, value: f64) {
        let (rows, cols) = self.values.dim();
        let mut values = Array2::from_elem((rows, cols + 1), value);
        values.slice_mut(s![.., ..cols]).assign(&self.values);
        self.values = values;
        self.columns.push(name.into());
    }
}

/// Cyclical encoding for periodic features
/// Returns (sin, cos) of `value * harmonic * 2π / period`
pub fn cyclical_encode(value: f64, period: f64, harmonic: u32) -> (f64, f64) {
    let angle = 2.0 * PI * value * harmonic as f64 / period;
    (angle.sin(), angle.cos())
}

/// Column names [`encode`] produces for a plan and options.
pub fn feature_names(plan: &HarmonicsPlan, options: EncoderOptions) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    if options.concat {
        names.extend(calendar_columns(options).iter().map(|f| f.name().to_string()));
    }

    for term in plan.terms() {
        for func in ["sin", "cos"] {
            for h in &term.harmonics {
                names.push(format!("{}_{}_{}", func, term.field.name(), h));
            }
        }
    }

    names
}

/// Encode timestamps into calendar and cyclical feature columns.
///
/// For every plan term, all sine columns come before the cosine columns.
pub fn encode(
    timestamps: &[NaiveDateTime],
    plan: &HarmonicsPlan,
    options: EncoderOptions,
) -> FeatureTable {
    let columns = feature_names(plan, options);
    let calendar = calendar_columns(options);

    let rows: Vec<Vec<f64>> = timestamps
        .iter()
        .map(|ts| encode_row(ts, &calendar, plan, options))
        .collect();

    // encode_row and feature_names walk the same plan, so widths agree
    debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
    let values = Array2::from_shape_fn((rows.len(), columns.len()), |(r, c)| rows[r][c]);

    FeatureTable { columns, values }
}

/// One row of [`encode`], in [`feature_names`] order.
fn encode_row(
    ts: &NaiveDateTime,
    calendar: &[CalendarField],
    plan: &HarmonicsPlan,
    options: EncoderOptions,
) -> Vec<f64> {
    let mut row = Vec::new();
    if options.concat {
        row.extend(calendar.iter().map(|f| f.extract(ts)));
    }

    for term in plan.terms() {
        let value = term.field.extract(ts);
        let pairs: Vec<(f64, f64)> = term
            .harmonics
            .iter()
            .map(|&h| cyclical_encode(value, term.period, h))
            .collect();
        row.extend(pairs.iter().map(|(s, _)| *s));
        row.extend(pairs.iter().map(|(_, c)| *c));
    }
    row
}

fn calendar_columns(options: EncoderOptions) -> Vec<CalendarField> {
    let mut fields = Vec::with_capacity(7);
    if options.include_year {
        fields.push(CalendarField::Year);
    }
    fields.extend(CalendarField::DEFAULT_COLUMNS);
    fields
}
