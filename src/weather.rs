//! Weather imputation from historical NOAA daily observations.
//!
//! Raw observations are first reduced to one row per calendar date by taking
//! the median of each field (several NOAA stations report the same date).
//! A climatology for an arbitrary target date is then the mean of the daily
//! rows whose day-of-year lies within a symmetric window of the target's.
//!
//! The window is not circular: day 1 and day 365 are 364 days apart.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Default half-width of the day-of-year window.
pub const DEFAULT_WINDOW_DAYS: u32 = 10;

/// Raw row of a NOAA daily summaries export.
#[derive(Debug, Deserialize)]
struct NoaaRow {
    #[serde(rename = "DATE")]
    date: String,
    #[serde(rename = "TMAX", default, deserialize_with = "csv::invalid_option")]
    tmax: Option<f64>,
    #[serde(rename = "TMIN", default, deserialize_with = "csv::invalid_option")]
    tmin: Option<f64>,
    #[serde(rename = "PRCP", default, deserialize_with = "csv::invalid_option")]
    prcp: Option<f64>,
    #[serde(rename = "SNOW", default, deserialize_with = "csv::invalid_option")]
    snow: Option<f64>,
    #[serde(rename = "SNWD", default, deserialize_with = "csv::invalid_option")]
    snwd: Option<f64>,
}

/// One weather observation. Several may exist for the same date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherObservation {
    pub date: NaiveDate,
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub prcp: Option<f64>,
    pub snow: Option<f64>,
    pub snwd: Option<f64>,
}

impl WeatherObservation {
    fn values(&self) -> [Option<f64>; 5] {
        [self.tmax, self.tmin, self.prcp, self.snow, self.snwd]
    }
}

/// Median-aggregated weather for one calendar date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyWeather {
    pub date: NaiveDate,
    pub tmax: Option<f64>,
    pub tmin: Option<f64>,
    pub prcp: Option<f64>,
    pub snow: Option<f64>,
    pub snwd: Option<f64>,
}

impl DailyWeather {
    fn values(&self) -> [Option<f64>; 5] {
        [self.tmax, self.tmin, self.prcp, self.snow, self.snwd]
    }
}

/// Expected weather for a date, broadcast into every time slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeatherClimatology {
    pub tmax: f64,
    pub tmin: f64,
    pub prcp: f64,
    pub snow: f64,
    pub snwd: f64,
}

impl WeatherClimatology {
    /// Feature column names, in the order of [`WeatherClimatology::to_vec`].
    pub const FIELD_NAMES: [&'static str; 5] = ["tmax", "tmin", "prcp", "snow", "snwd"];

    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.tmax, self.tmin, self.prcp, self.snow, self.snwd]
    }
}

/// Daily weather history keyed by date.
#[derive(Debug, Clone, Default)]
pub struct WeatherHistory {
    days: BTreeMap<NaiveDate, DailyWeather>,
}

impl WeatherHistory {
    /// Reduce raw observations to one row per date using the median.
    pub fn from_observations(observations: impl IntoIterator<Item = WeatherObservation>) -> Self {
        let mut grouped: BTreeMap<NaiveDate, [Vec<f64>; 5]> = BTreeMap::new();

        for obs in observations {
            let slots = grouped.entry(obs.date).or_default();
            for (slot, value) in slots.iter_mut().zip(obs.values()) {
                if let Some(v) = value.filter(|v| v.is_finite()) {
                    slot.push(v);
                }
            }
        }

        let days = grouped
            .into_iter()
            .map(|(date, mut fields)| {
                let [tmax, tmin, prcp, snow, snwd] = fields.each_mut().map(|v| median(v));
                (
                    date,
                    DailyWeather {
                        date,
                        tmax,
                        tmin,
                        prcp,
                        snow,
                        snwd,
                    },
                )
            })
            .collect();

        Self { days }
    }

    /// Load a single NOAA CSV export.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_observations(read_noaa_weather(path)?))
    }

    /// Load several yearly exports, skipping files that do not exist.
    ///
    /// Fails with `DataUnavailable` when no file yields any dated row.
    pub fn load_years(paths: &[PathBuf]) -> Result<Self> {
        let mut observations = Vec::new();

        for path in paths {
            if !path.exists() {
                tracing::warn!("Weather file not found, skipping: {}", path.display());
                continue;
            }
            observations.extend(read_noaa_weather(path)?);
        }

        let history = Self::from_observations(observations);
        if history.is_empty() {
            return Err(PipelineError::DataUnavailable(
                "no weather history could be loaded".to_string(),
            ));
        }

        tracing::debug!(
            "Loaded {} days of weather history from {} file(s)",
            history.len(),
            paths.len()
        );
        Ok(history)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DailyWeather> {
        self.days.get(&date)
    }

    pub fn days(&self) -> impl Iterator<Item = &DailyWeather> {
        self.days.values()
    }
}

/// Estimate the weather for `target_date` from days within `window_days`
/// day-of-year of it, averaged with the arithmetic mean.
pub fn climatology(
    target_date: NaiveDate,
    window_days: u32,
    history: &WeatherHistory,
) -> Result<WeatherClimatology> {
    if history.is_empty() {
        return Err(PipelineError::DataUnavailable(
            "weather history is empty".to_string(),
        ));
    }

    let target_doy = target_date.ordinal() as i64;
    let selected: Vec<&DailyWeather> = history
        .days()
        .filter(|day| (day.date.ordinal() as i64 - target_doy).abs() <= window_days as i64)
        .collect();

    if selected.is_empty() {
        return Err(PipelineError::DataUnavailable(format!(
            "no weather history within {} days of day-of-year {} ({})",
            window_days, target_doy, target_date
        )));
    }

    let mut sums = [0.0f64; 5];
    let mut counts = [0usize; 5];
    for day in &selected {
        for (i, value) in day.values().into_iter().enumerate() {
            if let Some(v) = value {
                sums[i] += v;
                counts[i] += 1;
            }
        }
    }

    let mut means = [0.0f64; 5];
    for i in 0..5 {
        if counts[i] == 0 {
            tracing::warn!(
                "No {} observations near {}, imputing 0",
                WeatherClimatology::FIELD_NAMES[i],
                target_date
            );
        } else {
            means[i] = sums[i] / counts[i] as f64;
        }
    }

    let [tmax, tmin, prcp, snow, snwd] = means;
    tracing::debug!(
        "Climatology for {} from {} days: tmax={:.1} tmin={:.1} prcp={:.2}",
        target_date,
        selected.len(),
        tmax,
        tmin,
        prcp
    );

    Ok(WeatherClimatology {
        tmax,
        tmin,
        prcp,
        snow,
        snwd,
    })
}

/// Read raw observations from a NOAA CSV export.
///
/// Files ending in `.gz` are decompressed on the fly. Rows with an
/// unparseable date are dropped with a warning.
pub fn read_noaa_weather(path: &Path) -> Result<Vec<WeatherObservation>> {
    if !path.exists() {
        return Err(PipelineError::DataUnavailable(format!(
            "weather file {} not found",
            path.display()
        )));
    }
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;

    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    read_noaa_weather_from(reader).map_err(|e| PipelineError::csv(path, e))
}

pub fn read_noaa_weather_from<R: Read>(
    reader: R,
) -> std::result::Result<Vec<WeatherObservation>, csv::Error> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut observations = Vec::new();
    let mut dropped = 0usize;

    for row in rdr.deserialize::<NoaaRow>() {
        let row = row?;
        let Some(date) = parse_date(&row.date) else {
            dropped += 1;
            continue;
        };
        observations.push(WeatherObservation {
            date,
            tmax: row.tmax,
            tmin: row.tmin,
            prcp: row.prcp,
            snow: row.snow,
            snwd: row.snwd,
        });
    }

    if dropped > 0 {
        tracing::warn!("Dropped {} weather rows with unparseable dates", dropped);
    }
    Ok(observations)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Some(if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    })
}
