//! Rainfall depth to Annual Recurrence Interval conversion using TP108 coefficients.
//!
//! Each pixel has a log-linear fit per duration, `ARI = exp(m * D + b)`, where `D`
//! is the rainfall depth in millimetres accumulated over the duration.

use std::{collections::HashMap, fs::File, io::Read, path::Path};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::PipelineError;

/// Duration names and their window length in minutes (one sample per minute).
pub const DURATIONS: [(&str, usize); 8] = [
    ("10m", 10),
    ("20m", 20),
    ("30m", 30),
    ("60m", 60),
    ("2h", 120),
    ("6h", 360),
    ("12h", 720),
    ("24h", 1440),
];

const PIXEL_INDEX_COLUMN: &str = "pixelindex";

/// ARI in years for a rainfall depth. Non-positive or NaN depth and NaN coefficients give 0.
pub fn calculate_ari(depth: f64, b: f64, m: f64) -> f64 {
    if depth.is_nan() || depth <= 0.0 || b.is_nan() || m.is_nan() {
        return 0.0;
    }
    // exp overflows to +inf rather than failing
    (m * depth + b).exp()
}

/// Depth in millimetres needed to reach `target_ari`. Unreachable targets give infinity.
pub fn depth_for_ari(target_ari: f64, b: f64, m: f64) -> f64 {
    if target_ari.is_nan() || target_ari <= 0.0 || m == 0.0 || b.is_nan() || m.is_nan() {
        return f64::INFINITY;
    }
    let depth = (target_ari.ln() - b) / m;
    if depth.is_nan() {
        f64::INFINITY
    } else {
        depth
    }
}

/// Trailing sum over `window` samples. Positions without a full window, or whose
/// window holds a missing sample, are `None`.
///
/// A window holding only zeros sums to exactly `0.0`, so float residue from the
/// running subtraction never turns a dry window into a tiny positive depth.
pub fn rolling_sum(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    if window == 0 {
        out.resize(values.len(), None);
        return out;
    }

    let present = |value: Option<f64>| value.filter(|v| !v.is_nan());
    let mut sum = 0.0;
    let mut nonzero = 0usize;
    let mut missing = 0usize;

    for (i, value) in values.iter().enumerate() {
        match present(*value) {
            Some(v) => {
                sum += v;
                if v != 0.0 {
                    nonzero += 1;
                }
            }
            None => missing += 1,
        }
        if i >= window {
            match present(values[i - window]) {
                Some(leaving) => {
                    sum -= leaving;
                    if leaving != 0.0 {
                        nonzero -= 1;
                    }
                }
                None => missing -= 1,
            }
        }

        if i + 1 < window || missing > 0 {
            out.push(None);
        } else if nonzero == 0 {
            sum = 0.0;
            out.push(Some(0.0));
        } else {
            out.push(Some(sum));
        }
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub b: f64,
    pub m: f64,
}

/// Per-duration coefficients for one pixel, indexed like [`DURATIONS`].
pub type PixelCoefficients = [Option<Coefficients>; 8];

/// TP108 coefficients keyed by pixel index.
#[derive(Debug, Clone, Default)]
pub struct CoefficientTable {
    pixels: HashMap<i64, PixelCoefficients>,
}

impl CoefficientTable {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        info!(path = %path.display(), "loading TP108 coefficients");

        let file = File::open(path).map_err(|e| PipelineError::InputData {
            path: path.to_path_buf(),
            reason: format!("cannot open TP108 coefficients: {}", e),
        })?;
        let table = Self::from_reader(file, path)?;

        info!(pixels = table.len(), "loaded TP108 coefficients");
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, path: &Path) -> Result<Self, PipelineError> {
        let input_error = |reason: String| PipelineError::InputData {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|e| input_error(e.to_string()))?
            .clone();

        let column = |name: &str| headers.iter().position(|h| h.trim() == name);

        let pixel_column = column(PIXEL_INDEX_COLUMN).ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: PIXEL_INDEX_COLUMN.to_string(),
        })?;

        let duration_columns: Vec<Option<(usize, usize)>> = DURATIONS
            .iter()
            .map(|(name, _)| {
                let b = column(&format!("{}_b", name))?;
                let m = column(&format!("{}_m", name))?;
                Some((b, m))
            })
            .collect();

        let mut pixels = HashMap::new();

        for record in reader.records() {
            let record = record.map_err(|e| input_error(e.to_string()))?;

            let Some(pixel) = record.get(pixel_column).and_then(parse_pixel_index) else {
                warn!(
                    row = ?record.position().map(|p| p.line()),
                    "skipping row without a pixel index"
                );
                continue;
            };

            let mut coefficients: PixelCoefficients = [None; 8];
            for (slot, columns) in coefficients.iter_mut().zip(&duration_columns) {
                if let Some((b_col, m_col)) = columns {
                    let b = record.get(*b_col).and_then(parse_coefficient);
                    let m = record.get(*m_col).and_then(parse_coefficient);
                    if let (Some(b), Some(m)) = (b, m) {
                        *slot = Some(Coefficients { b, m });
                    }
                }
            }

            pixels.insert(pixel, coefficients);
        }

        Ok(CoefficientTable { pixels })
    }

    pub fn get(&self, pixel_index: i64) -> Option<&PixelCoefficients> {
        self.pixels.get(&pixel_index)
    }

    pub fn insert(&mut self, pixel_index: i64, coefficients: PixelCoefficients) {
        self.pixels.insert(pixel_index, coefficients);
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

fn parse_pixel_index(cell: &str) -> Option<i64> {
    let value = cell.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value as i64)
}

fn parse_coefficient(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| !v.is_nan())
}

/// One radar reading for a pixel. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct RadarSample {
    pub pixel_index: i64,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// ARI of one rolling-window depth.
#[derive(Debug, Clone, PartialEq)]
pub struct AriPoint {
    pub timestamp: DateTime<Utc>,
    pub duration: &'static str,
    pub depth: f64,
    pub ari: f64,
}

/// Every positive-depth window of a pixel's time-sorted series, duration by duration.
pub fn pixel_ari_series(
    series: &[(DateTime<Utc>, Option<f64>)],
    coefficients: &PixelCoefficients,
) -> Vec<AriPoint> {
    let values: Vec<Option<f64>> = series.iter().map(|(_, v)| *v).collect();
    let mut points = Vec::new();

    for ((name, minutes), coefficients) in DURATIONS.iter().zip(coefficients) {
        let Some(Coefficients { b, m }) = coefficients else {
            continue;
        };

        for ((timestamp, _), depth) in series.iter().zip(rolling_sum(&values, *minutes)) {
            let Some(depth) = depth.filter(|d| *d > 0.0) else {
                continue;
            };
            points.push(AriPoint {
                timestamp: *timestamp,
                duration: *name,
                depth,
                ari: calculate_ari(depth, *b, *m),
            });
        }
    }

    points
}

/// The highest ARI at each timestamp, in time order. Ties keep the first point seen.
pub fn max_ari_by_timestamp(points: &[AriPoint]) -> Vec<AriPoint> {
    let mut best: HashMap<DateTime<Utc>, &AriPoint> = HashMap::new();
    for point in points {
        best.entry(point.timestamp)
            .and_modify(|current| {
                if point.ari > current.ari {
                    *current = point;
                }
            })
            .or_insert(point);
    }

    let mut out: Vec<AriPoint> = best.into_values().cloned().collect();
    out.sort_by_key(|p| p.timestamp);
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub pixel_index: i64,
    pub timestamp: DateTime<Utc>,
    pub duration: &'static str,
    pub depth_mm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exceedance {
    pub pixel_index: i64,
    pub timestamp: DateTime<Utc>,
    pub duration: &'static str,
    pub depth_mm: f64,
    pub ari_years: f64,
}

/// ARI results for one catchment.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchmentAri {
    pub max_ari: f64,
    pub pixels_total: usize,
    pub pixels_exceeding: usize,
    pub proportion_exceeding: f64,
    pub peak: Option<Peak>,
    pub exceedances: Vec<Exceedance>,
}

/// Runs every pixel of a catchment through the ARI conversion.
///
/// Pixels are visited in order of first appearance. Pixels without coefficients
/// are skipped but still count toward `pixels_total`.
pub fn analyze_catchment(
    samples: &[RadarSample],
    table: &CoefficientTable,
    ari_threshold: f64,
) -> CatchmentAri {
    let mut order: Vec<i64> = Vec::new();
    let mut by_pixel: HashMap<i64, Vec<(DateTime<Utc>, Option<f64>)>> = HashMap::new();
    for sample in samples {
        by_pixel
            .entry(sample.pixel_index)
            .or_insert_with(|| {
                order.push(sample.pixel_index);
                Vec::new()
            })
            .push((sample.timestamp, sample.value));
    }

    let pixels_total = order.len();
    let mut max_ari = 0.0;
    let mut peak = None;
    let mut pixels_exceeding = 0;
    let mut exceedances = Vec::new();

    for pixel in order {
        let Some(coefficients) = table.get(pixel) else {
            debug!(pixel, "no coefficients for pixel");
            continue;
        };
        let Some(mut series) = by_pixel.remove(&pixel) else {
            continue;
        };
        series.sort_by_key(|(timestamp, _)| *timestamp);

        let mut pixel_max = 0.0;
        for point in pixel_ari_series(&series, coefficients) {
            if point.ari > pixel_max {
                pixel_max = point.ari;
            }
            if point.ari > max_ari {
                max_ari = point.ari;
                peak = Some(Peak {
                    pixel_index: pixel,
                    timestamp: point.timestamp,
                    duration: point.duration,
                    depth_mm: round_to(point.depth, 2),
                });
            }
            if point.ari >= ari_threshold {
                exceedances.push(Exceedance {
                    pixel_index: pixel,
                    timestamp: point.timestamp,
                    duration: point.duration,
                    depth_mm: round_to(point.depth, 2),
                    ari_years: round_to(point.ari, 2),
                });
            }
        }

        if pixel_max >= ari_threshold {
            pixels_exceeding += 1;
        }
    }

    let proportion = if pixels_total > 0 {
        pixels_exceeding as f64 / pixels_total as f64
    } else {
        0.0
    };

    CatchmentAri {
        max_ari: round_to(max_ari, 2),
        pixels_total,
        pixels_exceeding,
        proportion_exceeding: round_to(proportion, 4),
        peak,
        exceedances,
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn samples(pixel: i64, values: &[f64]) -> Vec<RadarSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RadarSample {
                pixel_index: pixel,
                timestamp: start() + Duration::minutes(i as i64),
                value: Some(*v),
            })
            .collect()
    }

    fn ten_minute_only(b: f64, m: f64) -> PixelCoefficients {
        let mut coefficients = [None; 8];
        coefficients[0] = Some(Coefficients { b, m });
        coefficients
    }

    #[test]
    fn should_return_zero_for_dry_or_invalid_depth() {
        assert_eq!(calculate_ari(0.0, 1.0, 0.1), 0.0);
        assert_eq!(calculate_ari(-3.0, 1.0, 0.1), 0.0);
        assert_eq!(calculate_ari(f64::NAN, 1.0, 0.1), 0.0);
        assert_eq!(calculate_ari(5.0, f64::NAN, 0.1), 0.0);
    }

    #[test]
    fn should_overflow_to_infinity() {
        assert_eq!(calculate_ari(1e6, 0.0, 1.0), f64::INFINITY);
    }

    #[test]
    fn should_increase_monotonically_with_depth() {
        let (b, m) = (-1.2, 0.08);
        let aris: Vec<f64> = (1..50).map(|d| calculate_ari(d as f64, b, m)).collect();

        assert!(aris.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn should_invert_ari_to_depth() {
        let (b, m) = (-0.5, 0.12);
        for target in [1.0, 2.0, 5.0, 10.0, 100.0] {
            let depth = depth_for_ari(target, b, m);
            assert!((calculate_ari(depth, b, m) - target).abs() < 1e-9 * target);
        }
    }

    #[test]
    fn should_report_unreachable_depth_as_infinite() {
        assert_eq!(depth_for_ari(0.0, 1.0, 0.1), f64::INFINITY);
        assert_eq!(depth_for_ari(-1.0, 1.0, 0.1), f64::INFINITY);
        assert_eq!(depth_for_ari(5.0, 1.0, 0.0), f64::INFINITY);
        assert_eq!(depth_for_ari(5.0, f64::NAN, 0.1), f64::INFINITY);
    }

    #[test]
    fn should_require_full_windows() {
        let sums = rolling_sum(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)], 3);

        assert_eq!(sums, vec![None, None, Some(6.0), Some(9.0)]);
        assert_eq!(rolling_sum(&[Some(1.0), Some(2.0)], 3), vec![None, None]);
    }

    #[test]
    fn should_skip_windows_holding_missing_values() {
        let values = [
            Some(1.0),
            None,
            Some(2.0),
            Some(3.0),
            Some(f64::NAN),
            Some(1.0),
            Some(1.0),
            Some(1.0),
        ];

        let sums = rolling_sum(&values, 3);

        assert_eq!(sums, vec![None, None, None, None, None, None, None, Some(3.0)]);
    }

    #[test]
    fn should_sum_dry_windows_to_exact_zero() {
        let sums = rolling_sum(&[Some(0.1), Some(0.2), Some(0.0), Some(0.0), Some(0.0)], 3);

        assert_eq!(sums[4], Some(0.0));
    }

    #[test]
    fn should_load_coefficients_with_missing_cells() {
        let csv = "pixelindex,10m_b,10m_m,20m_b,20m_m\n\
                   100,0.5,0.1,nan,0.2\n\
                   101.0,,0.3,1.0,0.4\n";

        let table = CoefficientTable::from_reader(csv.as_bytes(), Path::new("tp108.csv")).unwrap();

        assert_eq!(table.len(), 2);
        let first = table.get(100).unwrap();
        assert_eq!(first[0], Some(Coefficients { b: 0.5, m: 0.1 }));
        assert_eq!(first[1], None);
        assert_eq!(first[2], None);
        let second = table.get(101).unwrap();
        assert_eq!(second[0], None);
        assert_eq!(second[1], Some(Coefficients { b: 1.0, m: 0.4 }));
    }

    #[test]
    fn should_reject_table_without_pixel_column() {
        let result = CoefficientTable::from_reader("pixel,10m_b\n1,2\n".as_bytes(), Path::new("x"));

        assert!(matches!(result, Err(PipelineError::MissingColumn { .. })));
    }

    #[test]
    fn should_count_pixels_without_coefficients_in_total() {
        let mut table = CoefficientTable::default();
        table.insert(1, ten_minute_only(0.0, 1.0));

        let mut data = samples(1, &[1.0; 10]);
        data.extend(samples(2, &[1.0; 10]));

        let result = analyze_catchment(&data, &table, 5.0);

        assert_eq!(result.pixels_total, 2);
        assert_eq!(result.pixels_exceeding, 1);
        assert_eq!(result.proportion_exceeding, 0.5);
        assert_eq!(result.exceedances.len(), 1);
        assert_eq!(result.exceedances[0].depth_mm, 10.0);
        assert_eq!(result.max_ari, round_to(10f64.exp(), 2));
    }

    #[test]
    fn should_not_score_windows_across_a_gap() {
        let mut table = CoefficientTable::default();
        table.insert(1, ten_minute_only(0.0, 1.0));

        let mut data = samples(1, &[1.0; 11]);
        data[5].value = None;

        let result = analyze_catchment(&data, &table, 5.0);

        assert_eq!(result.max_ari, 0.0);
        assert_eq!(result.peak, None);
        assert!(result.exceedances.is_empty());
        assert_eq!(result.pixels_exceeding, 0);
        assert_eq!(result.pixels_total, 1);
    }

    #[test]
    fn should_track_peak_with_strict_comparison() {
        let mut table = CoefficientTable::default();
        table.insert(7, ten_minute_only(0.0, 0.1));
        table.insert(8, ten_minute_only(0.0, 0.1));

        let mut data = samples(7, &[1.0; 10]);
        data.extend(samples(8, &[1.0; 10]));

        let result = analyze_catchment(&data, &table, 100.0);
        let peak = result.peak.unwrap();

        assert_eq!(peak.pixel_index, 7);
        assert_eq!(peak.duration, "10m");
        assert_eq!(peak.timestamp, start() + Duration::minutes(9));
        assert!(result.exceedances.is_empty());
        assert_eq!(result.pixels_exceeding, 0);
    }

    #[test]
    fn should_sort_unordered_samples_before_summing() {
        let mut table = CoefficientTable::default();
        table.insert(1, ten_minute_only(0.0, 1.0));

        let mut data = samples(1, &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
        data.reverse();

        let result = analyze_catchment(&data, &table, 1.0);

        assert_eq!(result.exceedances.len(), 1);
        assert_eq!(
            result.exceedances[0].timestamp,
            start() + Duration::minutes(10)
        );
    }

    #[test]
    fn should_yield_empty_result_when_no_coefficients_match() {
        let table = CoefficientTable::default();

        let result = analyze_catchment(&samples(3, &[5.0; 20]), &table, 5.0);

        assert_eq!(result.pixels_total, 1);
        assert_eq!(result.max_ari, 0.0);
        assert_eq!(result.peak, None);
        assert!(result.exceedances.is_empty());
        assert_eq!(result.proportion_exceeding, 0.0);
    }

    #[test]
    fn should_keep_proportion_within_unit_interval() {
        let table = CoefficientTable::default();

        assert_eq!(analyze_catchment(&[], &table, 5.0).proportion_exceeding, 0.0);
    }

    #[test]
    fn should_pick_max_ari_per_timestamp() {
        let t0 = start();
        let t1 = start() + Duration::minutes(1);
        let points = vec![
            AriPoint { timestamp: t1, duration: "10m", depth: 1.0, ari: 2.0 },
            AriPoint { timestamp: t0, duration: "10m", depth: 1.0, ari: 3.0 },
            AriPoint { timestamp: t1, duration: "20m", depth: 2.0, ari: 6.0 },
            AriPoint { timestamp: t1, duration: "30m", depth: 3.0, ari: 6.0 },
        ];

        let best = max_ari_by_timestamp(&points);

        assert_eq!(best.len(), 2);
        assert_eq!(best[0].timestamp, t0);
        assert_eq!(best[1].duration, "20m");
    }
}
