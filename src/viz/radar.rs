//! Rainfall dashboard over one radar collection run.

use std::{
    collections::BTreeMap,
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    analyze::{ari::RadarSample, radar::read_radar_csv},
    collect::radar::load_pixel_cache,
    error::PipelineError,
    paths::RadarRunDirs,
    tables::{read_csv, write_csv},
    viz::html::{escape, thousands, write_page, SEARCH_SCRIPT},
};

pub const STATS_FILE: &str = "radar_stats.csv";
pub const DASHBOARD_FILE: &str = "radar_dashboard.html";

const TOP_N: usize = 20;

pub(crate) const DASHBOARD_CSS: &str = r#"<style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body { font-family: 'Segoe UI', sans-serif; background: #f5f5f5; padding: 20px; }
        .container { max-width: 1400px; margin: 0 auto; }
        .header {
            background: linear-gradient(135deg, #1e3c72, #2a5298);
            color: white;
            padding: 30px;
            border-radius: 10px;
            margin-bottom: 20px;
            text-align: center;
        }
        .header h1 { font-size: 2em; margin-bottom: 5px; }
        .header .subtitle { opacity: 0.9; }
        .header .meta { margin-top: 10px; opacity: 0.8; font-size: 0.9em; }
        .stats-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(160px, 1fr));
            gap: 15px;
            margin-bottom: 20px;
        }
        .stat-card {
            background: white;
            padding: 20px;
            border-radius: 10px;
            box-shadow: 0 2px 5px rgba(0,0,0,0.1);
            text-align: center;
        }
        .stat-card .value { font-size: 2em; font-weight: bold; color: #1e3c72; }
        .stat-card .label { color: #666; font-size: 0.9em; margin-top: 5px; }
        .stat-card.alarm .value { color: #dc3545; }
        .stat-card.ok .value { color: #28a745; }
        .section {
            background: white;
            padding: 25px;
            border-radius: 10px;
            margin-bottom: 20px;
            box-shadow: 0 2px 5px rgba(0,0,0,0.1);
        }
        .section h2 {
            color: #1e3c72;
            margin-bottom: 15px;
            border-bottom: 2px solid #667eea;
            padding-bottom: 10px;
        }
        table { width: 100%; border-collapse: collapse; }
        th { background: #667eea; color: white; padding: 12px; text-align: left; }
        td { padding: 10px 12px; border-bottom: 1px solid #eee; }
        tr:hover { background: #f9f9f9; }
        .search-box {
            width: 100%;
            padding: 12px;
            border: 2px solid #ddd;
            border-radius: 8px;
            margin-bottom: 15px;
            font-size: 1em;
        }
        .has-rain { color: #28a745; font-weight: bold; }
        .no-rain { color: #999; }
        .status-alarm { color: #dc3545; font-weight: bold; }
        .status-ok { color: #28a745; }
        .footer { text-align: center; color: #666; padding: 20px; font-size: 0.9em; }
    </style>"#;

/// Rainfall statistics of one catchment, a row of `radar_stats.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatchmentStats {
    pub catchment_id: i64,
    pub catchment_name: String,
    pub pixel_count: usize,
    pub has_data: bool,
    pub total_rainfall: f64,
    pub avg_rainfall_per_pixel: f64,
    pub max_intensity: f64,
    pub pixels_with_rain: usize,
    pub rain_coverage_pct: f64,
}

#[derive(Debug, Deserialize)]
struct CatchmentNameRow {
    id: Option<i64>,
    name: Option<String>,
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Statistics from a catchment's radar samples; `None` when it has no radar file.
pub fn catchment_stats(
    catchment_id: i64,
    catchment_name: &str,
    pixel_count: usize,
    samples: Option<&[RadarSample]>,
) -> CatchmentStats {
    let mut stats = CatchmentStats {
        catchment_id,
        catchment_name: catchment_name.to_string(),
        pixel_count,
        has_data: false,
        total_rainfall: 0.0,
        avg_rainfall_per_pixel: 0.0,
        max_intensity: 0.0,
        pixels_with_rain: 0,
        rain_coverage_pct: 0.0,
    };
    let Some(samples) = samples else {
        return stats;
    };
    stats.has_data = true;

    // pixel -> (total, max)
    let mut per_pixel: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
    for sample in samples {
        let Some(value) = sample.value else {
            continue;
        };
        let entry = per_pixel
            .entry(sample.pixel_index)
            .or_insert((0.0, f64::NEG_INFINITY));
        entry.0 += value;
        entry.1 = entry.1.max(value);
    }
    if per_pixel.is_empty() {
        return stats;
    }

    let pixels = per_pixel.len() as f64;
    let total: f64 = per_pixel.values().map(|(t, _)| t).sum();
    let with_rain = per_pixel.values().filter(|(t, _)| *t > 0.0).count();

    stats.total_rainfall = round(total, 2);
    stats.avg_rainfall_per_pixel = round(total / pixels, 3);
    let max_intensity = per_pixel
        .values()
        .map(|(_, m)| *m)
        .fold(f64::NEG_INFINITY, f64::max);
    stats.max_intensity = round(max_intensity, 3);
    stats.pixels_with_rain = with_rain;
    stats.rain_coverage_pct = round(100.0 * with_rain as f64 / pixels, 1);
    stats
}

fn radar_file_for(radar_dir: &Path, catchment_id: i64) -> Option<PathBuf> {
    let prefix = format!("{}_", catchment_id);
    let mut files: Vec<PathBuf> = fs::read_dir(radar_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "csv")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();
    files.sort();
    files.into_iter().next()
}

pub fn load_and_analyze(dirs: &RadarRunDirs) -> Result<Vec<CatchmentStats>> {
    let catchments_csv = dirs.catchments_csv();
    let names: BTreeMap<i64, String> = if catchments_csv.exists() {
        read_csv::<CatchmentNameRow>(&catchments_csv)?
            .into_iter()
            .filter_map(|row| Some((row.id?, row.name.unwrap_or_default())))
            .collect()
    } else {
        warn!(path = %catchments_csv.display(), "catchments file not found");
        BTreeMap::new()
    };

    let mappings = load_pixel_cache(&dirs.pixel_cache_json()).unwrap_or_default();
    if names.is_empty() || mappings.is_empty() {
        return Err(PipelineError::InputData {
            path: dirs.root.clone(),
            reason: "no catchments or pixel mappings to analyze".into(),
        }
        .into());
    }
    info!(catchments = mappings.len(), "analyzing catchments");

    let radar_dir = dirs.radar_data_dir();
    let mut stats = Vec::with_capacity(mappings.len());
    for (&catchment_id, pixels) in &mappings {
        let name = names
            .get(&catchment_id)
            .cloned()
            .unwrap_or_else(|| format!("ID_{}", catchment_id));

        let samples = match radar_file_for(&radar_dir, catchment_id) {
            Some(path) => match read_radar_csv(&path) {
                Ok(samples) => Some(samples),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable radar file");
                    None
                }
            },
            None => None,
        };
        stats.push(catchment_stats(catchment_id, &name, pixels.len(), samples.as_deref()));
    }
    Ok(stats)
}

fn top_by<F>(stats: &[CatchmentStats], key: F) -> Vec<&CatchmentStats>
where
    F: Fn(&CatchmentStats) -> f64,
{
    let mut sorted: Vec<&CatchmentStats> = stats.iter().collect();
    sorted.sort_by(|a, b| key(b).total_cmp(&key(a)));
    sorted.truncate(TOP_N);
    sorted
}

pub fn build_radar_dashboard(
    stats: &[CatchmentStats],
    data_date: Option<&str>,
    generated_at: DateTime<Local>,
) -> String {
    let with_data = stats.iter().filter(|s| s.has_data).count();
    let with_rain = stats.iter().filter(|s| s.total_rainfall > 0.0).count();
    let total_rainfall: f64 = stats.iter().map(|s| s.total_rainfall).sum();
    let total_pixels: usize = stats.iter().map(|s| s.pixel_count).sum();
    let date_display = match data_date {
        Some(date) => format!("Data Date: {}", escape(date)),
        None => "Data: Last 24 hours".to_string(),
    };

    let mut html = String::new();
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Rain Radar Dashboard</title>
    {css}
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Rain Radar Dashboard</h1>
            <div class="subtitle">Stormwater Catchments QPE Analysis</div>
            <div class="meta">{date} | Generated: {generated}</div>
        </div>
        <div class="stats-grid">
            <div class="stat-card">
                <div class="value">{total}</div><div class="label">Total Catchments</div>
            </div>
            <div class="stat-card">
                <div class="value">{with_data}</div><div class="label">With Data</div>
            </div>
            <div class="stat-card">
                <div class="value">{with_rain}</div><div class="label">With Rainfall</div>
            </div>
            <div class="stat-card">
                <div class="value">{pixels}</div><div class="label">Total Pixels</div>
            </div>
            <div class="stat-card">
                <div class="value">{rainfall:.1}</div><div class="label">Total Rainfall (mm)</div>
            </div>
        </div>
"#,
        css = DASHBOARD_CSS,
        date = date_display,
        generated = generated_at.format("%Y-%m-%d %H:%M:%S"),
        total = stats.len(),
        with_data = with_data,
        with_rain = with_rain,
        pixels = thousands(total_pixels as u64),
        rainfall = total_rainfall,
    );

    html.push_str(
        "        <div class=\"section\">\n            <h2>Top 20 by Total Rainfall</h2>\n\
         \x20           <table>\n\
         <thead><tr><th>#</th><th>Catchment</th><th>Total (mm)</th><th>Pixels</th>\
         <th>Coverage</th></tr></thead>\n<tbody>\n",
    );
    for (i, s) in top_by(stats, |s| s.total_rainfall).iter().enumerate() {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td class=\"has-rain\">{:.2}</td>\
             <td>{}</td><td>{:.1}%</td></tr>",
            i + 1,
            escape(&s.catchment_name),
            s.total_rainfall,
            s.pixel_count,
            s.rain_coverage_pct
        );
    }
    html.push_str("</tbody>\n            </table>\n        </div>\n");

    html.push_str(
        "        <div class=\"section\">\n            <h2>Top 20 by Peak Intensity</h2>\n\
         \x20           <table>\n\
         <thead><tr><th>#</th><th>Catchment</th><th>Max (mm/min)</th><th>Total (mm)</th>\
         <th>Pixels</th></tr></thead>\n<tbody>\n",
    );
    for (i, s) in top_by(stats, |s| s.max_intensity).iter().enumerate() {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{:.3}</td><td>{:.2}</td><td>{}</td></tr>",
            i + 1,
            escape(&s.catchment_name),
            s.max_intensity,
            s.total_rainfall,
            s.pixel_count
        );
    }
    html.push_str("</tbody>\n            </table>\n        </div>\n");

    html.push_str(
        "        <div class=\"section\">\n            <h2>All Catchments</h2>\n\
         <input type=\"text\" id=\"search\" class=\"search-box\" \
         placeholder=\"Search catchments...\">\n\
         <table id=\"allTable\">\n\
         <thead><tr><th>ID</th><th>Catchment</th><th>Pixels</th><th>Total (mm)</th>\
         <th>Max (mm/min)</th><th>Coverage</th></tr></thead>\n<tbody>\n",
    );
    let mut all: Vec<&CatchmentStats> = stats.iter().collect();
    all.sort_by(|a, b| b.total_rainfall.total_cmp(&a.total_rainfall));
    for s in all {
        let class = if s.total_rainfall > 0.0 { "has-rain" } else { "no-rain" };
        let _ = writeln!(
            html,
            "<tr class=\"data-row\"><td>{}</td><td>{}</td><td>{}</td>\
             <td class=\"{}\">{:.2}</td><td>{:.3}</td><td>{:.1}%</td></tr>",
            s.catchment_id,
            escape(&s.catchment_name),
            s.pixel_count,
            class,
            s.total_rainfall,
            s.max_intensity,
            s.rain_coverage_pct
        );
    }
    html.push_str("</tbody>\n            </table>\n        </div>\n");

    let _ = write!(
        html,
        "        <div class=\"footer\">Rain Radar Dashboard | {} Catchments | {}</div>\n\
         \x20   </div>\n{}\n</body>\n</html>",
        stats.len(),
        generated_at.format("%Y-%m-%d"),
        SEARCH_SCRIPT
    );
    html
}

/// Writes `radar_stats.csv` and `radar_dashboard.html` into `out_dir`.
pub fn run_radar_report(
    data_dir: &Path,
    out_dir: &Path,
    data_date: Option<&str>,
) -> Result<PathBuf> {
    if !data_dir.exists() {
        return Err(PipelineError::InputData {
            path: data_dir.to_path_buf(),
            reason: "data directory not found".into(),
        }
        .into());
    }

    let stats = load_and_analyze(&RadarRunDirs::new(data_dir))?;
    info!(catchments = stats.len(), "loaded catchment records");

    fs::create_dir_all(out_dir)?;
    write_csv(&out_dir.join(STATS_FILE), &stats)?;

    let dashboard = out_dir.join(DASHBOARD_FILE);
    write_page(&dashboard, &build_radar_dashboard(&stats, data_date, Local::now()))?;
    info!(path = %dashboard.display(), "saved dashboard");
    Ok(dashboard)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::collect::radar::save_pixel_cache;

    fn samples(values: &[(i64, f64)]) -> Vec<RadarSample> {
        let start = Utc.with_ymd_and_hms(2025, 5, 9, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &(pixel_index, value))| RadarSample {
                pixel_index,
                timestamp: start + Duration::minutes(i as i64),
                value: Some(value),
            })
            .collect()
    }

    #[test]
    fn should_compute_catchment_stats() {
        let data = samples(&[(1, 0.5), (1, 1.25), (2, 0.0), (3, 0.2)]);

        let stats = catchment_stats(7, "Meola", 3, Some(&data));

        assert!(stats.has_data);
        assert_eq!(stats.total_rainfall, 1.95);
        assert_eq!(stats.avg_rainfall_per_pixel, 0.65);
        assert_eq!(stats.max_intensity, 1.25);
        assert_eq!(stats.pixels_with_rain, 2);
        assert_eq!(stats.rain_coverage_pct, 66.7);
    }

    #[test]
    fn should_mark_catchment_without_file() {
        let stats = catchment_stats(7, "Meola", 3, None);

        assert!(!stats.has_data);
        assert_eq!(stats.total_rainfall, 0.0);
    }

    #[test]
    fn should_build_dashboard_with_escaped_names() {
        let stats = vec![
            catchment_stats(1, "Dry <Creek>", 4, None),
            catchment_stats(2, "Wet", 1_200, Some(&samples(&[(1, 3.0)]))),
        ];
        let generated = Local.with_ymd_and_hms(2025, 5, 10, 8, 0, 0).unwrap();

        let html = build_radar_dashboard(&stats, Some("2025-05-09"), generated);

        assert!(html.contains("Data Date: 2025-05-09 | Generated: 2025-05-10 08:00:00"));
        assert!(html.contains("<div class=\"value\">1,204</div>"));
        assert!(html.contains("Dry &lt;Creek&gt;"));
        assert!(html.find("<td>Wet</td>").unwrap() < html.find("Dry &lt;Creek&gt;").unwrap());
        assert!(html.contains("getElementById('search')"));
    }

    #[test]
    fn should_write_stats_and_dashboard() {
        let tmp = TempDir::new().unwrap();
        let dirs = RadarRunDirs::new(tmp.path().join("raw"));
        fs::create_dir_all(dirs.catchments_dir()).unwrap();
        fs::create_dir_all(dirs.pixel_mappings_dir()).unwrap();
        fs::create_dir_all(dirs.radar_data_dir()).unwrap();
        fs::write(dirs.catchments_csv(), "id,name\n1,Meola\n2,Oakley\n").unwrap();
        let cache = BTreeMap::from([(1, vec![10, 11]), (2, vec![12])]);
        save_pixel_cache(&dirs.pixel_cache_json(), &cache).unwrap();
        fs::write(
            dirs.radar_data_dir().join("1_Meola.csv"),
            "pixel_index,value_index,timestamp,value\n\
             10,0,2025-05-09T00:00:00+00:00,1.5\n\
             11,0,2025-05-09T00:00:00+00:00,0.0\n",
        )
        .unwrap();
        let out_dir = tmp.path().join("dashboard");

        let dashboard = run_radar_report(&dirs.root, &out_dir, None).unwrap();

        assert!(dashboard.exists());
        let text = fs::read_to_string(out_dir.join(STATS_FILE)).unwrap();
        assert!(text.contains("1,Meola,2,true,1.5"));
        assert!(text.contains("2,Oakley,1,false,0.0"));
    }
}
