//! Composite dataset builder: merges multiple already-downloaded series
//! into one cohort, applying meta-data-driven sample filtering and pruning
//! the raw files of excluded samples.

use std::fs::File;
use std::path::{
    Path,
    PathBuf,
};

use anyhow::{
    bail,
    Context,
    Result,
};
use glob::glob;
use hashbrown::HashMap;
use itertools::Itertools;
use log::{
    info,
    warn,
};
use polars::prelude::*;

use crate::data_structs::sample::{
    Sample,
    SampleSheet,
};
use crate::error::MethError;
use crate::io::samplesheet::find_idat_pairs;
use crate::processing::pipeline::{
    run_pipeline_with_sheet,
    RunArtifacts,
    RunConfig,
};

/// Meta-data fields consulted by the control-role predicate.
const ROLE_FIELD_HINTS: [&str; 6] = ["name", "type", "group", "title", "source", "characteristics"];

/// Stateless inclusion predicate over one sample's meta-data row.
#[derive(Debug, Clone, Default)]
pub struct CompositeFilterCriteria {
    keyword: Option<String>,
    control_only: bool,
}

impl CompositeFilterCriteria {
    pub fn new(
        keyword: Option<String>,
        control_only: bool,
    ) -> Self {
        Self {
            keyword: keyword.filter(|k| !k.trim().is_empty()),
            control_only,
        }
    }

    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref()
    }

    pub fn control_only(&self) -> bool {
        self.control_only
    }

    /// True when no criterion is set, i.e. every sample is retained.
    pub fn is_unrestricted(&self) -> bool {
        self.keyword.is_none() && !self.control_only
    }

    /// Pure predicate: keyword matches any field case-insensitively, the
    /// control test consults the role-ish fields; both combine as AND.
    pub fn matches(
        &self,
        fields: &HashMap<String, String>,
    ) -> bool {
        if let Some(keyword) = &self.keyword {
            let keyword = keyword.to_lowercase();
            let hit = fields
                .values()
                .any(|value| value.to_lowercase().contains(&keyword));
            if !hit {
                return false;
            }
        }
        if self.control_only {
            let hit = fields.iter().any(|(name, value)| {
                let name = name.to_lowercase();
                ROLE_FIELD_HINTS.iter().any(|hint| name.contains(hint)) && {
                    let value = value.to_lowercase();
                    value.contains("control") || value.contains("ctrl")
                }
            });
            if !hit {
                return false;
            }
        }
        true
    }
}

/// One series' filtering decision, finalized before any pruning happens.
struct SeriesEval {
    retained: Vec<Sample>,
    excluded: Vec<Sample>,
}

/// Builds a composite cohort from `series_ids` under `data_dir`, filters it
/// with `criteria`, prunes excluded raw files and runs the batch pipeline
/// over the merged sheet.
///
/// The retained set across *all* series is computed and validated first;
/// pruning is irreversible and therefore only starts once the decision is
/// durable. An all-excluded composite fails before a single file is
/// removed.
pub fn build_composite_dataset(
    series_ids: &[String],
    criteria: &CompositeFilterCriteria,
    config: &RunConfig,
) -> Result<RunArtifacts> {
    if series_ids.is_empty() {
        bail!(MethError::Configuration(
            "composite requires at least one series id".to_string()
        ));
    }

    // Phase 1: finalize the retained set.
    let mut evals = Vec::with_capacity(series_ids.len());
    for series_id in series_ids {
        let series_dir = config.data_dir().join(series_id);
        let eval = evaluate_series(series_id, &series_dir, criteria)
            .with_context(|| format!("while filtering series {}", series_id))?;
        info!(
            "series {}: {} retained, {} excluded",
            series_id,
            eval.retained.len(),
            eval.excluded.len()
        );
        evals.push((series_id.clone(), eval));
    }

    let n_retained: usize = evals.iter().map(|(_, e)| e.retained.len()).sum();
    if n_retained == 0 {
        bail!(MethError::EmptyComposite {
            n_series: series_ids.len(),
        });
    }

    // Phase 2: prune exactly the complement set.
    let mut n_pruned = 0usize;
    for (_, eval) in &evals {
        n_pruned += prune_idats(&eval.excluded)?;
    }
    info!(
        "composite: retained {} sample(s), pruned {} idat file(s)",
        n_retained, n_pruned
    );

    // Phase 3: merged sheet ordered by (series id, in-series order),
    // independent of the order the list file named the series in.
    evals.sort_by(|(a, _), (b, _)| a.cmp(b));
    let samples = evals
        .into_iter()
        .flat_map(|(_, e)| e.retained)
        .collect_vec();
    let sheet = SampleSheet::from_samples(samples);

    run_pipeline_with_sheet(config, sheet)
}

/// Applies the composite filter to a single already-downloaded series,
/// writing the filtered sheet next to the original and optionally pruning
/// the excluded idat files.
pub fn filter_series(
    series_id: &str,
    series_dir: &Path,
    criteria: &CompositeFilterCriteria,
    sync_idats: bool,
) -> Result<(SampleSheet, PathBuf)> {
    let eval = evaluate_series(series_id, series_dir, criteria)?;
    if eval.retained.is_empty() {
        bail!(MethError::EmptyComposite { n_series: 1 });
    }
    if sync_idats {
        let n_pruned = prune_idats(&eval.excluded)?;
        info!("series {}: pruned {} idat file(s)", series_id, n_pruned);
    }

    let sheet = SampleSheet::from_samples(eval.retained);
    let out_path = series_dir.join(format!("{}_filtered_samplesheet.csv", series_id));
    sheet.write_csv(&out_path)?;
    Ok((sheet, out_path))
}

/// Reads a series list file: one id per line, blank lines and `#` comments
/// ignored.
pub fn read_series_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read series list {}", path.display()))?;
    let ids = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect_vec();
    if ids.is_empty() {
        bail!(MethError::Configuration(format!(
            "series list {} contains no ids",
            path.display()
        )));
    }
    Ok(ids)
}

/// Loads one series' meta-data table, joins it to the discovered idat pairs
/// and applies the filter. No files are touched here.
fn evaluate_series(
    series_id: &str,
    series_dir: &Path,
    criteria: &CompositeFilterCriteria,
) -> Result<SeriesEval> {
    if !series_dir.is_dir() {
        bail!(MethError::Configuration(format!(
            "series directory {} does not exist",
            series_dir.display()
        )));
    }

    let meta_path = find_meta_table(series_dir)?;
    let rows = read_meta_rows(&meta_path)?;
    let pairs = find_idat_pairs(series_dir)?;
    let by_key: HashMap<(String, String), _> = pairs
        .iter()
        .map(|p| ((p.barcode.clone(), p.position.clone()), p))
        .collect();

    let mut retained = Vec::new();
    let mut excluded = Vec::new();
    for (row_idx, fields) in rows.iter().enumerate() {
        let Some((barcode, position)) = extract_barcode_position(fields) else {
            warn!(
                "{}: meta row {} lacks barcode/position, ignored",
                meta_path.display(),
                row_idx
            );
            continue;
        };
        let Some(pair) = by_key.get(&(barcode.clone(), position.clone())) else {
            warn!(
                "series {}: no idat pair for {}_{}, ignored",
                series_id, barcode, position
            );
            continue;
        };

        let name = fields
            .get("Sample_Name")
            .or_else(|| fields.get("GSM_ID"))
            .cloned()
            .unwrap_or_else(|| format!("{}_{}", barcode, position));
        let sample = Sample::new(
            barcode,
            position,
            pair.green.clone(),
            pair.red.clone(),
        )
        .with_name(name)
        .with_sample_type(fields.get("Sample_Type").cloned())
        .with_sample_sub_type(fields.get("Sample_Sub_Type").cloned())
        .with_gsm_id(fields.get("GSM_ID").cloned())
        .with_series(Some(series_id.to_string()));

        if criteria.matches(fields) {
            retained.push(sample);
        } else {
            excluded.push(sample);
        }
    }

    Ok(SeriesEval { retained, excluded })
}

/// Removes the raw files of excluded samples. Missing files are tolerated
/// (the pair may already have been pruned by an earlier run).
fn prune_idats(excluded: &[Sample]) -> Result<usize> {
    let mut n_removed = 0usize;
    for sample in excluded {
        for path in [sample.green_idat(), sample.red_idat()] {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    info!("pruned {}", path.display());
                    n_removed += 1;
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => {
                    return Err(e).with_context(|| format!("cannot prune {}", path.display()));
                },
            }
        }
    }
    Ok(n_removed)
}

/// Locates the per-series meta-data/sample sheet table.
fn find_meta_table(series_dir: &Path) -> Result<PathBuf> {
    let pattern = series_dir.join("**/*.csv");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| MethError::Configuration(format!("non-utf8 path {:?}", series_dir)))?;

    let candidates = glob(pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            // Outputs of earlier filtering runs are not input tables.
            if name.contains("sample_sheet_meta_data") || name.contains("filtered_samplesheet") {
                return false;
            }
            name.contains("samplesheet")
                || name.contains("sample_sheet")
                || name.contains("meta_data")
        })
        .collect_vec();

    match candidates.len() {
        0 => {
            bail!(MethError::Configuration(format!(
                "no meta-data table found under {}",
                series_dir.display()
            )))
        },
        1 => Ok(candidates.into_iter().next().unwrap()),
        _ => {
            bail!(MethError::Configuration(format!(
                "multiple meta-data tables under {}: {}",
                series_dir.display(),
                candidates.iter().map(|p| p.display().to_string()).join(", ")
            )))
        },
    }
}

/// Reads a meta-data CSV into one string-valued map per row.
fn read_meta_rows(path: &Path) -> Result<Vec<HashMap<String, String>>> {
    let handle = File::open(path)
        .with_context(|| format!("cannot open meta-data table {}", path.display()))?;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(handle)
        .finish()
        .map_err(|e| {
            MethError::Configuration(format!(
                "cannot parse meta-data table {}: {}",
                path.display(),
                e
            ))
        })?;

    let mut columns: Vec<(String, Vec<Option<String>>)> = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let name = column.name().to_string();
        let values = column
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect();
        columns.push((name, values));
    }

    let mut rows = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let mut fields = HashMap::with_capacity(columns.len());
        for (name, values) in &columns {
            if let Some(Some(value)) = values.get(row_idx) {
                if !value.trim().is_empty() {
                    fields.insert(name.clone(), value.clone());
                }
            }
        }
        rows.push(fields);
    }
    Ok(rows)
}

fn extract_barcode_position(fields: &HashMap<String, String>) -> Option<(String, String)> {
    let barcode = ["Sentrix_ID", "SentrixBarcode_A", "Barcode"]
        .iter()
        .find_map(|k| fields.get(*k))?;
    let position = ["Sentrix_Position", "SentrixPosition_A", "Position"]
        .iter()
        .find_map(|k| fields.get(*k))?;
    Some((barcode.clone(), position.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn keyword_matches_any_field_case_insensitively() {
        let criteria = CompositeFilterCriteria::new(Some("tumor".to_string()), false);
        assert!(criteria.matches(&fields(&[("source", "Primary TUMOR tissue")])));
        assert!(criteria.matches(&fields(&[("Sample_Name", "tumor_01")])));
        assert!(!criteria.matches(&fields(&[("source", "healthy tissue")])));
    }

    #[test]
    fn control_only_consults_role_fields() {
        let criteria = CompositeFilterCriteria::new(None, true);
        assert!(criteria.matches(&fields(&[("Sample_Type", "control")])));
        assert!(criteria.matches(&fields(&[("title", "Ctrl blood 3")])));
        // 'control' buried in a non-role field does not qualify.
        assert!(!criteria.matches(&fields(&[("notes", "control-adjacent")])));
    }

    #[test]
    fn combined_criteria_are_strict_and() {
        let criteria =
            CompositeFilterCriteria::new(Some("blood".to_string()), true);
        assert!(criteria.matches(&fields(&[
            ("Sample_Type", "control"),
            ("source", "whole blood")
        ])));
        assert!(!criteria.matches(&fields(&[("Sample_Type", "control")])));
        assert!(!criteria.matches(&fields(&[("source", "whole blood")])));
    }

    #[test]
    fn filter_is_pure() {
        let criteria = CompositeFilterCriteria::new(Some("x".to_string()), true);
        let row = fields(&[("Sample_Type", "Control x")]);
        let first = criteria.matches(&row);
        let second = criteria.matches(&row);
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn unrestricted_criteria_keep_everything() {
        let criteria = CompositeFilterCriteria::new(Some("   ".to_string()), false);
        assert!(criteria.is_unrestricted());
        assert!(criteria.matches(&fields(&[("anything", "at all")])));
    }
}
