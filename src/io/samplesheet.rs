//! Sample discovery: pairing raw channel files and building sample sheets.

use std::io::Cursor;
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

/// A matched green/red file pair for one array position.
#[derive(Debug, Clone)]
pub struct IdatPair {
    pub barcode: String,
    pub position: String,
    pub prefix: Option<String>,
    pub green: PathBuf,
    pub red: PathBuf,
}

/// Recursively scans `dir` for paired two-channel idat files.
///
/// Two files pair when their names are identical except for the channel
/// token. Unpaired or unparseable files are skipped with a warning. The
/// result is sorted by (barcode, position).
pub fn find_idat_pairs(dir: &Path) -> Result<Vec<IdatPair>> {
    let mut candidates: HashMap<PathBuf, (Option<PathBuf>, Option<PathBuf>)> = HashMap::new();

    for pattern in ["**/*.idat", "**/*.idat.gz"] {
        let full = dir.join(pattern);
        let full = full
            .to_str()
            .ok_or_else(|| MethError::Configuration(format!("non-utf8 path {:?}", dir)))?;
        for entry in glob(full).with_context(|| format!("bad glob pattern {}", full))? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("skipping unreadable entry: {}", e);
                    continue;
                },
            };
            let Some(stem) = idat_stem(&path) else {
                continue;
            };
            let Some((base, channel)) = split_channel_token(&stem) else {
                warn!(
                    "skipping {}: no channel token in file name",
                    path.display()
                );
                continue;
            };
            let key = path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(&base);
            let slot = candidates.entry(key).or_default();
            match channel {
                ChannelToken::Green => slot.0 = Some(path),
                ChannelToken::Red => slot.1 = Some(path),
            }
        }
    }

    let mut pairs = Vec::new();
    for (key, (green, red)) in candidates {
        match (green, red) {
            (Some(green), Some(red)) => {
                let base = key
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match parse_base_tokens(&base) {
                    Some((prefix, barcode, position)) => pairs.push(IdatPair {
                        barcode,
                        position,
                        prefix,
                        green,
                        red,
                    }),
                    None => {
                        warn!(
                            "skipping pair '{}': cannot parse barcode/position tokens",
                            base
                        );
                    },
                }
            },
            (green, red) => {
                let present = green.or(red).unwrap();
                warn!(
                    "skipping {}: missing its paired channel file",
                    present.display()
                );
            },
        }
    }

    pairs.sort_by(|a, b| (&a.barcode, &a.position).cmp(&(&b.barcode, &b.position)));
    Ok(pairs)
}

enum ChannelToken {
    Green,
    Red,
}

/// File stem with `.idat` / `.idat.gz` stripped, or `None` for other files.
fn idat_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let lower = name.to_lowercase();
    if let Some(stripped) = lower
        .ends_with(".idat.gz")
        .then(|| &name[..name.len() - ".idat.gz".len()])
    {
        return Some(stripped.to_string());
    }
    lower
        .ends_with(".idat")
        .then(|| name[..name.len() - ".idat".len()].to_string())
}

fn split_channel_token(stem: &str) -> Option<(String, ChannelToken)> {
    let (base, token) = stem.rsplit_once('_')?;
    match token.to_lowercase().as_str() {
        "grn" | "green" => Some((base.to_string(), ChannelToken::Green)),
        "red" => Some((base.to_string(), ChannelToken::Red)),
        _ => None,
    }
}

/// Splits `[prefix_]barcode_position` into its tokens.
fn parse_base_tokens(base: &str) -> Option<(Option<String>, String, String)> {
    let tokens = base.split('_').collect_vec();
    if tokens.len() < 2 {
        return None;
    }
    let position = tokens[tokens.len() - 1];
    let barcode = tokens[tokens.len() - 2];
    if !is_sentrix_position(position) || barcode.is_empty() {
        return None;
    }
    let prefix = if tokens.len() > 2 {
        Some(tokens[..tokens.len() - 2].join("_"))
    } else {
        None
    };
    Some((prefix, barcode.to_string(), position.to_string()))
}

/// `R01C01`-style sentrix position token.
fn is_sentrix_position(token: &str) -> bool {
    let Some(rest) = token.strip_prefix('R') else {
        return false;
    };
    let Some((row, col)) = rest.split_once('C') else {
        return false;
    };
    !row.is_empty()
        && !col.is_empty()
        && row.chars().all(|c| c.is_ascii_digit())
        && col.chars().all(|c| c.is_ascii_digit())
}

/// Discovers the samples of one data directory.
///
/// With a sample sheet (given or found), every listed sample must resolve to
/// a discovered pair. Without one, a sheet is synthesized from file name
/// tokens when `make_sample_sheet` permits it. The result is sorted by
/// (barcode, position); `sample_names` then restricts it to a named subset.
pub fn discover(
    dir: &Path,
    sample_sheet_path: Option<&Path>,
    sample_names: Option<&[String]>,
    make_sample_sheet: bool,
) -> Result<SampleSheet> {
    let pairs = find_idat_pairs(dir)?;
    if pairs.is_empty() {
        bail!(MethError::Configuration(format!(
            "no idat files found under {}",
            dir.display()
        )));
    }
    info!("discovered {} idat pair(s) under {}", pairs.len(), dir.display());

    let sheet_path = match sample_sheet_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_sheet_file(dir)?,
    };

    let mut sheet = match sheet_path {
        Some(path) => {
            info!("using sample sheet {}", path.display());
            match_sheet_to_pairs(&parse_sheet_records(&path)?, &pairs, dir)?
        },
        None if make_sample_sheet => {
            info!("no sample sheet found, synthesizing one from file names");
            synthesize_sheet(&pairs, None, None)
        },
        None => {
            bail!(MethError::Configuration(format!(
                "no sample sheet found under {} (enable sheet synthesis to build one from idat file names)",
                dir.display()
            )));
        },
    };

    sheet.sort();

    match sample_names {
        Some(names) if !names.is_empty() => sheet.filter_names(names),
        _ => Ok(sheet),
    }
}

/// Builds a sheet from discovered file pairs and writes it as CSV.
///
/// `sample_type` / `sample_sub_type` label every row; sample names fall back
/// to the GSM prefix when the files carry one.
pub fn create_sample_sheet(
    dir: &Path,
    output_file: &str,
    sample_type: Option<String>,
    sample_sub_type: Option<String>,
) -> Result<(SampleSheet, PathBuf)> {
    let pairs = find_idat_pairs(dir)?;
    if pairs.is_empty() {
        bail!(MethError::Configuration(format!(
            "no idat files found under {}",
            dir.display()
        )));
    }
    let mut sheet = synthesize_sheet(&pairs, sample_type, sample_sub_type);
    sheet.sort();

    let out_path = dir.join(output_file);
    sheet.write_csv(&out_path)?;
    info!("wrote sample sheet {} ({} samples)", out_path.display(), sheet.len());
    Ok((sheet, out_path))
}

fn synthesize_sheet(
    pairs: &[IdatPair],
    sample_type: Option<String>,
    sample_sub_type: Option<String>,
) -> SampleSheet {
    let samples = pairs
        .iter()
        .map(|pair| {
            let gsm = pair
                .prefix
                .as_deref()
                .filter(|p| p.starts_with("GSM"))
                .map(str::to_string);
            let mut sample = Sample::new(
                pair.barcode.clone(),
                pair.position.clone(),
                pair.green.clone(),
                pair.red.clone(),
            )
            .with_sample_type(sample_type.clone())
            .with_sample_sub_type(sample_sub_type.clone())
            .with_gsm_id(gsm.clone());
            if let Some(gsm) = gsm {
                sample = sample.with_name(gsm);
            }
            sample
        })
        .collect();
    SampleSheet::from_samples(samples)
}

/// Locates a sample sheet CSV under `dir`. More than one candidate is a
/// configuration error rather than a silent choice.
fn find_sheet_file(dir: &Path) -> Result<Option<PathBuf>> {
    let pattern = dir.join("**/*.csv");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| MethError::Configuration(format!("non-utf8 path {:?}", dir)))?;

    let candidates = glob(pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            // Pipeline outputs are never input sheet candidates.
            if name.contains("sample_sheet_meta_data") || name.contains("filtered_samplesheet") {
                return false;
            }
            name.contains("samplesheet") || name.contains("sample_sheet")
        })
        .collect_vec();

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(Some(candidates.into_iter().next().unwrap())),
        _ => {
            bail!(MethError::Configuration(format!(
                "multiple sample sheet candidates under {}: {}",
                dir.display(),
                candidates.iter().map(|p| p.display().to_string()).join(", ")
            )))
        },
    }
}

#[derive(Debug, Clone)]
struct SheetRecord {
    barcode: String,
    position: String,
    name: Option<String>,
    sample_type: Option<String>,
    sample_sub_type: Option<String>,
    gsm_id: Option<String>,
}

/// Parses a sample sheet CSV, tolerating the Illumina `[Header]`/`[Data]`
/// section layout by starting after a `[Data]` marker when present.
fn parse_sheet_records(path: &Path) -> Result<Vec<SheetRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read sample sheet {}", path.display()))?;

    let data_part = match text
        .lines()
        .position(|line| line.trim_start().starts_with("[Data]"))
    {
        Some(marker) => text
            .lines()
            .skip(marker + 1)
            .join("\n"),
        None => text,
    };

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(Cursor::new(data_part.into_bytes()))
        .finish()
        .map_err(|e| {
            MethError::Configuration(format!(
                "cannot parse sample sheet {}: {}",
                path.display(),
                e
            ))
        })?;

    let barcode = first_present_column(&df, &["Sentrix_ID", "SentrixBarcode_A", "Barcode"])
        .ok_or_else(|| {
            MethError::Configuration(format!(
                "sample sheet {} has no barcode column (Sentrix_ID)",
                path.display()
            ))
        })?;
    let position =
        first_present_column(&df, &["Sentrix_Position", "SentrixPosition_A", "Position"])
            .ok_or_else(|| {
                MethError::Configuration(format!(
                    "sample sheet {} has no position column (Sentrix_Position)",
                    path.display()
                ))
            })?;

    let barcodes = str_column(&df, &barcode)?;
    let positions = str_column(&df, &position)?;
    let names = optional_str_column(&df, "Sample_Name")?;
    let types = optional_str_column(&df, "Sample_Type")?;
    let sub_types = optional_str_column(&df, "Sample_Sub_Type")?;
    let gsm_ids = optional_str_column(&df, "GSM_ID")?;

    let mut records = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let (Some(barcode), Some(position)) = (barcodes[row].clone(), positions[row].clone())
        else {
            warn!("sample sheet {}: row {} lacks barcode/position, skipped", path.display(), row);
            continue;
        };
        records.push(SheetRecord {
            barcode,
            position,
            name: names.as_ref().and_then(|c| c[row].clone()),
            sample_type: types.as_ref().and_then(|c| c[row].clone()),
            sample_sub_type: sub_types.as_ref().and_then(|c| c[row].clone()),
            gsm_id: gsm_ids.as_ref().and_then(|c| c[row].clone()),
        });
    }
    Ok(records)
}

/// Cross-validates sheet records against discovered pairs. Every record must
/// match a pair; the reverse is not required (a sheet may select a subset).
fn match_sheet_to_pairs(
    records: &[SheetRecord],
    pairs: &[IdatPair],
    dir: &Path,
) -> Result<SampleSheet> {
    let by_key: HashMap<(String, String), &IdatPair> = pairs
        .iter()
        .map(|p| ((p.barcode.clone(), p.position.clone()), p))
        .collect();

    let mut samples = Vec::with_capacity(records.len());
    for record in records {
        let key = (record.barcode.clone(), record.position.clone());
        let Some(pair) = by_key.get(&key) else {
            let label = record
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}", record.barcode, record.position));
            bail!(MethError::SampleSheetMismatch {
                sample: label,
                dir: dir.to_path_buf(),
            });
        };
        let mut sample = Sample::new(
            record.barcode.clone(),
            record.position.clone(),
            pair.green.clone(),
            pair.red.clone(),
        )
        .with_sample_type(record.sample_type.clone())
        .with_sample_sub_type(record.sample_sub_type.clone())
        .with_gsm_id(record.gsm_id.clone());
        if let Some(name) = &record.name {
            sample = sample.with_name(name.clone());
        }
        samples.push(sample);
    }
    Ok(SampleSheet::from_samples(samples))
}

fn first_present_column(
    df: &DataFrame,
    names: &[&str],
) -> Option<String> {
    names
        .iter()
        .find(|name| df.column(name).is_ok())
        .map(|name| name.to_string())
}

fn str_column(
    df: &DataFrame,
    name: &str,
) -> Result<Vec<Option<String>>> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::to_string)
                .filter(|s| !s.trim().is_empty())
        })
        .collect())
}

fn optional_str_column(
    df: &DataFrame,
    name: &str,
) -> Result<Option<Vec<Option<String>>>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    str_column(df, name).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentrix_position_tokens() {
        assert!(is_sentrix_position("R01C01"));
        assert!(is_sentrix_position("R12C2"));
        assert!(!is_sentrix_position("R01"));
        assert!(!is_sentrix_position("01C01"));
        assert!(!is_sentrix_position("RxxC01"));
    }

    #[test]
    fn base_token_parsing() {
        assert_eq!(
            parse_base_tokens("203927450093_R01C01"),
            Some((None, "203927450093".to_string(), "R01C01".to_string()))
        );
        assert_eq!(
            parse_base_tokens("GSM6379997_203927450093_R01C01"),
            Some((
                Some("GSM6379997".to_string()),
                "203927450093".to_string(),
                "R01C01".to_string()
            ))
        );
        assert_eq!(parse_base_tokens("noidea"), None);
    }

    #[test]
    fn channel_token_split() {
        assert!(matches!(
            split_channel_token("100_R01C01_Grn"),
            Some((_, ChannelToken::Green))
        ));
        assert!(matches!(
            split_channel_token("100_R01C01_Red"),
            Some((_, ChannelToken::Red))
        ));
        assert!(split_channel_token("100_R01C01").is_none());
    }
}
