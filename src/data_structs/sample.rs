//! Per-sample records and the ordered sample sheet.

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
use polars::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};

use crate::error::MethError;

/// One physical array position: sentrix barcode + position, its two raw
/// channel files and optional meta-data from a sample sheet. Read-only after
/// discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    sample_id: String,
    name: String,
    barcode: String,
    position: String,
    green_idat: PathBuf,
    red_idat: PathBuf,
    sample_type: Option<String>,
    sample_sub_type: Option<String>,
    gsm_id: Option<String>,
    series: Option<String>,
}

impl Sample {
    pub fn new(
        barcode: String,
        position: String,
        green_idat: PathBuf,
        red_idat: PathBuf,
    ) -> Self {
        let sample_id = format!("{}_{}", barcode, position);
        Self {
            name: sample_id.clone(),
            sample_id,
            barcode,
            position,
            green_idat,
            red_idat,
            sample_type: None,
            sample_sub_type: None,
            gsm_id: None,
            series: None,
        }
    }

    pub fn with_name(
        mut self,
        name: String,
    ) -> Self {
        self.name = name;
        self
    }

    pub fn with_sample_type(
        mut self,
        sample_type: Option<String>,
    ) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn with_sample_sub_type(
        mut self,
        sample_sub_type: Option<String>,
    ) -> Self {
        self.sample_sub_type = sample_sub_type;
        self
    }

    pub fn with_gsm_id(
        mut self,
        gsm_id: Option<String>,
    ) -> Self {
        self.gsm_id = gsm_id;
        self
    }

    pub fn with_series(
        mut self,
        series: Option<String>,
    ) -> Self {
        self.series = series;
        self
    }

    /// Canonical identifier: `{barcode}_{position}`.
    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn barcode(&self) -> &str {
        &self.barcode
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    pub fn green_idat(&self) -> &Path {
        &self.green_idat
    }

    pub fn red_idat(&self) -> &Path {
        &self.red_idat
    }

    pub fn sample_type(&self) -> Option<&str> {
        self.sample_type.as_deref()
    }

    pub fn sample_sub_type(&self) -> Option<&str> {
        self.sample_sub_type.as_deref()
    }

    pub fn gsm_id(&self) -> Option<&str> {
        self.gsm_id.as_deref()
    }

    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }
}

impl std::fmt::Display for Sample {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.sample_id)
    }
}

/// Ordered collection of samples for one run.
///
/// Discovery sorts samples lexicographically by (barcode, position) so batch
/// partitioning is reproducible; the composite builder supplies its own
/// (series, in-series) order instead.
#[derive(Debug, Clone, Default)]
pub struct SampleSheet {
    samples: Vec<Sample>,
}

impl SampleSheet {
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Sorts by (barcode, position). Called by discovery, not by builders
    /// that carry their own deterministic order.
    pub fn sort(&mut self) {
        self.samples.sort_by(|a, b| {
            (a.barcode(), a.position()).cmp(&(b.barcode(), b.position()))
        });
    }

    /// Restricts the sheet to exactly the named subset, preserving sheet
    /// order. A requested name that matches neither a sample name nor a
    /// sample id is an error.
    pub fn filter_names(
        &self,
        names: &[String],
    ) -> Result<SampleSheet> {
        for requested in names {
            let known = self
                .samples
                .iter()
                .any(|s| s.name() == requested || s.sample_id() == requested);
            if !known {
                bail!(MethError::UnknownSample(requested.clone()));
            }
        }
        let samples = self
            .samples
            .iter()
            .filter(|s| {
                names
                    .iter()
                    .any(|n| s.name() == n || s.sample_id() == n)
            })
            .cloned()
            .collect();
        Ok(SampleSheet { samples })
    }

    /// Flat meta-data table for export.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let columns = vec![
            Column::new(
                "Sample_ID".into(),
                self.samples
                    .iter()
                    .map(Sample::sample_id)
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "Sample_Name".into(),
                self.samples.iter().map(Sample::name).collect::<Vec<_>>(),
            ),
            Column::new(
                "Sentrix_ID".into(),
                self.samples
                    .iter()
                    .map(Sample::barcode)
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "Sentrix_Position".into(),
                self.samples
                    .iter()
                    .map(Sample::position)
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "Sample_Type".into(),
                self.samples
                    .iter()
                    .map(|s| s.sample_type().unwrap_or(""))
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "Sample_Sub_Type".into(),
                self.samples
                    .iter()
                    .map(|s| s.sample_sub_type().unwrap_or(""))
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "GSM_ID".into(),
                self.samples
                    .iter()
                    .map(|s| s.gsm_id().unwrap_or(""))
                    .collect::<Vec<_>>(),
            ),
            Column::new(
                "Series".into(),
                self.samples
                    .iter()
                    .map(|s| s.series().unwrap_or(""))
                    .collect::<Vec<_>>(),
            ),
        ];
        DataFrame::new(columns).map_err(Into::into)
    }

    pub fn write_csv(
        &self,
        path: &Path,
    ) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)
            .with_context(|| format!("cannot create sample sheet {}", path.display()))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        Ok(())
    }
}

impl IntoIterator for SampleSheet {
    type IntoIter = std::vec::IntoIter<Sample>;
    type Item = Sample;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}
