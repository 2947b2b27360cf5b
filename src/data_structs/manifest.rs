//! Array manifests: the immutable probe-address layout for one platform.
//!
//! A manifest maps every bead address to its probe, design type and channel
//! assignment. It is loaded once per run and shared read-only by every
//! sample. Manifests are cached on disk per run; obtaining a missing
//! manifest is delegated to an injected [`ManifestFetcher`] so no hidden
//! global download state exists.

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
use hashbrown::HashMap;
use itertools::Itertools;
use log::{
    debug,
    info,
};
use polars::prelude::*;

use crate::data_structs::arrays::{
    ArrayType,
    Channel,
};
use crate::data_structs::sample::SampleSheet;
use crate::error::MethError;
use crate::io::idat::read_idat_probe_count;

/// Probe category from the manifest's `Probe_Type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// CpG methylation probe (`cg`).
    Cpg,
    /// Non-CpG methylation probe (`ch`).
    Ch,
    /// SNP genotyping probe (`rs`). Excluded from the beta/m matrices.
    Snp,
}

/// Infinium chemistry of one probe.
///
/// Type I probes read both signal states from a single channel at two
/// addresses; Type II probes read methylated (green) and unmethylated (red)
/// at one shared address. Confusing the two silently corrupts beta-values,
/// so the distinction is carried explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDesign {
    TypeI(Channel),
    TypeII,
}

#[derive(Debug, Clone)]
pub struct DataProbe {
    pub name: String,
    pub address_a: u32,
    pub address_b: Option<u32>,
    pub design: ProbeDesign,
    pub kind: ProbeKind,
}

#[derive(Debug, Clone)]
pub struct ControlProbe {
    pub name: String,
    pub address: u32,
    pub control_type: String,
}

/// Immutable probe-to-channel mapping for one array platform.
#[derive(Debug, Clone)]
pub struct Manifest {
    array_type: ArrayType,
    probes: Vec<DataProbe>,
    controls: Vec<ControlProbe>,
    n_data_probes: usize,
}

impl Manifest {
    /// Parses a manifest CSV.
    ///
    /// Expected columns: `IlmnID, AddressA_ID, AddressB_ID,
    /// Infinium_Design_Type, Color_Channel, Probe_Type, Control_Type`.
    /// Data rows have `Probe_Type` cg/ch/rs; control rows have `control`.
    pub fn from_file(
        path: &Path,
        array_type: ArrayType,
    ) -> Result<Self> {
        let handle = File::open(path).map_err(|e| {
            MethError::Configuration(format!(
                "cannot open manifest {}: {}",
                path.display(),
                e
            ))
        })?;

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .into_reader_with_file_handle(handle)
            .finish()
            .map_err(|e| {
                MethError::Configuration(format!(
                    "cannot parse manifest {}: {}",
                    path.display(),
                    e
                ))
            })?;

        Self::from_dataframe(df, array_type)
            .with_context(|| format!("while reading manifest {}", path.display()))
    }

    fn from_dataframe(
        df: DataFrame,
        array_type: ArrayType,
    ) -> Result<Self> {
        let names = str_column(&df, "IlmnID")?;
        let address_a = u32_column(&df, "AddressA_ID")?;
        let address_b = u32_column(&df, "AddressB_ID")?;
        let design = str_column(&df, "Infinium_Design_Type")?;
        let channel = str_column(&df, "Color_Channel")?;
        let probe_type = str_column(&df, "Probe_Type")?;
        let control_type = str_column(&df, "Control_Type")?;

        let mut probes = Vec::new();
        let mut controls = Vec::new();

        for row in 0..df.height() {
            let name = names[row]
                .clone()
                .ok_or_else(|| MethError::Configuration(format!("manifest row {}: empty IlmnID", row)))?;
            let kind_token = probe_type[row].clone().unwrap_or_default();

            match kind_token.to_lowercase().as_str() {
                "control" => {
                    let address = address_a[row].ok_or_else(|| {
                        MethError::Configuration(format!(
                            "control probe {}: missing address",
                            name
                        ))
                    })?;
                    controls.push(ControlProbe {
                        name,
                        address,
                        control_type: control_type[row].clone().unwrap_or_default(),
                    });
                },
                kind_str @ ("cg" | "ch" | "rs") => {
                    let kind = match kind_str {
                        "cg" => ProbeKind::Cpg,
                        "ch" => ProbeKind::Ch,
                        _ => ProbeKind::Snp,
                    };
                    let address = address_a[row].ok_or_else(|| {
                        MethError::Configuration(format!("probe {}: missing AddressA_ID", name))
                    })?;
                    let design = match design[row].as_deref() {
                        Some("I") => {
                            let ch: Channel = channel[row]
                                .as_deref()
                                .unwrap_or("")
                                .parse()
                                .map_err(|e| {
                                    MethError::Configuration(format!(
                                        "type I probe {}: {}",
                                        name, e
                                    ))
                                })?;
                            if address_b[row].is_none() {
                                bail!(MethError::Configuration(format!(
                                    "type I probe {}: missing AddressB_ID",
                                    name
                                )));
                            }
                            ProbeDesign::TypeI(ch)
                        },
                        Some("II") => ProbeDesign::TypeII,
                        other => {
                            bail!(MethError::Configuration(format!(
                                "probe {}: unknown design type {:?}",
                                name, other
                            )));
                        },
                    };
                    probes.push(DataProbe {
                        name,
                        address_a: address,
                        address_b: address_b[row],
                        design,
                        kind,
                    });
                },
                other => {
                    bail!(MethError::Configuration(format!(
                        "probe {}: unknown Probe_Type '{}'",
                        name, other
                    )));
                },
            }
        }

        if probes.is_empty() {
            bail!(MethError::Configuration(
                "manifest contains no data probes".to_string()
            ));
        }

        let n_data_probes = probes
            .iter()
            .filter(|p| p.kind != ProbeKind::Snp)
            .count();

        debug!(
            "loaded {} manifest: {} data probes, {} snp probes, {} controls",
            array_type,
            n_data_probes,
            probes.len() - n_data_probes,
            controls.len()
        );

        Ok(Self {
            array_type,
            probes,
            controls,
            n_data_probes,
        })
    }

    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// All non-control probes in manifest order.
    pub fn probes(&self) -> &[DataProbe] {
        &self.probes
    }

    pub fn controls(&self) -> &[ControlProbe] {
        &self.controls
    }

    /// Number of cg/ch probes, i.e. the column count of the output matrices.
    pub fn n_data_probes(&self) -> usize {
        self.n_data_probes
    }

    /// Identifiers of the cg/ch probes in manifest order. These are the
    /// matrix columns, so the order must be deterministic.
    pub fn data_probe_names(&self) -> Vec<String> {
        self.probes
            .iter()
            .filter(|p| p.kind != ProbeKind::Snp)
            .map(|p| p.name.clone())
            .collect()
    }

    /// Control probes of one normalization family, e.g. `NORM_A`.
    pub fn controls_of_type(
        &self,
        control_type: &str,
    ) -> Vec<&ControlProbe> {
        self.controls
            .iter()
            .filter(|c| c.control_type.eq_ignore_ascii_case(control_type))
            .collect()
    }
}

/// Capability to obtain a manifest that is not cached locally. The network
/// transport behind it is an external collaborator; the pipeline only
/// requires this signature.
pub trait ManifestFetcher {
    /// Places the manifest for `array_type` at `dest` and returns the path.
    fn fetch(
        &self,
        array_type: ArrayType,
        dest: &Path,
    ) -> Result<PathBuf>;
}

/// Default fetcher: refuses. Used when a run must be fully offline.
pub struct NoFetcher;

impl ManifestFetcher for NoFetcher {
    fn fetch(
        &self,
        array_type: ArrayType,
        dest: &Path,
    ) -> Result<PathBuf> {
        bail!(MethError::Configuration(format!(
            "manifest for {} is not cached at {} and no fetcher is configured",
            array_type,
            dest.display()
        )))
    }
}

/// Run-scoped manifest cache with fetch-on-miss behavior.
///
/// Explicitly constructed per run; there is no module-level download cache.
pub struct ManifestCache {
    cache_dir: PathBuf,
    fetcher: Box<dyn ManifestFetcher>,
}

impl ManifestCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            fetcher: Box::new(NoFetcher),
        }
    }

    pub fn with_fetcher(
        mut self,
        fetcher: Box<dyn ManifestFetcher>,
    ) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Returns the local manifest path for `array_type`, fetching on miss.
    pub fn obtain(
        &self,
        array_type: ArrayType,
    ) -> Result<PathBuf> {
        let cached = self.cache_dir.join(array_type.manifest_filename());
        if cached.is_file() {
            debug!("using cached manifest {}", cached.display());
            return Ok(cached);
        }
        info!(
            "manifest for {} not cached, delegating to fetcher",
            array_type
        );
        self.fetcher.fetch(array_type, &cached)
    }

    /// Resolves array type and manifest for a run.
    ///
    /// An explicit type skips detection. Otherwise the type is inferred from
    /// the discovered samples' green idat headers; a directory mixing
    /// platforms is a hard stop, never a silent default.
    pub fn resolve(
        &self,
        explicit: Option<ArrayType>,
        manifest_path: Option<&Path>,
        sheet: &SampleSheet,
    ) -> Result<(ArrayType, Manifest)> {
        let array_type = match explicit {
            Some(array_type) => array_type,
            None => detect_array_type(sheet)?,
        };

        let path = match manifest_path {
            Some(path) => path.to_path_buf(),
            None => self.obtain(array_type)?,
        };

        let manifest = Manifest::from_file(&path, array_type)?;
        Ok((array_type, manifest))
    }
}

/// Infers the platform from every sample's green idat probe count.
/// All samples must agree; conflicting groups abort processing.
pub fn detect_array_type(sheet: &SampleSheet) -> Result<ArrayType> {
    if sheet.is_empty() {
        bail!(MethError::Configuration(
            "cannot autodetect array type: no samples discovered".to_string()
        ));
    }

    let mut by_type: HashMap<ArrayType, Vec<PathBuf>> = HashMap::new();
    for sample in sheet.samples() {
        let count = read_idat_probe_count(sample.green_idat())?;
        let inferred = ArrayType::from_probe_count(count).ok_or_else(|| {
            MethError::Configuration(format!(
                "{}: {} addresses match no known array type",
                sample.green_idat().display(),
                count
            ))
        })?;
        by_type
            .entry(inferred)
            .or_default()
            .push(sample.green_idat().to_path_buf());
    }

    if by_type.len() > 1 {
        let groups = by_type
            .into_iter()
            .sorted_by_key(|(array, _)| *array)
            .collect_vec();
        bail!(MethError::AmbiguousArrayType { groups });
    }

    let (array_type, files) = by_type.into_iter().next().unwrap();
    info!(
        "autodetected array type {} from {} idat file(s)",
        array_type,
        files.len()
    );
    Ok(array_type)
}

fn str_column(
    df: &DataFrame,
    name: &str,
) -> Result<Vec<Option<String>>> {
    let col = df
        .column(name)
        .map_err(|_| MethError::Configuration(format!("manifest is missing column '{}'", name)))?
        .cast(&DataType::String)?;
    Ok(col
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::to_string)
                .filter(|s| !s.is_empty())
        })
        .collect())
}

fn u32_column(
    df: &DataFrame,
    name: &str,
) -> Result<Vec<Option<u32>>> {
    let col = df
        .column(name)
        .map_err(|_| MethError::Configuration(format!("manifest is missing column '{}'", name)))?
        .cast(&DataType::UInt32)?;
    Ok(col.u32()?.into_iter().collect())
}
