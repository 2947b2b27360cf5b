//! Processed-matrix persistence: precision-controlled CSV output and
//! batch-fragment concatenation.

use std::fs::File;
use std::io::{
    BufRead,
    BufReader,
    BufWriter,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::str::FromStr;

use anyhow::{
    bail,
    Context,
    Result,
};
use log::debug;

use crate::error::MethError;

/// Numeric width of serialized matrix values.
///
/// Correction arithmetic always runs in `f64`; the width is applied only at
/// the serialization boundary so rounding never compounds across batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    Float64,
    #[default]
    Float32,
    Float16,
}

impl Precision {
    /// Quantizes a value to the chosen width, returning it as `f64`.
    ///
    /// Half precision is emulated by rounding to the nearest representable
    /// half-float step and saturating at the half-float maximum (65504).
    pub fn quantize(
        &self,
        value: f64,
    ) -> f64 {
        match self {
            Precision::Float64 => value,
            Precision::Float32 => value as f32 as f64,
            Precision::Float16 => quantize_half(value),
        }
    }

    pub fn format(
        &self,
        value: f64,
    ) -> String {
        let quantized = self.quantize(value);
        if quantized.is_nan() {
            return String::from("NaN");
        }
        match self {
            Precision::Float64 => format!("{}", quantized),
            Precision::Float32 => format!("{}", quantized as f32),
            Precision::Float16 => format!("{}", quantized as f32),
        }
    }
}

impl FromStr for Precision {
    type Err = MethError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "float64" => Ok(Precision::Float64),
            "float32" => Ok(Precision::Float32),
            "float16" => Ok(Precision::Float16),
            other => Err(MethError::Configuration(format!(
                "invalid precision '{}' (must be one of: float64, float32, float16)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Precision::Float64 => write!(f, "float64"),
            Precision::Float32 => write!(f, "float32"),
            Precision::Float16 => write!(f, "float16"),
        }
    }
}

const HALF_MAX: f64 = 65504.0;

/// Rounds to the nearest IEEE 754 half-precision representable value,
/// saturating instead of overflowing to infinity.
fn quantize_half(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    if value.abs() > HALF_MAX {
        return HALF_MAX.copysign(value);
    }
    let exponent = value.abs().log2().floor() as i32;
    // Half floats carry 10 explicit mantissa bits; exponents below the
    // normal range fall back to the fixed subnormal step.
    let step = if exponent < -14 {
        2f64.powi(-24)
    } else {
        2f64.powi(exponent - 10)
    };
    (value / step).round() * step
}

/// Samples x probes matrix, accumulated batch-by-batch. Rows are appended as
/// batches complete and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ProcessedMatrix {
    probe_ids: Vec<String>,
    sample_ids: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl ProcessedMatrix {
    pub fn new(probe_ids: Vec<String>) -> Self {
        Self {
            probe_ids,
            sample_ids: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(
        &mut self,
        sample_id: String,
        values: Vec<f64>,
    ) -> Result<()> {
        if values.len() != self.probe_ids.len() {
            bail!(
                "row for '{}' has {} values, expected {}",
                sample_id,
                values.len(),
                self.probe_ids.len()
            );
        }
        self.sample_ids.push(sample_id);
        self.rows.push(values);
        Ok(())
    }

    pub fn probe_ids(&self) -> &[String] {
        &self.probe_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.probe_ids.len()
    }

    pub fn get(
        &self,
        row: usize,
        col: usize,
    ) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Writes the matrix as CSV (`Sample_ID` + one column per probe) and
    /// flushes before returning, since fragments are the recovery point on
    /// failure.
    pub fn write_csv(
        &self,
        path: &Path,
        precision: Precision,
    ) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));

        let mut header = Vec::with_capacity(self.probe_ids.len() + 1);
        header.push("Sample_ID".to_string());
        header.extend(self.probe_ids.iter().cloned());
        writer.write_record(&header)?;

        for (sample_id, row) in self.sample_ids.iter().zip(self.rows.iter()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(sample_id.clone());
            record.extend(row.iter().map(|v| precision.format(*v)));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        debug!(
            "wrote {} ({} x {})",
            path.display(),
            self.n_rows(),
            self.n_cols()
        );
        Ok(())
    }

    /// Reads a matrix back from its CSV form.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open matrix {}", path.display()))?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));

        let headers = reader.headers()?.clone();
        if headers.is_empty() || &headers[0] != "Sample_ID" {
            bail!("{}: not a processed matrix (missing Sample_ID header)", path.display());
        }
        let probe_ids = headers
            .iter()
            .skip(1)
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut matrix = Self::new(probe_ids);
        for record in reader.records() {
            let record = record?;
            let sample_id = record
                .get(0)
                .context("matrix row without sample id")?
                .to_string();
            let values = record
                .iter()
                .skip(1)
                .map(|v| {
                    if v == "NaN" || v.is_empty() {
                        Ok(f64::NAN)
                    } else {
                        v.parse::<f64>()
                            .with_context(|| format!("bad matrix value '{}'", v))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            matrix.push_row(sample_id, values)?;
        }
        Ok(matrix)
    }
}

/// Concatenates batch fragments into one matrix file, keeping the header of
/// the first fragment only. Fragment order defines row order; the fragments
/// themselves are left untouched.
pub fn merge_fragments(
    fragments: &[PathBuf],
    dest: &Path,
) -> Result<()> {
    if fragments.is_empty() {
        bail!("no fragments to merge into {}", dest.display());
    }

    let file = File::create(dest)
        .with_context(|| format!("cannot create {}", dest.display()))?;
    let mut writer = BufWriter::new(file);

    for (index, fragment) in fragments.iter().enumerate() {
        let reader = BufReader::new(
            File::open(fragment)
                .with_context(|| format!("cannot open fragment {}", fragment.display()))?,
        );
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if index > 0 && line_no == 0 {
                continue;
            }
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
    }

    writer.flush()?;
    debug!("merged {} fragment(s) into {}", fragments.len(), dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("float64", Precision::Float64)]
    #[case("float32", Precision::Float32)]
    #[case("float16", Precision::Float16)]
    #[case("FLOAT16", Precision::Float16)]
    fn precision_parsing(
        #[case] token: &str,
        #[case] expected: Precision,
    ) {
        assert_eq!(token.parse::<Precision>().unwrap(), expected);
        assert_eq!(expected.to_string().parse::<Precision>().unwrap(), expected);
    }

    #[test]
    fn invalid_precision_rejected() {
        assert!("float8".parse::<Precision>().is_err());
        assert!("double".parse::<Precision>().is_err());
    }

    #[test]
    fn half_quantization_steps() {
        // 1.0 and 0.5 are exactly representable.
        assert_eq!(quantize_half(1.0), 1.0);
        assert_eq!(quantize_half(0.5), 0.5);
        // Near 1.0 the half step is 2^-10.
        let q = quantize_half(1.0 + 1.0 / 4096.0);
        assert_approx_eq!(q, 1.0, 1e-3);
        // Saturation instead of infinity.
        assert_eq!(quantize_half(1e6), HALF_MAX);
        assert_eq!(quantize_half(-1e6), -HALF_MAX);
        // NaN passes through.
        assert!(quantize_half(f64::NAN).is_nan());
    }

    #[test]
    fn float32_quantization_narrows() {
        let v = 0.123_456_789_123_456_78_f64;
        let q = Precision::Float32.quantize(v);
        assert_eq!(q, v as f32 as f64);
        assert_ne!(q, v);
        assert_eq!(Precision::Float64.quantize(v), v);
    }

    #[test]
    fn matrix_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("betas.csv");

        let mut matrix = ProcessedMatrix::new(vec!["cg01".into(), "cg02".into()]);
        matrix.push_row("s1".into(), vec![0.25, f64::NAN])?;
        matrix.push_row("s2".into(), vec![0.75, 1.0])?;
        matrix.write_csv(&path, Precision::Float64)?;

        let read = ProcessedMatrix::read_csv(&path)?;
        assert_eq!(read.n_rows(), 2);
        assert_eq!(read.probe_ids(), matrix.probe_ids());
        assert_eq!(read.get(0, 0), Some(0.25));
        assert!(read.get(0, 1).unwrap().is_nan());
        Ok(())
    }

    #[test]
    fn row_width_checked() {
        let mut matrix = ProcessedMatrix::new(vec!["cg01".into()]);
        assert!(matrix.push_row("s1".into(), vec![0.1, 0.2]).is_err());
    }

    #[test]
    fn fragment_merge_keeps_single_header() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frag_a = dir.path().join("b0.csv");
        let frag_b = dir.path().join("b1.csv");
        let dest = dir.path().join("final.csv");

        let mut a = ProcessedMatrix::new(vec!["cg01".into()]);
        a.push_row("s1".into(), vec![0.1])?;
        a.write_csv(&frag_a, Precision::Float64)?;

        let mut b = ProcessedMatrix::new(vec!["cg01".into()]);
        b.push_row("s2".into(), vec![0.2])?;
        b.write_csv(&frag_b, Precision::Float64)?;

        merge_fragments(&[frag_a, frag_b], &dest)?;
        let merged = ProcessedMatrix::read_csv(&dest)?;
        assert_eq!(merged.sample_ids(), &["s1".to_string(), "s2".to_string()]);
        Ok(())
    }
}
