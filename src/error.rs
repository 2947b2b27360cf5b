use std::path::PathBuf;

use thiserror::Error;

use crate::data_structs::arrays::ArrayType;

/// Error taxonomy for the processing pipeline.
///
/// Functions return [`anyhow::Result`] throughout the crate; variants of this
/// enum are raised where a caller may need to distinguish the failure class
/// (the orchestrator matches on [`MethError::CorruptIdat`] and
/// [`MethError::ChannelMismatch`] to apply the corrupt-sample policy).
#[derive(Error, Debug)]
pub enum MethError {
    /// Bad or missing manifest, invalid precision choice, unusable output
    /// directory. Fatal, no partial output.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A directory mixes IDAT files from more than one array platform.
    /// Always a hard stop, never a warning.
    #[error("multiple array types detected in one directory: {}", format_groups(.groups))]
    AmbiguousArrayType {
        groups: Vec<(ArrayType, Vec<PathBuf>)>,
    },

    /// A sample sheet entry has no matching IDAT pair on disk.
    #[error("sample sheet entry '{sample}' does not resolve to an idat pair under {dir}")]
    SampleSheetMismatch { sample: String, dir: PathBuf },

    /// A requested sample name is absent from the sheet.
    #[error("sample '{0}' is not present in the sample sheet")]
    UnknownSample(String),

    /// IDAT header or section validation failed.
    #[error("corrupt idat file {path}: {reason}")]
    CorruptIdat { path: PathBuf, reason: String },

    /// The green and red files of one sample disagree on probe count.
    #[error("channel mismatch for sample '{sample}': green has {green} addresses, red has {red}")]
    ChannelMismatch {
        sample: String,
        green: usize,
        red: usize,
    },

    /// The composite filter retained zero samples across all series.
    #[error("composite filter retained no samples across {n_series} series")]
    EmptyComposite { n_series: usize },
}

fn format_groups(groups: &[(ArrayType, Vec<PathBuf>)]) -> String {
    groups
        .iter()
        .map(|(array, files)| format!("{} ({} files)", array, files.len()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_message_lists_groups() {
        let err = MethError::AmbiguousArrayType {
            groups: vec![
                (ArrayType::Illumina450k, vec![PathBuf::from("a_Grn.idat")]),
                (ArrayType::IlluminaEpic, vec![
                    PathBuf::from("b_Grn.idat"),
                    PathBuf::from("c_Grn.idat"),
                ]),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("450k (1 files)"));
        assert!(msg.contains("epic (2 files)"));
    }

    #[test]
    fn corrupt_idat_names_file() {
        let err = MethError::CorruptIdat {
            path: PathBuf::from("bad.idat"),
            reason: "wrong magic".into(),
        };
        assert!(err.to_string().contains("bad.idat"));
    }
}
