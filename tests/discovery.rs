use std::io::Write;

use anyhow::Result;
use metharray::error::MethError;
use metharray::io::samplesheet::{
    create_sample_sheet,
    discover,
    find_idat_pairs,
};

mod common;

#[test]
fn pairs_and_sorts_idat_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Deliberately created out of order, and one pair in a nested dir.
    common::write_sample_pair(dir.path(), "200", "R02C01", 1)?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 2)?;
    let nested = dir.path().join("sub");
    std::fs::create_dir(&nested)?;
    common::write_sample_pair(&nested, "100", "R02C01", 3)?;

    let pairs = find_idat_pairs(dir.path())?;
    let keys: Vec<String> = pairs
        .iter()
        .map(|p| format!("{}_{}", p.barcode, p.position))
        .collect();
    assert_eq!(keys, vec!["100_R01C01", "100_R02C01", "200_R02C01"]);
    Ok(())
}

#[test]
fn unpaired_files_are_skipped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 1)?;
    // A lone green file with no red partner.
    common::write_idat(
        &dir.path().join("300_R01C01_Grn.idat"),
        &[1, 2],
        &[3, 4],
        "300",
        "Demo",
    )?;

    let pairs = find_idat_pairs(dir.path())?;
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].barcode, "100");
    Ok(())
}

#[test]
fn gsm_prefix_becomes_sample_name() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ids: Vec<u32> = common::DEMO_ADDRESSES.collect();
    let means = vec![500u16; ids.len()];
    common::write_idat(
        &dir.path().join("GSM12345_100_R01C01_Grn.idat"),
        &ids,
        &means,
        "100",
        "Demo",
    )?;
    common::write_idat(
        &dir.path().join("GSM12345_100_R01C01_Red.idat"),
        &ids,
        &means,
        "100",
        "Demo",
    )?;

    let sheet = discover(dir.path(), None, None, true)?;
    assert_eq!(sheet.len(), 1);
    assert_eq!(sheet.samples()[0].name(), "GSM12345");
    assert_eq!(sheet.samples()[0].gsm_id(), Some("GSM12345"));
    assert_eq!(sheet.samples()[0].sample_id(), "100_R01C01");
    Ok(())
}

#[test]
fn synthesized_sheet_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "200", "R01C01", 1)?;
    common::write_sample_pair(dir.path(), "100", "R08C01", 2)?;
    common::write_sample_pair(dir.path(), "100", "R02C01", 3)?;

    let sheet = discover(dir.path(), None, None, true)?;
    let ids: Vec<_> = sheet
        .iter()
        .map(|s| s.sample_id().to_string())
        .collect();
    assert_eq!(ids, vec!["100_R02C01", "100_R08C01", "200_R01C01"]);
    Ok(())
}

#[test]
fn no_sheet_and_no_synthesis_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 1)?;

    let err = discover(dir.path(), None, None, false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MethError>(),
        Some(MethError::Configuration(_))
    ));
    Ok(())
}

#[test]
fn existing_sheet_with_data_section_is_parsed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 1)?;
    common::write_sample_pair(dir.path(), "100", "R02C01", 2)?;

    let sheet_path = dir.path().join("samplesheet.csv");
    let mut file = std::fs::File::create(&sheet_path)?;
    writeln!(file, "[Header]")?;
    writeln!(file, "Investigator Name,Jane")?;
    writeln!(file, "[Data]")?;
    writeln!(file, "Sample_Name,Sentrix_ID,Sentrix_Position,Sample_Type")?;
    writeln!(file, "first,100,R01C01,blood")?;
    writeln!(file, "second,100,R02C01,tumor")?;

    let sheet = discover(dir.path(), None, None, false)?;
    assert_eq!(sheet.len(), 2);
    assert_eq!(sheet.samples()[0].name(), "first");
    assert_eq!(sheet.samples()[0].sample_type(), Some("blood"));
    assert_eq!(sheet.samples()[1].name(), "second");
    Ok(())
}

#[test]
fn sheet_entry_without_files_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 1)?;

    let sheet_path = dir.path().join("samplesheet.csv");
    let mut file = std::fs::File::create(&sheet_path)?;
    writeln!(file, "Sample_Name,Sentrix_ID,Sentrix_Position")?;
    writeln!(file, "present,100,R01C01")?;
    writeln!(file, "ghost,999,R09C09")?;

    let err = discover(dir.path(), Some(&sheet_path), None, false).unwrap_err();
    match err.downcast_ref::<MethError>() {
        Some(MethError::SampleSheetMismatch { sample, .. }) => {
            assert_eq!(sample, "ghost");
        },
        other => panic!("expected SampleSheetMismatch, got {:?}", other),
    }
    Ok(())
}

#[test]
fn sample_name_filter_restricts_sheet() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 1)?;
    common::write_sample_pair(dir.path(), "100", "R02C01", 2)?;

    let names = vec!["100_R02C01".to_string()];
    let sheet = discover(dir.path(), None, Some(&names), true)?;
    assert_eq!(sheet.len(), 1);
    assert_eq!(sheet.samples()[0].sample_id(), "100_R02C01");

    let unknown = vec!["who".to_string()];
    let err = discover(dir.path(), None, Some(&unknown), true).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MethError>(),
        Some(MethError::UnknownSample(name)) if name.as_str() == "who"
    ));
    Ok(())
}

#[test]
fn multiple_sheet_candidates_fail() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 1)?;
    std::fs::write(dir.path().join("samplesheet.csv"), "Sentrix_ID,Sentrix_Position\n")?;
    std::fs::write(dir.path().join("old_samplesheet.csv"), "Sentrix_ID,Sentrix_Position\n")?;

    let err = discover(dir.path(), None, None, false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MethError>(),
        Some(MethError::Configuration(_))
    ));
    Ok(())
}

#[test]
fn create_sample_sheet_writes_csv() -> Result<()> {
    let dir = tempfile::tempdir()?;
    common::write_sample_pair(dir.path(), "100", "R01C01", 1)?;
    common::write_sample_pair(dir.path(), "100", "R02C01", 2)?;

    let (sheet, path) = create_sample_sheet(
        dir.path(),
        "samplesheet.csv",
        Some("blood".to_string()),
        None,
    )?;
    assert_eq!(sheet.len(), 2);
    assert!(path.is_file());
    assert!(sheet.iter().all(|s| s.sample_type() == Some("blood")));

    // The created sheet is discoverable and consistent with the files.
    let rediscovered = discover(dir.path(), None, None, false)?;
    assert_eq!(rediscovered.len(), 2);
    assert_eq!(rediscovered.samples()[0].sample_type(), Some("blood"));
    Ok(())
}
