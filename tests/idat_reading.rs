use std::io::Write;

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use metharray::data_structs::arrays::Channel;
use metharray::error::MethError;
use metharray::io::idat::{
    read_idat_probe_count,
    IdatData,
};

mod common;

#[test]
fn parses_written_idat() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("100_R01C01_Grn.idat");
    let ids = vec![10u32, 20, 30, 40];
    let means = vec![500u16, 600, 700, 800];
    common::write_idat(&path, &ids, &means, "100", "BeadChip")?;

    let idat = IdatData::read(&path, Channel::Green)?;
    assert_eq!(idat.n_probes(), 4);
    assert_eq!(idat.illumina_ids(), ids.as_slice());
    assert_eq!(idat.means(), means.as_slice());
    assert_eq!(idat.barcode(), Some("100"));
    assert_eq!(idat.chip_type(), Some("BeadChip"));
    assert_eq!(idat.channel(), Channel::Green);

    let lookup = idat.mean_by_address();
    assert_eq!(lookup.get(&20), Some(&600));
    assert_eq!(lookup.get(&99), None);
    Ok(())
}

#[test]
fn parses_gzipped_idat() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("100_R01C01_Red.idat.gz");
    let bytes = common::idat_bytes(common::IDAT_VERSION, &[1, 2, 3], &[10, 20, 30], "100", "Demo");

    let mut encoder = GzEncoder::new(std::fs::File::create(&path)?, Compression::default());
    encoder.write_all(&bytes)?;
    encoder.finish()?;

    let idat = IdatData::read(&path, Channel::Red)?;
    assert_eq!(idat.n_probes(), 3);
    assert_eq!(idat.means(), &[10, 20, 30]);
    Ok(())
}

#[test]
fn probe_count_header_only_read() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("100_R01C01_Grn.idat");
    let ids: Vec<u32> = (0..250).collect();
    let means = vec![100u16; 250];
    common::write_idat(&path, &ids, &means, "100", "Demo")?;

    assert_eq!(read_idat_probe_count(&path)?, 250);
    Ok(())
}

#[test]
fn rejects_wrong_magic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad.idat");
    std::fs::write(&path, b"NOPE then some garbage bytes following")?;

    let err = IdatData::read(&path, Channel::Green).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MethError>(),
        Some(MethError::CorruptIdat { .. })
    ));
    assert!(err.to_string().contains("magic"));
    Ok(())
}

#[test]
fn rejects_unsupported_version() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("old.idat");
    common::write_idat_with_version(&path, 1, &[1, 2], &[5, 6])?;

    let err = IdatData::read(&path, Channel::Green).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MethError>(),
        Some(MethError::CorruptIdat { .. })
    ));
    assert!(err.to_string().contains("version"));
    Ok(())
}

#[test]
fn rejects_truncated_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trunc.idat");
    let bytes = common::idat_bytes(common::IDAT_VERSION, &[1, 2, 3, 4], &[5, 6, 7, 8], "100", "Demo");
    std::fs::write(&path, &bytes[..bytes.len() - 6])?;

    let err = IdatData::read(&path, Channel::Green).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MethError>(),
        Some(MethError::CorruptIdat { .. })
    ));
    Ok(())
}

#[test]
fn rejects_missing_file() {
    let err = IdatData::read(std::path::Path::new("/nonexistent/x.idat"), Channel::Red)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MethError>(),
        Some(MethError::CorruptIdat { .. })
    ));
}
