//! Shared fixtures: a synthetic idat writer emitting the same binary layout
//! the parser reads, a small demo manifest covering every probe category,
//! and deterministic intensity generation.
#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{
    Path,
    PathBuf,
};

use anyhow::Result;

pub const IDAT_VERSION: u64 = 3;

const FIELD_ILLUMINA_ID: u16 = 102;
const FIELD_STD_DEV: u16 = 103;
const FIELD_MEAN: u16 = 104;
const FIELD_BARCODE: u16 = 402;
const FIELD_CHIP_TYPE: u16 = 403;
const FIELD_NUM_PROBES: u16 = 1000;

/// Writes a valid idat file with the given addresses and mean intensities.
pub fn write_idat(
    path: &Path,
    ids: &[u32],
    means: &[u16],
    barcode: &str,
    chip_type: &str,
) -> Result<()> {
    assert_eq!(ids.len(), means.len());
    let bytes = idat_bytes(IDAT_VERSION, ids, means, barcode, chip_type);
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Same layout with a caller-chosen version, for failure testing.
pub fn write_idat_with_version(
    path: &Path,
    version: u64,
    ids: &[u32],
    means: &[u16],
) -> Result<()> {
    let bytes = idat_bytes(version, ids, means, "0000", "Demo");
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn idat_bytes(
    version: u64,
    ids: &[u32],
    means: &[u16],
    barcode: &str,
    chip_type: &str,
) -> Vec<u8> {
    let n = ids.len() as u32;
    let sections: Vec<(u16, Vec<u8>)> = vec![
        (FIELD_NUM_PROBES, n.to_le_bytes().to_vec()),
        (
            FIELD_ILLUMINA_ID,
            ids.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ),
        (
            FIELD_MEAN,
            means.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ),
        (FIELD_STD_DEV, vec![0u8; ids.len() * 2]),
        (FIELD_BARCODE, string_bytes(barcode)),
        (FIELD_CHIP_TYPE, string_bytes(chip_type)),
    ];

    let header_len = 4 + 8 + 4 + sections.len() * 10;
    let mut buffer = Vec::with_capacity(header_len + 16);
    buffer.extend_from_slice(b"IDAT");
    buffer.extend_from_slice(&version.to_le_bytes());
    buffer.extend_from_slice(&(sections.len() as u32).to_le_bytes());

    let mut offset = header_len as u64;
    for (code, payload) in &sections {
        buffer.extend_from_slice(&code.to_le_bytes());
        buffer.extend_from_slice(&offset.to_le_bytes());
        offset += payload.len() as u64;
    }
    for (_, payload) in &sections {
        buffer.extend_from_slice(payload);
    }
    buffer
}

fn string_bytes(s: &str) -> Vec<u8> {
    assert!(s.len() < 128, "fixture strings fit one length byte");
    let mut bytes = vec![s.len() as u8];
    bytes.extend_from_slice(s.as_bytes());
    bytes
}

/// Demo manifest addresses. Kept low so idat fixtures stay tiny.
pub const DEMO_ADDRESSES: std::ops::Range<u32> = 0..100;

/// Names of the cg/ch probes in the demo manifest, in manifest order.
/// These are the expected matrix columns.
pub fn demo_probe_names() -> Vec<String> {
    ["cg0001", "cg0002", "cg0003", "cg0004", "ch0001"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Writes a manifest covering Type I (both channels), Type II, non-CpG,
/// SNP and control probes, including the dye normalization families.
pub fn write_demo_manifest(path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(
        file,
        "IlmnID,AddressA_ID,AddressB_ID,Infinium_Design_Type,Color_Channel,Probe_Type,Control_Type"
    )?;
    // Type II probes: one shared address, no channel.
    writeln!(file, "cg0001,10,,II,,cg,")?;
    // Type I green: both states on green, two addresses.
    writeln!(file, "cg0002,20,21,I,Grn,cg,")?;
    // Type I red.
    writeln!(file, "cg0003,30,31,I,Red,cg,")?;
    writeln!(file, "cg0004,40,,II,,cg,")?;
    writeln!(file, "ch0001,50,,II,,ch,")?;
    // SNP probes, excluded from the matrices.
    writeln!(file, "rs0001,60,,II,,rs,")?;
    writeln!(file, "rs0002,62,63,I,Grn,rs,")?;
    // Controls.
    writeln!(file, "neg_0001,70,,,,control,NEGATIVE")?;
    writeln!(file, "norm_a_1,71,,,,control,NORM_A")?;
    writeln!(file, "norm_t_1,72,,,,control,NORM_T")?;
    writeln!(file, "norm_c_1,73,,,,control,NORM_C")?;
    writeln!(file, "norm_g_1,74,,,,control,NORM_G")?;
    Ok(())
}

/// Deterministic intensity for (address, channel, sample seed). Stable
/// across runs so pipeline output can be compared byte for byte.
pub fn intensity(
    address: u32,
    channel_is_green: bool,
    seed: u64,
) -> u16 {
    let channel = if channel_is_green { 53u64 } else { 97u64 };
    (300 + (address as u64 * 37 + seed * 101 + channel) % 3000) as u16
}

/// Writes a green/red idat pair for one sample over the demo address space.
pub fn write_sample_pair(
    dir: &Path,
    barcode: &str,
    position: &str,
    seed: u64,
) -> Result<(PathBuf, PathBuf)> {
    write_sample_pair_with_addresses(dir, barcode, position, seed, DEMO_ADDRESSES)
}

pub fn write_sample_pair_with_addresses(
    dir: &Path,
    barcode: &str,
    position: &str,
    seed: u64,
    addresses: std::ops::Range<u32>,
) -> Result<(PathBuf, PathBuf)> {
    let ids: Vec<u32> = addresses.collect();
    let green_means: Vec<u16> = ids.iter().map(|a| intensity(*a, true, seed)).collect();
    let red_means: Vec<u16> = ids.iter().map(|a| intensity(*a, false, seed)).collect();

    let green = dir.join(format!("{}_{}_Grn.idat", barcode, position));
    let red = dir.join(format!("{}_{}_Red.idat", barcode, position));
    write_idat(&green, &ids, &green_means, barcode, "Demo")?;
    write_idat(&red, &ids, &red_means, barcode, "Demo")?;
    Ok((green, red))
}
