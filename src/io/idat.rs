//! Binary parser for Illumina IDAT intensity files.
//!
//! An idat file holds raw per-address light intensities for one color
//! channel of one physical array. The layout is a fixed magic + version
//! header followed by a directory of (field code, offset) entries pointing
//! at the individual sections. Only the sections the pipeline consumes are
//! materialized; everything else is left on disk.

use std::fs::File;
use std::io::{
    Cursor,
    Read,
    Seek,
    SeekFrom,
};
use std::path::{
    Path,
    PathBuf,
};

use anyhow::Result;
use flate2::read::MultiGzDecoder;
use hashbrown::HashMap;

use crate::data_structs::arrays::Channel;
use crate::error::MethError;

const IDAT_MAGIC: &[u8; 4] = b"IDAT";
const MIN_IDAT_VERSION: u64 = 3;

// Section codes, as assigned by the scanner software.
const FIELD_ILLUMINA_ID: u16 = 102;
const FIELD_STD_DEV: u16 = 103;
const FIELD_MEAN: u16 = 104;
const FIELD_NUM_BEADS: u16 = 107;
const FIELD_BARCODE: u16 = 402;
const FIELD_CHIP_TYPE: u16 = 403;
const FIELD_NUM_PROBES: u16 = 1000;

/// Parsed contents of one idat file. Immutable once read.
#[derive(Debug, Clone)]
pub struct IdatData {
    path: PathBuf,
    channel: Channel,
    n_probes: usize,
    illumina_ids: Vec<u32>,
    means: Vec<u16>,
    std_devs: Option<Vec<u16>>,
    n_beads: Option<Vec<u8>>,
    barcode: Option<String>,
    chip_type: Option<String>,
}

impl IdatData {
    /// Reads and validates one idat file. Gzipped files (`.idat.gz`) are
    /// decompressed transparently.
    pub fn read(
        path: &Path,
        channel: Channel,
    ) -> Result<Self> {
        let bytes = read_file_bytes(path)?;
        let mut cursor = Cursor::new(bytes.as_slice());

        let offsets = read_header(&mut cursor, path)?;

        let n_probes = {
            let offset = require_field(&offsets, FIELD_NUM_PROBES, path)?;
            seek_to(&mut cursor, offset, path)?;
            read_u32(&mut cursor, path)? as usize
        };

        let illumina_ids = {
            let offset = require_field(&offsets, FIELD_ILLUMINA_ID, path)?;
            seek_to(&mut cursor, offset, path)?;
            read_u32_array(&mut cursor, n_probes, path)?
        };

        let means = {
            let offset = require_field(&offsets, FIELD_MEAN, path)?;
            seek_to(&mut cursor, offset, path)?;
            read_u16_array(&mut cursor, n_probes, path)?
        };

        let std_devs = match offsets.get(&FIELD_STD_DEV) {
            Some(&offset) => {
                seek_to(&mut cursor, offset, path)?;
                Some(read_u16_array(&mut cursor, n_probes, path)?)
            },
            None => None,
        };

        let n_beads = match offsets.get(&FIELD_NUM_BEADS) {
            Some(&offset) => {
                seek_to(&mut cursor, offset, path)?;
                Some(read_u8_array(&mut cursor, n_probes, path)?)
            },
            None => None,
        };

        let barcode = match offsets.get(&FIELD_BARCODE) {
            Some(&offset) => {
                seek_to(&mut cursor, offset, path)?;
                Some(read_string(&mut cursor, path)?)
            },
            None => None,
        };

        let chip_type = match offsets.get(&FIELD_CHIP_TYPE) {
            Some(&offset) => {
                seek_to(&mut cursor, offset, path)?;
                Some(read_string(&mut cursor, path)?)
            },
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            channel,
            n_probes,
            illumina_ids,
            means,
            std_devs,
            n_beads,
            barcode,
            chip_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn n_probes(&self) -> usize {
        self.n_probes
    }

    pub fn illumina_ids(&self) -> &[u32] {
        &self.illumina_ids
    }

    pub fn means(&self) -> &[u16] {
        &self.means
    }

    pub fn std_devs(&self) -> Option<&[u16]> {
        self.std_devs.as_deref()
    }

    pub fn n_beads(&self) -> Option<&[u8]> {
        self.n_beads.as_deref()
    }

    pub fn barcode(&self) -> Option<&str> {
        self.barcode.as_deref()
    }

    pub fn chip_type(&self) -> Option<&str> {
        self.chip_type.as_deref()
    }

    /// Address -> mean intensity lookup table.
    pub fn mean_by_address(&self) -> HashMap<u32, u16> {
        self.illumina_ids
            .iter()
            .copied()
            .zip(self.means.iter().copied())
            .collect()
    }
}

/// Reads only the probe count from an idat header. Used by array type
/// autodetection, which must not pay for full section parsing.
pub fn read_idat_probe_count(path: &Path) -> Result<usize> {
    let bytes = read_file_bytes(path)?;
    let mut cursor = Cursor::new(bytes.as_slice());
    let offsets = read_header(&mut cursor, path)?;
    let offset = require_field(&offsets, FIELD_NUM_PROBES, path)?;
    seek_to(&mut cursor, offset, path)?;
    Ok(read_u32(&mut cursor, path)? as usize)
}

fn read_file_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| MethError::CorruptIdat {
        path: path.to_path_buf(),
        reason: format!("cannot open: {}", e),
    })?;

    let mut bytes = Vec::new();
    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    let read_res = if is_gzip {
        MultiGzDecoder::new(file).read_to_end(&mut bytes)
    } else {
        let mut file = file;
        file.read_to_end(&mut bytes)
    };
    read_res.map_err(|e| MethError::CorruptIdat {
        path: path.to_path_buf(),
        reason: format!("read failed: {}", e),
    })?;
    Ok(bytes)
}

/// Validates magic and version, then reads the section directory.
fn read_header(
    cursor: &mut Cursor<&[u8]>,
    path: &Path,
) -> Result<HashMap<u16, u64>> {
    let mut magic = [0u8; 4];
    cursor
        .read_exact(&mut magic)
        .map_err(|_| corrupt(path, "file too short for magic"))?;
    if &magic != IDAT_MAGIC {
        return Err(corrupt(path, "wrong magic (not an IDAT file)").into());
    }

    let version = read_u64(cursor, path)?;
    if version < MIN_IDAT_VERSION {
        return Err(corrupt(
            path,
            &format!("unsupported idat version {} (< {})", version, MIN_IDAT_VERSION),
        )
        .into());
    }

    let n_fields = read_u32(cursor, path)?;
    let mut offsets = HashMap::with_capacity(n_fields as usize);
    for _ in 0..n_fields {
        let code = read_u16(cursor, path)?;
        let offset = read_u64(cursor, path)?;
        offsets.insert(code, offset);
    }
    Ok(offsets)
}

fn require_field(
    offsets: &HashMap<u16, u64>,
    code: u16,
    path: &Path,
) -> Result<u64> {
    offsets
        .get(&code)
        .copied()
        .ok_or_else(|| corrupt(path, &format!("missing required section {}", code)).into())
}

fn seek_to(
    cursor: &mut Cursor<&[u8]>,
    offset: u64,
    path: &Path,
) -> Result<()> {
    if offset > cursor.get_ref().len() as u64 {
        return Err(corrupt(path, &format!("section offset {} beyond end of file", offset)).into());
    }
    cursor
        .seek(SeekFrom::Start(offset))
        .map_err(|e| corrupt(path, &format!("seek failed: {}", e)))?;
    Ok(())
}

fn corrupt(
    path: &Path,
    reason: &str,
) -> MethError {
    MethError::CorruptIdat {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn read_u16(
    cursor: &mut Cursor<&[u8]>,
    path: &Path,
) -> Result<u16> {
    let mut buf = [0u8; 2];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| corrupt(path, "truncated u16"))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(
    cursor: &mut Cursor<&[u8]>,
    path: &Path,
) -> Result<u32> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| corrupt(path, "truncated u32"))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(
    cursor: &mut Cursor<&[u8]>,
    path: &Path,
) -> Result<u64> {
    let mut buf = [0u8; 8];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| corrupt(path, "truncated u64"))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u16_array(
    cursor: &mut Cursor<&[u8]>,
    n: usize,
    path: &Path,
) -> Result<Vec<u16>> {
    let mut buf = vec![0u8; n * 2];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| corrupt(path, "truncated intensity section"))?;
    Ok(buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

fn read_u32_array(
    cursor: &mut Cursor<&[u8]>,
    n: usize,
    path: &Path,
) -> Result<Vec<u32>> {
    let mut buf = vec![0u8; n * 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| corrupt(path, "truncated address section"))?;
    Ok(buf
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn read_u8_array(
    cursor: &mut Cursor<&[u8]>,
    n: usize,
    path: &Path,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| corrupt(path, "truncated bead count section"))?;
    Ok(buf)
}

/// Strings are stored with a LEB128 length prefix followed by UTF-8 bytes.
fn read_string(
    cursor: &mut Cursor<&[u8]>,
    path: &Path,
) -> Result<String> {
    let mut len: usize = 0;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        cursor
            .read_exact(&mut byte)
            .map_err(|_| corrupt(path, "truncated string length"))?;
        len |= ((byte[0] & 0x7f) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 28 {
            return Err(corrupt(path, "string length prefix overflow").into());
        }
    }
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| corrupt(path, "truncated string section"))?;
    String::from_utf8(buf).map_err(|_| corrupt(path, "non-utf8 string section").into())
}
