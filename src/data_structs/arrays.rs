use std::fmt::Display;
use std::str::FromStr;

use serde::{
    Deserialize,
    Serialize,
};

/// Supported Illumina methylation array platforms.
///
/// The variant decides probe count, manifest file and channel layout for a
/// run. It is resolved once (explicitly or by autodetection from raw file
/// headers) and is immutable afterwards.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum ArrayType {
    /// HumanMethylation27.
    Illumina27k,
    /// HumanMethylation450.
    Illumina450k,
    /// MethylationEPIC.
    IlluminaEpic,
    /// MethylationEPIC+ (EPIC with added custom probes).
    IlluminaEpicPlus,
    /// Mouse methylation array.
    IlluminaMouse,
}

impl ArrayType {
    /// Infers the platform from the number of addresses in a raw idat file.
    /// Returns `None` for counts outside every known range.
    pub fn from_probe_count(probe_count: usize) -> Option<Self> {
        match probe_count {
            54_000..=56_000 => Some(ArrayType::Illumina27k),
            622_000..=623_000 => Some(ArrayType::Illumina450k),
            1_032_000..=1_033_000 | 1_050_000..=1_053_000 => Some(ArrayType::IlluminaEpic),
            1_103_000..=1_108_000 => Some(ArrayType::IlluminaEpicPlus),
            315_000..=362_000 => Some(ArrayType::IlluminaMouse),
            _ => None,
        }
    }

    /// Canonical manifest file name for this platform.
    pub fn manifest_filename(&self) -> &'static str {
        match self {
            ArrayType::Illumina27k => "hm27_manifest.csv",
            ArrayType::Illumina450k => "hm450_manifest.csv",
            ArrayType::IlluminaEpic => "epic_manifest.csv",
            ArrayType::IlluminaEpicPlus => "epic_plus_manifest.csv",
            ArrayType::IlluminaMouse => "mouse_manifest.csv",
        }
    }
}

impl Display for ArrayType {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ArrayType::Illumina27k => write!(f, "27k"),
            ArrayType::Illumina450k => write!(f, "450k"),
            ArrayType::IlluminaEpic => write!(f, "epic"),
            ArrayType::IlluminaEpicPlus => write!(f, "epic+"),
            ArrayType::IlluminaMouse => write!(f, "mouse"),
        }
    }
}

impl FromStr for ArrayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "27k" => Ok(ArrayType::Illumina27k),
            "450k" => Ok(ArrayType::Illumina450k),
            "epic" => Ok(ArrayType::IlluminaEpic),
            "epic+" | "epicplus" => Ok(ArrayType::IlluminaEpicPlus),
            "mouse" => Ok(ArrayType::IlluminaMouse),
            other => Err(format!(
                "unknown array type '{}' (expected one of: 27k, 450k, epic, epic+, mouse)",
                other
            )),
        }
    }
}

impl Serialize for ArrayType {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer, {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ArrayType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>, {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(serde::de::Error::custom)
    }
}


/// Color channel of one idat file.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum Channel {
    Green,
    Red,
}

impl Channel {
    /// Token used in idat file names (`..._Grn.idat` / `..._Red.idat`).
    pub fn filename_token(&self) -> &'static str {
        match self {
            Channel::Green => "Grn",
            Channel::Red => "Red",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Channel::Green => Channel::Red,
            Channel::Red => Channel::Green,
        }
    }
}

impl Display for Channel {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Channel::Green => write!(f, "Grn"),
            Channel::Red => write!(f, "Red"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grn" | "green" => Ok(Channel::Green),
            "red" => Ok(Channel::Red),
            other => Err(format!("unknown channel token '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_count_detection() {
        assert_eq!(
            ArrayType::from_probe_count(622_399),
            Some(ArrayType::Illumina450k)
        );
        assert_eq!(
            ArrayType::from_probe_count(1_052_641),
            Some(ArrayType::IlluminaEpic)
        );
        assert_eq!(
            ArrayType::from_probe_count(1_105_209),
            Some(ArrayType::IlluminaEpicPlus)
        );
        assert_eq!(
            ArrayType::from_probe_count(55_300),
            Some(ArrayType::Illumina27k)
        );
        assert_eq!(
            ArrayType::from_probe_count(315_639),
            Some(ArrayType::IlluminaMouse)
        );
        assert_eq!(ArrayType::from_probe_count(123), None);
    }

    #[test]
    fn array_type_roundtrip() {
        for array in [
            ArrayType::Illumina27k,
            ArrayType::Illumina450k,
            ArrayType::IlluminaEpic,
            ArrayType::IlluminaEpicPlus,
            ArrayType::IlluminaMouse,
        ] {
            assert_eq!(array.to_string().parse::<ArrayType>().unwrap(), array);
        }
    }

    #[test]
    fn channel_tokens() {
        assert_eq!("Grn".parse::<Channel>().unwrap(), Channel::Green);
        assert_eq!("Red".parse::<Channel>().unwrap(), Channel::Red);
        assert_eq!(Channel::Green.opposite(), Channel::Red);
    }
}
