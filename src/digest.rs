//! Digest functions behind hash, HMAC and checksum relations.

use crc::{Crc, CRC_16_ARC, CRC_16_DNP, CRC_16_IBM_3740, CRC_16_KERMIT};
use hmac::digest::{InvalidLength, KeyInit};
use hmac::{Hmac, Mac};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

const CRC16_ARC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);
const CRC16_DNP: Crc<u16> = Crc::<u16>::new(&CRC_16_DNP);
const CRC16_KERMIT: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);
const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

const SICK_POLY: u16 = 0x8005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => HashAlgorithm::Md5,
            "sha1" => HashAlgorithm::Sha1,
            "sha224" => HashAlgorithm::Sha224,
            "sha256" => HashAlgorithm::Sha256,
            "sha384" => HashAlgorithm::Sha384,
            "sha512" => HashAlgorithm::Sha512,
            _ => return None,
        })
    }

    pub fn output_bits(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 128,
            HashAlgorithm::Sha1 => 160,
            HashAlgorithm::Sha224 => 224,
            HashAlgorithm::Sha256 => 256,
            HashAlgorithm::Sha384 => 384,
            HashAlgorithm::Sha512 => 512,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Md5 => Md5::digest(data).to_vec(),
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HmacAlgorithm {
    Md5,
    Sha1,
    /// HMAC-SHA1 truncated to 96 bits.
    Sha1_96,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

fn keyed<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
    let mut mac = <M as KeyInit>::new_from_slice(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl HmacAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => HmacAlgorithm::Md5,
            "sha1" => HmacAlgorithm::Sha1,
            "sha1_96" | "sha196" => HmacAlgorithm::Sha1_96,
            "sha224" => HmacAlgorithm::Sha224,
            "sha256" => HmacAlgorithm::Sha256,
            "sha384" => HmacAlgorithm::Sha384,
            "sha512" => HmacAlgorithm::Sha512,
            _ => return None,
        })
    }

    pub fn output_bits(self) -> usize {
        match self {
            HmacAlgorithm::Md5 => 128,
            HmacAlgorithm::Sha1 => 160,
            HmacAlgorithm::Sha1_96 => 96,
            HmacAlgorithm::Sha224 => 224,
            HmacAlgorithm::Sha256 => 256,
            HmacAlgorithm::Sha384 => 384,
            HmacAlgorithm::Sha512 => 512,
        }
    }

    pub fn mac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, InvalidLength> {
        match self {
            HmacAlgorithm::Md5 => keyed::<Hmac<Md5>>(key, data),
            HmacAlgorithm::Sha1 => keyed::<Hmac<Sha1>>(key, data),
            HmacAlgorithm::Sha1_96 => keyed::<Hmac<Sha1>>(key, data).map(|mut out| {
                out.truncate(12);
                out
            }),
            HmacAlgorithm::Sha224 => keyed::<Hmac<Sha224>>(key, data),
            HmacAlgorithm::Sha256 => keyed::<Hmac<Sha256>>(key, data),
            HmacAlgorithm::Sha384 => keyed::<Hmac<Sha384>>(key, data),
            HmacAlgorithm::Sha512 => keyed::<Hmac<Sha512>>(key, data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// CRC-16/ARC.
    Crc16,
    Crc16Dnp,
    Crc16Kermit,
    Crc16Sick,
    /// CRC-16/CCITT-FALSE (IBM-3740).
    CrcCcitt,
    Crc32,
    /// RFC 1071 one's complement sum, as used by IP, ICMP, UDP and TCP.
    Internet,
}

impl ChecksumAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "crc16" | "crc16arc" => ChecksumAlgorithm::Crc16,
            "crc16dnp" => ChecksumAlgorithm::Crc16Dnp,
            "crc16kermit" => ChecksumAlgorithm::Crc16Kermit,
            "crc16sick" => ChecksumAlgorithm::Crc16Sick,
            "crcccitt" => ChecksumAlgorithm::CrcCcitt,
            "crc32" => ChecksumAlgorithm::Crc32,
            "internet" | "internetchecksum" => ChecksumAlgorithm::Internet,
            _ => return None,
        })
    }

    pub fn width_bits(self) -> usize {
        match self {
            ChecksumAlgorithm::Crc32 => 32,
            _ => 16,
        }
    }

    pub fn compute(self, data: &[u8]) -> u64 {
        match self {
            ChecksumAlgorithm::Crc16 => CRC16_ARC.checksum(data) as u64,
            ChecksumAlgorithm::Crc16Dnp => CRC16_DNP.checksum(data) as u64,
            ChecksumAlgorithm::Crc16Kermit => CRC16_KERMIT.checksum(data) as u64,
            ChecksumAlgorithm::Crc16Sick => crc16_sick(data) as u64,
            ChecksumAlgorithm::CrcCcitt => CRC_CCITT.checksum(data) as u64,
            ChecksumAlgorithm::Crc32 => crc32fast::hash(data) as u64,
            ChecksumAlgorithm::Internet => internet_checksum(data) as u64,
        }
    }
}

/// CRC-16/SICK: each step mixes in the previous byte; the result is byte-swapped.
fn crc16_sick(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    let mut prev: u16 = 0;
    for &byte in data {
        let current = byte as u16;
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ SICK_POLY
        } else {
            crc << 1
        };
        crc ^= current | (prev << 8);
        prev = current;
    }
    crc.swap_bytes()
}

/// RFC 1071. Odd-length input is padded with a zero byte.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += word as u32;
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn crc16_check_values() {
        assert_eq!(ChecksumAlgorithm::Crc16.compute(CHECK), 0xBB3D);
        assert_eq!(ChecksumAlgorithm::Crc16Dnp.compute(CHECK), 0xEA82);
        assert_eq!(ChecksumAlgorithm::Crc16Kermit.compute(CHECK), 0x2189);
        assert_eq!(ChecksumAlgorithm::CrcCcitt.compute(CHECK), 0x29B1);
        assert_eq!(ChecksumAlgorithm::Crc16Sick.compute(CHECK), 0x56A6);
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(ChecksumAlgorithm::Crc32.compute(CHECK), 0xCBF4_3926);
    }

    #[test]
    fn internet_checksum_rfc1071_example() {
        let data = [0x00, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7];
        assert_eq!(internet_checksum(&data), 0x220D);
    }

    #[test]
    fn hashes() {
        assert_eq!(
            hex::encode(HashAlgorithm::Md5.digest(&[0xAA, 0xBB])),
            "58cea1f6b2b06520613e09af90dc1c47"
        );
        assert_eq!(
            hex::encode(HashAlgorithm::Sha1.digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(HashAlgorithm::Sha384.digest(b"").len() * 8, HashAlgorithm::Sha384.output_bits());
    }

    #[test]
    fn hmac_vectors() {
        let msg = b"The quick brown fox jumps over the lazy dog";
        let out = HmacAlgorithm::Sha256.mac(b"key", msg).expect("mac");
        assert_eq!(
            hex::encode(out),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
        let out = HmacAlgorithm::Md5.mac(b"key", msg).expect("mac");
        assert_eq!(hex::encode(out), "80070713463e7749b90c2dc24911e275");
        assert_eq!(HmacAlgorithm::Sha1_96.mac(b"key", msg).expect("mac").len(), 12);
    }

    #[test]
    fn names() {
        assert_eq!(HashAlgorithm::from_name("SHA-256"), Some(HashAlgorithm::Sha256));
        assert_eq!(ChecksumAlgorithm::from_name("crc16_kermit"), Some(ChecksumAlgorithm::Crc16Kermit));
        assert_eq!(ChecksumAlgorithm::from_name("adler"), None);
    }
}
