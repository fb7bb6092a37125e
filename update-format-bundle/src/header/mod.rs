//! The fixed-layout header family of update bundles.
//!
//! Every bundle opens with a four-byte magic number that selects one of a
//! handful of header layouts; all multi-byte integers are little-endian and
//! reserved bytes are written as zero and ignored on read.

mod error;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

use std::fmt;
use std::io::{Read, Write};
use std::str;

use crate::device::{Board, Device, Platform};

pub const MAGIC_NUMBER_LENGTH: usize = 4;
pub const MD5_HEX_LENGTH: usize = 32;

/// Size of the signature and OTA V1 header blocks.
pub const HEADER_BLOCK_SIZE: usize = 64;

/// Size of the legacy recovery header block.
pub const RECOVERY_BLOCK_SIZE: usize = 131_072;

pub const GZIP_MAGIC: [u8; MAGIC_NUMBER_LENGTH] = [0x1F, 0x8B, 0x08, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleVersion {
    UpdateSignature,
    OTAUpdateV1,
    OTAUpdateV2,
    RecoveryUpdate,
    RecoveryUpdateV2,
    UserDataPackage,
    Unknown,
}

pub fn get_bundle_version(magic_number: &[u8; MAGIC_NUMBER_LENGTH]) -> BundleVersion {
    match magic_number {
        b"FB01" | b"FB02" => BundleVersion::RecoveryUpdate,
        b"FB03" => BundleVersion::RecoveryUpdateV2,
        b"FC02" | b"FD03" => BundleVersion::OTAUpdateV1,
        b"FC04" | b"FD04" | b"FL01" => BundleVersion::OTAUpdateV2,
        b"SP01" => BundleVersion::UpdateSignature,
        m if *m == GZIP_MAGIC => BundleVersion::UserDataPackage,
        _ => BundleVersion::Unknown,
    }
}

impl BundleVersion {
    pub fn label(self) -> &'static str {
        match self {
            BundleVersion::UpdateSignature => "Signature",
            BundleVersion::OTAUpdateV1 => "OTA V1",
            BundleVersion::OTAUpdateV2 => "OTA V2",
            BundleVersion::RecoveryUpdate => "Recovery",
            BundleVersion::RecoveryUpdateV2 => "Recovery V2",
            BundleVersion::UserDataPackage => "Userdata",
            BundleVersion::Unknown => "Unknown",
        }
    }

    /// The magic number used when the caller does not override it.
    pub fn default_magic(self) -> Option<[u8; MAGIC_NUMBER_LENGTH]> {
        match self {
            BundleVersion::UpdateSignature => Some(*b"SP01"),
            BundleVersion::OTAUpdateV1 => Some(*b"FC02"),
            BundleVersion::OTAUpdateV2 => Some(*b"FC04"),
            BundleVersion::RecoveryUpdate => Some(*b"FB02"),
            BundleVersion::RecoveryUpdateV2 => Some(*b"FB03"),
            BundleVersion::UserDataPackage | BundleVersion::Unknown => None,
        }
    }
}

/// The on-device update filename family the magic belongs to.
pub fn describe_magic(magic_number: &[u8; MAGIC_NUMBER_LENGTH]) -> &'static str {
    match magic_number {
        b"FB02" => "(Fullbin [signed?])",
        b"FB03" => "(Fullbin [OTA?, fwo?])",
        m if m.starts_with(b"FB") => "(Fullbin)",
        m if m.starts_with(b"FC") => "(OTA [ota])",
        m if m.starts_with(b"FD") => "(Versionless [vls])",
        m if m.starts_with(b"FL") => "(Language [lang])",
        m if m.starts_with(b"SP") => "(Signing Envelope)",
        m if *m == GZIP_MAGIC => "(Userdata tarball)",
        _ => "Unknown",
    }
}

fn certificate_file(certificate_number: u16) -> &'static str {
    match certificate_number {
        0x00 => "pubdevkey01.pem (Developer)",
        0x01 => "pubprodkey01.pem (Official 1K)",
        0x02 => "pubprodkey02.pem (Official 2K)",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone)]
pub struct SignatureHeader {
    pub magic_number: [u8; MAGIC_NUMBER_LENGTH],
    pub certificate_number: u8,
}

#[derive(Debug, Clone)]
pub struct OtaV1Header {
    pub magic_number: [u8; MAGIC_NUMBER_LENGTH],
    pub source_revision: u32,
    pub target_revision: u32,
    pub device: u16,
    pub optional: u8,
    pub md5_sum: String,
}

#[derive(Debug, Clone)]
pub struct OtaV2Header {
    pub magic_number: [u8; MAGIC_NUMBER_LENGTH],
    pub md5_sum: String,
    pub source_revision: u64,
    pub target_revision: u64,
    pub devices: Vec<u16>,
    pub certificate_number: u16,
    pub critical: u8,
    pub metastrings: Vec<String>,
}

/// Recovery headers address either a single device (the original layout) or
/// a platform/board pair (header revision >= 2).
#[derive(Debug, Clone)]
pub enum RecoveryTarget {
    Device(u32),
    Platform { platform: u32, header_rev: u32, board: u32 },
}

#[derive(Debug, Clone)]
pub struct RecoveryHeader {
    pub magic_number: [u8; MAGIC_NUMBER_LENGTH],
    pub md5_sum: String,
    pub magic_1: u32,
    pub magic_2: u32,
    pub minor: u32,
    pub target: RecoveryTarget,
}

#[derive(Debug, Clone)]
pub struct RecoveryV2Header {
    pub magic_number: [u8; MAGIC_NUMBER_LENGTH],
    pub header_rev: u32,
    pub magic_1: u32,
    pub magic_2: u32,
    pub minor: u32,
    pub target_revision: u64,
    pub platform: u32,
    pub board: u32,
    pub devices: Vec<u16>,
    pub md5_sum: String,
}

#[derive(Debug, Clone)]
pub enum UpdateHeader {
    Signature(SignatureHeader),
    OtaV1(OtaV1Header),
    OtaV2(OtaV2Header),
    Recovery(RecoveryHeader),
    RecoveryV2(RecoveryV2Header),
    UserData,
    Unknown([u8; MAGIC_NUMBER_LENGTH]),
}

impl UpdateHeader {
    pub fn version(&self) -> BundleVersion {
        match self {
            UpdateHeader::Signature(_) => BundleVersion::UpdateSignature,
            UpdateHeader::OtaV1(_) => BundleVersion::OTAUpdateV1,
            UpdateHeader::OtaV2(_) => BundleVersion::OTAUpdateV2,
            UpdateHeader::Recovery(_) => BundleVersion::RecoveryUpdate,
            UpdateHeader::RecoveryV2(_) => BundleVersion::RecoveryUpdateV2,
            UpdateHeader::UserData => BundleVersion::UserDataPackage,
            UpdateHeader::Unknown(_) => BundleVersion::Unknown,
        }
    }

    pub fn magic_number(&self) -> [u8; MAGIC_NUMBER_LENGTH] {
        match self {
            UpdateHeader::Signature(h) => h.magic_number,
            UpdateHeader::OtaV1(h) => h.magic_number,
            UpdateHeader::OtaV2(h) => h.magic_number,
            UpdateHeader::Recovery(h) => h.magic_number,
            UpdateHeader::RecoveryV2(h) => h.magic_number,
            UpdateHeader::UserData => GZIP_MAGIC,
            UpdateHeader::Unknown(magic) => *magic,
        }
    }

    /// The MD5 the body must hash to, for the variants that carry one.
    pub fn md5_sum(&self) -> Option<&str> {
        match self {
            UpdateHeader::OtaV1(h) => Some(h.md5_sum.as_str()),
            UpdateHeader::OtaV2(h) => Some(h.md5_sum.as_str()),
            UpdateHeader::Recovery(h) => Some(h.md5_sum.as_str()),
            UpdateHeader::RecoveryV2(h) => Some(h.md5_sum.as_str()),
            _ => None,
        }
    }

    /// On-disk size of the header, magic included.
    pub fn encoded_len(&self) -> u64 {
        match self {
            UpdateHeader::Signature(_) | UpdateHeader::OtaV1(_) => HEADER_BLOCK_SIZE as u64,
            UpdateHeader::OtaV2(h) => {
                let meta: usize = h.metastrings.iter().map(|m| 2 + m.len()).sum();
                (60 + 2 * h.devices.len() + meta) as u64
            }
            UpdateHeader::Recovery(_) => RECOVERY_BLOCK_SIZE as u64,
            UpdateHeader::RecoveryV2(h) => (73 + 2 * h.devices.len()) as u64,
            UpdateHeader::UserData => 0,
            UpdateHeader::Unknown(_) => MAGIC_NUMBER_LENGTH as u64,
        }
    }
}

fn le_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn le_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}

fn md5_field(buf: &[u8], off: usize) -> Result<String> {
    str::from_utf8(&buf[off..off + MD5_HEX_LENGTH])
        .map(|s| s.to_string())
        .map_err(|_| Error::InvalidMd5Field)
}

/// Read a bundle header, magic included. Unknown magics and raw gzip
/// streams consume nothing beyond the four peeked bytes.
pub fn read_header<R: Read + ?Sized>(reader: &mut R) -> Result<UpdateHeader> {
    let mut magic_number = [0u8; MAGIC_NUMBER_LENGTH];
    reader.read_exact(&mut magic_number).map_err(Error::ReadMagic)?;
    read_header_after_magic(magic_number, reader)
}

/// Like [`read_header`] for callers that already consumed the magic.
pub fn read_header_after_magic<R: Read + ?Sized>(
    magic_number: [u8; MAGIC_NUMBER_LENGTH],
    reader: &mut R,
) -> Result<UpdateHeader> {
    match get_bundle_version(&magic_number) {
        BundleVersion::UpdateSignature => read_signature(magic_number, reader),
        BundleVersion::OTAUpdateV1 => read_ota_v1(magic_number, reader),
        BundleVersion::OTAUpdateV2 => read_ota_v2(magic_number, reader),
        BundleVersion::RecoveryUpdate => read_recovery(magic_number, reader),
        BundleVersion::RecoveryUpdateV2 => read_recovery_v2(magic_number, reader),
        BundleVersion::UserDataPackage => Ok(UpdateHeader::UserData),
        BundleVersion::Unknown => Ok(UpdateHeader::Unknown(magic_number)),
    }
}

fn read_signature<R: Read + ?Sized>(magic_number: [u8; 4], reader: &mut R) -> Result<UpdateHeader> {
    let mut block = [0u8; HEADER_BLOCK_SIZE - MAGIC_NUMBER_LENGTH];
    reader.read_exact(&mut block).map_err(Error::ReadHeader)?;
    Ok(UpdateHeader::Signature(SignatureHeader {
        magic_number,
        certificate_number: block[0],
    }))
}

fn read_ota_v1<R: Read + ?Sized>(magic_number: [u8; 4], reader: &mut R) -> Result<UpdateHeader> {
    let mut block = [0u8; HEADER_BLOCK_SIZE - MAGIC_NUMBER_LENGTH];
    reader.read_exact(&mut block).map_err(Error::ReadHeader)?;
    Ok(UpdateHeader::OtaV1(OtaV1Header {
        magic_number,
        source_revision: le_u32(&block, 0),
        target_revision: le_u32(&block, 4),
        device: le_u16(&block, 8),
        optional: block[10],
        md5_sum: md5_field(&block, 12)?,
    }))
}

fn read_ota_v2<R: Read + ?Sized>(magic_number: [u8; 4], reader: &mut R) -> Result<UpdateHeader> {
    // md5 + source + target + num_devices
    let mut fixed = [0u8; MD5_HEX_LENGTH + 8 + 8 + 2];
    reader.read_exact(&mut fixed).map_err(Error::ReadHeader)?;
    let md5_sum = md5_field(&fixed, 0)?;
    let source_revision = le_u64(&fixed, 32);
    let target_revision = le_u64(&fixed, 40);
    let num_devices = le_u16(&fixed, 48);

    let mut device_bytes = vec![0u8; num_devices as usize * 2];
    reader.read_exact(&mut device_bytes).map_err(Error::ReadDeviceList)?;
    let devices = device_bytes.chunks_exact(2).map(|c| le_u16(c, 0)).collect();

    // cert + critical + unused + metastring count
    let mut tail = [0u8; 2 + 1 + 1 + 2];
    reader.read_exact(&mut tail).map_err(Error::ReadHeader)?;
    let certificate_number = le_u16(&tail, 0);
    let critical = tail[2];
    let num_meta = le_u16(&tail, 4);

    let mut metastrings = Vec::with_capacity(num_meta as usize);
    for _ in 0..num_meta {
        let mut len_bytes = [0u8; 2];
        reader.read_exact(&mut len_bytes).map_err(Error::ReadMetastring)?;
        let mut meta = vec![0u8; le_u16(&len_bytes, 0) as usize];
        reader.read_exact(&mut meta).map_err(Error::ReadMetastring)?;
        metastrings.push(String::from_utf8_lossy(&meta).into_owned());
    }

    Ok(UpdateHeader::OtaV2(OtaV2Header {
        magic_number,
        md5_sum,
        source_revision,
        target_revision,
        devices,
        certificate_number,
        critical,
        metastrings,
    }))
}

fn read_recovery<R: Read + ?Sized>(magic_number: [u8; 4], reader: &mut R) -> Result<UpdateHeader> {
    let mut block = vec![0u8; RECOVERY_BLOCK_SIZE - MAGIC_NUMBER_LENGTH];
    reader.read_exact(&mut block).map_err(Error::ReadHeader)?;

    // The legacy layout zero-fills the header_rev word, so probing it at
    // its fixed offset is unambiguous.
    let header_rev = le_u32(&block, 60);
    let target = if header_rev >= 2 {
        RecoveryTarget::Platform {
            platform: le_u32(&block, 56),
            header_rev,
            board: le_u32(&block, 64),
        }
    } else {
        RecoveryTarget::Device(le_u32(&block, 56))
    };

    Ok(UpdateHeader::Recovery(RecoveryHeader {
        magic_number,
        md5_sum: md5_field(&block, 12)?,
        magic_1: le_u32(&block, 44),
        magic_2: le_u32(&block, 48),
        minor: le_u32(&block, 52),
        target,
    }))
}

fn read_recovery_v2<R: Read + ?Sized>(magic_number: [u8; 4], reader: &mut R) -> Result<UpdateHeader> {
    // header_rev + unused + magic_1 + magic_2 + minor + target + num_devices
    // + platform + board
    let mut fixed = [0u8; 4 + 1 + 4 + 4 + 4 + 8 + 4 + 4 + 4];
    reader.read_exact(&mut fixed).map_err(Error::ReadHeader)?;
    let num_devices = le_u32(&fixed, 25);
    if num_devices > u16::MAX as u32 {
        return Err(Error::InvalidDeviceCount(num_devices));
    }

    let mut device_bytes = vec![0u8; num_devices as usize * 2];
    reader.read_exact(&mut device_bytes).map_err(Error::ReadDeviceList)?;
    let devices = device_bytes.chunks_exact(2).map(|c| le_u16(c, 0)).collect();

    let mut md5_bytes = [0u8; MD5_HEX_LENGTH];
    reader.read_exact(&mut md5_bytes).map_err(Error::ReadHeader)?;

    Ok(UpdateHeader::RecoveryV2(RecoveryV2Header {
        magic_number,
        header_rev: le_u32(&fixed, 0),
        magic_1: le_u32(&fixed, 5),
        magic_2: le_u32(&fixed, 9),
        minor: le_u32(&fixed, 13),
        target_revision: le_u64(&fixed, 17),
        platform: le_u32(&fixed, 29),
        board: le_u32(&fixed, 33),
        devices,
        md5_sum: md5_field(&md5_bytes, 0)?,
    }))
}

fn check_md5(md5_sum: &str) -> Result<&[u8]> {
    if md5_sum.len() != MD5_HEX_LENGTH {
        return Err(Error::InvalidMd5Length(md5_sum.len()));
    }
    Ok(md5_sum.as_bytes())
}

fn write_zeros<W: Write + ?Sized>(output: &mut W, mut count: usize) -> std::io::Result<()> {
    let zeros = [0u8; 1024];
    while count > 0 {
        let chunk = count.min(zeros.len());
        output.write_all(&zeros[..chunk])?;
        count -= chunk;
    }
    Ok(())
}

/// Serialize a header, returning the number of bytes written.
pub fn write_header<W: Write + ?Sized>(output: &mut W, header: &UpdateHeader) -> Result<u64> {
    match header {
        UpdateHeader::Signature(h) => {
            let mut block = [0u8; HEADER_BLOCK_SIZE];
            block[..4].copy_from_slice(&h.magic_number);
            block[4] = h.certificate_number;
            output.write_all(&block).map_err(Error::WriteHeader)?;
        }
        UpdateHeader::OtaV1(h) => {
            let mut block = [0u8; HEADER_BLOCK_SIZE];
            block[..4].copy_from_slice(&h.magic_number);
            block[4..8].copy_from_slice(&h.source_revision.to_le_bytes());
            block[8..12].copy_from_slice(&h.target_revision.to_le_bytes());
            block[12..14].copy_from_slice(&h.device.to_le_bytes());
            block[14] = h.optional;
            block[16..48].copy_from_slice(check_md5(&h.md5_sum)?);
            output.write_all(&block).map_err(Error::WriteHeader)?;
        }
        UpdateHeader::OtaV2(h) => {
            let mut buf = Vec::with_capacity(header.encoded_len() as usize);
            buf.extend_from_slice(&h.magic_number);
            buf.extend_from_slice(check_md5(&h.md5_sum)?);
            buf.extend_from_slice(&h.source_revision.to_le_bytes());
            buf.extend_from_slice(&h.target_revision.to_le_bytes());
            buf.extend_from_slice(&(h.devices.len() as u16).to_le_bytes());
            for device in &h.devices {
                buf.extend_from_slice(&device.to_le_bytes());
            }
            buf.extend_from_slice(&h.certificate_number.to_le_bytes());
            buf.push(h.critical);
            buf.push(0);
            buf.extend_from_slice(&(h.metastrings.len() as u16).to_le_bytes());
            for meta in &h.metastrings {
                if meta.len() > u16::MAX as usize {
                    return Err(Error::MetastringTooLong(meta.len()));
                }
                buf.extend_from_slice(&(meta.len() as u16).to_le_bytes());
                buf.extend_from_slice(meta.as_bytes());
            }
            output.write_all(&buf).map_err(Error::WriteHeader)?;
        }
        UpdateHeader::Recovery(h) => {
            let mut fixed = [0u8; 72];
            fixed[..4].copy_from_slice(&h.magic_number);
            fixed[16..48].copy_from_slice(check_md5(&h.md5_sum)?);
            fixed[48..52].copy_from_slice(&h.magic_1.to_le_bytes());
            fixed[52..56].copy_from_slice(&h.magic_2.to_le_bytes());
            fixed[56..60].copy_from_slice(&h.minor.to_le_bytes());
            match h.target {
                RecoveryTarget::Device(device) => {
                    fixed[60..64].copy_from_slice(&device.to_le_bytes());
                }
                RecoveryTarget::Platform { platform, header_rev, board } => {
                    fixed[60..64].copy_from_slice(&platform.to_le_bytes());
                    fixed[64..68].copy_from_slice(&header_rev.to_le_bytes());
                    fixed[68..72].copy_from_slice(&board.to_le_bytes());
                }
            }
            output.write_all(&fixed).map_err(Error::WriteHeader)?;
            write_zeros(output, RECOVERY_BLOCK_SIZE - fixed.len()).map_err(Error::WriteHeader)?;
        }
        UpdateHeader::RecoveryV2(h) => {
            let mut buf = Vec::with_capacity(header.encoded_len() as usize);
            buf.extend_from_slice(&h.magic_number);
            buf.extend_from_slice(&h.header_rev.to_le_bytes());
            buf.push(0);
            buf.extend_from_slice(&h.magic_1.to_le_bytes());
            buf.extend_from_slice(&h.magic_2.to_le_bytes());
            buf.extend_from_slice(&h.minor.to_le_bytes());
            buf.extend_from_slice(&h.target_revision.to_le_bytes());
            buf.extend_from_slice(&(h.devices.len() as u32).to_le_bytes());
            buf.extend_from_slice(&h.platform.to_le_bytes());
            buf.extend_from_slice(&h.board.to_le_bytes());
            for device in &h.devices {
                buf.extend_from_slice(&device.to_le_bytes());
            }
            buf.extend_from_slice(check_md5(&h.md5_sum)?);
            output.write_all(&buf).map_err(Error::WriteHeader)?;
        }
        UpdateHeader::UserData => {}
        UpdateHeader::Unknown(_) => {
            return Err(Error::UnsupportedVersion("Unknown"));
        }
    }
    Ok(header.encoded_len())
}

/// Everything needed to build a package, short of the signing key.
#[derive(Debug, Clone)]
pub struct UpdateInformation {
    pub version: BundleVersion,
    pub magic_number: [u8; MAGIC_NUMBER_LENGTH],
    pub source_revision: u64,
    pub target_revision: u64,
    pub magic_1: u32,
    pub magic_2: u32,
    pub minor: u32,
    pub devices: Vec<u16>,
    pub platform: u32,
    pub board: u32,
    pub header_rev: u32,
    pub certificate_number: u16,
    pub optional: u8,
    pub critical: u8,
    pub metastrings: Vec<String>,
}

impl UpdateInformation {
    pub fn new(version: BundleVersion) -> UpdateInformation {
        UpdateInformation {
            version,
            magic_number: version.default_magic().unwrap_or([0u8; MAGIC_NUMBER_LENGTH]),
            source_revision: 0,
            target_revision: match version {
                BundleVersion::OTAUpdateV1 => u32::MAX as u64,
                _ => u64::MAX,
            },
            magic_1: 0,
            magic_2: 0,
            minor: 0,
            devices: Vec::new(),
            platform: 0,
            board: 0,
            header_rev: 0,
            certificate_number: 0,
            optional: 0,
            critical: 0,
            metastrings: Vec::new(),
        }
    }

    fn checked_metastrings(&self) -> Result<Vec<String>> {
        for meta in &self.metastrings {
            if !meta.contains('=') || meta.contains('\0') {
                return Err(Error::InvalidMetastring(meta.clone()));
            }
        }
        Ok(self.metastrings.clone())
    }

    /// Assemble the header for this configuration around the body checksum,
    /// enforcing the per-variant device rules.
    pub fn build_header(&self, md5_sum: &str) -> Result<UpdateHeader> {
        match self.version {
            BundleVersion::UpdateSignature => Ok(UpdateHeader::Signature(SignatureHeader {
                magic_number: self.magic_number,
                certificate_number: self.certificate_number as u8,
            })),
            BundleVersion::OTAUpdateV1 => {
                if self.devices.len() != 1 {
                    return Err(Error::SingleDeviceRequired(self.devices.len()));
                }
                if self.source_revision > u32::MAX as u64 {
                    return Err(Error::RevisionOutOfRange(self.source_revision));
                }
                if self.target_revision > u32::MAX as u64 {
                    return Err(Error::RevisionOutOfRange(self.target_revision));
                }
                Ok(UpdateHeader::OtaV1(OtaV1Header {
                    magic_number: self.magic_number,
                    source_revision: self.source_revision as u32,
                    target_revision: self.target_revision as u32,
                    device: self.devices[0],
                    optional: self.optional,
                    md5_sum: md5_sum.to_string(),
                }))
            }
            BundleVersion::OTAUpdateV2 => {
                if self.devices.is_empty() {
                    return Err(Error::MissingDevices);
                }
                Ok(UpdateHeader::OtaV2(OtaV2Header {
                    magic_number: self.magic_number,
                    md5_sum: md5_sum.to_string(),
                    source_revision: self.source_revision,
                    target_revision: self.target_revision,
                    devices: self.devices.clone(),
                    certificate_number: self.certificate_number,
                    critical: self.critical,
                    metastrings: self.checked_metastrings()?,
                }))
            }
            BundleVersion::RecoveryUpdate => {
                let target = if self.header_rev >= 2 {
                    RecoveryTarget::Platform {
                        platform: self.platform,
                        header_rev: self.header_rev,
                        board: self.board,
                    }
                } else {
                    if self.devices.len() != 1 {
                        return Err(Error::SingleDeviceRequired(self.devices.len()));
                    }
                    RecoveryTarget::Device(self.devices[0] as u32)
                };
                Ok(UpdateHeader::Recovery(RecoveryHeader {
                    magic_number: self.magic_number,
                    md5_sum: md5_sum.to_string(),
                    magic_1: self.magic_1,
                    magic_2: self.magic_2,
                    minor: self.minor,
                    target,
                }))
            }
            BundleVersion::RecoveryUpdateV2 => {
                if self.devices.is_empty() {
                    return Err(Error::MissingDevices);
                }
                Ok(UpdateHeader::RecoveryV2(RecoveryV2Header {
                    magic_number: self.magic_number,
                    header_rev: self.header_rev,
                    magic_1: self.magic_1,
                    magic_2: self.magic_2,
                    minor: self.minor,
                    target_revision: self.target_revision,
                    platform: self.platform,
                    board: self.board,
                    devices: self.devices.clone(),
                    md5_sum: md5_sum.to_string(),
                }))
            }
            BundleVersion::UserDataPackage => Err(Error::UnsupportedVersion("Userdata")),
            BundleVersion::Unknown => Err(Error::UnsupportedVersion("Unknown")),
        }
    }
}

fn fmt_device_line(f: &mut fmt::Formatter<'_>, code: u16) -> fmt::Result {
    writeln!(f, "  - {} (0x{:04X})", Device(code), code)
}

impl fmt::Display for UpdateHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magic_number = self.magic_number();
        writeln!(
            f,
            "{:<14} {} {}",
            "Bundle Magic:",
            String::from_utf8_lossy(&magic_number),
            describe_magic(&magic_number)
        )?;
        writeln!(f, "{:<14} {}", "Bundle Type:", self.version().label())?;
        match self {
            UpdateHeader::Signature(h) => {
                writeln!(f, "{:<14} {}", "Cert Number:", h.certificate_number)?;
                write!(f, "{:<14} {}", "Cert File:", certificate_file(h.certificate_number as u16))
            }
            UpdateHeader::OtaV1(h) => {
                writeln!(f, "{:<14} {}", "MD5 Hash:", h.md5_sum)?;
                writeln!(f, "{:<14} {}", "Minimum OTA:", h.source_revision)?;
                writeln!(f, "{:<14} {}", "Target OTA:", h.target_revision)?;
                writeln!(f, "{:<14} {} (0x{:04X})", "Device:", Device(h.device), h.device)?;
                write!(f, "{:<14} {}", "Optional:", h.optional)
            }
            UpdateHeader::OtaV2(h) => {
                writeln!(f, "{:<14} {}", "MD5 Hash:", h.md5_sum)?;
                writeln!(f, "{:<14} {}", "Minimum OTA:", h.source_revision)?;
                writeln!(f, "{:<14} {}", "Target OTA:", h.target_revision)?;
                writeln!(f, "{:<14} {}", "Cert Number:", h.certificate_number)?;
                writeln!(f, "{:<14} {}", "Cert File:", certificate_file(h.certificate_number))?;
                writeln!(f, "{:<14} {}", "Critical:", h.critical)?;
                writeln!(f, "{:<14} {}", "Device Count:", h.devices.len())?;
                for &code in &h.devices {
                    fmt_device_line(f, code)?;
                }
                write!(f, "{:<14} {}", "Metadata Count:", h.metastrings.len())?;
                for meta in &h.metastrings {
                    write!(f, "\n  - {meta}")?;
                }
                Ok(())
            }
            UpdateHeader::Recovery(h) => {
                writeln!(f, "{:<14} {}", "MD5 Hash:", h.md5_sum)?;
                writeln!(f, "{:<14} {}", "Magic 1:", h.magic_1)?;
                writeln!(f, "{:<14} {}", "Magic 2:", h.magic_2)?;
                writeln!(f, "{:<14} {}", "Minor:", h.minor)?;
                match h.target {
                    RecoveryTarget::Device(device) => {
                        write!(f, "{:<14} {} (0x{:04X})", "Device:", Device(device as u16), device)
                    }
                    RecoveryTarget::Platform { platform, header_rev, board } => {
                        writeln!(f, "{:<14} {}", "Header Rev:", header_rev)?;
                        writeln!(f, "{:<14} {} (0x{:02X})", "Platform:", Platform(platform), platform)?;
                        write!(f, "{:<14} {} (0x{:02X})", "Board:", Board(board), board)
                    }
                }
            }
            UpdateHeader::RecoveryV2(h) => {
                writeln!(f, "{:<14} {}", "Header Rev:", h.header_rev)?;
                writeln!(f, "{:<14} {}", "Magic 1:", h.magic_1)?;
                writeln!(f, "{:<14} {}", "Magic 2:", h.magic_2)?;
                writeln!(f, "{:<14} {}", "Minor:", h.minor)?;
                writeln!(f, "{:<14} {}", "Target OTA:", h.target_revision)?;
                writeln!(f, "{:<14} {} (0x{:02X})", "Platform:", Platform(h.platform), h.platform)?;
                writeln!(f, "{:<14} {} (0x{:02X})", "Board:", Board(h.board), h.board)?;
                writeln!(f, "{:<14} {}", "MD5 Hash:", h.md5_sum)?;
                write!(f, "{:<14} {}", "Device Count:", h.devices.len())?;
                for &code in &h.devices {
                    write!(f, "\n  - {} (0x{:04X})", Device(code), code)?;
                }
                Ok(())
            }
            UpdateHeader::UserData => write!(f, "{:<14} {}", "Content:", "gzipped tarball, no header"),
            UpdateHeader::Unknown(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn round_trip(header: &UpdateHeader) -> (Vec<u8>, UpdateHeader) {
        let mut encoded = Vec::new();
        let written = write_header(&mut encoded, header).unwrap();
        assert_eq!(written, encoded.len() as u64);
        assert_eq!(written, header.encoded_len());
        let decoded = read_header(&mut Cursor::new(&encoded)).unwrap();
        (encoded, decoded)
    }

    #[test]
    fn magic_numbers_dispatch_to_versions() {
        assert_eq!(get_bundle_version(b"FB02"), BundleVersion::RecoveryUpdate);
        assert_eq!(get_bundle_version(b"FB01"), BundleVersion::RecoveryUpdate);
        assert_eq!(get_bundle_version(b"FB03"), BundleVersion::RecoveryUpdateV2);
        assert_eq!(get_bundle_version(b"FC02"), BundleVersion::OTAUpdateV1);
        assert_eq!(get_bundle_version(b"FD03"), BundleVersion::OTAUpdateV1);
        assert_eq!(get_bundle_version(b"FC04"), BundleVersion::OTAUpdateV2);
        assert_eq!(get_bundle_version(b"FD04"), BundleVersion::OTAUpdateV2);
        assert_eq!(get_bundle_version(b"FL01"), BundleVersion::OTAUpdateV2);
        assert_eq!(get_bundle_version(b"SP01"), BundleVersion::UpdateSignature);
        assert_eq!(get_bundle_version(&GZIP_MAGIC), BundleVersion::UserDataPackage);
        assert_eq!(get_bundle_version(b"ZZZZ"), BundleVersion::Unknown);
    }

    #[test]
    fn written_magic_agrees_with_the_version() {
        for version in [
            BundleVersion::UpdateSignature,
            BundleVersion::OTAUpdateV1,
            BundleVersion::OTAUpdateV2,
            BundleVersion::RecoveryUpdate,
            BundleVersion::RecoveryUpdateV2,
        ] {
            let magic = version.default_magic().unwrap();
            assert_eq!(get_bundle_version(&magic), version);
        }
    }

    #[test]
    fn signature_header_round_trips_at_block_size() {
        let header = UpdateHeader::Signature(SignatureHeader {
            magic_number: *b"SP01",
            certificate_number: 2,
        });
        let (encoded, decoded) = round_trip(&header);
        assert_eq!(encoded.len(), HEADER_BLOCK_SIZE);
        // One-byte cert number, everything after it reserved as zero.
        assert_eq!(encoded[4], 2);
        assert!(encoded[5..].iter().all(|&b| b == 0));
        match decoded {
            UpdateHeader::Signature(h) => assert_eq!(h.certificate_number, 2),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn ota_v1_header_round_trips_at_block_size() {
        let header = UpdateHeader::OtaV1(OtaV1Header {
            magic_number: *b"FC02",
            source_revision: 100,
            target_revision: 2000,
            device: 0x0E,
            optional: 1,
            md5_sum: MD5.to_string(),
        });
        let (encoded, decoded) = round_trip(&header);
        assert_eq!(encoded.len(), HEADER_BLOCK_SIZE);
        assert_eq!(&encoded[16..48], MD5.as_bytes());
        match decoded {
            UpdateHeader::OtaV1(h) => {
                assert_eq!(h.source_revision, 100);
                assert_eq!(h.target_revision, 2000);
                assert_eq!(h.device, 0x0E);
                assert_eq!(h.optional, 1);
                assert_eq!(h.md5_sum, MD5);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn ota_v2_header_reemits_identical_bytes() {
        let header = UpdateHeader::OtaV2(OtaV2Header {
            magic_number: *b"FC04",
            md5_sum: MD5.to_string(),
            source_revision: 0,
            target_revision: u64::MAX,
            devices: vec![0x24, 0xD4, 0x201],
            certificate_number: 1,
            critical: 1,
            metastrings: vec!["key=value".to_string(), "other=thing".to_string()],
        });
        let (encoded, decoded) = round_trip(&header);
        let mut reencoded = Vec::new();
        write_header(&mut reencoded, &decoded).unwrap();
        assert_eq!(encoded, reencoded);
        match decoded {
            UpdateHeader::OtaV2(h) => {
                assert_eq!(h.devices.len(), 3);
                assert_eq!(h.metastrings, ["key=value", "other=thing"]);
                assert_eq!(h.certificate_number, 1);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn zero_length_metastring_round_trips() {
        let header = UpdateHeader::OtaV2(OtaV2Header {
            magic_number: *b"FD04",
            md5_sum: MD5.to_string(),
            source_revision: 1,
            target_revision: 2,
            devices: vec![0x24],
            certificate_number: 0,
            critical: 0,
            metastrings: vec![String::new()],
        });
        let (_, decoded) = round_trip(&header);
        match decoded {
            UpdateHeader::OtaV2(h) => assert_eq!(h.metastrings, [""]),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn legacy_recovery_header_addresses_a_device() {
        let header = UpdateHeader::Recovery(RecoveryHeader {
            magic_number: *b"FB02",
            md5_sum: MD5.to_string(),
            magic_1: 7,
            magic_2: 9,
            minor: 3,
            target: RecoveryTarget::Device(0x0E),
        });
        let (encoded, decoded) = round_trip(&header);
        assert_eq!(encoded.len(), RECOVERY_BLOCK_SIZE);
        match decoded {
            UpdateHeader::Recovery(h) => match h.target {
                RecoveryTarget::Device(device) => assert_eq!(device, 0x0E),
                other => panic!("wrong target: {other:?}"),
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn rev2_recovery_header_addresses_a_platform() {
        let header = UpdateHeader::Recovery(RecoveryHeader {
            magic_number: *b"FB02",
            md5_sum: MD5.to_string(),
            magic_1: 1,
            magic_2: 2,
            minor: 0,
            target: RecoveryTarget::Platform {
                platform: 0x07,
                header_rev: 2,
                board: 0x03,
            },
        });
        let (_, decoded) = round_trip(&header);
        match decoded {
            UpdateHeader::Recovery(h) => match h.target {
                RecoveryTarget::Platform { platform, header_rev, board } => {
                    assert_eq!(platform, 0x07);
                    assert_eq!(header_rev, 2);
                    assert_eq!(board, 0x03);
                }
                other => panic!("wrong target: {other:?}"),
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn recovery_v2_header_round_trips() {
        let header = UpdateHeader::RecoveryV2(RecoveryV2Header {
            magic_number: *b"FB03",
            header_rev: 0,
            magic_1: 11,
            magic_2: 22,
            minor: 33,
            target_revision: 44,
            platform: 0x06,
            board: 0x00,
            devices: vec![0x24, 0xD4],
            md5_sum: MD5.to_string(),
        });
        let (encoded, decoded) = round_trip(&header);
        assert_eq!(encoded.len(), 73 + 2 * 2);
        match decoded {
            UpdateHeader::RecoveryV2(h) => {
                assert_eq!(h.devices, [0x24, 0xD4]);
                assert_eq!(h.target_revision, 44);
                assert_eq!(h.platform, 0x06);
                assert_eq!(h.md5_sum, MD5);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_magic_consumes_nothing_past_the_magic() {
        let data = b"ZZZZrest of the stream";
        let mut cursor = Cursor::new(&data[..]);
        let header = read_header(&mut cursor).unwrap();
        assert!(matches!(header, UpdateHeader::Unknown(_)));
        assert_eq!(cursor.position(), MAGIC_NUMBER_LENGTH as u64);
    }

    #[test]
    fn truncated_header_is_an_error() {
        let mut data = Vec::from(&b"FC02"[..]);
        data.extend_from_slice(&[0u8; 10]);
        assert!(read_header(&mut Cursor::new(&data)).is_err());
    }

    #[test]
    fn build_header_enforces_device_rules() {
        let mut info = UpdateInformation::new(BundleVersion::OTAUpdateV1);
        assert!(matches!(info.build_header(MD5), Err(Error::SingleDeviceRequired(0))));
        info.devices = vec![0x0E];
        assert!(info.build_header(MD5).is_ok());
        info.devices = vec![0x0E, 0x23];
        assert!(matches!(info.build_header(MD5), Err(Error::SingleDeviceRequired(2))));

        let mut info = UpdateInformation::new(BundleVersion::OTAUpdateV2);
        assert!(matches!(info.build_header(MD5), Err(Error::MissingDevices)));
        info.devices = vec![0x24];
        assert!(info.build_header(MD5).is_ok());
    }

    #[test]
    fn build_header_rejects_oversized_v1_revisions() {
        let mut info = UpdateInformation::new(BundleVersion::OTAUpdateV1);
        info.devices = vec![0x0E];
        info.target_revision = u64::MAX;
        assert!(matches!(info.build_header(MD5), Err(Error::RevisionOutOfRange(_))));
    }

    #[test]
    fn build_header_rejects_malformed_metastrings() {
        let mut info = UpdateInformation::new(BundleVersion::OTAUpdateV2);
        info.devices = vec![0x24];
        info.metastrings = vec!["no-equals-sign".to_string()];
        assert!(matches!(info.build_header(MD5), Err(Error::InvalidMetastring(_))));
    }

    #[test]
    fn recovery_build_switches_layout_on_header_rev() {
        let mut info = UpdateInformation::new(BundleVersion::RecoveryUpdate);
        info.header_rev = 2;
        info.platform = 0x07;
        info.board = 0x03;
        let header = info.build_header(MD5).unwrap();
        match header {
            UpdateHeader::Recovery(h) => {
                assert!(matches!(h.target, RecoveryTarget::Platform { header_rev: 2, .. }))
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
