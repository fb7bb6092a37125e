#[derive(Debug)]
pub enum Error {
    ReadMagic(std::io::Error),
    ReadHeader(std::io::Error),
    ReadDeviceList(std::io::Error),
    ReadMetastring(std::io::Error),
    WriteHeader(std::io::Error),
    InvalidMd5Field,
    InvalidMd5Length(usize),
    InvalidDeviceCount(u32),
    MetastringTooLong(usize),
    InvalidMetastring(String),
    SingleDeviceRequired(usize),
    MissingDevices,
    RevisionOutOfRange(u64),
    UnsupportedVersion(&'static str),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ReadMagic(err) => write!(f, "failed to read magic number: {err}"),
            Error::ReadHeader(err) => write!(f, "failed to read header: {err}"),
            Error::ReadDeviceList(err) => write!(f, "failed to read device list: {err}"),
            Error::ReadMetastring(err) => write!(f, "failed to read metastring: {err}"),
            Error::WriteHeader(err) => write!(f, "failed to write header: {err}"),
            Error::InvalidMd5Field => write!(f, "header MD5 field is not valid text"),
            Error::InvalidMd5Length(len) => write!(f, "MD5 checksum must be 32 hex chars, got {len}"),
            Error::InvalidDeviceCount(count) => write!(f, "implausible device count: {count}"),
            Error::MetastringTooLong(len) => write!(f, "metastring of {len} bytes exceeds the length prefix"),
            Error::InvalidMetastring(meta) => write!(f, "metastring must look like key=value without NULs: {meta:?}"),
            Error::SingleDeviceRequired(count) => write!(f, "this bundle type carries exactly one device, got {count}"),
            Error::MissingDevices => write!(f, "this bundle type needs at least one device"),
            Error::RevisionOutOfRange(rev) => write!(f, "revision {rev} does not fit the header field"),
            Error::UnsupportedVersion(label) => write!(f, "cannot build a header for bundle type {label}"),
        }
    }
}
