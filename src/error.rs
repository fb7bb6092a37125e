use std::path::PathBuf;

use update_format_bundle::{header, sign};

#[derive(Debug)]
pub enum Error {
    OpenFile(PathBuf, std::io::Error),
    CreateTempFile(std::io::Error),
    ReadInput(std::io::Error),
    WriteOutput(std::io::Error),
    ReadMetadata(PathBuf, std::io::Error),
    WalkDirectory(PathBuf, std::io::Error),
    HashPayload(PathBuf, std::io::Error),
    RewindPayload(std::io::Error),
    AppendArchive(std::io::Error),
    FinishArchive(std::io::Error),
    Scramble(std::io::Error),
    Header(header::Error),
    Sign(sign::Error),
    ReadSignature(std::io::Error),
    WriteSignature(std::io::Error),
    WriteBody(std::io::Error),
    Md5Mismatch { expected: String, actual: String },
    UnknownBundle([u8; 4]),
    ExtractArchive(std::io::Error),
    InvalidSerial(String),
    UnknownDevice(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::OpenFile(path, err) => write!(f, "failed to open {}: {err}", path.display()),
            Error::CreateTempFile(err) => write!(f, "failed to create temporary file: {err}"),
            Error::ReadInput(err) => write!(f, "failed to read input: {err}"),
            Error::WriteOutput(err) => write!(f, "failed to write output: {err}"),
            Error::ReadMetadata(path, err) => write!(f, "failed to stat {}: {err}", path.display()),
            Error::WalkDirectory(path, err) => write!(f, "failed to walk directory {}: {err}", path.display()),
            Error::HashPayload(path, err) => write!(f, "failed to hash {}: {err}", path.display()),
            Error::RewindPayload(err) => write!(f, "failed to rewind intermediate file: {err}"),
            Error::AppendArchive(err) => write!(f, "failed to append archive entry: {err}"),
            Error::FinishArchive(err) => write!(f, "failed to finish archive: {err}"),
            Error::Scramble(err) => write!(f, "failed to run the scramble transform: {err}"),
            Error::Header(err) => write!(f, "bad bundle header: {err}"),
            Error::Sign(err) => write!(f, "signing failed: {err}"),
            Error::ReadSignature(err) => write!(f, "failed to read envelope signature: {err}"),
            Error::WriteSignature(err) => write!(f, "failed to write signature: {err}"),
            Error::WriteBody(err) => write!(f, "failed to write package body: {err}"),
            Error::Md5Mismatch { expected, actual } => {
                write!(f, "body MD5 mismatch: header says {expected}, body hashes to {actual}")
            }
            Error::UnknownBundle(magic) => write!(f, "unknown bundle magic: {magic:?}"),
            Error::ExtractArchive(err) => write!(f, "failed to extract archive: {err}"),
            Error::InvalidSerial(serial) => {
                write!(f, "serial number must be 16 characters long (no spaces), got {serial:?}")
            }
            Error::UnknownDevice(code) => write!(f, "unknown device code in serial: {code}"),
        }
    }
}

impl From<header::Error> for Error {
    fn from(err: header::Error) -> Self {
        Error::Header(err)
    }
}

impl From<sign::Error> for Error {
    fn from(err: sign::Error) -> Self {
        Error::Sign(err)
    }
}
