use std::fs;
use std::fs::File;
use std::io;
use std::io::{Seek, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use tempfile::tempfile;

use update_format_bundle::header;
use update_format_bundle::header::{BundleVersion, SignatureHeader, UpdateHeader, UpdateInformation};
use update_format_bundle::scramble;
use update_format_bundle::sign::KeyStore;

use crate::hash::md5_hex;
use crate::{Error, Result};

/// Name of the bundle index entry appended after the payload.
pub const INDEX_FILE_NAME: &str = "update-filelist.dat";

// Index entry classes: scripts run by the updater vs. plain payload.
const INDEX_TYPE_SCRIPT: u8 = 129;
const INDEX_TYPE_FILE: u8 = 128;

/// How to build one package, short of the signing key.
#[derive(Debug)]
pub struct CreateConfig {
    pub info: UpdateInformation,
    /// Build a fake package: no signature envelope, no scrambling.
    pub fake_sign: bool,
    /// The payload is a plain userdata tarball; sign it raw and skip the
    /// scramble so the envelope MD5 sees canonical bytes.
    pub userdata: bool,
    /// Store paths relative to the command-line root instead of as given.
    pub legacy_paths: bool,
    /// Keep the intermediate archive here after the build.
    pub archive_keep_path: Option<PathBuf>,
}

struct IndexEntry {
    entry_type: u8,
    path: String,
    size: u64,
    md5_sum: String,
    mode: u32,
}

fn is_script(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".ffs") || lower.ends_with(".sh")
}

fn is_tarball(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tgz") || lower.ends_with(".tar.gz")
}

fn archive_path_for(path: &Path, legacy_root: Option<&Path>) -> String {
    let stored = match legacy_root {
        Some(root) => match path.strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => PathBuf::from(path.file_name().unwrap_or_default()),
        },
        None => path.to_path_buf(),
    };
    // Tar entries never carry a leading slash.
    stored.to_string_lossy().trim_start_matches('/').to_string()
}

fn mtime_of(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    index: &mut Vec<IndexEntry>,
    path: &Path,
    archive_path: String,
    keystore: &KeyStore,
) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|err| Error::ReadMetadata(path.to_path_buf(), err))?;
    let mode = metadata.permissions().mode() & 0o7777;
    let mtime = mtime_of(&metadata);

    let mut file = File::open(path).map_err(|err| Error::OpenFile(path.to_path_buf(), err))?;
    let md5_sum = md5_hex(&mut file).map_err(|err| Error::HashPayload(path.to_path_buf(), err))?;
    file.rewind().map_err(Error::RewindPayload)?;
    let signature = keystore.sign_reader(&mut file)?;
    file.rewind().map_err(Error::RewindPayload)?;

    debug!("bundling {} as {} ({} bytes, md5 {})", path.display(), archive_path, metadata.len(), md5_sum);

    let mut entry = tar::Header::new_ustar();
    entry.set_size(metadata.len());
    entry.set_mode(mode);
    entry.set_mtime(mtime);
    builder.append_data(&mut entry, &archive_path, &mut file).map_err(Error::AppendArchive)?;

    let mut sig_entry = tar::Header::new_ustar();
    sig_entry.set_size(signature.len() as u64);
    sig_entry.set_mode(0o644);
    sig_entry.set_mtime(mtime);
    builder
        .append_data(&mut sig_entry, format!("{archive_path}.sig"), signature.as_slice())
        .map_err(Error::AppendArchive)?;

    index.push(IndexEntry {
        entry_type: if is_script(&archive_path) { INDEX_TYPE_SCRIPT } else { INDEX_TYPE_FILE },
        path: archive_path,
        size: metadata.len(),
        md5_sum,
        mode,
    });

    Ok(())
}

fn add_path<W: Write>(
    builder: &mut tar::Builder<W>,
    index: &mut Vec<IndexEntry>,
    path: &Path,
    legacy_root: Option<&Path>,
    keystore: &KeyStore,
) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|err| Error::ReadMetadata(path.to_path_buf(), err))?;
    if metadata.is_dir() {
        let entries = fs::read_dir(path).map_err(|err| Error::WalkDirectory(path.to_path_buf(), err))?;
        for entry in entries {
            let entry = entry.map_err(|err| Error::WalkDirectory(path.to_path_buf(), err))?;
            add_path(builder, index, &entry.path(), legacy_root, keystore)?;
        }
        return Ok(());
    }
    if !metadata.is_file() {
        debug!("skipping special file {}", path.display());
        return Ok(());
    }
    append_file(builder, index, path, archive_path_for(path, legacy_root), keystore)
}

fn append_bytes<W: Write>(builder: &mut tar::Builder<W>, archive_path: &str, data: &[u8]) -> Result<()> {
    let mut entry = tar::Header::new_ustar();
    entry.set_size(data.len() as u64);
    entry.set_mode(0o644);
    builder.append_data(&mut entry, archive_path, data).map_err(Error::AppendArchive)
}

/// Stage A: walk the inputs into a gzipped tar of payload files, their
/// detached signatures, and the signed bundle index.
pub fn create_package_archive<W: Write>(
    output: W,
    inputs: &[PathBuf],
    keystore: &KeyStore,
    legacy_paths: bool,
) -> Result<()> {
    let encoder = GzEncoder::new(output, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut index: Vec<IndexEntry> = Vec::new();

    for input in inputs {
        let legacy_root = legacy_paths.then(|| input.as_path());
        add_path(&mut builder, &mut index, input, legacy_root, keystore)?;
    }

    let mut listing = format!("{}\n", index.len());
    for entry in &index {
        listing.push_str(&format!(
            "{} {} {} {} {:o}\n",
            entry.entry_type, entry.path, entry.size, entry.md5_sum, entry.mode
        ));
    }
    append_bytes(&mut builder, INDEX_FILE_NAME, listing.as_bytes())?;
    let index_signature = keystore.sign(listing.as_bytes());
    append_bytes(&mut builder, &format!("{INDEX_FILE_NAME}.sig"), &index_signature)?;

    let encoder = builder.into_inner().map_err(Error::FinishArchive)?;
    encoder.finish().map_err(Error::FinishArchive)?;
    Ok(())
}

fn stage_archive(config: &CreateConfig, keystore: &KeyStore, inputs: &[PathBuf]) -> Result<File> {
    if let [single] = inputs {
        let name = single.file_name().unwrap_or_default().to_string_lossy();
        if is_tarball(&name) {
            info!("input is already a bundled archive, skipping payload packaging");
            return File::open(single).map_err(|err| Error::OpenFile(single.clone(), err));
        }
    }
    let mut temp = tempfile().map_err(Error::CreateTempFile)?;
    create_package_archive(&mut temp, inputs, keystore, config.legacy_paths)?;
    temp.rewind().map_err(Error::RewindPayload)?;
    Ok(temp)
}

// Stage B: fixed header around the archive, with the archive MD5 patched in.
fn write_envelope(info: &UpdateInformation, archive: &mut File, output: &mut File) -> Result<()> {
    let md5_sum = md5_hex(archive).map_err(Error::ReadInput)?;
    archive.rewind().map_err(Error::RewindPayload)?;
    let bundle_header = info.build_header(&md5_sum)?;
    header::write_header(output, &bundle_header)?;
    io::copy(archive, output).map_err(Error::WriteOutput)?;
    Ok(())
}

// Stage C: SP01 envelope over whatever `inner` holds.
fn write_signature_envelope(
    info: &UpdateInformation,
    keystore: &KeyStore,
    inner: &mut File,
    output: &mut File,
) -> Result<()> {
    let signature = keystore.sign_reader(inner)?;
    inner.rewind().map_err(Error::RewindPayload)?;
    let envelope = UpdateHeader::Signature(SignatureHeader {
        magic_number: *b"SP01",
        certificate_number: info.certificate_number as u8,
    });
    header::write_header(output, &envelope)?;
    output
        .write_all(&keystore.reserved_signature(signature))
        .map_err(Error::WriteSignature)?;
    io::copy(inner, output).map_err(Error::WriteOutput)?;
    Ok(())
}

/// Build a package end to end: archive the payload, wrap it in the chosen
/// envelope(s), then scramble the result into `output`.
pub fn create_package<W: Write + ?Sized>(
    config: &CreateConfig,
    keystore: &KeyStore,
    inputs: &[PathBuf],
    output: &mut W,
) -> Result<()> {
    let mut archive = stage_archive(config, keystore, inputs)?;

    if let Some(keep) = &config.archive_keep_path {
        let mut kept = File::create(keep).map_err(|err| Error::OpenFile(keep.clone(), err))?;
        io::copy(&mut archive, &mut kept).map_err(Error::WriteOutput)?;
        archive.rewind().map_err(Error::RewindPayload)?;
        info!("kept intermediate archive at {}", keep.display());
    }

    let mut staged = tempfile().map_err(Error::CreateTempFile)?;
    match config.info.version {
        BundleVersion::UpdateSignature => {
            write_signature_envelope(&config.info, keystore, &mut archive, &mut staged)?;
        }
        BundleVersion::OTAUpdateV2 => {
            let mut enveloped = tempfile().map_err(Error::CreateTempFile)?;
            write_envelope(&config.info, &mut archive, &mut enveloped)?;
            enveloped.rewind().map_err(Error::RewindPayload)?;
            if config.fake_sign {
                staged = enveloped;
            } else {
                write_signature_envelope(&config.info, keystore, &mut enveloped, &mut staged)?;
            }
        }
        BundleVersion::OTAUpdateV1 | BundleVersion::RecoveryUpdate | BundleVersion::RecoveryUpdateV2 => {
            write_envelope(&config.info, &mut archive, &mut staged)?;
        }
        BundleVersion::UserDataPackage | BundleVersion::Unknown => {
            return Err(Error::Header(header::Error::UnsupportedVersion(config.info.version.label())));
        }
    }
    staged.rewind().map_err(Error::RewindPayload)?;

    let skip = config.fake_sign || config.userdata;
    scramble::scramble(&mut staged, output, 0, skip).map_err(Error::Scramble)?;
    output.flush().map_err(Error::WriteOutput)?;
    Ok(())
}
