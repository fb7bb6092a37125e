use std::fs;
use std::io;
use std::io::{Read, Seek, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use log::{debug, info};
use tempfile::tempfile;

use update_format_bundle::header;
use update_format_bundle::header::{UpdateHeader, GZIP_MAGIC, MAGIC_NUMBER_LENGTH};
use update_format_bundle::scramble;
use update_format_bundle::sign::SIGNATURE_RESERVED_SIZE;

use crate::hash::Md5Writer;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ConvertOptions {
    /// Print the parsed header fields instead of converting.
    pub info_only: bool,
    /// Extract the envelope signature next to the input.
    pub extract_sig: bool,
    /// The input is a fake package: no scrambling to undo.
    pub fake_sign: bool,
    /// Stop after stripping the signature envelope, emit the inner bytes
    /// verbatim.
    pub unwrap_only: bool,
}

/// Decode a package back into the gzipped tar it wraps. The body is only
/// accepted when it hashes to the MD5 the header carries.
pub fn convert_package<R, W>(
    input: &mut R,
    output: &mut W,
    options: &ConvertOptions,
    sig_path: Option<&Path>,
) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut magic = [0u8; MAGIC_NUMBER_LENGTH];
    input.read_exact(&mut magic).map_err(Error::ReadInput)?;

    // A raw gzip stream is a userdata package: no header, no scrambling.
    if magic == GZIP_MAGIC {
        if options.info_only {
            println!("{}", UpdateHeader::UserData);
            return Ok(());
        }
        output.write_all(&magic).map_err(Error::WriteBody)?;
        io::copy(input, output).map_err(Error::WriteBody)?;
        return Ok(());
    }

    let mut scratch = tempfile().map_err(Error::CreateTempFile)?;
    if options.fake_sign {
        scratch.write_all(&magic).map_err(Error::WriteOutput)?;
        io::copy(input, &mut scratch).map_err(Error::WriteOutput)?;
    } else {
        scramble::unscramble_in_place(&mut magic);
        scratch.write_all(&magic).map_err(Error::WriteOutput)?;
        scramble::unscramble(input, &mut scratch, 0, false).map_err(Error::Scramble)?;
    }
    scratch.rewind().map_err(Error::RewindPayload)?;

    process_stream(&mut scratch, output, options, sig_path)
}

fn process_stream<R, W>(reader: &mut R, output: &mut W, options: &ConvertOptions, sig_path: Option<&Path>) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut magic = [0u8; MAGIC_NUMBER_LENGTH];
    reader.read_exact(&mut magic).map_err(Error::ReadInput)?;

    loop {
        if magic == GZIP_MAGIC {
            // Userdata wrapped in a signature envelope.
            if options.info_only {
                println!("{}", UpdateHeader::UserData);
                return Ok(());
            }
            output.write_all(&magic).map_err(Error::WriteBody)?;
            io::copy(reader, output).map_err(Error::WriteBody)?;
            return Ok(());
        }

        let bundle_header = header::read_header_after_magic(magic, reader)?;
        match bundle_header {
            UpdateHeader::Signature(_) => {
                if options.info_only {
                    println!("{bundle_header}");
                    println!();
                }
                let mut signature = [0u8; SIGNATURE_RESERVED_SIZE];
                reader.read_exact(&mut signature).map_err(Error::ReadSignature)?;
                if options.extract_sig {
                    if let Some(path) = sig_path {
                        fs::write(path, signature).map_err(Error::WriteSignature)?;
                        info!("extracted envelope signature to {}", path.display());
                    }
                }
                if options.unwrap_only {
                    io::copy(reader, output).map_err(Error::WriteBody)?;
                    return Ok(());
                }
                // Recurse into whatever the envelope wraps.
                reader.read_exact(&mut magic).map_err(Error::ReadInput)?;
            }
            UpdateHeader::OtaV1(_) | UpdateHeader::OtaV2(_) | UpdateHeader::Recovery(_) | UpdateHeader::RecoveryV2(_) => {
                if options.info_only {
                    println!("{bundle_header}");
                    return Ok(());
                }
                let expected = bundle_header.md5_sum().unwrap_or_default().to_string();
                let mut tee = Md5Writer::new(&mut *output);
                io::copy(reader, &mut tee).map_err(Error::WriteBody)?;
                let (_, actual) = tee.finalize_hex();
                debug!("body md5 {actual}, header says {expected}");
                if actual != expected {
                    return Err(Error::Md5Mismatch { expected, actual });
                }
                return Ok(());
            }
            UpdateHeader::UserData => {
                output.write_all(&GZIP_MAGIC).map_err(Error::WriteBody)?;
                io::copy(reader, output).map_err(Error::WriteBody)?;
                return Ok(());
            }
            UpdateHeader::Unknown(magic) => {
                return Err(Error::UnknownBundle(magic));
            }
        }
    }
}

/// Unpack a converted gzipped tar into a directory tree.
pub fn extract_archive<R: Read + ?Sized>(input: &mut R, output_dir: &Path) -> Result<()> {
    let decoder = GzDecoder::new(input);
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive.unpack(output_dir).map_err(Error::ExtractArchive)
}

/// Decode a package and extract its payload into `output_dir`.
pub fn extract_package<R: Read + ?Sized>(input: &mut R, output_dir: &Path, options: &ConvertOptions) -> Result<()> {
    let mut converted = tempfile().map_err(Error::CreateTempFile)?;
    convert_package(input, &mut converted, options, None)?;
    converted.rewind().map_err(Error::RewindPayload)?;
    fs::create_dir_all(output_dir).map_err(Error::ExtractArchive)?;
    extract_archive(&mut converted, output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use update_format_bundle::header::{BundleVersion, UpdateInformation};
    use update_format_bundle::sign::KeyStore;

    use crate::create::{create_package, CreateConfig};

    fn payload_dir(contents: &[(&str, &[u8])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in contents {
            fs::write(dir.path().join(name), data).unwrap();
        }
        dir
    }

    fn build(config: &CreateConfig, inputs: &[PathBuf]) -> Vec<u8> {
        let keystore = KeyStore::default_key().unwrap();
        let mut package = Vec::new();
        create_package(config, &keystore, inputs, &mut package).unwrap();
        package
    }

    fn ota2_config(devices: Vec<u16>) -> CreateConfig {
        let mut info = UpdateInformation::new(BundleVersion::OTAUpdateV2);
        info.devices = devices;
        CreateConfig {
            info,
            fake_sign: false,
            userdata: false,
            legacy_paths: true,
            archive_keep_path: None,
        }
    }

    fn archive_entries(data: &[u8]) -> Vec<(String, Vec<u8>)> {
        let decoder = GzDecoder::new(data);
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().into_owned();
                let mut contents = Vec::new();
                entry.read_to_end(&mut contents).unwrap();
                (path, contents)
            })
            .collect()
    }

    #[test]
    fn signed_ota2_package_round_trips_to_the_archive() {
        let dir = payload_dir(&[("hello.txt", b"hello bundle")]);
        let keep = dir.path().join("intermediate.tar.gz");

        let mut config = ota2_config(vec![0x24]);
        config.archive_keep_path = Some(keep.clone());
        let package = build(&config, &[dir.path().to_path_buf()]);

        // The file on disk is scrambled; the envelope magic only shows up
        // after the inverse transform.
        assert_ne!(&package[..4], b"SP01");
        let mut head = [package[0], package[1], package[2], package[3]];
        scramble::unscramble_in_place(&mut head);
        assert_eq!(&head, b"SP01");

        let mut converted = Vec::new();
        convert_package(&mut &package[..], &mut converted, &ConvertOptions::default(), None).unwrap();
        assert_eq!(converted, fs::read(&keep).unwrap());

        let entries = archive_entries(&converted);
        let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["hello.txt", "hello.txt.sig", "update-filelist.dat", "update-filelist.dat.sig"]);
        assert_eq!(entries[0].1, b"hello bundle");
    }

    #[test]
    fn converted_package_extracts_to_identical_files() {
        let dir = payload_dir(&[("hello.txt", b"hello bundle")]);
        let package = build(&ota2_config(vec![0x24]), &[dir.path().to_path_buf()]);

        let out = tempfile::tempdir().unwrap();
        extract_package(&mut &package[..], out.path(), &ConvertOptions::default()).unwrap();
        assert_eq!(fs::read(out.path().join("hello.txt")).unwrap(), b"hello bundle");
        assert!(out.path().join("update-filelist.dat").exists());
    }

    #[test]
    fn corrupted_md5_field_is_rejected() {
        let dir = payload_dir(&[("hello.txt", b"hello bundle")]);

        let mut info = UpdateInformation::new(BundleVersion::OTAUpdateV1);
        info.devices = vec![0x0E];
        let config = CreateConfig {
            info,
            fake_sign: true,
            userdata: false,
            legacy_paths: true,
            archive_keep_path: None,
        };
        let mut package = build(&config, &[dir.path().to_path_buf()]);

        // Flip one nibble of the embedded MD5 (offset 16 opens the field).
        package[16] = if package[16] == b'0' { b'1' } else { b'0' };

        let options = ConvertOptions {
            fake_sign: true,
            ..ConvertOptions::default()
        };
        let mut converted = Vec::new();
        let err = convert_package(&mut &package[..], &mut converted, &options, None).unwrap_err();
        assert!(matches!(err, Error::Md5Mismatch { .. }));
    }

    #[test]
    fn fake_v1_package_converts_without_unscrambling() {
        let dir = payload_dir(&[("hello.txt", b"hello bundle")]);
        let keep = dir.path().join("intermediate.tar.gz");

        let mut info = UpdateInformation::new(BundleVersion::OTAUpdateV1);
        info.devices = vec![0x0E];
        let config = CreateConfig {
            info,
            fake_sign: true,
            userdata: false,
            legacy_paths: true,
            archive_keep_path: Some(keep.clone()),
        };
        let package = build(&config, &[dir.path().to_path_buf()]);
        assert_eq!(&package[..4], b"FC02");

        let options = ConvertOptions {
            fake_sign: true,
            ..ConvertOptions::default()
        };
        let mut converted = Vec::new();
        convert_package(&mut &package[..], &mut converted, &options, None).unwrap();
        assert_eq!(converted, fs::read(&keep).unwrap());
    }

    #[test]
    fn recovery_package_round_trips_through_the_block_header() {
        let dir = payload_dir(&[("rootfs.img", b"not really a filesystem")]);
        let keep = dir.path().join("intermediate.tar.gz");

        let mut info = UpdateInformation::new(BundleVersion::RecoveryUpdate);
        info.devices = vec![0x0E];
        info.magic_1 = 42;
        let config = CreateConfig {
            info,
            fake_sign: false,
            userdata: false,
            legacy_paths: true,
            archive_keep_path: Some(keep.clone()),
        };
        let package = build(&config, &[dir.path().to_path_buf()]);

        let mut converted = Vec::new();
        convert_package(&mut &package[..], &mut converted, &ConvertOptions::default(), None).unwrap();
        assert_eq!(converted, fs::read(&keep).unwrap());
    }

    #[test]
    fn userdata_package_unwraps_to_the_original_tarball() {
        let dir = payload_dir(&[("vfat.dat", b"user files")]);

        // Pre-build the tarball the user would hand over.
        let keystore = KeyStore::default_key().unwrap();
        let tarball_path = dir.path().join("userdata.tgz");
        let mut tarball = fs::File::create(&tarball_path).unwrap();
        crate::create::create_package_archive(&mut tarball, &[dir.path().join("vfat.dat")], &keystore, true).unwrap();
        drop(tarball);
        let tarball_bytes = fs::read(&tarball_path).unwrap();

        let config = CreateConfig {
            info: UpdateInformation::new(BundleVersion::UpdateSignature),
            fake_sign: false,
            userdata: true,
            legacy_paths: false,
            archive_keep_path: None,
        };
        let package = build(&config, &[tarball_path]);

        // Userdata packages stay unscrambled, so the envelope magic is
        // visible right at the front.
        assert_eq!(&package[..4], b"SP01");

        let options = ConvertOptions {
            fake_sign: true,
            unwrap_only: true,
            ..ConvertOptions::default()
        };
        let mut unwrapped = Vec::new();
        convert_package(&mut &package[..], &mut unwrapped, &options, None).unwrap();
        assert_eq!(unwrapped, tarball_bytes);
    }

    #[test]
    fn raw_gzip_input_passes_through_untouched() {
        let dir = payload_dir(&[("a.txt", b"abc")]);
        let keystore = KeyStore::default_key().unwrap();
        let mut tarball = Vec::new();
        crate::create::create_package_archive(&mut tarball, &[dir.path().to_path_buf()], &keystore, true).unwrap();
        assert_eq!(&tarball[..4], &GZIP_MAGIC);

        let mut converted = Vec::new();
        convert_package(&mut &tarball[..], &mut converted, &ConvertOptions::default(), None).unwrap();
        assert_eq!(converted, tarball);
    }

    #[test]
    fn envelope_signature_can_be_extracted() {
        let dir = payload_dir(&[("hello.txt", b"hello bundle")]);
        let package = build(&ota2_config(vec![0x24, 0xD4]), &[dir.path().to_path_buf()]);

        let sig_path = dir.path().join("package.sig");
        let options = ConvertOptions {
            extract_sig: true,
            ..ConvertOptions::default()
        };
        let mut converted = Vec::new();
        convert_package(&mut &package[..], &mut converted, &options, Some(&sig_path)).unwrap();
        assert_eq!(fs::read(&sig_path).unwrap().len(), SIGNATURE_RESERVED_SIZE);
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let bogus = b"ZZZZ and then some trailing bytes";
        let options = ConvertOptions {
            fake_sign: true,
            ..ConvertOptions::default()
        };
        let mut converted = Vec::new();
        let err = convert_package(&mut &bogus[..], &mut converted, &options, None).unwrap_err();
        assert!(matches!(err, Error::UnknownBundle(_)));
        assert!(converted.is_empty());
    }
}
