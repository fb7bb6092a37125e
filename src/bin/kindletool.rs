use std::env;
use std::fs;
use std::fs::File;
use std::io;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use argh::FromArgs;
use log::{info, warn};

use kt_rs::{
    convert_package, create_package, derive_passwords, extract_package, ConvertOptions, CreateConfig,
};
use update_format_bundle::device;
use update_format_bundle::device::{Board, Platform};
use update_format_bundle::header::{get_bundle_version, BundleVersion, UpdateInformation, MAGIC_NUMBER_LENGTH};
use update_format_bundle::scramble;
use update_format_bundle::sign::KeyStore;

#[derive(FromArgs, Debug)]
/// Pack, sign, inspect and unpack e-reader firmware update packages.
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Md(MdArgs),
    Dm(DmArgs),
    Convert(ConvertArgs),
    Extract(ExtractArgs),
    Create(CreateArgs),
    Info(InfoArgs),
    Version(VersionArgs),
    Help(HelpArgs),
}

#[derive(FromArgs, Debug)]
/// Obfuscate data with the update scramble transform.
#[argh(subcommand, name = "md")]
struct MdArgs {
    /// input file, or - for stdin (the default)
    #[argh(positional)]
    input: Option<String>,

    /// output file, or - for stdout (the default)
    #[argh(positional)]
    output: Option<String>,
}

#[derive(FromArgs, Debug)]
/// Deobfuscate data with the update scramble transform.
#[argh(subcommand, name = "dm")]
struct DmArgs {
    /// input file, or - for stdin (the default)
    #[argh(positional)]
    input: Option<String>,

    /// output file, or - for stdout (the default)
    #[argh(positional)]
    output: Option<String>,
}

#[derive(FromArgs, Debug)]
/// Convert an update package to a gzipped tar archive, and delete the input.
#[argh(subcommand, name = "convert")]
struct ConvertArgs {
    /// write to standard output, keeping the original file unchanged
    #[argh(switch, short = 'c')]
    stdout: bool,

    /// just print the package information, no conversion done
    #[argh(switch, short = 'i')]
    info: bool,

    /// extract the envelope signature next to the input
    #[argh(switch, short = 's')]
    sig: bool,

    /// don't delete the input package
    #[argh(switch, short = 'k')]
    keep: bool,

    /// assume the input is an unsigned and unscrambled package
    #[argh(switch, short = 'u')]
    unsigned: bool,

    /// just unwrap the signature envelope, if there is one
    #[argh(switch, short = 'w')]
    unwrap: bool,

    /// packages to convert, or - for stdin
    #[argh(positional)]
    inputs: Vec<String>,
}

#[derive(FromArgs, Debug)]
/// Convert an update package and extract it to a directory.
#[argh(subcommand, name = "extract")]
struct ExtractArgs {
    /// assume the input is an unsigned and unscrambled package
    #[argh(switch, short = 'u')]
    unsigned: bool,

    /// package to extract, or - for stdin
    #[argh(positional)]
    input: String,

    /// directory to extract into
    #[argh(positional)]
    output: String,
}

#[derive(FromArgs, Debug)]
/// Create an update package from files and directories.
#[argh(subcommand, name = "create")]
struct CreateArgs {
    /// update type: ota, ota2, recovery, recovery2 or sig
    #[argh(positional)]
    update_type: String,

    /// target device short name or alias; may be given multiple times
    #[argh(option, short = 'd', long = "device")]
    device: Vec<String>,

    /// PEM file with the RSA private key to sign with; defaults to the
    /// widely published developer key
    #[argh(option, short = 'k', long = "key")]
    key: Option<String>,

    /// override the package magic number (must match the update type)
    #[argh(option, short = 'b', long = "bundle")]
    bundle: Option<String>,

    /// source revision, the lowest firmware the package installs on
    #[argh(option, short = 's', long = "srcrev")]
    srcrev: Option<u64>,

    /// target revision, the highest firmware the package installs on
    #[argh(option, short = 't', long = "tgtrev")]
    tgtrev: Option<u64>,

    /// recovery header revision
    #[argh(option, short = 'h', long = "hdrrev")]
    hdrrev: Option<u32>,

    /// recovery magic number 1
    #[argh(option, short = '1', long = "magic1")]
    magic1: Option<u32>,

    /// recovery magic number 2
    #[argh(option, short = '2', long = "magic2")]
    magic2: Option<u32>,

    /// recovery minor number
    #[argh(option, short = 'm', long = "minor")]
    minor: Option<u32>,

    /// number of the on-device certificate that verifies the envelope
    #[argh(option, short = 'c', long = "cert")]
    cert: Option<u16>,

    /// one byte of optional data (OTA V1 only)
    #[argh(option, short = 'o', long = "opt")]
    opt: Option<u8>,

    /// one byte of critical data (OTA V2 only)
    #[argh(option, short = 'r', long = "crit")]
    crit: Option<u8>,

    /// metastring of the form key=value; may be given multiple times
    #[argh(option, short = 'x', long = "meta")]
    meta: Vec<String>,

    /// target platform short name (recovery with header rev >= 2 only)
    #[argh(option, short = 'p', long = "platform")]
    platform: Option<String>,

    /// target board short name (recovery with header rev >= 2 only)
    #[argh(option, short = 'B', long = "board")]
    board: Option<String>,

    /// keep the intermediate archive next to the output
    #[argh(switch, short = 'a', long = "archive")]
    archive: bool,

    /// build an unsigned and unscrambled package
    #[argh(switch, short = 'u', long = "unsigned")]
    unsigned: bool,

    /// build a userdata package (sig update type only)
    #[argh(switch, short = 'U', long = "userdata")]
    userdata: bool,

    /// store paths relative to the command-line root, like after a chdir
    #[argh(switch, short = 'C', long = "legacy")]
    legacy: bool,

    /// payload files and directories, optionally followed by the output
    /// (a path ending in .bin, or - for stdout)
    #[argh(positional)]
    inputs: Vec<String>,
}

#[derive(FromArgs, Debug)]
/// Derive the default device passwords from a serial number.
#[argh(subcommand, name = "info")]
struct InfoArgs {
    /// the 16-character serial number
    #[argh(positional)]
    serial: String,
}

#[derive(FromArgs, Debug)]
/// Show version information.
#[argh(subcommand, name = "version")]
struct VersionArgs {}

#[derive(FromArgs, Debug)]
/// Show the help screen.
#[argh(subcommand, name = "help")]
struct HelpArgs {}

fn open_input(path: Option<&str>) -> Result<Box<dyn Read>> {
    match path {
        None | Some("-") => Ok(Box::new(io::stdin())),
        Some(p) => {
            let file = File::open(p).context(format!("cannot open input for reading: {p}"))?;
            Ok(Box::new(file))
        }
    }
}

fn open_output(path: Option<&str>) -> Result<Box<dyn Write>> {
    match path {
        None | Some("-") => Ok(Box::new(io::stdout())),
        Some(p) => {
            let file = File::create(p).context(format!("cannot open output for writing: {p}"))?;
            Ok(Box::new(file))
        }
    }
}

fn run_scramble(input: Option<String>, output: Option<String>, forward: bool) -> Result<()> {
    let mut reader = open_input(input.as_deref())?;
    let mut writer = open_output(output.as_deref())?;
    if forward {
        scramble::scramble(&mut reader, &mut writer, 0, false).context("cannot obfuscate")?;
    } else {
        scramble::unscramble(&mut reader, &mut writer, 0, false).context("cannot deobfuscate")?;
    }
    writer.flush().context("cannot flush output")?;
    Ok(())
}

fn run_convert(cmd: &ConvertArgs) -> Result<()> {
    if cmd.inputs.is_empty() {
        bail!("no input packages given");
    }
    let options = ConvertOptions {
        info_only: cmd.info,
        extract_sig: cmd.sig,
        fake_sign: cmd.unsigned,
        unwrap_only: cmd.unwrap,
    };
    for input in &cmd.inputs {
        convert_one(input, cmd, &options)?;
    }
    Ok(())
}

fn convert_one(input: &str, cmd: &ConvertArgs, options: &ConvertOptions) -> Result<()> {
    let sig_path = (input != "-").then(|| Path::new(input).with_extension("sig"));

    if cmd.info {
        let mut reader = open_input(Some(input))?;
        return convert_package(&mut reader, &mut io::sink(), options, None)
            .context(format!("failed to read package info from {input}"));
    }

    if input == "-" || cmd.stdout {
        let mut reader = open_input(Some(input))?;
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        return convert_package(&mut reader, &mut writer, options, sig_path.as_deref())
            .context(format!("failed to convert {input}"));
    }

    let output_path = Path::new(input).with_extension("tar.gz");
    let mut reader = File::open(input).context(format!("cannot open input for reading: {input}"))?;
    let writer = File::create(&output_path)
        .context(format!("cannot open output for writing: {}", output_path.display()))?;
    let mut writer = io::BufWriter::new(writer);

    match convert_package(&mut reader, &mut writer, options, sig_path.as_deref()) {
        Ok(()) => {
            info!("converted {} to {}", input, output_path.display());
            if !cmd.keep {
                fs::remove_file(input).context(format!("failed to delete input {input}"))?;
                info!("deleted input {input}");
            }
            Ok(())
        }
        Err(err) => {
            // Never leave a partial archive behind.
            drop(writer);
            let _ = fs::remove_file(&output_path);
            Err(err).context(format!("failed to convert {input}"))
        }
    }
}

fn run_extract(cmd: &ExtractArgs) -> Result<()> {
    let mut reader = open_input(Some(&cmd.input))?;
    let options = ConvertOptions {
        fake_sign: cmd.unsigned,
        ..ConvertOptions::default()
    };
    extract_package(&mut reader, Path::new(&cmd.output), &options)
        .context(format!("failed to extract {} into {}", cmd.input, cmd.output))
}

fn parse_device_code(name: &str) -> Option<u16> {
    if let Some(hex) = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16).ok();
    }
    if let Ok(code) = name.parse::<u16>() {
        return Some(code);
    }
    device::parse_base32_code(&name.to_ascii_uppercase())
}

fn resolve_devices(names: &[String], allow_unknown_devcodes: bool) -> Result<Vec<u16>> {
    let mut devices = Vec::new();
    for name in names {
        if name == "auto" {
            bail!("-d auto only works on the device itself, pass an explicit device instead");
        }
        match device::expand_device_name(name) {
            Some(expanded) => devices.extend(expanded.iter().map(|d| d.code())),
            None if allow_unknown_devcodes => {
                let code = parse_device_code(name)
                    .ok_or_else(|| anyhow!("cannot parse device code {name:?}"))?;
                warn!("using unknown device code 0x{code:04X}");
                devices.push(code);
            }
            None => {
                bail!("unknown device {name:?} (set KT_WITH_UNKNOWN_DEVCODES to pass raw codes)")
            }
        }
    }
    Ok(devices)
}

fn run_create(cmd: &CreateArgs, allow_unknown_devcodes: bool) -> Result<()> {
    let version = match cmd.update_type.as_str() {
        "ota" => BundleVersion::OTAUpdateV1,
        "ota2" => BundleVersion::OTAUpdateV2,
        "recovery" => BundleVersion::RecoveryUpdate,
        "recovery2" => BundleVersion::RecoveryUpdateV2,
        "sig" => BundleVersion::UpdateSignature,
        other => bail!("unknown update type {other:?} (expected ota, ota2, recovery, recovery2 or sig)"),
    };
    if cmd.userdata && version != BundleVersion::UpdateSignature {
        bail!("-U only makes sense with the sig update type");
    }

    let mut info = UpdateInformation::new(version);
    if let Some(bundle) = &cmd.bundle {
        let magic: [u8; MAGIC_NUMBER_LENGTH] = bundle
            .as_bytes()
            .try_into()
            .map_err(|_| anyhow!("magic number must be exactly 4 characters: {bundle:?}"))?;
        if get_bundle_version(&magic) != version {
            bail!("magic number {bundle} does not match update type {}", cmd.update_type);
        }
        info.magic_number = magic;
    }
    if let Some(srcrev) = cmd.srcrev {
        info.source_revision = srcrev;
    }
    if let Some(tgtrev) = cmd.tgtrev {
        info.target_revision = tgtrev;
    }
    if let Some(hdrrev) = cmd.hdrrev {
        info.header_rev = hdrrev;
    }
    if let Some(magic1) = cmd.magic1 {
        info.magic_1 = magic1;
    }
    if let Some(magic2) = cmd.magic2 {
        info.magic_2 = magic2;
    }
    if let Some(minor) = cmd.minor {
        info.minor = minor;
    }
    if let Some(cert) = cmd.cert {
        info.certificate_number = cert;
    }
    if let Some(opt) = cmd.opt {
        info.optional = opt;
    }
    if let Some(crit) = cmd.crit {
        info.critical = crit;
    }
    info.metastrings = cmd.meta.clone();
    if let Some(name) = &cmd.platform {
        info.platform = Platform::from_short_name(name)
            .ok_or_else(|| anyhow!("unknown platform {name:?}"))?
            .code();
    }
    if let Some(name) = &cmd.board {
        info.board = Board::from_short_name(name)
            .ok_or_else(|| anyhow!("unknown board {name:?}"))?
            .code();
    }
    info.devices = resolve_devices(&cmd.device, allow_unknown_devcodes)?;

    let keystore = match &cmd.key {
        Some(path) => KeyStore::from_pem_file(Path::new(path))
            .context(format!("failed to load signing key from {path}"))?,
        None => KeyStore::default_key().context("failed to load the built-in signing key")?,
    };

    let mut inputs = cmd.inputs.clone();
    if inputs.is_empty() {
        bail!("no input files given");
    }
    let output = match inputs.last().map(String::as_str) {
        Some("-") => {
            inputs.pop();
            None
        }
        Some(last) if last.to_ascii_lowercase().ends_with(".bin") => inputs.pop(),
        _ => None,
    };
    if inputs.is_empty() {
        bail!("no input files given");
    }
    let input_paths: Vec<PathBuf> = inputs.iter().map(PathBuf::from).collect();

    let config = CreateConfig {
        info,
        fake_sign: cmd.unsigned,
        userdata: cmd.userdata,
        legacy_paths: cmd.legacy,
        archive_keep_path: cmd.archive.then(|| match &output {
            Some(path) => Path::new(path).with_extension("tar.gz"),
            None => PathBuf::from("update.tar.gz"),
        }),
    };

    match &output {
        Some(path) => {
            let file = File::create(path).context(format!("cannot open output for writing: {path}"))?;
            let mut writer = io::BufWriter::new(file);
            match create_package(&config, &keystore, &input_paths, &mut writer) {
                Ok(()) => {
                    info!("wrote {path}");
                    Ok(())
                }
                Err(err) => {
                    drop(writer);
                    let _ = fs::remove_file(path);
                    Err(err).context(format!("failed to create {path}"))
                }
            }
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            create_package(&config, &keystore, &input_paths, &mut writer).context("failed to create package")
        }
    }
}

fn run_info(cmd: &InfoArgs) -> Result<()> {
    let serial_info = derive_passwords(&cmd.serial)?;
    eprintln!("Device is {}", serial_info.device);
    if serial_info.new_scheme {
        eprintln!("Device uses the new device ID scheme");
    }
    if serial_info.device.is_wario_or_newer() {
        eprintln!("Platform is Wario or newer");
    } else {
        eprintln!("Platform is pre Wario");
    }
    // The root password is DES hashed on device and truncated to 8 chars;
    // the recovery MMC export wants the 9-char variant.
    println!("Root PW            {}", serial_info.root_password);
    println!("Recovery PW        {}", serial_info.recovery_password);
    Ok(())
}

fn print_help() {
    if let Err(early_exit) = Args::from_args(&["kindletool"], &["--help"]) {
        println!("{}", early_exit.output);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    // Cached once at startup; passed down read-only from here.
    let allow_unknown_devcodes = env::var_os("KT_WITH_UNKNOWN_DEVCODES").is_some();

    let args: Args = argh::from_env();
    match &args.command {
        Command::Md(cmd) => run_scramble(cmd.input.clone(), cmd.output.clone(), true),
        Command::Dm(cmd) => run_scramble(cmd.input.clone(), cmd.output.clone(), false),
        Command::Convert(cmd) => run_convert(cmd),
        Command::Extract(cmd) => run_extract(cmd),
        Command::Create(cmd) => run_create(cmd, allow_unknown_devcodes),
        Command::Info(cmd) => run_info(cmd),
        Command::Version(_) => {
            println!("kindletool (kt-rs) {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Help(_) => {
            print_help();
            Ok(())
        }
    }
}
