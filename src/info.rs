use update_format_bundle::device;
use update_format_bundle::device::Device;

use crate::hash::md5_hex;
use crate::{Error, Result};

const SERIAL_NO_LENGTH: usize = 16;

/// The default passwords derived from a device serial number. The root
/// password is DES-hashed on device, so only its first 8 chars matter; the
/// recovery MMC export prompt wants the 9-char variant.
#[derive(Debug)]
pub struct SerialInfo {
    pub device: Device,
    pub new_scheme: bool,
    pub root_password: String,
    pub recovery_password: String,
}

/// Derive the two default passwords from `md5(serial + "\n")`. The hash
/// offsets moved when the Wario platform came out.
pub fn derive_passwords(serial: &str) -> Result<SerialInfo> {
    let serial = serial.trim().to_ascii_uppercase();
    if serial.len() != SERIAL_NO_LENGTH || !serial.is_ascii() {
        return Err(Error::InvalidSerial(serial));
    }

    let line = format!("{serial}\n");
    let hash = md5_hex(&mut line.as_bytes()).map_err(Error::ReadInput)?;

    // Chars 2..4 carry the device code in hex; serials from the PW3 onward
    // moved it to chars 3..6, in base 32.
    let mut new_scheme = false;
    let mut device = u16::from_str_radix(&serial[2..4], 16)
        .ok()
        .map(Device)
        .filter(|d| d.is_known());
    if device.is_none() {
        device = device::parse_base32_code(&serial[3..6])
            .map(Device)
            .filter(|d| d.is_known());
        new_scheme = device.is_some();
    }
    let device = device.ok_or_else(|| Error::UnknownDevice(serial[2..6].to_string()))?;

    let offset = if device.is_wario_or_newer() { 13 } else { 7 };
    Ok(SerialInfo {
        device,
        new_scheme,
        root_password: format!("fiona{}", &hash[offset..offset + 3]),
        recovery_password: format!("fiona{}", &hash[offset..offset + 4]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(serial: &str) -> String {
        md5_hex(&mut format!("{serial}\n").as_bytes()).unwrap()
    }

    #[test]
    fn pre_wario_serial_uses_the_low_offsets() {
        // 0x24 is the PaperWhite, pre Wario.
        let serial = "B024000000000000";
        let info = derive_passwords(serial).unwrap();
        let hash = hash_of(serial);
        assert_eq!(info.root_password, format!("fiona{}", &hash[7..10]));
        assert_eq!(info.recovery_password, format!("fiona{}", &hash[7..11]));
        assert!(!info.new_scheme);
        assert_eq!(info.device.code(), 0x24);
    }

    #[test]
    fn wario_serial_uses_the_high_offsets() {
        // 0x13 is the Voyage, Wario platform.
        let serial = "B013000000000000";
        let info = derive_passwords(serial).unwrap();
        let hash = hash_of(serial);
        assert_eq!(info.root_password, format!("fiona{}", &hash[13..16]));
        assert_eq!(info.recovery_password, format!("fiona{}", &hash[13..17]));
    }

    #[test]
    fn new_scheme_serial_falls_back_to_base_32() {
        // Chars 2..4 are no device; chars 3..6 read 0G1, the PaperWhite 3.
        let serial = "G000G10000000000";
        let info = derive_passwords(serial).unwrap();
        assert!(info.new_scheme);
        assert_eq!(info.device.code(), 0x201);
        assert!(info.device.is_wario_or_newer());
    }

    #[test]
    fn lowercase_serials_are_upcased_first() {
        let upper = derive_passwords("B024000000000000").unwrap();
        let lower = derive_passwords("b024000000000000").unwrap();
        assert_eq!(upper.root_password, lower.root_password);
    }

    #[test]
    fn wrong_length_serials_are_rejected() {
        assert!(matches!(derive_passwords("B024"), Err(Error::InvalidSerial(_))));
    }

    #[test]
    fn unknown_devices_are_rejected() {
        assert!(matches!(derive_passwords("B0NN0123456789AB"), Err(Error::UnknownDevice(_))));
    }
}
