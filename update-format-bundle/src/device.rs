//! Device, platform and board identification tables.
//!
//! Legacy devices use a one-byte code; devices from the PaperWhite 3 onward
//! use a three-character token from the serial number, read in base 32.

/// A concrete device model/region code as it appears in package headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device(pub u16);

/// A hardware platform code (recovery headers, rev >= 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform(pub u32);

/// A board code (recovery headers, rev >= 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board(pub u32);

// code, CLI short name ("" when the code has no official short name),
// human-readable model name.
const DEVICE_TABLE: &[(u16, &str, &str)] = &[
    (0x01, "k1", "Kindle 1"),
    (0x02, "k2", "Kindle 2 US"),
    (0x03, "k2i", "Kindle 2 International"),
    (0x04, "dx", "Kindle DX US"),
    (0x05, "dxi", "Kindle DX International"),
    (0x09, "dxg", "Kindle DX Graphite"),
    (0x08, "k3w", "Kindle 3 Wifi"),
    (0x06, "k3g", "Kindle 3 Wifi+3G"),
    (0x0A, "k3gb", "Kindle 3 Wifi+3G Europe"),
    (0x0E, "k4", "Kindle 4 Non-Touch Silver (2011)"),
    (0x23, "k4b", "Kindle 4 Non-Touch Black (2012)"),
    (0x11, "k5w", "Kindle 5 Touch Wifi"),
    (0x0F, "k5g", "Kindle 5 Touch Wifi+3G"),
    (0x10, "k5gb", "Kindle 5 Touch Wifi+3G Europe"),
    (0x12, "k5u", "Kindle 5 Touch (Unknown Variant)"),
    (0x24, "pw", "Kindle PaperWhite Wifi"),
    (0x1B, "pwg", "Kindle PaperWhite Wifi+3G"),
    (0x1C, "pwgc", "Kindle PaperWhite Wifi+3G Canada"),
    (0x1D, "pwgb", "Kindle PaperWhite Wifi+3G Europe"),
    (0x1F, "pwgj", "Kindle PaperWhite Wifi+3G Japan"),
    (0x20, "pwgbr", "Kindle PaperWhite Wifi+3G Brazil"),
    (0xD4, "pw2", "Kindle PaperWhite 2 (2013) Wifi"),
    (0x5A, "pw2j", "Kindle PaperWhite 2 (2013) Wifi Japan"),
    (0xD5, "pw2g", "Kindle PaperWhite 2 (2013) Wifi+3G"),
    (0xD6, "pw2gc", "Kindle PaperWhite 2 (2013) Wifi+3G Canada"),
    (0xD7, "pw2gb", "Kindle PaperWhite 2 (2013) Wifi+3G Europe"),
    (0xD8, "pw2gr", "Kindle PaperWhite 2 (2013) Wifi+3G Russia"),
    (0xF2, "pw2gj", "Kindle PaperWhite 2 (2013) Wifi+3G Japan"),
    (0x17, "pw2il", "Kindle PaperWhite 2 (2013) Wifi (4GB) International"),
    (0x60, "pw2gbl", "Kindle PaperWhite 2 (2013) Wifi+3G (4GB) Europe"),
    (0x62, "pw2gl", "Kindle PaperWhite 2 (2013) Wifi+3G (4GB)"),
    (0x5F, "pw2gcl", "Kindle PaperWhite 2 (2013) Wifi+3G (4GB) Canada"),
    (0x61, "", "Kindle PaperWhite 2 (2013) (Unknown Variant 0x61)"),
    (0xF4, "", "Kindle PaperWhite 2 (2013) (Unknown Variant 0xF4)"),
    (0xF9, "", "Kindle PaperWhite 2 (2013) (Unknown Variant 0xF9)"),
    (0xC6, "kt2", "Kindle Basic (2014)"),
    (0xDD, "", "Kindle Basic (2014) (Unknown Variant 0xDD)"),
    (0x13, "kv", "Kindle Voyage WiFi"),
    (0x54, "kvg", "Kindle Voyage WiFi+3G"),
    (0x53, "kvgb", "Kindle Voyage WiFi+3G Europe"),
    (0x2A, "", "Kindle Voyage (Unknown Variant 0x2A)"),
    (0x4F, "", "Kindle Voyage (Unknown Variant 0x4F)"),
    (0x52, "", "Kindle Voyage (Unknown Variant 0x52)"),
    (0x07, "", "Unknown Kindle (0x07)"),
    (0x0B, "", "Unknown Kindle (0x0B)"),
    (0x0C, "", "Unknown Kindle (0x0C)"),
    (0x0D, "", "Unknown Kindle (0x0D)"),
    (0x16, "", "Unknown Kindle (0x16)"),
    (0x21, "", "Unknown Kindle (0x21)"),
    (0x99, "", "Unknown Kindle (0x99)"),
    (0x201, "pw3", "Kindle PaperWhite 3 (2015) WiFi"),
    (0x202, "", "Kindle PaperWhite 3 (2015) (Unknown Variant 0G2)"),
    (0x204, "", "Kindle PaperWhite 3 (2015) (Unknown Variant 0G4)"),
    (0x205, "", "Kindle PaperWhite 3 (2015) (Unknown Variant 0G5)"),
    (0x206, "", "Kindle PaperWhite 3 (2015) (Unknown Variant 0G6)"),
    (0x207, "", "Kindle PaperWhite 3 (2015) (Unknown Variant 0G7)"),
];

// Alias names expand to lists of short names; an entry may reference
// another alias.
const DEVICE_ALIASES: &[(&str, &[&str])] = &[
    ("kindle2", &["k2", "k2i"]),
    ("kindledx", &["dx", "dxi", "dxg"]),
    ("kindle3", &["k3w", "k3g", "k3gb"]),
    ("legacy", &["kindle2", "kindledx", "kindle3"]),
    ("kindle4", &["k4", "k4b"]),
    ("touch", &["k5w", "k5g", "k5gb"]),
    ("paperwhite", &["pw", "pwg", "pwgc", "pwgb", "pwgj", "pwgbr"]),
    (
        "paperwhite2",
        &["pw2", "pw2j", "pw2g", "pw2gc", "pw2gb", "pw2gr", "pw2gj", "pw2il", "pw2gbl", "pw2gl", "pw2gcl"],
    ),
    ("basic", &["kt2"]),
    ("voyage", &["kv", "kvg", "kvgb"]),
    ("paperwhite3", &["pw3"]),
    ("kindle5", &["touch", "paperwhite", "paperwhite2", "basic", "voyage", "paperwhite3"]),
];

const PLATFORM_TABLE: &[(u32, &str, &str)] = &[
    (0x00, "unspecified", "Unspecified"),
    (0x01, "mario", "Mario (Deprecated)"),
    (0x02, "luigi", "Luigi"),
    (0x03, "banjo", "Banjo"),
    (0x04, "yoshi", "Yoshi"),
    (0x05, "yoshime-p", "Yoshime (Prototype)"),
    (0x06, "yoshime", "Yoshime (Yoshime3)"),
    (0x07, "wario", "Wario"),
];

const BOARD_TABLE: &[(u32, &str, &str)] = &[
    (0x00, "unspecified", "Unspecified"),
    (0x03, "tequila", "Tequila"),
    (0x05, "whitney", "Whitney"),
];

impl Device {
    pub fn code(self) -> u16 {
        self.0
    }

    pub fn is_known(self) -> bool {
        DEVICE_TABLE.iter().any(|&(code, _, _)| code == self.0)
    }

    pub fn description(self) -> &'static str {
        DEVICE_TABLE
            .iter()
            .find(|&&(code, _, _)| code == self.0)
            .map(|&(_, _, name)| name)
            .unwrap_or("Unknown")
    }

    pub fn from_short_name(name: &str) -> Option<Device> {
        DEVICE_TABLE
            .iter()
            .find(|&&(_, short, _)| !short.is_empty() && short == name)
            .map(|&(code, _, _)| Device(code))
    }

    /// Devices from the PaperWhite 3 onward identify themselves with a
    /// three-character base-32 token instead of a one-byte code.
    pub fn uses_new_scheme(self) -> bool {
        self.0 > 0xFF
    }

    /// Whether the device sits on the Wario platform or a later one, which
    /// moves the password-derivation offsets within the serial hash.
    pub fn is_wario_or_newer(self) -> bool {
        matches!(self.0, 0x13 | 0x17) || self.0 >= 0x2A
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl Platform {
    pub fn code(self) -> u32 {
        self.0
    }

    pub fn description(self) -> &'static str {
        PLATFORM_TABLE
            .iter()
            .find(|&&(code, _, _)| code == self.0)
            .map(|&(_, _, name)| name)
            .unwrap_or("Unknown")
    }

    pub fn from_short_name(name: &str) -> Option<Platform> {
        PLATFORM_TABLE
            .iter()
            .find(|&&(_, short, _)| short == name)
            .map(|&(code, _, _)| Platform(code))
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl Board {
    pub fn code(self) -> u32 {
        self.0
    }

    pub fn description(self) -> &'static str {
        BOARD_TABLE
            .iter()
            .find(|&&(code, _, _)| code == self.0)
            .map(|&(_, _, name)| name)
            .unwrap_or("Unknown")
    }

    pub fn from_short_name(name: &str) -> Option<Board> {
        BOARD_TABLE
            .iter()
            .find(|&&(_, short, _)| short == name)
            .map(|&(code, _, _)| Board(code))
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Expand a `-d` argument into concrete devices: a short name, an alias, or
/// `none` (the empty list, for recovery builds that target a platform).
pub fn expand_device_name(name: &str) -> Option<Vec<Device>> {
    if name == "none" {
        return Some(Vec::new());
    }
    if let Some(device) = Device::from_short_name(name) {
        return Some(vec![device]);
    }
    let (_, members) = DEVICE_ALIASES.iter().find(|&&(alias, _)| alias == name)?;
    let mut devices = Vec::new();
    for member in members.iter() {
        devices.extend(expand_device_name(member)?);
    }
    Some(devices)
}

/// Parse a three-character token of the new serial scheme in base 32.
pub fn parse_base32_code(token: &str) -> Option<u16> {
    if token.len() != 3 {
        return None;
    }
    u16::from_str_radix(token, 32).ok()
}
