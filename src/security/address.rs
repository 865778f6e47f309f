//! PIN-derived stream addresses
//!
//! With the PIN gate enabled the stream is not served at the well known
//! `/screen_stream.mjpeg` path. Instead the path carries a suffix drawn from a
//! PRNG seeded with the PIN, so the only practical way to learn it is to
//! submit the right PIN through `/?pin=` and read it from the landing page.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// Landing page path
pub const ROOT_PATH: &str = "/";
/// Stream path served when the PIN gate is off
pub const DEFAULT_STREAM_PATH: &str = "/screen_stream.mjpeg";
/// Favicon path
pub const FAVICON_PATH: &str = "/favicon.ico";
/// Prefix of PIN submissions
pub const PIN_PATH_PREFIX: &str = "/?pin=";

const STREAM_STEM: &str = "/screen_stream";
const STREAM_EXTENSION: &str = ".mjpeg";
const SNAPSHOT_EXTENSION: &str = ".jpeg";
const PATH_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 10;
const PIN_LEN: usize = 4;

/// Check that `pin` is exactly four ASCII digits
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() == PIN_LEN && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::InvalidPin(pin.to_string()))
    }
}

/// Generate a random four digit PIN
pub fn generate_pin() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000u32))
}

/// Derive the obfuscated stream path for `pin`
///
/// Deterministic: the same PIN always yields the same path.
pub fn derive_stream_path(pin: &str) -> Result<String> {
    validate_pin(pin)?;
    let seed: u64 = pin
        .parse()
        .map_err(|_| Error::InvalidPin(pin.to_string()))?;

    let mut rng = StdRng::seed_from_u64(seed);
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| PATH_ALPHABET[rng.gen_range(0..PATH_ALPHABET.len())] as char)
        .collect();

    Ok(format!("{}_{}{}", STREAM_STEM, suffix, STREAM_EXTENSION))
}

/// Current set of request paths for one server run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressScheme {
    pin: String,
    pin_enabled: bool,
    stream_path: String,
    snapshot_path: String,
    pin_path: String,
}

impl AddressScheme {
    /// Compute the paths for `pin`
    ///
    /// The PIN is only validated when the gate is enabled.
    pub fn new(pin: &str, pin_enabled: bool) -> Result<Self> {
        let stream_path = if pin_enabled {
            derive_stream_path(pin)?
        } else {
            DEFAULT_STREAM_PATH.to_string()
        };
        let snapshot_path = format!(
            "{}{}",
            stream_path.trim_end_matches(STREAM_EXTENSION),
            SNAPSHOT_EXTENSION
        );

        Ok(Self {
            pin: pin.to_string(),
            pin_enabled,
            pin_path: format!("{}{}", PIN_PATH_PREFIX, pin),
            stream_path,
            snapshot_path,
        })
    }

    /// Scheme without a PIN gate
    pub fn open() -> Self {
        Self {
            pin: String::new(),
            pin_enabled: false,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            snapshot_path: format!("{}{}", STREAM_STEM, SNAPSHOT_EXTENSION),
            pin_path: PIN_PATH_PREFIX.to_string(),
        }
    }

    /// Whether the PIN gate is enabled
    pub fn pin_enabled(&self) -> bool {
        self.pin_enabled
    }

    /// Current PIN
    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// Path of the MJPEG stream
    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    /// Path of the single-JPEG snapshot
    pub fn snapshot_path(&self) -> &str {
        &self.snapshot_path
    }

    /// Path a correct PIN submission arrives at
    pub fn pin_path(&self) -> &str {
        &self.pin_path
    }

    /// Whether `target` is a PIN submission (correct or not)
    pub fn is_pin_submission(&self, target: &str) -> bool {
        target.starts_with(PIN_PATH_PREFIX)
    }

    /// Whether `target` carries the correct PIN
    pub fn matches_pin(&self, target: &str) -> bool {
        self.pin_enabled && target == self.pin_path
    }
}
