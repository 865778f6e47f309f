//! Embedded HTML pages
//!
//! Templates are rendered once per address scheme change; serving a page is
//! a reference count bump on prebuilt bytes.

use bytes::Bytes;

use crate::security::AddressScheme;

const INDEX_TEMPLATE: &str = include_str!("../../assets/index.html");
const PIN_REQUEST_TEMPLATE: &str = include_str!("../../assets/pinrequest.html");
const BLOCKED_PAGE: &str = include_str!("../../assets/blocked.html");

/// Favicon served at `/favicon.ico`
pub const FAVICON: &[u8] = include_bytes!("../../assets/favicon.png");

const STREAM_ADDRESS: &str = "SCREEN_STREAM_ADDRESS";
const SNAPSHOT_ADDRESS: &str = "JPEG_FALLBACK_ADDRESS";
const BACKGROUND_COLOR: &str = "BACKGROUND_COLOR";
const WRONG_PIN_MESSAGE: &str = "WRONG_PIN_MESSAGE";

const WRONG_PIN_TEXT: &str = "Wrong PIN";

/// Pages rendered for one address scheme
#[derive(Debug, Clone)]
pub struct Pages {
    /// Landing page embedding the stream
    pub index: Bytes,
    /// PIN entry form
    pub pin_request: Bytes,
    /// PIN entry form with the wrong-PIN message
    pub pin_error: Bytes,
    /// Shown to blocked addresses
    pub blocked: Bytes,
}

impl Pages {
    /// Render every page for `scheme` with the given RGB background
    pub fn render(scheme: &AddressScheme, back_color: u32) -> Self {
        let color = format!("#{:06X}", back_color & 0x00FF_FFFF);
        let index = INDEX_TEMPLATE
            .replacen(BACKGROUND_COLOR, &color, 1)
            .replace(STREAM_ADDRESS, scheme.stream_path())
            .replace(SNAPSHOT_ADDRESS, scheme.snapshot_path());

        Self {
            index: Bytes::from(index),
            pin_request: Bytes::from(PIN_REQUEST_TEMPLATE.replacen(WRONG_PIN_MESSAGE, "&nbsp;", 1)),
            pin_error: Bytes::from(PIN_REQUEST_TEMPLATE.replacen(
                WRONG_PIN_MESSAGE,
                WRONG_PIN_TEXT,
                1,
            )),
            blocked: Bytes::from_static(BLOCKED_PAGE.as_bytes()),
        }
    }

    pub fn favicon() -> Bytes {
        Bytes::from_static(FAVICON)
    }
}
