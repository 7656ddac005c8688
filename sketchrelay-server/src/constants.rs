include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Maximum size of a scrape response body.
pub const MAX_SCRAPE_SIZE: usize = 64 * 1024 * 1024;

/// Maximum number of bytes of an error response that are logged.
pub const ERROR_BODY_PREVIEW: usize = 200;
