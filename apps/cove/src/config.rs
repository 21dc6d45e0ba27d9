use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding one JSON envelope per persisted document.
    pub data_dir: PathBuf,
    /// Prebuilt UI bundle; served with an index.html fallback when present.
    pub dist_dir: PathBuf,
    /// Outbound channel capacity per connection.
    pub send_buffer: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("COVE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            data_dir: env::var("COVE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/documents")),
            dist_dir: env::var("COVE_DIST_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./dist")),
            send_buffer: env::var("COVE_SEND_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            data_dir: PathBuf::from("./data/documents"),
            dist_dir: PathBuf::from("./dist"),
            send_buffer: 256,
        }
    }
}
