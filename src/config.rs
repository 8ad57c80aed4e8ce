use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the numbered job directory namespace
    pub uploads_path: PathBuf,

    /// Digits per slot name, e.g. 4 gives `0000`..`9999`
    pub slot_width: usize,

    /// Slot ceiling; never more than `10^slot_width`
    pub max_slots: usize,

    /// Worker program, the driver path is appended as its last argument
    pub submit_command: String,

    /// Extra worker arguments placed before the driver path
    pub submit_args: Vec<String>,

    /// Maximum payload size for all requests (in bytes)
    /// Default: 10MB (10 * 1024 * 1024)
    pub max_payload_size: usize,

    /// Directory for the service's own rotating log files
    pub log_dir: PathBuf,

    pub host: String,
    pub port: u16,

    /// How long shutdown waits for running jobs to record completion
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Optional environment variables:
    /// - UPLOADS_PATH: job directory root (default: uploads)
    /// - SLOT_WIDTH: zero-padded digits per slot, 1..=9 (default: 4)
    /// - MAX_UPLOAD_SLOTS: slot ceiling (default: 10^SLOT_WIDTH)
    /// - SUBMIT_COMMAND: worker program (default: spark-submit)
    /// - SUBMIT_ARGS: whitespace-separated worker arguments (default: none)
    /// - MAX_PAYLOAD_SIZE: maximum request payload size in bytes (default: 10485760 = 10MB)
    /// - LOG_DIR: service log directory (default: logs)
    /// - HOST / PORT: bind address (default: 127.0.0.1:8080)
    /// - SHUTDOWN_GRACE_SECS: wait for running jobs on shutdown (default: 30)
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let slot_width: usize = parse_or(&lookup, "SLOT_WIDTH", 4)?;
        if !(1..=9).contains(&slot_width) {
            return Err(format!("SLOT_WIDTH must be between 1 and 9, got {}", slot_width));
        }

        let capacity = 10usize.pow(slot_width as u32);
        let max_slots: usize = parse_or(&lookup, "MAX_UPLOAD_SLOTS", capacity)?;
        if max_slots == 0 || max_slots > capacity {
            return Err(format!(
                "MAX_UPLOAD_SLOTS must be between 1 and {} for SLOT_WIDTH={}, got {}",
                capacity, slot_width, max_slots
            ));
        }

        let submit_command = lookup("SUBMIT_COMMAND")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "spark-submit".to_string());
        let submit_args = lookup("SUBMIT_ARGS")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Config {
            uploads_path: lookup("UPLOADS_PATH").unwrap_or_else(|| "uploads".to_string()).into(),
            slot_width,
            max_slots,
            submit_command,
            submit_args,
            max_payload_size: parse_or(&lookup, "MAX_PAYLOAD_SIZE", 10 * 1024 * 1024)?,
            log_dir: lookup("LOG_DIR").unwrap_or_else(|| "logs".to_string()).into(),
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 30)?),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, String> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}
