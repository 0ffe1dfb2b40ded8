//! Deployment-varying knobs (§10.3). Protocol constants like
//! [`crate::engine::PROTOCOL_VERSION`] and [`crate::transport::chunk::CHUNK_SIZE`]
//! stay as `const` since they are part of the wire contract, not configuration.

use std::time::Duration;

/// Fixed GATT surface (§4.G, §6). Opaque to this crate beyond their bytes.
pub const SERVICE_UUID: &str = "0000180f-0000-1000-8000-00805f9b34fb";
pub const READ_CHARACTERISTIC_UUID: &str = "12345678-0000-1000-8000-00805f9b34fb";
pub const WRITE_CHARACTERISTIC_UUID: &str = "87654321-0000-1000-8000-00805f9b34fb";
pub const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

/// Runtime configuration for the orchestrator binary. Library code never
/// reads environment variables or the filesystem directly; only
/// [`Config::from_env`] does, so the rest of the crate stays testable with
/// plain struct literals.
#[derive(Debug, Clone)]
pub struct Config {
    /// Negentropy `frame_size_limit`: `0` is unbounded, else must be `>= 4096`.
    pub frame_size_limit: u32,
    /// Path to the file holding this installation's persisted device UUID
    /// (§11.1). `None` means role selection will regenerate a UUID every
    /// process start, which is only acceptable for tests.
    pub device_uuid_path: Option<std::path::PathBuf>,
    pub service_uuid: String,
    pub read_characteristic_uuid: String,
    pub write_characteristic_uuid: String,
    pub cccd_uuid: String,
    /// Delay between sequential chunk writes within one message (§4.G).
    pub inter_chunk_delay: Duration,
    /// Backoff after a scan-cycle error (§5).
    pub scan_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_size_limit: 0,
            device_uuid_path: dirs::data_dir().map(|dir| dir.join("negentropy-sync/device_uuid")),
            service_uuid: SERVICE_UUID.to_string(),
            read_characteristic_uuid: READ_CHARACTERISTIC_UUID.to_string(),
            write_characteristic_uuid: WRITE_CHARACTERISTIC_UUID.to_string(),
            cccd_uuid: CCCD_UUID.to_string(),
            inter_chunk_delay: Duration::from_millis(10),
            scan_backoff: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Start from [`Config::default`] and apply any recognised
    /// `NEGENTROPY_SYNC_*` environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(limit) = std::env::var("NEGENTROPY_SYNC_FRAME_SIZE_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.frame_size_limit = limit;
            }
        }
        if let Ok(path) = std::env::var("NEGENTROPY_SYNC_DEVICE_UUID_PATH") {
            config.device_uuid_path = Some(std::path::PathBuf::from(path));
        }
        if let Ok(secs) = std::env::var("NEGENTROPY_SYNC_SCAN_BACKOFF_SECS") {
            if let Ok(secs) = secs.parse() {
                config.scan_backoff = Duration::from_secs(secs);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_frame_size_limit_is_unbounded() {
        assert_eq!(Config::default().frame_size_limit, 0);
    }

    #[test]
    fn env_override_parses_frame_size_limit() {
        std::env::set_var("NEGENTROPY_SYNC_FRAME_SIZE_LIMIT", "8192");
        let config = Config::from_env();
        assert_eq!(config.frame_size_limit, 8192);
        std::env::remove_var("NEGENTROPY_SYNC_FRAME_SIZE_LIMIT");
    }
}
