//! Orchestrator binary entry point (§6 exit codes): installs logging,
//! loads configuration, resolves this installation's persistent device
//! UUID, and drives the in-memory transport demo loop.
//!
//! Wiring a real GATT stack (scanning, service discovery, advertising) is
//! outside this crate's scope per spec.md §1; this binary exercises the
//! same orchestrator against [`InMemoryBleTransport`] so the full protocol
//! stack can run end to end without hardware.

use std::io::Write as _;
use std::path::Path;

use negentropy_sync::config::Config;
use negentropy_sync::content_store::InMemoryContentStore;
use negentropy_sync::session::Orchestrator;
use negentropy_sync::transport::ble::InMemoryBleTransport;
use uuid::Uuid;

/// Generate-or-load the stable per-process device UUID (§11.1). The
/// original source hardcodes this to zeros with a TODO; role selection
/// needs it to be both random and persisted across restarts.
fn load_or_create_device_uuid(path: &Path) -> std::io::Result<Uuid> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        if let Ok(uuid) = contents.trim().parse::<Uuid>() {
            return Ok(uuid);
        }
        tracing::warn!(?path, "device uuid file unreadable, regenerating");
    }

    let uuid = Uuid::new_v4();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(uuid.to_string().as_bytes())?;
    Ok(uuid)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let Some(uuid_path) = config.device_uuid_path.clone() else {
        tracing::error!("no device uuid path configured and no data directory available");
        std::process::exit(1);
    };

    let device_uuid = match load_or_create_device_uuid(&uuid_path) {
        Ok(uuid) => uuid,
        Err(e) => {
            tracing::error!(error = %e, "failed to load or create device uuid");
            std::process::exit(1);
        }
    };
    tracing::info!(%device_uuid, "device identity resolved");

    let transport = InMemoryBleTransport::with_inter_chunk_delay(config.inter_chunk_delay);
    let store = InMemoryContentStore::new();
    let mut orchestrator = Orchestrator::new(transport, store, config, device_uuid);

    tracing::info!("orchestrator ready; no scanner wired in this demo binary");

    // Drain whatever transport events arrive on the in-memory loop until
    // explicitly told to stop, matching the Python original's run-until-
    // disconnected loop (`bluetooth_reconciliation.py`'s `_running` flag).
    loop {
        if let Err(e) = orchestrator.poll().await {
            tracing::warn!(error = %e, "error polling transport events");
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        break; // demo binary: nothing to scan for without real hardware.
    }

    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_uuid_persists_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_uuid");

        let first = load_or_create_device_uuid(&path).unwrap();
        let second = load_or_create_device_uuid(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_uuid_file_is_regenerated_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_uuid");
        std::fs::write(&path, b"not a uuid").unwrap();

        let uuid = load_or_create_device_uuid(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), uuid.to_string());
    }
}
