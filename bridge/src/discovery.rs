//! Device, room and scene discovery

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use cloud_api::models::Scene;

use crate::devices::kind::DeviceKind;
use crate::errors::BridgeError;
use crate::filesys::file::File;
use crate::http::cloud::CloudClient;
use crate::state::cache::{DeviceInfo, StateCache};
use crate::storage::settings::DeviceFilters;

/// Discovery result summary
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub location_id: String,
    pub devices: usize,
    pub skipped: usize,
    pub removed: usize,
    pub scenes: usize,
}

/// Discovers devices for one location and keeps the state cache in step
pub struct Discovery {
    cloud: Arc<CloudClient>,
    cache: Arc<StateCache>,
    filters: DeviceFilters,
    location_id: RwLock<Option<String>>,
    devices_file: File,
    scenes: RwLock<Vec<Scene>>,
}

impl Discovery {
    pub fn new(
        cloud: Arc<CloudClient>,
        cache: Arc<StateCache>,
        filters: DeviceFilters,
        location_id: Option<String>,
        devices_file: File,
    ) -> Self {
        Self {
            cloud,
            cache,
            filters,
            location_id: RwLock::new(location_id),
            devices_file,
            scenes: RwLock::new(Vec::new()),
        }
    }

    /// Scenes found by the last discovery
    pub fn scenes(&self) -> Vec<Scene> {
        self.scenes.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn location_id(&self) -> Option<String> {
        self.location_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Seed the cache from the last discovered device list. Returns the
    /// number of devices loaded.
    pub async fn load_cached(&self) -> Result<usize, BridgeError> {
        if !self.devices_file.exists().await {
            return Ok(0);
        }
        let infos: Vec<DeviceInfo> = self.devices_file.read_json().await?;
        let count = infos.len();
        for info in infos {
            self.cache.upsert(info);
        }
        info!("Loaded {} devices from the device cache", count);
        Ok(count)
    }

    async fn resolve_location(&self) -> Result<String, BridgeError> {
        if let Some(id) = self.location_id() {
            return Ok(id);
        }

        let locations = self.cloud.list_locations().await?;
        let location = locations
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::NotFound("no location visible to this account".into()))?;
        info!(
            "No location configured, using {} ({})",
            location.location_id,
            location.name.as_deref().unwrap_or("unnamed")
        );

        *self.location_id.write().unwrap_or_else(|e| e.into_inner()) =
            Some(location.location_id.clone());
        Ok(location.location_id)
    }

    /// List devices, rooms and scenes and reconcile the cache with them
    pub async fn run(&self) -> Result<DiscoveryReport, BridgeError> {
        let location_id = self.resolve_location().await?;
        info!("Discovering devices in location {}", location_id);

        let devices = self.cloud.list_devices(&location_id).await?;

        let rooms: HashMap<String, String> = match self.cloud.list_rooms(&location_id).await {
            Ok(rooms) => rooms
                .into_iter()
                .filter_map(|r| r.name.map(|name| (r.room_id, name)))
                .collect(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Failed to list rooms: {}", e);
                HashMap::new()
            }
        };

        let mut report = DiscoveryReport {
            location_id: location_id.clone(),
            ..DiscoveryReport::default()
        };
        let mut keep = HashSet::new();

        for device in devices {
            let capabilities = device.main_capability_ids();
            if capabilities.is_empty() {
                debug!("Skipping {}: no capabilities", device.device_id);
                report.skipped += 1;
                continue;
            }

            let kind = DeviceKind::classify(&capabilities, device.display_name());
            match kind {
                Some(kind) if kind.included_by(&self.filters) => {}
                Some(kind) => {
                    debug!("Skipping {}: {} devices excluded", device.display_name(), kind);
                    report.skipped += 1;
                    continue;
                }
                None => {
                    debug!("Skipping {}: unsupported device type", device.display_name());
                    report.skipped += 1;
                    continue;
                }
            }

            let info = DeviceInfo {
                device_id: device.device_id.clone(),
                label: device.display_name().to_string(),
                room: device.room_id.as_ref().and_then(|id| rooms.get(id).cloned()),
                kind,
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            };
            keep.insert(info.device_id.clone());
            self.cache.upsert(info);
            report.devices += 1;
        }

        report.removed = self.cache.retain(&keep).len();

        match self.cloud.list_scenes(&location_id).await {
            Ok(scenes) => {
                report.scenes = scenes.len();
                *self.scenes.write().unwrap_or_else(|e| e.into_inner()) = scenes;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Failed to list scenes: {}", e),
        }

        if let Err(e) = self.devices_file.write_json(&self.cache.infos()).await {
            warn!("Failed to write device cache: {}", e);
        }

        info!(
            "Discovery complete: {} devices, {} skipped, {} removed, {} scenes",
            report.devices, report.skipped, report.removed, report.scenes
        );
        Ok(report)
    }
}
