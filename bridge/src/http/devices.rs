//! SmartThings REST endpoints

use cloud_api::models::{
    CommandRequest, Device, DeviceStatus, ItemList, Location, Room, Scene,
};

use crate::errors::BridgeError;
use crate::http::cloud::{Call, CloudClient};

impl CloudClient {
    /// List locations visible to the token
    pub async fn list_locations(&self) -> Result<Vec<Location>, BridgeError> {
        let list: ItemList<Location> = self.call_json(Call::get("/locations")).await?;
        Ok(list.items)
    }

    /// List devices of a location
    pub async fn list_devices(&self, location_id: &str) -> Result<Vec<Device>, BridgeError> {
        let query = [("locationId", location_id)];
        let list: ItemList<Device> = self
            .call_json(Call::get("/devices").query(&query))
            .await?;
        Ok(list.items)
    }

    /// List rooms of a location
    pub async fn list_rooms(&self, location_id: &str) -> Result<Vec<Room>, BridgeError> {
        let path = format!("/locations/{}/rooms", location_id);
        let list: ItemList<Room> = self.call_json(Call::get(&path)).await?;
        Ok(list.items)
    }

    /// List scenes of a location
    pub async fn list_scenes(&self, location_id: &str) -> Result<Vec<Scene>, BridgeError> {
        let query = [("locationId", location_id)];
        let list: ItemList<Scene> = self.call_json(Call::get("/scenes").query(&query)).await?;
        Ok(list.items)
    }

    /// Execute a scene
    pub async fn execute_scene(&self, scene_id: &str) -> Result<(), BridgeError> {
        let path = format!("/scenes/{}/execute", scene_id);
        self.call(Call::post(&path, serde_json::json!({}))).await?;
        Ok(())
    }

    /// Full status of a device.
    ///
    /// `fail_fast` callers get `RateLimited` instead of waiting for budget.
    pub async fn device_status(
        &self,
        device_id: &str,
        fail_fast: bool,
    ) -> Result<DeviceStatus, BridgeError> {
        let path = format!("/devices/{}/status", device_id);
        let mut call = Call::get(&path).device(device_id);
        if fail_fast {
            call = call.fail_fast();
        }
        self.call_json(call).await
    }

    /// Send one command to the main component of a device
    pub async fn send_command(
        &self,
        device_id: &str,
        capability: &str,
        command: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<(), BridgeError> {
        let path = format!("/devices/{}/commands", device_id);
        let body = serde_json::to_value(CommandRequest::main(capability, command, arguments))?;
        self.call(Call::post(&path, body).device(device_id)).await?;
        Ok(())
    }
}
