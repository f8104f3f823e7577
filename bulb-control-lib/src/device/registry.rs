use std::collections::HashMap;

use crate::device::{Device, DeviceProperties};

/// Outcome of recording a sighting in the [`DeviceRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First sighting of this id.
    Added,
    /// Known id, and the reported properties differ from the stored snapshot.
    Updated,
    /// Known id with an identical snapshot.
    Unchanged,
}

/// The table of known devices, keyed by device id.
///
/// Devices are kept in the order they were first seen. Nothing is ever
/// removed.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sighting. The stored properties are replaced wholesale when
    /// anything differs, so a single changed field reports [`Upsert::Updated`].
    pub fn upsert(&mut self, id: &str, properties: DeviceProperties) -> Upsert {
        match self.index.get(id) {
            Some(&position) => {
                let device = &mut self.devices[position];
                if device.properties() == &properties {
                    Upsert::Unchanged
                } else {
                    device.replace_properties(properties);
                    Upsert::Updated
                }
            }
            None => {
                self.index.insert(id.to_string(), self.devices.len());
                self.devices.push(Device::new(id.to_string(), properties));
                Upsert::Added
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.index.get(id).map(|&position| &self.devices[position])
    }

    /// Applies an optimistic local change, e.g. the power state a command is
    /// about to request. Returns `false` for an unknown id.
    pub fn update_properties<F>(&mut self, id: &str, update: F) -> bool
    where
        F: FnOnce(&mut DeviceProperties),
    {
        match self.index.get(id) {
            Some(&position) => {
                update(self.devices[position].properties_mut());
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
