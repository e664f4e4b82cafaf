//! Controller-wide tunables read and written by Get/Set Features.

use serde::{Deserialize, Serialize};

use crate::status::AdminError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FeatureId {
    Arbitration = 0x01,
    PowerManagement = 0x02,
    LbaRangeType = 0x03,
    TemperatureThreshold = 0x04,
    ErrorRecovery = 0x05,
    VolatileWriteCache = 0x06,
    NumberOfQueues = 0x07,
    InterruptCoalescing = 0x08,
    InterruptVectorConfiguration = 0x09,
    WriteAtomicity = 0x0a,
    AsyncEventConfiguration = 0x0b,
    SoftwareProgressMarker = 0x80,
}

impl FeatureId {
    pub fn from_raw(fid: u8) -> Option<Self> {
        Some(match fid {
            0x01 => FeatureId::Arbitration,
            0x02 => FeatureId::PowerManagement,
            0x03 => FeatureId::LbaRangeType,
            0x04 => FeatureId::TemperatureThreshold,
            0x05 => FeatureId::ErrorRecovery,
            0x06 => FeatureId::VolatileWriteCache,
            0x07 => FeatureId::NumberOfQueues,
            0x08 => FeatureId::InterruptCoalescing,
            0x09 => FeatureId::InterruptVectorConfiguration,
            0x0a => FeatureId::WriteAtomicity,
            0x0b => FeatureId::AsyncEventConfiguration,
            0x80 => FeatureId::SoftwareProgressMarker,
            _ => return None,
        })
    }
}

/// Raw 32-bit value of every stored feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureValues {
    pub arbitration: u32,
    pub power_management: u32,
    pub temperature_threshold: u32,
    pub error_recovery: u32,
    pub volatile_write_cache: u32,
    pub number_of_queues: u32,
    pub interrupt_coalescing: u32,
    pub interrupt_vector_configuration: u32,
    pub write_atomicity: u32,
    pub async_event_configuration: u32,
    pub software_progress_marker: u32,
}

impl FeatureValues {
    /// Number of Queues value (NCQA/NSQA, both zero-based) for a descriptor table of `max_queues`
    /// slots, one of which is the admin queue.
    pub fn number_of_queues_for(max_queues: u16) -> u32 {
        let io_queues = u32::from(max_queues.saturating_sub(2));
        io_queues << 16 | io_queues
    }

    /// Caps the Number of Queues value at what a table of `max_queues` slots can hold.
    pub fn clamp_number_of_queues(&mut self, max_queues: u16) {
        let limit = Self::number_of_queues_for(max_queues);
        let nsqa = (self.number_of_queues & 0xffff).min(limit & 0xffff);
        let ncqa = (self.number_of_queues >> 16).min(limit >> 16);
        self.number_of_queues = ncqa << 16 | nsqa;
    }
}

#[derive(Debug, Clone)]
pub struct FeatureStore {
    values: FeatureValues,
}

impl FeatureStore {
    pub fn new(values: FeatureValues) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &FeatureValues {
        &self.values
    }

    /// Applies Set Features. Returns completion DW0.
    pub fn set(&mut self, fid: u8, value: u32) -> Result<u32, AdminError> {
        let id = FeatureId::from_raw(fid).ok_or_else(|| {
            tracing::debug!(fid, "set features: unknown feature id");
            AdminError::InvalidField
        })?;
        match id {
            FeatureId::LbaRangeType => {
                tracing::debug!("set features: LBA range type not supported, ignoring");
            }
            FeatureId::SoftwareProgressMarker => {
                // Owned by the controller; the host can only read it back.
                tracing::debug!(value, "set features: software progress marker is read-only");
            }
            id => {
                if let Some(slot) = self.stored_mut(id) {
                    *slot = value;
                }
            }
        }
        Ok(0)
    }

    /// Applies Get Features. Returns completion DW0 (the current value).
    pub fn get(&self, fid: u8) -> Result<u32, AdminError> {
        let id = FeatureId::from_raw(fid).ok_or_else(|| {
            tracing::debug!(fid, "get features: unknown feature id");
            AdminError::InvalidField
        })?;
        let v = &self.values;
        Ok(match id {
            FeatureId::Arbitration => v.arbitration,
            FeatureId::PowerManagement => v.power_management,
            FeatureId::LbaRangeType => 0,
            FeatureId::TemperatureThreshold => v.temperature_threshold,
            FeatureId::ErrorRecovery => v.error_recovery,
            FeatureId::VolatileWriteCache => v.volatile_write_cache,
            FeatureId::NumberOfQueues => v.number_of_queues,
            FeatureId::InterruptCoalescing => v.interrupt_coalescing,
            FeatureId::InterruptVectorConfiguration => v.interrupt_vector_configuration,
            FeatureId::WriteAtomicity => v.write_atomicity,
            FeatureId::AsyncEventConfiguration => v.async_event_configuration,
            FeatureId::SoftwareProgressMarker => v.software_progress_marker,
        })
    }

    /// Updates the progress marker from the controller side (e.g. a firmware/boot model).
    pub fn set_software_progress_marker(&mut self, value: u32) {
        self.values.software_progress_marker = value;
    }

    fn stored_mut(&mut self, id: FeatureId) -> Option<&mut u32> {
        let v = &mut self.values;
        Some(match id {
            FeatureId::Arbitration => &mut v.arbitration,
            FeatureId::PowerManagement => &mut v.power_management,
            FeatureId::TemperatureThreshold => &mut v.temperature_threshold,
            FeatureId::ErrorRecovery => &mut v.error_recovery,
            FeatureId::VolatileWriteCache => &mut v.volatile_write_cache,
            FeatureId::NumberOfQueues => &mut v.number_of_queues,
            FeatureId::InterruptCoalescing => &mut v.interrupt_coalescing,
            FeatureId::InterruptVectorConfiguration => &mut v.interrupt_vector_configuration,
            FeatureId::WriteAtomicity => &mut v.write_atomicity,
            FeatureId::AsyncEventConfiguration => &mut v.async_event_configuration,
            FeatureId::LbaRangeType | FeatureId::SoftwareProgressMarker => return None,
        })
    }
}
