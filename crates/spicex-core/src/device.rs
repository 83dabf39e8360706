//! Device entities and point-in-time snapshots.
//!
//! A [`DeviceSnapshot`] is captured for every client request. Indices are
//! 1-based and only meaningful inside the snapshot that assigned them: two
//! snapshots taken at different times may give the same physical device
//! different indices if the device set changed in between. Clients address
//! devices by index on the wire, so this is part of the protocol contract.

use std::fmt;
use std::num::NonZeroU32;

use crate::error::RequestError;

// ============================================================================
// Identifiers
// ============================================================================

/// Stable backend-assigned handle for a USB device.
///
/// Never sent to clients. Lets the daemon keep talking about the same
/// physical device while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Creates a device id from the backend's raw handle.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev-{}", self.0)
    }
}

/// 1-based position of a device within one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIndex(NonZeroU32);

impl DeviceIndex {
    /// Creates an index, returning `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Returns the 1-based value.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Converts a 0-based position into a 1-based index.
    fn from_position(position: usize) -> Option<Self> {
        let one_based = u32::try_from(position).ok()?.checked_add(1)?;
        Self::new(one_based)
    }
}

impl From<NonZeroU32> for DeviceIndex {
    fn from(value: NonZeroU32) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Devices
// ============================================================================

/// What the backend reports about one device, before indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub description: String,
    pub redirectable: bool,
    pub attached: bool,
}

/// A device as seen by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Position in the snapshot this device came from
    pub index: DeviceIndex,

    /// Backend handle, stable across snapshots
    pub id: DeviceId,

    /// Human-readable description
    pub description: String,

    /// Whether the backend allows redirecting this device
    pub redirectable: bool,

    /// Whether the device is currently attached to the remote session
    pub attached: bool,
}

impl Device {
    fn from_info(index: DeviceIndex, info: DeviceInfo) -> Self {
        Self {
            index,
            id: info.id,
            description: info.description,
            redirectable: info.redirectable,
            attached: info.attached,
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Ordered list of devices captured at the moment of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    devices: Vec<Device>,
}

impl DeviceSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures a snapshot, assigning indices 1..N in backend order.
    pub fn capture(infos: impl IntoIterator<Item = DeviceInfo>) -> Self {
        let devices = infos
            .into_iter()
            .enumerate()
            .filter_map(|(position, info)| {
                DeviceIndex::from_position(position).map(|index| Device::from_info(index, info))
            })
            .collect();
        Self { devices }
    }

    /// Resolves a 1-based index against this snapshot.
    ///
    /// # Errors
    ///
    /// `RequestError::IndexOutOfRange` when `index < 1 || index > len()`.
    pub fn resolve(&self, index: u32) -> Result<&Device, RequestError> {
        let out_of_range = RequestError::IndexOutOfRange {
            index,
            len: self.devices.len(),
        };
        let position = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .ok_or_else(|| out_of_range.clone())?;
        self.devices.get(position).ok_or(out_of_range)
    }

    /// Number of devices in the snapshot.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if the backend reported no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterates devices in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.devices.iter()
    }
}

impl<'a> IntoIterator for &'a DeviceSnapshot {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u64, description: &str, redirectable: bool, attached: bool) -> DeviceInfo {
        DeviceInfo {
            id: DeviceId::new(id),
            description: description.to_string(),
            redirectable,
            attached,
        }
    }

    fn two_devices() -> DeviceSnapshot {
        DeviceSnapshot::capture(vec![info(10, "D1", true, false), info(20, "D2", false, true)])
    }

    #[test]
    fn test_capture_assigns_indices_in_backend_order() {
        let snapshot = two_devices();
        let indices: Vec<u32> = snapshot.iter().map(|d| d.index.get()).collect();
        let ids: Vec<u64> = snapshot.iter().map(|d| d.id.as_u64()).collect();

        assert_eq!(indices, vec![1, 2]);
        assert_eq!(ids, vec![10, 20]);
    }

    #[test]
    fn test_resolve_in_range() {
        let snapshot = two_devices();

        let first = snapshot.resolve(1).unwrap();
        assert_eq!(first.description, "D1");

        let second = snapshot.resolve(2).unwrap();
        assert_eq!(second.description, "D2");
        assert!(second.attached);
    }

    #[test]
    fn test_resolve_out_of_range_iff_outside_bounds() {
        let snapshot = two_devices();

        for index in 0..=10u32 {
            let result = snapshot.resolve(index);
            let in_range = (1..=2).contains(&index);
            assert_eq!(result.is_ok(), in_range, "index {index}");
            if !in_range {
                assert_eq!(
                    result.unwrap_err(),
                    RequestError::IndexOutOfRange { index, len: 2 }
                );
            }
        }
        assert!(snapshot.resolve(u32::MAX).is_err());
    }

    #[test]
    fn test_resolve_on_empty_snapshot() {
        let snapshot = DeviceSnapshot::new();
        assert!(snapshot.is_empty());
        assert!(matches!(
            snapshot.resolve(1),
            Err(RequestError::IndexOutOfRange { index: 1, len: 0 })
        ));
    }

    #[test]
    fn test_device_index_rejects_zero() {
        assert!(DeviceIndex::new(0).is_none());
        assert_eq!(DeviceIndex::new(7).map(DeviceIndex::get), Some(7));
        assert_eq!(DeviceIndex::new(3).unwrap().to_string(), "3");
    }

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId::new(42).to_string(), "dev-42");
    }
}
