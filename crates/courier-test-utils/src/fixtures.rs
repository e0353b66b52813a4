// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prekey bundle and identity builders.

use courier_core::types::{PreKey, RawDeviceBundle, RawPrekeyBundle, SignedPreKey};
use courier_core::{DeviceId, LocalIdentity, ServiceId};

fn signed(key_id: u32) -> SignedPreKey {
    SignedPreKey {
        key_id,
        public_key: vec![key_id as u8; 32],
        signature: vec![0x5A; 64],
    }
}

/// A device entry carrying every key a session needs.
pub fn device(device_id: DeviceId) -> RawDeviceBundle {
    RawDeviceBundle {
        device_id,
        registration_id: 1_000 + device_id,
        pre_key: Some(PreKey {
            key_id: device_id,
            public_key: vec![device_id as u8; 32],
        }),
        signed_pre_key: Some(signed(device_id)),
        pq_pre_key: Some(signed(100 + device_id)),
    }
}

/// A complete bundle for `devices`.
pub fn bundle(devices: &[DeviceId]) -> RawPrekeyBundle {
    RawPrekeyBundle {
        identity_key: vec![0x05; 33],
        devices: devices.iter().copied().map(device).collect(),
    }
}

/// A bundle whose `broken` device lacks its post-quantum prekey.
pub fn bundle_missing_pq(devices: &[DeviceId], broken: DeviceId) -> RawPrekeyBundle {
    let mut raw = bundle(devices);
    for entry in raw.devices.iter_mut().filter(|d| d.device_id == broken) {
        entry.pq_pre_key = None;
    }
    raw
}

/// Our own account, primary device.
pub fn local_identity() -> LocalIdentity {
    LocalIdentity {
        service_id: ServiceId::from("self"),
        device_id: 1,
    }
}
