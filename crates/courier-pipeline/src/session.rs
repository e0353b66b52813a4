// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session establishment and per-address serialization of ratchet mutations.
//!
//! Every protocol-store mutation for one `(our identity, peer, device)` triple
//! runs through [`SessionJobQueue`], so concurrent sends from different
//! destination queues (a group and a direct chat sharing a member) never
//! interleave on the same session.

use std::future::Future;
use std::sync::Arc;

use courier_core::types::PrekeyBundleSet;
use courier_core::{
    Address, LocalIdentity, ProtocolError, ProtocolStore, QualifiedAddress, SendError,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::classify::classify_protocol_error;

/// Exclusive FIFO job runner keyed by qualified address.
#[derive(Debug, Default)]
pub struct SessionJobQueue {
    locks: DashMap<QualifiedAddress, Arc<Mutex<()>>>,
}

impl SessionJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` once no other job for `address` is running.
    ///
    /// Waiters are served in arrival order.
    pub async fn run<F, Fut, T>(&self, address: &QualifiedAddress, job: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.locks.entry(address.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            job().await
        };
        drop(lock);
        // Drop the entry once nobody else holds or waits on it.
        self.locks
            .remove_if(address, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Addresses with a running or waiting job.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Starts sessions from validated prekey bundles.
pub struct SessionNegotiator {
    our: LocalIdentity,
    protocol: Arc<dyn ProtocolStore>,
    jobs: Arc<SessionJobQueue>,
}

impl SessionNegotiator {
    pub fn new(
        our: LocalIdentity,
        protocol: Arc<dyn ProtocolStore>,
        jobs: Arc<SessionJobQueue>,
    ) -> Self {
        Self {
            our,
            protocol,
            jobs,
        }
    }

    /// Process every device bundle in `bundles`, one serialized job per address.
    ///
    /// An identity-key mismatch stops processing with `UntrustedIdentity`; it is
    /// resolved by an explicit trust decision, never by retrying.
    pub async fn establish(&self, bundles: &PrekeyBundleSet) -> Result<(), SendError> {
        let service_id = &bundles.service_id;
        for device in &bundles.devices {
            let address = QualifiedAddress::new(
                self.our.service_id.clone(),
                Address::new(service_id.clone(), device.device_id),
            );
            let result = self
                .jobs
                .run(&address, || self.protocol.process_prekey_bundle(&address, device))
                .await;
            match result {
                Ok(()) => debug!(%address, "session established"),
                Err(ProtocolError::UntrustedIdentity) => {
                    warn!(%address, "identity key changed; session not established");
                    return Err(classify_protocol_error(
                        service_id,
                        ProtocolError::UntrustedIdentity,
                    ));
                }
                Err(e) => {
                    warn!(%address, error = %e, "failed to process prekey bundle");
                    return Err(classify_protocol_error(service_id, e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use courier_core::ServiceId;

    use super::*;

    fn addr(device: u32) -> QualifiedAddress {
        QualifiedAddress::new(
            ServiceId::from("me"),
            Address::new(ServiceId::from("bob"), device),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_for_one_address_never_overlap() {
        let queue = Arc::new(SessionJobQueue::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = queue.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .run(&addr(1), || async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_addresses_run_concurrently() {
        let queue = Arc::new(SessionJobQueue::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for device in 1..=3 {
            let queue = queue.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .run(&addr(device), || async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 3);
    }
}
