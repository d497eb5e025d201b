// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyed async locks serializing inbound handling per (tenant, phone).
//!
//! Two messages from the same customer must resolve contact and ticket
//! one after the other, or both would create a ticket. Messages from
//! different customers proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use waflow_core::TenantId;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<DashMap<(TenantId, String), Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, tenant_id: TenantId, phone: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .entry((tenant_id, phone.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes_and_different_keys_run_in_parallel() {
        let locks = KeyedLocks::new();
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            let in_section = in_section.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(TenantId(1), "555").await;
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
                i
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);

        // Distinct phones do not contend.
        let _a = locks.acquire(TenantId(1), "111").await;
        let _b = locks.acquire(TenantId(1), "222").await;
        let _c = locks.acquire(TenantId(2), "111").await;
    }
}
