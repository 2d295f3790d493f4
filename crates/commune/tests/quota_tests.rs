//! Quota enforcement and eviction behavior through the coordinator
//!
//! Covers the accounting invariant, watermark-driven eviction, and the
//! rollback guarantees around failed stores.

use std::collections::BTreeSet;
use std::sync::Arc;

use commune::error::CommuneError;
use commune::{Config, Coordinator};

const MIB: u64 = 1024 * 1024;

/// Test fixture: route crate logs through the test writer
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("commune=debug")
        .with_test_writer()
        .try_init();
}

/// Test fixture: coordinator from a config, logging wired up
fn coordinator(config: Config) -> Coordinator {
    init_tracing();
    Coordinator::new(config).unwrap()
}

/// Test fixture: deterministic pseudo-random, effectively incompressible bytes
fn incompressible(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Test fixture: assert used_bytes equals the sum of live entries'
/// stored sizes (the accounting invariant)
fn assert_accounting_invariant(coord: &Coordinator, tenant: uuid::Uuid, entry_ids: &[uuid::Uuid]) {
    let live_sum: u64 = entry_ids
        .iter()
        .filter_map(|id| coord.metadata(tenant, *id).ok())
        .map(|e| e.stored_size_bytes)
        .sum();
    assert_eq!(
        coord.stats(tenant).unwrap().used_bytes,
        live_sum,
        "ledger must equal the sum of live entries' stored sizes"
    );
}

mod quota_enforcement_tests {
    use super::*;

    #[tokio::test]
    async fn test_oversized_payload_fails_with_rollback() {
        let coord = coordinator(Config {
            tenant_default_quota_bytes: 1000,
            ..Config::default()
        });
        let tenant = coord.create_tenant(None).unwrap();

        let result = coord
            .store(tenant, incompressible(2000, 7), BTreeSet::new(), None)
            .await;

        match result {
            Err(CommuneError::QuotaExceeded {
                requested_bytes, ..
            }) => assert_eq!(requested_bytes, 2000),
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        // No partial reservation survives the failure
        let stats = coord.stats(tenant).unwrap();
        assert_eq!(stats.used_bytes, 0);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_oversized_payload_does_not_disturb_existing_entries_accounting() {
        let coord = coordinator(Config {
            tenant_default_quota_bytes: 1000,
            ..Config::default()
        });
        let tenant = coord.create_tenant(None).unwrap();
        coord
            .store(tenant, incompressible(400, 1), BTreeSet::new(), None)
            .await
            .unwrap();

        // 2000 bytes cannot fit a 1000-byte quota even when everything
        // else is evicted; the eviction attempt may claim victims, but
        // the accounting must stay consistent and under quota
        let result = coord
            .store(tenant, incompressible(2000, 2), BTreeSet::new(), None)
            .await;
        assert!(matches!(result, Err(CommuneError::QuotaExceeded { .. })));

        let stats = coord.stats(tenant).unwrap();
        assert!(stats.used_bytes <= stats.quota_bytes);
    }

    #[tokio::test]
    async fn test_fill_to_exact_quota_succeeds() {
        let coord = coordinator(Config {
            tenant_default_quota_bytes: 1000,
            high_water_mark_percent: 100.0,
            low_water_mark_percent: 99.0,
            ..Config::default()
        });
        let tenant = coord.create_tenant(None).unwrap();

        coord
            .store(tenant, incompressible(1000, 3), BTreeSet::new(), None)
            .await
            .unwrap();

        let stats = coord.stats(tenant).unwrap();
        assert_eq!(stats.used_bytes, 1000);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_stores_never_exceed_quota() {
        let coord = Arc::new(coordinator(Config {
            tenant_default_quota_bytes: 10_000,
            ..Config::default()
        }));
        let tenant = coord.create_tenant(None).unwrap();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let coord = Arc::clone(&coord);
                tokio::spawn(async move {
                    coord
                        .store(tenant, incompressible(900, i), BTreeSet::new(), None)
                        .await
                })
            })
            .collect();

        let mut entry_ids = Vec::new();
        for handle in handles {
            if let Ok(id) = handle.await.unwrap() {
                entry_ids.push(id);
            }
        }

        let stats = coord.stats(tenant).unwrap();
        assert!(
            stats.used_bytes <= stats.quota_bytes,
            "usage {} exceeded quota {}",
            stats.used_bytes,
            stats.quota_bytes
        );
        assert_accounting_invariant(&coord, tenant, &entry_ids);
    }

    #[tokio::test]
    async fn test_stats_never_torn_during_concurrent_stores() {
        let coord = Arc::new(coordinator(Config {
            tenant_default_quota_bytes: MIB,
            ..Config::default()
        }));
        let tenant = coord.create_tenant(None).unwrap();

        // Equal-sized raw entries make the accounting relation exact:
        // at every instant, used bytes must be entry_count * 900
        let writers: Vec<_> = (0..16)
            .map(|i| {
                let coord = Arc::clone(&coord);
                tokio::spawn(async move {
                    for j in 0..8u64 {
                        coord
                            .store(tenant, incompressible(900, i * 100 + j), BTreeSet::new(), None)
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            let stats = coord.stats(tenant).unwrap();
            assert_eq!(
                stats.used_bytes,
                stats.entry_count as u64 * 900,
                "used bytes and entry count must describe the same entry set"
            );
            tokio::task::yield_now().await;
        }
        for writer in writers {
            writer.await.unwrap();
        }

        let stats = coord.stats(tenant).unwrap();
        assert_eq!(stats.used_bytes, 16 * 8 * 900);
        assert_eq!(stats.entry_count, 128);
    }

    #[tokio::test]
    async fn test_quota_isolation_between_tenants() {
        let coord = coordinator(Config {
            tenant_default_quota_bytes: 1000,
            ..Config::default()
        });
        let full = coord.create_tenant(None).unwrap();
        let idle = coord.create_tenant(None).unwrap();

        coord
            .store(idle, incompressible(500, 9), BTreeSet::new(), None)
            .await
            .unwrap();
        // Exhaust the first tenant
        let _ = coord
            .store(full, incompressible(2000, 10), BTreeSet::new(), None)
            .await;

        let idle_stats = coord.stats(idle).unwrap();
        assert_eq!(idle_stats.used_bytes, 500);
        assert_eq!(idle_stats.entry_count, 1);
    }
}

mod eviction_tests {
    use super::*;

    #[tokio::test]
    async fn test_high_water_store_evicts_least_recently_accessed() {
        // 10 MiB quota, 2 MiB incompressible payloads, 95/80 water marks
        let coord = coordinator(Config {
            tenant_default_quota_bytes: 10 * MIB,
            ..Config::default()
        });
        let tenant = coord.create_tenant(None).unwrap();

        let mut entry_ids = Vec::new();
        for i in 0..8u64 {
            let id = coord
                .store(
                    tenant,
                    incompressible(2 * MIB as usize, i),
                    BTreeSet::new(),
                    None,
                )
                .await
                .unwrap();
            entry_ids.push(id);
        }

        let stats = coord.stats(tenant).unwrap();
        assert!(stats.used_bytes <= stats.quota_bytes);
        assert!(
            stats.entry_count < 8,
            "eviction must have removed early entries"
        );
        // The most recent store always survives its own eviction pass
        let last = *entry_ids.last().unwrap();
        assert!(coord.metadata(tenant, last).is_ok());
        // Survivors are the most recently stored ones
        let survivors: Vec<_> = entry_ids
            .iter()
            .filter(|id| coord.metadata(tenant, **id).is_ok())
            .collect();
        assert_eq!(survivors.len(), stats.entry_count);
        assert!(
            entry_ids[..8 - stats.entry_count]
                .iter()
                .all(|id| coord.metadata(tenant, *id).is_err()),
            "victims must be the least recently accessed"
        );
        assert_accounting_invariant(&coord, tenant, &entry_ids);
    }

    #[tokio::test]
    async fn test_recently_accessed_entry_survives_eviction() {
        let coord = coordinator(Config {
            tenant_default_quota_bytes: 10_000,
            ..Config::default()
        });
        let tenant = coord.create_tenant(None).unwrap();

        let first = coord
            .store(tenant, incompressible(3000, 1), BTreeSet::new(), None)
            .await
            .unwrap();
        let second = coord
            .store(tenant, incompressible(3000, 2), BTreeSet::new(), None)
            .await
            .unwrap();

        // Touch the older entry so the newer one becomes the LRA victim
        coord.retrieve(tenant, first, None).await.unwrap();

        // Push utilization over the high-water mark
        coord
            .store(tenant, incompressible(3600, 3), BTreeSet::new(), None)
            .await
            .unwrap();

        assert!(
            coord.metadata(tenant, first).is_ok(),
            "recently accessed entry must survive"
        );
        assert!(
            coord.metadata(tenant, second).is_err(),
            "least recently accessed entry must be the victim"
        );
    }

    #[tokio::test]
    async fn test_eviction_frees_room_for_failed_reservation() {
        let coord = coordinator(Config {
            tenant_default_quota_bytes: 1000,
            high_water_mark_percent: 99.9,
            low_water_mark_percent: 50.0,
            ..Config::default()
        });
        let tenant = coord.create_tenant(None).unwrap();

        coord
            .store(tenant, incompressible(900, 1), BTreeSet::new(), None)
            .await
            .unwrap();
        // Does not fit until the first entry is evicted
        let second = coord
            .store(tenant, incompressible(800, 2), BTreeSet::new(), None)
            .await
            .unwrap();

        let stats = coord.stats(tenant).unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.used_bytes, 800);
        assert!(coord.metadata(tenant, second).is_ok());
    }
}
