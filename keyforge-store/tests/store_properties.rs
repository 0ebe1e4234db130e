//! Property-based tests for the license store.
//!
//! - A key that fails validation is never persisted
//! - refresh_all isolates a single unreachable plugin from the rest

mod common;

use chrono::{Duration, Utc};
use common::{issue_for, license_config, open_store, store_with, strict_remote_config, ScriptedRemote};
use keyforge_store::{LicenseSource, MemoryBackend, StoreError};
use proptest::prelude::*;
use std::sync::Arc;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn invalid_install_is_never_persisted(
        days_ago in 14i64..2_000,
        wrong_plugin in any::<bool>(),
    ) {
        block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let store = open_store(backend.clone(), license_config(), None).await;
            let issued = Utc::now() - Duration::days(days_ago);
            let target = if wrong_plugin { "delay-lite" } else { "reverb-pro" };
            let key = issue_for(target, "trial", issued);

            let result = store.install("reverb-pro", &key, LicenseSource::Trial, None).await;
            assert!(matches!(result, Err(StoreError::LicenseRejected { .. })));
            assert!(store.get("reverb-pro").await.is_none());
            assert_eq!(backend.save_count(), 0);
        });
    }

    #[test]
    fn refresh_all_updates_all_but_the_failing_plugin(n in 1usize..7, failing in 0usize..7) {
        let failing = failing % n;
        block_on(async {
            let remote = ScriptedRemote::new();
            let (store, _) = store_with(strict_remote_config(), Some(remote.clone())).await;
            let t0 = Utc::now();
            let plugins: Vec<String> = (0..n).map(|i| format!("plugin-{i}")).collect();
            for plugin in &plugins {
                store.register(plugin.clone(), strict_remote_config()).await;
                store
                    .install_at(plugin, &issue_for(plugin, "basic", t0), LicenseSource::Manual, None, t0)
                    .await
                    .unwrap();
            }

            remote.take_down(&plugins[failing]);
            let t1 = t0 + Duration::minutes(5);
            let report = store.refresh_all_at(t1).await.unwrap();

            assert_eq!(report.failed.len(), 1);
            assert_eq!(report.failed[0].plugin_id, plugins[failing]);
            assert_eq!(report.updated.len(), n - 1);
            for plugin in &plugins {
                let entry = store.get(plugin).await.unwrap();
                assert_eq!(entry.last_validated, t1);
                assert_eq!(entry.is_valid(), *plugin != plugins[failing]);
            }
        });
    }
}
