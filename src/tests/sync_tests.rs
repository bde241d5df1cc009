//! Smart sync scenarios against a scripted provider

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::blockchain::client::FetchError;
    use crate::blockchain::sync::SyncSource;
    use crate::config::CacheConfig;
    use crate::error::Error;
    use crate::tests::support::{harness, harness_with, tx, START_MILLIS, WALLET};

    const SIX_MINUTES: Duration = Duration::from_secs(6 * 60);

    #[tokio::test(start_paused = true)]
    async fn test_cold_fresh_incremental_scenario() {
        let h = harness();
        h.provider.push_page(
            vec![tx("0xa", 100, 0), tx("0xb", 100, 1), tx("0xc", 102, 0)],
            None,
        );

        // Cold sync starts from block 0
        let first = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(first.source, SyncSource::Initial);
        assert_eq!(first.transactions.len(), 3);
        assert_eq!(first.last_block, 102);
        assert_eq!(h.provider.queries()[0].start_block, 0);

        // Within the freshness window: no network call
        let second = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(second.source, SyncSource::Fresh);
        assert_eq!(second.transactions, first.transactions);
        assert_eq!(h.provider.transaction_calls(), 1);

        // Six minutes later two new records arrive
        h.clock.advance(SIX_MINUTES);
        h.provider.push_page(vec![tx("0xd", 110, 0), tx("0xe", 111, 4)], None);

        let third = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(third.source, SyncSource::Incremental);
        assert_eq!(third.transactions.len(), 5);
        assert_eq!(third.last_block, 111);
        assert_eq!(h.provider.transaction_calls(), 2);
        assert_eq!(h.provider.queries()[1].start_block, 103);

        let hashes: Vec<_> = third.transactions.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0xa", "0xb", "0xc", "0xd", "0xe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_records_are_not_appended_twice() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);
        h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();

        h.clock.advance(SIX_MINUTES);
        // Provider re-reports a known record alongside a new one
        h.provider.push_page(vec![tx("0xa", 10, 0), tx("0xb", 12, 0)], None);

        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.transactions.len(), 2);
        assert_eq!(outcome.last_block, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_served_when_provider_fails() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);
        h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();

        h.clock.advance(SIX_MINUTES);
        for _ in 0..5 {
            h.provider.push_error(FetchError::from_status(503, "overloaded"));
        }

        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.source, SyncSource::Stale);
        assert_eq!(outcome.transactions.len(), 1);
        assert_eq!(outcome.last_block, 10);
        assert_eq!(h.provider.transaction_calls(), 6);

        let state = h.service.breaker().state("transactions:1").unwrap();
        assert_eq!(state.service_unavailable_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_without_cache_propagates() {
        let h = harness();
        h.provider.push_error(FetchError::from_status(403, "forbidden"));

        let err = h
            .service
            .get_cached_or_fresh_transactions(WALLET, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(FetchError::Rejected { status: 403, .. })));
        assert!(h.service.cache().transaction_cache.get_bucket(WALLET, 1).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_new_refreshes_timestamp() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);
        h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();

        h.clock.advance(SIX_MINUTES);
        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.source, SyncSource::Unchanged);
        assert_eq!(outcome.last_block, 10);

        let bucket = h
            .service
            .cache()
            .transaction_cache
            .get_bucket(WALLET, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            bucket.last_fetch_timestamp,
            START_MILLIS + SIX_MINUTES.as_millis() as i64
        );

        // The refreshed bucket is fresh again
        let again = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(again.source, SyncSource::Fresh);
        assert_eq!(h.provider.transaction_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_first_sync_creates_bucket() {
        let h = harness();

        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.source, SyncSource::Initial);
        assert!(outcome.transactions.is_empty());

        let again = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(again.source, SyncSource::Fresh);
        assert_eq!(h.provider.transaction_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_page_cursors() {
        let h = harness();
        h.provider
            .push_page(vec![tx("0x1", 1, 0), tx("0x2", 2, 0), tx("0x3", 3, 0)], Some("2"));
        h.provider.push_page(vec![tx("0x4", 4, 0), tx("0x5", 5, 0)], None);

        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.transactions.len(), 5);
        assert_eq!(outcome.last_block, 5);

        let queries = h.provider.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].cursor, None);
        assert_eq!(queries[1].cursor.as_deref(), Some("2"));
        assert_eq!(queries[1].start_block, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_limit_leaves_last_block_to_refetch() {
        let h = harness_with(CacheConfig {
            max_pages_per_sync: 2,
            ..CacheConfig::default()
        });
        h.provider.push_page(vec![tx("0x1", 1, 0), tx("0x2", 2, 0)], Some("2"));
        h.provider.push_page(vec![tx("0x3", 3, 0), tx("0x4", 4, 0)], Some("3"));
        h.provider.push_page(vec![tx("0x5", 4, 1), tx("0x6", 6, 0)], None);

        let first = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(first.transactions.len(), 4);
        assert_eq!(first.last_block, 3);
        assert_eq!(h.provider.transaction_calls(), 2);

        // The next sync resumes at block 4, picking up the rest of it
        h.clock.advance(SIX_MINUTES);
        let second = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(h.provider.queries()[2].start_block, 4);
        assert_eq!(second.transactions.len(), 6);
        assert_eq!(second.last_block, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_follow_up_page_keeps_first_page() {
        let h = harness();
        h.provider.push_page(vec![tx("0x1", 7, 0), tx("0x2", 9, 0)], Some("2"));
        h.provider.push_error(FetchError::from_status(400, "bad page"));

        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.source, SyncSource::Initial);
        assert_eq!(outcome.transactions.len(), 2);
        assert_eq!(outcome.last_block, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_syncs_of_one_bucket_are_serialized() {
        let h = harness();
        h.provider.set_page_delay(Duration::from_secs(1));
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);

        let (a, b) = tokio::join!(
            h.service.get_cached_or_fresh_transactions(WALLET, 1),
            h.service.get_cached_or_fresh_transactions(WALLET, 1),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(h.provider.transaction_calls(), 1);
        let mut sources = vec![a.source, b.source];
        sources.sort_by_key(|s| format!("{:?}", s));
        assert_eq!(sources, vec![SyncSource::Fresh, SyncSource::Initial]);
        assert_eq!(a.transactions, b.transactions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_serves_stale_without_calls() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);
        h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();

        h.clock.advance(SIX_MINUTES);
        for _ in 0..8 {
            h.service.breaker().record_failure("transactions:1", false);
        }

        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.source, SyncSource::Stale);
        assert_eq!(h.provider.transaction_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_full_resync() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);
        h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();

        assert_eq!(h.service.invalidate(WALLET, Some(1)).await.unwrap(), 1);

        h.provider.push_page(vec![tx("0xa", 10, 0)], None);
        let outcome = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(outcome.source, SyncSource::Initial);
        assert_eq!(h.provider.queries()[1].start_block, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_write_failure_propagates() {
        let h = harness();
        h.store.fail_writes(true);
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);

        let err = h
            .service
            .get_cached_or_fresh_transactions(WALLET, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let h = harness();

        let err = h
            .service
            .get_cached_or_fresh_transactions(WALLET, 999_999)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownChain(999_999)));

        let err = h
            .service
            .get_cached_or_fresh_transactions(WALLET, 137)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingProvider(137)));

        let err = h
            .service
            .get_cached_or_fresh_transactions("0x1234", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.provider.transaction_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_round_syncs_every_target() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);

        let other = "0x1111111111111111111111111111111111111111".to_string();
        let scheduler = h
            .service
            .scheduler(&[WALLET.to_string(), other], Duration::from_secs(60))
            .with_max_concurrent(2);
        assert_eq!(scheduler.targets().len(), 2);

        let summary = scheduler.run_once().await;
        assert_eq!(summary.synced, 2);
        assert_eq!(summary.failed, 0);

        // Second round inside the freshness window makes no calls
        let summary = scheduler.run_once().await;
        assert_eq!(summary.fresh, 2);
        assert_eq!(h.provider.transaction_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_at_highest_block_does_not_wrap() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", u64::MAX, 0)], None);

        let first = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(first.last_block, u64::MAX);

        h.clock.advance(SIX_MINUTES);
        let second = h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        assert_eq!(second.source, SyncSource::Unchanged);
        assert_eq!(second.last_block, u64::MAX);
        assert_eq!(second.transactions.len(), 1);
        assert_eq!(h.provider.queries()[1].start_block, u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_waits_for_in_flight_sync() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);
        h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();

        h.clock.advance(SIX_MINUTES);
        h.provider.set_page_delay(Duration::from_secs(1));
        h.provider.push_page(vec![tx("0xb", 12, 0)], None);

        let (synced, removed) = tokio::join!(
            h.service.get_cached_or_fresh_transactions(WALLET, 1),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                h.service.invalidate(WALLET, None).await
            },
        );

        assert_eq!(synced.unwrap().source, SyncSource::Incremental);
        assert_eq!(removed.unwrap(), 1);

        // The sync finished first, so the invalidation is what remains
        let cache = &h.service.cache().transaction_cache;
        assert!(cache.get_bucket(WALLET, 1).await.unwrap().is_none());
        assert_eq!(cache.bucket_lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_locks_are_released_after_sync() {
        let h = harness();
        let other = "0x2222222222222222222222222222222222222222";

        h.service.get_cached_or_fresh_transactions(WALLET, 1).await.unwrap();
        h.service.get_cached_or_fresh_transactions(other, 1).await.unwrap();

        assert_eq!(h.service.cache().transaction_cache.bucket_lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_polls_on_spawned_task() {
        let h = harness();
        h.provider.push_page(vec![tx("0xa", 10, 0)], None);

        let scheduler = h
            .service
            .scheduler(&[WALLET.to_string()], Duration::from_secs(60));
        let shutdown = tokio_util::sync::CancellationToken::new();
        let polling_shutdown = shutdown.clone();
        let polling = tokio::spawn(async move {
            scheduler.start_polling(polling_shutdown).await;
        });

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        polling.await.unwrap();

        assert_eq!(h.provider.transaction_calls(), 1);
        let bucket = h
            .service
            .cache()
            .transaction_cache
            .get_bucket(WALLET, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.last_block, 10);
    }
}
