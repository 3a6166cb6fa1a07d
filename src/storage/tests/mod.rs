// src/storage/tests/mod.rs


// Behaviour every counter store must share
pub(crate) mod common {
    use futures::future::join_all;
    use std::sync::Arc;

    use crate::error::{RateLimiterError, Result};
    use crate::storage::CounterStore;
    use crate::test_utils::rate;

    // limit=3 per minute on "foo": 2, 1, 0 remaining, then rejected
    pub async fn test_sequential_quota<S: CounterStore>(store: &S, key: &str) -> Result<()> {
        let rate = rate(3, 60);

        let first = store.get(key, &rate).await?;
        assert_eq!((first.limit, first.remaining, first.reached), (3, 2, false));

        let second = store.get(key, &rate).await?;
        assert_eq!((second.remaining, second.reached), (1, false));

        let third = store.get(key, &rate).await?;
        assert_eq!((third.remaining, third.reached), (0, false));

        let fourth = store.get(key, &rate).await?;
        assert_eq!((fourth.remaining, fourth.reached), (0, true));

        // the window does not move while counting
        assert_eq!(first.reset, fourth.reset);
        Ok(())
    }

    pub async fn test_peek_is_read_only<S: CounterStore>(store: &S, key: &str) -> Result<()> {
        let rate = rate(5, 60);

        let untouched = store.peek(key, &rate).await?;
        assert_eq!((untouched.remaining, untouched.reached), (5, false));

        store.inc(key, 2, &rate).await?;
        for _ in 0..3 {
            let peeked = store.peek(key, &rate).await?;
            assert_eq!((peeked.remaining, peeked.reached), (3, false));
        }

        let next = store.get(key, &rate).await?;
        assert_eq!(next.remaining, 2);
        Ok(())
    }

    pub async fn test_reset_restores_quota<S: CounterStore>(store: &S, key: &str) -> Result<()> {
        let rate = rate(2, 60);

        store.inc(key, 3, &rate).await?;
        let over = store.peek(key, &rate).await?;
        assert!(over.reached);

        let reset = store.reset(key, &rate).await?;
        assert_eq!((reset.remaining, reset.reached), (2, false));

        // again on an absent key
        let again = store.reset(key, &rate).await?;
        assert_eq!((again.remaining, again.reached), (2, false));

        let after = store.get(key, &rate).await?;
        assert_eq!(after.remaining, 1);
        Ok(())
    }

    pub async fn test_inc_rejects_non_positive<S: CounterStore>(store: &S, key: &str) -> Result<()> {
        let rate = rate(2, 60);

        for count in [0, -1] {
            let result = store.inc(key, count, &rate).await;
            assert!(matches!(result, Err(RateLimiterError::InvalidArgument(_))));
        }

        let peeked = store.peek(key, &rate).await?;
        assert_eq!(peeked.remaining, 2);
        Ok(())
    }

    // G callers race on one key; exactly `limit` of them get through
    pub async fn test_concurrent_callers<S: CounterStore + 'static>(
        store: Arc<S>,
        key: &str,
        limit: i64,
        callers: usize,
    ) -> Result<()> {
        let rate = rate(limit, 60);

        let tasks = (0..callers).map(move |_| {
            let store = Arc::clone(&store);
            let key = key.to_string();
            tokio::spawn(async move { store.get(&key, &rate).await })
        });

        let mut allowed = 0;
        let mut remaining = Vec::new();
        for joined in join_all(tasks).await {
            let decision = joined.map_err(|e| RateLimiterError::Internal(e.to_string()))??;
            if !decision.reached {
                allowed += 1;
                remaining.push(decision.remaining);
            }
        }

        assert_eq!(allowed, limit);
        remaining.sort_unstable();
        assert_eq!(remaining, (0..limit).collect::<Vec<_>>());
        Ok(())
    }
}
