//! Schema-drift recovery around every collection access.
//!
//! A connection can outlive the code that opened it: an update ships a new
//! collection while an old connection is still cached, or a collection is
//! lost underneath a live connection. [`LocalStore::perform`] checks the
//! target collection before use and, when the connection turns out to be
//! stale, stops handing it out and reopens exactly once. Calls already
//! running on the stale connection keep it until they finish.

use crate::storage::Connection;
use crate::{error::Result, Error, LocalStore};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Run `attempt`; if it fails with an error `is_retryable` accepts, run
/// `recover` and then `attempt` one more time. A second failure, or a
/// failing `recover`, is returned as is.
pub async fn retry_once<T, A, AFut, P, R, RFut>(
    mut attempt: A,
    is_retryable: P,
    recover: R,
) -> Result<T>
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
    R: FnOnce(Error) -> RFut,
    RFut: Future<Output = Result<()>>,
{
    match attempt().await {
        Ok(value) => Ok(value),
        Err(err) if is_retryable(&err) => {
            recover(err).await?;
            attempt().await
        }
        Err(err) => Err(err),
    }
}

impl LocalStore {
    /// Run `access` against a connection that has `collection`.
    ///
    /// - The connection's known collections are checked first; a missing
    ///   collection causes one reopen (which migrates), and if it is still
    ///   missing the call fails with `Error::CollectionUnavailable`.
    /// - If `access` itself fails with a schema-drift error, the connection
    ///   is discarded and `access` runs once more on a fresh one.
    ///
    /// Other errors propagate untouched and are never retried.
    pub async fn perform<T, F, Fut>(&self, collection: &str, access: F) -> Result<T>
    where
        F: Fn(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let access = &access;
        // Generation of the connection the last attempt ran on; 0 is never issued.
        let used = &AtomicU64::new(0);
        let result = retry_once(
            move || async move {
                let (generation, connection) = self.connection_for(collection).await?;
                used.store(generation, Ordering::SeqCst);
                access(connection).await
            },
            Error::is_schema_drift,
            move |err| async move {
                tracing::warn!(
                    collection,
                    error = %err,
                    "collection access hit schema drift; reopening store"
                );
                self.discard(used.load(Ordering::SeqCst));
                Ok(())
            },
        )
        .await;

        self.close_retired().await;
        result
    }

    /// Open the store and make sure `collection` is on the connection,
    /// reopening at most once.
    async fn connection_for(&self, collection: &str) -> Result<(u64, Arc<dyn Connection>)> {
        let (generation, connection) = self.checkout().await?;
        if connection.has_collection(collection) {
            return Ok((generation, connection));
        }

        tracing::warn!(
            collection,
            "collection missing from cached connection; reopening store"
        );
        drop(connection);
        self.discard(generation);

        let (generation, connection) = self.checkout().await?;
        if connection.has_collection(collection) {
            Ok((generation, connection))
        } else {
            tracing::error!(collection, "collection still missing after reopen");
            Err(Error::CollectionUnavailable(collection.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEngine;
    use crate::{SchemaCatalog, FARMERS_CACHE, STORE_NAME};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_once_retries_exactly_once() {
        let calls = &AtomicUsize::new(0);
        let recovered = &AtomicUsize::new(0);

        let result: Result<()> = retry_once(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::CollectionNotFound("x".into()))
            },
            Error::is_schema_drift,
            move |_| async move {
                recovered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert_eq!(result, Err(Error::CollectionNotFound("x".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_once_succeeds_on_second_attempt() {
        let calls = &AtomicUsize::new(0);

        let result = retry_once(
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::CollectionNotFound("x".into()))
                } else {
                    Ok(7)
                }
            },
            Error::is_schema_drift,
            |_| async { Ok(()) },
        )
        .await;

        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn transient_errors_are_not_retried() {
        let calls = &AtomicUsize::new(0);

        let result: Result<()> = retry_once(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Storage("disk busy".into()))
            },
            Error::is_schema_drift,
            |_| async { Err(Error::Storage("recover ran".into())) },
        )
        .await;

        assert_eq!(result, Err(Error::Storage("disk busy".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_recovery_stops_the_retry() {
        let calls = &AtomicUsize::new(0);

        let result: Result<()> = retry_once(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::CollectionNotFound("x".into()))
            },
            Error::is_schema_drift,
            |_| async { Err(Error::InitializationFailed("gone".into())) },
        )
        .await;

        assert_eq!(result, Err(Error::InitializationFailed("gone".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn perform_recovers_from_physically_removed_collection() {
        let engine = MemoryEngine::new();
        let store = LocalStore::new(engine.clone(), SchemaCatalog::flora());
        store.open().await.unwrap();

        engine.remove_collection(STORE_NAME, FARMERS_CACHE);

        let count = store
            .perform(FARMERS_CACHE, |conn| async move { conn.count(FARMERS_CACHE).await })
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(engine.open_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_both_heal_after_removal() {
        let engine = MemoryEngine::new();
        let store = LocalStore::new(engine.clone(), SchemaCatalog::flora());
        store.open().await.unwrap();

        engine.remove_collection(STORE_NAME, FARMERS_CACHE);

        let count = |conn: Arc<dyn Connection>| async move {
            tokio::task::yield_now().await;
            conn.count(FARMERS_CACHE).await
        };
        let (first, second) = tokio::join!(
            store.perform(FARMERS_CACHE, count),
            store.perform(FARMERS_CACHE, count)
        );

        assert_eq!(first, Ok(0));
        assert_eq!(second, Ok(0));
        assert_eq!(engine.open_count(), 2);
        // The stale connection is closed once neither call holds it.
        assert_eq!(engine.live_connection_count(STORE_NAME), 1);
    }

    #[tokio::test]
    async fn perform_reopens_when_known_set_lacks_collection() {
        let engine = MemoryEngine::new();
        let store = LocalStore::new(engine.clone(), SchemaCatalog::flora());
        store.open().await.unwrap();

        engine.forget_collection(STORE_NAME, FARMERS_CACHE);

        store
            .perform(FARMERS_CACHE, |conn| async move {
                conn.put(FARMERS_CACHE, "f1", json!({"id": "f1"})).await
            })
            .await
            .unwrap();
        assert!(engine.collections_of(STORE_NAME).contains(FARMERS_CACHE));
    }

    #[tokio::test]
    async fn undeclared_collection_is_unavailable() {
        let engine = MemoryEngine::new();
        let store = LocalStore::new(engine.clone(), SchemaCatalog::flora());

        let result = store
            .perform("settlements", |conn| async move { conn.count("settlements").await })
            .await;

        assert_eq!(
            result,
            Err(Error::CollectionUnavailable("settlements".into()))
        );
        // First open plus the single reopen; no further attempts.
        assert_eq!(engine.open_count(), 2);
    }

    #[tokio::test]
    async fn second_drift_failure_propagates() {
        let engine = MemoryEngine::new();
        let store = LocalStore::new(engine.clone(), SchemaCatalog::flora());
        let attempts = AtomicUsize::new(0);

        let result: Result<()> = store
            .perform(FARMERS_CACHE, |_conn| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::CollectionNotFound(FARMERS_CACHE.into())) }
            })
            .await;

        assert_eq!(
            result,
            Err(Error::CollectionNotFound(FARMERS_CACHE.into()))
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
