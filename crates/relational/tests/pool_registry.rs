//! Pool registry behavior under concurrent borrows, eviction and removal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_error::{ErrorCode, Result};
use meridian_relational::vendor::postgres::PostgresManager;
use meridian_relational::{
    AuthenticationStrategyKey, ConnectionKey, ConnectionOpener, Credential, CredentialProvider,
    DataSourceSpecificationKey, DatabaseManager, LiveConnection, PoolRegistry, RowSet,
    StaticCredentialProvider,
};

struct FakeConnection {
    closed_count: Arc<AtomicUsize>,
}

#[async_trait]
impl LiveConnection for FakeConnection {
    async fn execute(&self, _sql: &str) -> Result<RowSet> {
        Ok(RowSet::empty())
    }

    async fn close(&self) -> Result<()> {
        self.closed_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeOpener {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl ConnectionOpener for FakeOpener {
    async fn open(&self, _url: &str, _credential: &Credential) -> Result<Box<dyn LiveConnection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            closed_count: Arc::clone(&self.closed),
        }))
    }
}

fn key(host: &str) -> ConnectionKey {
    ConnectionKey::new(
        DataSourceSpecificationKey::StaticWithHost {
            host: host.to_string(),
            port: 5432,
            database: "orders".to_string(),
        },
        AuthenticationStrategyKey::UserNamePassword {
            username: "alice".to_string(),
            password_vault_ref: "vault:alice".to_string(),
        },
    )
}

fn setup() -> (
    PoolRegistry,
    Arc<dyn DatabaseManager>,
    Arc<dyn CredentialProvider>,
    Arc<FakeOpener>,
) {
    let opener = Arc::new(FakeOpener::default());
    let manager: Arc<dyn DatabaseManager> =
        Arc::new(PostgresManager::new(opener.clone() as Arc<dyn ConnectionOpener>));
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(StaticCredentialProvider::new("alice", "secret"));
    (PoolRegistry::new(), manager, credentials, opener)
}

const TIMEOUT: Duration = Duration::from_millis(200);

#[tokio::test]
async fn equal_keys_return_the_same_pool_instance() {
    let (registry, manager, credentials, _) = setup();

    let a = registry
        .get_or_create(key("db1"), 4, &manager, credentials.clone(), "alice")
        .unwrap();
    let b = registry
        .get_or_create(key("db1"), 4, &manager, credentials.clone(), "alice")
        .unwrap();
    let c = registry
        .get_or_create(key("db2"), 4, &manager, credentials, "alice")
        .unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn concurrent_creation_collapses_to_one_pool() {
    let (registry, manager, credentials, _) = setup();
    let registry = Arc::new(registry);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        let manager = Arc::clone(&manager);
        let credentials = Arc::clone(&credentials);
        handles.push(tokio::spawn(async move {
            registry
                .get_or_create(key("db1"), 4, &manager, credentials, "alice")
                .unwrap()
        }));
    }

    let mut pools = Vec::new();
    for handle in handles {
        pools.push(handle.await.unwrap());
    }

    assert_eq!(registry.len(), 1);
    for pool in &pools[1..] {
        assert!(Arc::ptr_eq(&pools[0], pool));
    }
}

#[tokio::test]
async fn pool_bound_is_never_exceeded() {
    let (registry, manager, credentials, _) = setup();
    let pool = registry
        .get_or_create(key("db1"), 2, &manager, credentials, "alice")
        .unwrap();

    let first = pool.borrow(TIMEOUT).await.unwrap();
    assert_eq!(pool.stats().active, 1);

    let second = pool.borrow(TIMEOUT).await.unwrap();
    assert_eq!(pool.stats().active, 2);

    drop(first);
    assert_eq!(pool.stats().active, 1);

    let third = pool.borrow(TIMEOUT).await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.active, 2);
    assert!(stats.active <= 2);

    drop(second);
    drop(third);
    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 2);
}

#[tokio::test]
async fn borrow_beyond_bound_blocks_until_release() {
    let (registry, manager, credentials, _) = setup();
    let pool = registry
        .get_or_create(key("db1"), 2, &manager, credentials, "alice")
        .unwrap();

    let a = pool.borrow(TIMEOUT).await.unwrap();
    let _b = pool.borrow(TIMEOUT).await.unwrap();

    // Third borrow waits; release one slot shortly after.
    let pool2 = Arc::clone(&pool);
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(a);
    });

    let c = pool2.borrow(Duration::from_secs(2)).await.unwrap();
    releaser.await.unwrap();
    assert_eq!(pool.stats().active, 2);
    drop(c);
}

#[tokio::test]
async fn exhausted_pool_times_out_with_typed_error() {
    let (registry, manager, credentials, _) = setup();
    let pool = registry
        .get_or_create(key("db1"), 1, &manager, credentials, "alice")
        .unwrap();

    let _held = pool.borrow(TIMEOUT).await.unwrap();
    let err = pool.borrow(Duration::from_millis(50)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PoolExhausted);
    assert!(err.code.is_retryable());
}

#[tokio::test]
async fn soft_evict_touches_idle_only() {
    let (registry, manager, credentials, opener) = setup();
    let pool = registry
        .get_or_create(key("db1"), 4, &manager, credentials, "alice")
        .unwrap();

    // One connection active, one returned to idle.
    let active = pool.borrow(TIMEOUT).await.unwrap();
    let idle = pool.borrow(TIMEOUT).await.unwrap();
    drop(idle);

    let before = pool.stats();
    assert_eq!(before.active, 1);
    assert_eq!(before.idle, 1);

    let (evicted, remaining_active) = registry.soft_evict(pool.name()).await.unwrap();
    assert_eq!(evicted, 1);
    assert_eq!(remaining_active, 1);
    assert_eq!(opener.closed.load(Ordering::SeqCst), 1);

    let after = pool.stats();
    assert_eq!(after.active, 1);
    assert_eq!(after.idle, 0);

    // The active borrow keeps working and returns cleanly.
    active.connection().execute("SELECT 1").await.unwrap();
    drop(active);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn soft_evict_unknown_pool_is_not_found() {
    let (registry, _, _, _) = setup();
    let err = registry.soft_evict("missing").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PoolNotFound);
}

#[tokio::test]
async fn idle_connections_are_reused_not_reopened() {
    let (registry, manager, credentials, opener) = setup();
    let pool = registry
        .get_or_create(key("db1"), 2, &manager, credentials, "alice")
        .unwrap();

    let first = pool.borrow(TIMEOUT).await.unwrap();
    drop(first);
    let second = pool.borrow(TIMEOUT).await.unwrap();
    drop(second);

    assert_eq!(opener.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_execution_returns_its_connection() {
    let (registry, manager, credentials, _) = setup();
    let pool = registry
        .get_or_create(key("db1"), 1, &manager, credentials, "alice")
        .unwrap();

    let pool2 = Arc::clone(&pool);
    let task = tokio::spawn(async move {
        let guard = pool2.borrow(TIMEOUT).await.unwrap();
        // Simulated long-running statement; the task is aborted mid-flight.
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(guard);
    });

    // Give the task time to borrow, then cancel it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    let _ = task.await;

    // The aborted task's guard must have released the only slot.
    let reclaimed = pool.borrow(Duration::from_secs(1)).await.unwrap();
    assert_eq!(pool.stats().active, 1);
    drop(reclaimed);
}

#[tokio::test]
async fn remove_and_close_makes_room_for_a_fresh_pool() {
    let (registry, manager, credentials, opener) = setup();
    let pool = registry
        .get_or_create(key("db1"), 2, &manager, credentials.clone(), "alice")
        .unwrap();

    let held = pool.borrow(TIMEOUT).await.unwrap();
    let idle = pool.borrow(TIMEOUT).await.unwrap();
    drop(idle);

    assert!(registry.remove_and_close(pool.key()).await);
    // Idle member closed eagerly.
    assert_eq!(opener.closed.load(Ordering::SeqCst), 1);

    // Borrowing from the removed pool fails.
    let err = pool.borrow(TIMEOUT).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PoolClosed);

    // The still-held guard drops its connection instead of re-pooling.
    drop(held);
    assert_eq!(pool.stats().total, 0);

    // A new request for the same key builds a fresh pool.
    let fresh = registry
        .get_or_create(key("db1"), 2, &manager, credentials, "alice")
        .unwrap();
    assert!(!Arc::ptr_eq(&pool, &fresh));
    let conn = fresh.borrow(TIMEOUT).await.unwrap();
    drop(conn);
}

#[tokio::test]
async fn snapshot_groups_by_user_and_sorts_by_name() {
    let (registry, manager, credentials, _) = setup();
    registry
        .get_or_create(key("db2"), 2, &manager, credentials.clone(), "bob")
        .unwrap();
    registry
        .get_or_create(key("db1"), 2, &manager, credentials, "alice")
        .unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.pools.len(), 2);
    assert!(snapshot.pools[0].name < snapshot.pools[1].name);

    let bobs = registry.pools_for_user("bob");
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].user, "bob");
    assert!(registry.pools_for_user("carol").is_empty());
}
