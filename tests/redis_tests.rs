#[cfg(feature = "redis")]
mod redis_tests {
    use r_token_registry::store::RRedisStore;
    use r_token_registry::{RKindConfig, RTokenRegistry};
    use serde_json::{json, Map, Value};
    use std::net::TcpListener;
    use std::process::{Child, Command, Stdio};
    use std::sync::OnceLock;

    struct RedisTestServer {
        child: Child,
        url: String,
    }

    impl Drop for RedisTestServer {
        fn drop(&mut self) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }

    static REDIS_TEST_SERVER: OnceLock<Option<RedisTestServer>> = OnceLock::new();

    fn free_port() -> u16 {
        TcpListener::bind(("127.0.0.1", 0))
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .expect("get free port failed")
    }

    fn spawn_redis_server() -> Option<RedisTestServer> {
        let port = free_port();
        let spawned = Command::new("redis-server")
            .arg("--port")
            .arg(port.to_string())
            .arg("--save")
            .arg("")
            .arg("--appendonly")
            .arg("no")
            .arg("--protected-mode")
            .arg("no")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            // No redis-server binary on this machine.
            Err(_) => return None,
        };

        if let Ok(Some(status)) = child.try_wait() {
            panic!("redis-server exited early: {status}");
        }

        Some(RedisTestServer {
            child,
            url: format!("redis://127.0.0.1:{port}/"),
        })
    }

    async fn wait_redis_ready(url: &str) {
        let client = redis::Client::open(url).expect("redis client open failed");

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(3);
        loop {
            if tokio::time::Instant::now() >= deadline {
                panic!("redis-server not ready at {url}");
            }

            if let Ok(mut connection) = client.get_connection_manager().await {
                let pong: Result<String, _> =
                    redis::cmd("PING").query_async(&mut connection).await;
                if pong.as_deref() == Ok("PONG") {
                    return;
                }
            }

            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    /// Returns a usable Redis URL, or `None` when no server is reachable and
    /// none can be spawned (those tests are skipped).
    async fn test_redis_url() -> Option<String> {
        if let Ok(url) = std::env::var("REDIS_URL") {
            return Some(url);
        }

        let server = REDIS_TEST_SERVER.get_or_init(spawn_redis_server).as_ref()?;
        wait_redis_ready(&server.url).await;
        Some(server.url.clone())
    }

    fn unique_kind(test_name: &str, limit: Option<usize>, expire_seconds: u64) -> RKindConfig {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        RKindConfig {
            limit,
            expire_seconds,
            key_prefix: format!("r_token_registry:test:{test_name}:{nanos}:t"),
            user_key_prefix: format!("r_token_registry:test:{test_name}:{nanos}:u"),
        }
    }

    fn payload() -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("role".to_string(), json!("admin"));
        payload
    }

    macro_rules! require_redis {
        () => {
            match test_redis_url().await {
                Some(url) => url,
                None => {
                    eprintln!("skipping: redis-server not available");
                    return;
                }
            }
        };
    }

    #[tokio::test]
    async fn redis_issue_get_roundtrip() {
        let redis_url = require_redis!();
        let store = RRedisStore::connect(&redis_url)
            .await
            .expect("redis connect failed");
        let registry = RTokenRegistry::with_kinds(
            store,
            Some(unique_kind("roundtrip", Some(1), 60)),
            None,
        );

        let issued = registry
            .issue_access_token("alice", payload())
            .await
            .expect("issue failed");

        assert_eq!(issued.token.len(), 64);
        assert!(issued.expires_in > 0 && issued.expires_in <= 60);

        let fetched = registry
            .get_access_token(&issued.token)
            .await
            .expect("get failed")
            .expect("token should exist");

        assert_eq!(fetched.record, issued.record);
    }

    #[tokio::test]
    async fn redis_limit_one_evicts_previous() {
        let redis_url = require_redis!();
        let store = RRedisStore::connect(&redis_url)
            .await
            .expect("redis connect failed");
        let registry =
            RTokenRegistry::with_kinds(store, Some(unique_kind("evict", Some(1), 60)), None);

        let first = registry
            .issue_access_token("bob", payload())
            .await
            .expect("first issue failed");
        let second = registry
            .issue_access_token("bob", payload())
            .await
            .expect("second issue failed");

        assert!(registry
            .get_access_token(&first.token)
            .await
            .expect("get failed")
            .is_none());
        assert!(registry
            .get_access_token(&second.token)
            .await
            .expect("get failed")
            .is_some());
    }

    #[tokio::test]
    async fn redis_revoke_removes_token() {
        let redis_url = require_redis!();
        let store = RRedisStore::connect(&redis_url)
            .await
            .expect("redis connect failed");
        let registry =
            RTokenRegistry::with_kinds(store, Some(unique_kind("revoke", Some(1), 60)), None);

        let issued = registry
            .issue_access_token("carol", payload())
            .await
            .expect("issue failed");

        registry
            .revoke_access_token(&issued.token)
            .await
            .expect("revoke failed");

        assert!(registry
            .get_access_token(&issued.token)
            .await
            .expect("get failed")
            .is_none());
    }

    #[tokio::test]
    async fn redis_ttl_expires_token() {
        let redis_url = require_redis!();
        let store = RRedisStore::connect(&redis_url)
            .await
            .expect("redis connect failed");
        let registry =
            RTokenRegistry::with_kinds(store, Some(unique_kind("ttl", Some(1), 1)), None);

        let issued = registry
            .issue_access_token("dave", payload())
            .await
            .expect("issue failed");

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        assert!(registry
            .get_access_token(&issued.token)
            .await
            .expect("get failed")
            .is_none());
        // The dangling set membership is gone after the next enumeration.
        let listed = registry
            .list_access_tokens("dave")
            .await
            .expect("list failed");
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn redis_list_sorted_and_complete() {
        let redis_url = require_redis!();
        let store = RRedisStore::connect(&redis_url)
            .await
            .expect("redis connect failed");
        let kind = unique_kind("list", None, 60);
        let registry = RTokenRegistry::with_kinds(store, Some(kind), None);

        for _ in 0..3 {
            registry
                .issue_access_token("erin", payload())
                .await
                .expect("issue failed");
        }

        let listed = registry
            .list_access_tokens("erin")
            .await
            .expect("list failed");

        assert_eq!(listed.len(), 3);
        let ttls: Vec<i64> = listed.iter().map(|info| info.expires_in).collect();
        let mut sorted = ttls.clone();
        sorted.sort();
        assert_eq!(ttls, sorted);
    }

    #[tokio::test]
    async fn redis_revoke_all_clears_identity() {
        let redis_url = require_redis!();
        let store = RRedisStore::connect(&redis_url)
            .await
            .expect("redis connect failed");
        let registry =
            RTokenRegistry::with_kinds(store, Some(unique_kind("revoke_all", None, 60)), None);

        for _ in 0..3 {
            registry
                .issue_access_token("frank", payload())
                .await
                .expect("issue failed");
        }

        registry
            .revoke_all_access("frank", None)
            .await
            .expect("revoke_all failed");

        let listed = registry
            .list_access_tokens("frank")
            .await
            .expect("list failed");
        assert!(listed.is_empty());
    }
}
