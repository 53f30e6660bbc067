//! Basic usage example of the resource cache.

use resource_kit::{
    error::Result, CachedMapResource, LoadRequest, LoadResult, ResourceEntity, ResourceKey,
    ResourceLoader, ResourceStrategy,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Example entity: Connection
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Connection {
    id: String,
    name: String,
    connected: bool,
    host: Option<String>,
}

impl ResourceEntity for Connection {
    type Key = String;

    fn resource_key(&self) -> Self::Key {
        self.id.clone()
    }

    fn resource_prefix() -> &'static str {
        "connection"
    }
}

/// Mock API that simulates a slow server
#[derive(Clone, Default)]
struct ConnectionApi {
    calls: Arc<AtomicUsize>,
}

impl ResourceLoader<Connection> for ConnectionApi {
    async fn load(&self, request: LoadRequest<String>) -> Result<LoadResult<Connection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        println!("  [API] Fetching connections: {}", request.key);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let all: HashMap<String, Connection> = [("pg", "Production"), ("dev", "Development")]
            .into_iter()
            .map(|(id, name)| {
                (
                    id.to_string(),
                    Connection {
                        id: id.to_string(),
                        name: name.to_string(),
                        connected: true,
                        host: Some(format!("{}.db.local", id)),
                    },
                )
            })
            .collect();

        Ok(match request.key {
            ResourceKey::All => all,
            selector => all
                .into_iter()
                .filter(|(id, _)| selector.includes(id))
                .collect(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Resource Kit - Basic Example ===\n");

    let api = ConnectionApi::default();
    let connections = CachedMapResource::new(api.clone());

    connections.on_item_delete().add_handler(|key| {
        println!("  [EVENT] deleted {}", key);
    });

    // 1. Two concurrent loads share one fetch
    println!("1. Two concurrent loads of 'pg':");
    let (pg1, pg2) = ("pg".to_string(), "pg".to_string());
    let (a, b) = tokio::join!(connections.load(&pg1), connections.load(&pg2));
    println!(
        "   ✓ {:?} / {:?} with {} API call(s)\n",
        a?.map(|c| c.name),
        b?.map(|c| c.name),
        api.calls.load(Ordering::SeqCst)
    );

    // 2. Cached reads never fetch
    println!("2. Cached strategy for an unknown key:");
    let cached = connections
        .execute(ResourceKey::Key("dev".to_string()), ResourceStrategy::Cached)
        .await?;
    println!("   ✓ {} entries, no fetch\n", cached.len());

    // 3. Load everything
    println!("3. Load all connections:");
    let all = connections.load_all().await?;
    println!("   ✓ {} connections loaded\n", all.len());

    // 4. Lazy invalidation
    println!("4. Mark 'pg' outdated, then read and load:");
    connections.mark_outdated(ResourceKey::Key("pg".to_string()));
    println!(
        "   get() still returns {:?}",
        connections.get(&"pg".to_string()).map(|c| c.name)
    );
    connections.load(&"pg".to_string()).await?;
    println!("   ✓ refetched, {} API calls total\n", api.calls.load(Ordering::SeqCst));

    // 5. Merge a partial update
    println!("5. Patch 'dev' as disconnected:");
    connections.patch(&"dev".to_string(), serde_json::json!({ "connected": false }))?;
    if let Some(dev) = connections.get(&"dev".to_string()) {
        println!("   ✓ connected={} host={:?}\n", dev.connected, dev.host);
    }

    // 6. Delete
    println!("6. Delete 'dev':");
    connections.delete(ResourceKey::Key("dev".to_string()));
    println!("   ✓ {} connections cached\n", connections.len());

    println!("=== Example Complete ===\n");
    Ok(())
}
