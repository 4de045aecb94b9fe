use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the previewer fill proxy.
///
/// Traffic mix:
/// - repeated fills of one source and geometry (cache hits)
/// - fills with random geometry (cache misses and evictions)
/// - health and cache stats endpoints
///
/// # Usage
/// ```bash
/// cd loadtest
/// SOURCE=images.example.com/photo.jpg \
///   cargo run --release -- --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// `SOURCE` is the upstream `host/path` appended to `/fill/{w}/{h}/`.

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("CachePerformance")
                // Fixed geometry hits the cache after the first request
                .register_transaction(transaction!(cached_fill).set_weight(15)?)
                // Random geometry forces fetch, transform and eviction
                .register_transaction(transaction!(uncached_fill).set_weight(5)?),
        )
        .register_scenario(
            scenario!("Observability")
                .register_transaction(transaction!(health_check).set_weight(1)?)
                .register_transaction(transaction!(cache_stats).set_weight(1)?),
        )
        .execute()
        .await?;

    Ok(())
}

fn source() -> String {
    std::env::var("SOURCE").unwrap_or_else(|_| "picsum.photos/id/237/2000/2000".into())
}

/// Deterministic parameters share one fingerprint.
async fn cached_fill(user: &mut GooseUser) -> TransactionResult {
    let url = format!("/fill/500/500/{}", source());
    let _goose = user.get(&url).await?;
    Ok(())
}

/// Random geometry spreads load across fingerprints.
async fn uncached_fill(user: &mut GooseUser) -> TransactionResult {
    // Generate random parameters before await to satisfy Send bounds
    let url = {
        let mut rng = rand::thread_rng();
        let width = rng.gen_range(100..1000);
        let height = rng.gen_range(100..1000);
        format!("/fill/{}/{}/{}", width, height, source())
    };

    let _goose = user.get(&url).await?;
    Ok(())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}

async fn cache_stats(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/stats/cache").await?;
    Ok(())
}
