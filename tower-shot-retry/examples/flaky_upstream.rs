//! Drives a deliberately flaky upstream through `RetryLimitLayer`.
//!
//! Run with `RUST_LOG=shot_retry=debug` to watch the backoff decisions.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use shot_retry::ExecuteOptions;
use shot_retry::ProgressUpdate;
use shot_retry::RateLimitConfig;
use shot_retry::RateLimiter;
use tower::BoxError;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;
use tower_shot_retry::RetryLimitLayer;
use tower_shot_retry::ShotError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RateLimitConfig::builder()
        .initial_tokens(20.0)
        .refill_rate(120.0)
        .max_retries(4)
        .initial_delay(Duration::from_millis(200))
        .max_delay(Duration::from_secs(2))
        .build()?;
    let limiter = Arc::new(RateLimiter::adaptive(config));

    // Every third call is throttled.
    let calls = Arc::new(AtomicU32::new(0));
    let upstream = service_fn(move |id: u32| {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n % 3 == 2 {
                Err::<String, BoxError>("429 Too Many Requests".into())
            } else {
                Ok(format!("response {id}"))
            }
        }
    });

    let svc = ServiceBuilder::new()
        .layer(RetryLimitLayer::new(Arc::clone(&limiter)).with_tokens(2.0))
        .service(upstream);

    for id in 0..12 {
        match svc.clone().oneshot(id).await {
            Ok(body) => tracing::info!(id, %body, "ok"),
            Err(err) => match err.downcast_ref::<ShotError>() {
                Some(shot) => tracing::warn!(id, error = %shot, "gave up"),
                None => tracing::error!(id, error = %err, "upstream failure"),
            },
        }
    }

    // The limiter can also be driven directly, with progress reporting.
    let outcome = limiter
        .execute_with(
            || async { Err::<(), _>("rate limit exceeded") },
            ExecuteOptions::default().with_progress(|update: &ProgressUpdate| {
                tracing::info!(
                    attempt = update.attempt,
                    remaining_ms = update.delay.as_millis() as u64,
                    message = update.message.as_deref().unwrap_or_default(),
                    "waiting"
                );
            }),
        )
        .await;
    if let Err(err) = outcome {
        tracing::warn!(error = %err, "direct call gave up");
    }

    println!("{}", summary(&limiter));
    Ok(())
}

fn summary(limiter: &RateLimiter) -> String {
    let stats = limiter.stats();
    format!(
        "requests={} retries={} tokens={:.1}/{}",
        stats.total_requests,
        stats.total_retries,
        stats.token_bucket.tokens_available,
        stats.token_bucket.capacity,
    )
}
