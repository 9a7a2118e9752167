use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn always_transient(_: &CoreError) -> bool {
    true
}

fn config(failure_threshold: u32, reset_timeout: Duration, half_open_probes: u32) -> BreakerConfig {
    BreakerConfig {
        enabled: true,
        failure_threshold,
        reset_timeout,
        half_open_probes,
    }
}

#[tokio::test]
async fn closed_breaker_passes_through() {
    let breaker = CircuitBreaker::new(config(3, Duration::from_millis(100), 1));
    let result = breaker
        .call("dep", always_transient, || async { Ok::<_, CoreError>(42) })
        .await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(breaker.health("dep").await, HealthStatus::Healthy);
}

#[tokio::test]
async fn opens_after_threshold_and_blocks_other_keys_independently() {
    let breaker = CircuitBreaker::new(config(2, Duration::from_secs(60), 1));
    for _ in 0..2 {
        let _ = breaker
            .call("a", always_transient, || async {
                Err::<(), _>(CoreError::Internal(anyhow::anyhow!("boom")))
            })
            .await;
    }
    assert_eq!(breaker.health("a").await, HealthStatus::Down);

    // A different key is unaffected.
    let result = breaker
        .call("b", always_transient, || async { Ok::<_, CoreError>(1) })
        .await;
    assert!(result.is_ok());
    assert_eq!(breaker.health("b").await, HealthStatus::Healthy);
}

#[tokio::test]
async fn open_breaker_rejects_without_calling_inner() {
    let breaker = CircuitBreaker::new(config(1, Duration::from_secs(60), 1));
    let _ = breaker
        .call("dep", always_transient, || async {
            Err::<(), _>(CoreError::Internal(anyhow::anyhow!("boom")))
        })
        .await;

    let calls = AtomicU32::new(0);
    let result = breaker
        .call("dep", always_transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, CoreError>(()) }
        })
        .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn half_open_after_reset_timeout_and_closes_on_success() {
    let breaker = CircuitBreaker::new(config(1, Duration::from_millis(10), 1));
    let _ = breaker
        .call("dep", always_transient, || async {
            Err::<(), _>(CoreError::Internal(anyhow::anyhow!("boom")))
        })
        .await;
    assert_eq!(breaker.health("dep").await, HealthStatus::Down);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = breaker
        .call("dep", always_transient, || async { Ok::<_, CoreError>(()) })
        .await;
    assert!(result.is_ok());
    assert_eq!(breaker.health("dep").await, HealthStatus::Healthy);
}

#[tokio::test]
async fn non_transient_errors_do_not_trip_breaker() {
    let breaker = CircuitBreaker::new(config(1, Duration::from_secs(60), 1));
    for _ in 0..5 {
        let _ = breaker
            .call("dep", |_| false, || async {
                Err::<(), _>(CoreError::Auth("bad key".into()))
            })
            .await;
    }
    assert_eq!(breaker.health("dep").await, HealthStatus::Healthy);
}

#[tokio::test]
async fn fallback_chain_tries_in_order_until_success() {
    let chain = FallbackChain::new(vec!["primary", "secondary", "tertiary"]);
    let attempts = std::sync::Mutex::new(Vec::new());
    let outcome = chain
        .run(|item| {
            attempts.lock().unwrap().push(*item);
            async move {
                if *item == "secondary" {
                    Ok(item.to_string())
                } else {
                    Err(CoreError::Internal(anyhow::anyhow!("down")))
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(outcome.value, "secondary");
    assert_eq!(outcome.served_by_rank, 1);
    assert_eq!(*attempts.lock().unwrap(), vec!["primary", "secondary"]);
}

#[tokio::test]
async fn fallback_chain_exhausted_returns_last_error() {
    let chain = FallbackChain::new(vec!["only"]);
    let result = chain
        .run(|_| async { Err::<(), _>(CoreError::Internal(anyhow::anyhow!("down"))) })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn empty_fallback_chain_is_a_config_error() {
    let chain: FallbackChain<&str> = FallbackChain::new(vec![]);
    let result = chain.run(|_| async { Ok::<_, CoreError>(()) }).await;
    assert!(matches!(result, Err(CoreError::Config(_))));
}
