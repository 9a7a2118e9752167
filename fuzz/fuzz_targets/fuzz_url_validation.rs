#![no_main]

use coreward::config::NetworkGuardConfig;
use coreward::net_guard::NetworkGuard;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let guard = NetworkGuard::new(NetworkGuardConfig::default());
    // Run with a timeout so DNS lookups don't stall the fuzzer
    let _ = rt.block_on(async {
        tokio::time::timeout(std::time::Duration::from_millis(100), guard.check(data, "GET")).await
    });
});
