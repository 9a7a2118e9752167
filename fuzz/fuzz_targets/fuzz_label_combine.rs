#![no_main]

use coreward::labels::{combine, ContentLabel, DataClass, TrustLevel};
use libfuzzer_sys::fuzz_target;

fn trust_level(n: u8) -> TrustLevel {
    match n % 3 {
        0 => TrustLevel::Untrusted,
        1 => TrustLevel::User,
        _ => TrustLevel::Verified,
    }
}

fn data_class(n: u8) -> DataClass {
    match n % 4 {
        0 => DataClass::Public,
        1 => DataClass::Internal,
        2 => DataClass::Sensitive,
        _ => DataClass::Secret,
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let a = ContentLabel::new(trust_level(data[0]), data_class(data[0]), "fuzz-a");
    let b = ContentLabel::new(trust_level(data[1]), data_class(data[1]), "fuzz-b");
    let combined = combine(&a, &b);
    assert_eq!(combined.trust_level, a.trust_level.min(b.trust_level));
    assert_eq!(combined.data_class, a.data_class.max(b.data_class));
});
