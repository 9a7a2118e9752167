use super::*;
use crate::labels::{DataClass, TrustLevel};

fn label(class: DataClass) -> ContentLabel {
    ContentLabel::new(TrustLevel::User, class, "test")
}

#[test]
fn append_and_read_back_messages() {
    let mut wm = WorkingMemory::new(10, 1000);
    wm.append("user", "hello", label(DataClass::Internal), false).unwrap();
    wm.append("assistant", "hi there", label(DataClass::Internal), false).unwrap();
    assert_eq!(wm.messages().len(), 2);
    assert_eq!(wm.messages()[0].content, "hello");
}

#[test]
fn secret_classed_content_is_rejected() {
    let mut wm = WorkingMemory::new(10, 1000);
    let err = wm.append("user", "leaked key", label(DataClass::Secret), false).unwrap_err();
    assert!(matches!(err, FlowDecision::Denied { .. }));
    assert!(wm.messages().is_empty());
}

#[test]
fn capacity_eviction_drops_oldest_non_system_first() {
    let mut wm = WorkingMemory::new(2, 10_000);
    wm.append("system", "you are a helpful agent", label(DataClass::Internal), true).unwrap();
    wm.append("user", "first", label(DataClass::Internal), false).unwrap();
    wm.append("user", "second", label(DataClass::Internal), false).unwrap();
    wm.append("user", "third", label(DataClass::Internal), false).unwrap();

    let contents: Vec<_> = wm.messages().iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"you are a helpful agent"));
    assert!(!contents.contains(&"first"));
    assert!(contents.contains(&"second"));
    assert!(contents.contains(&"third"));
}

#[test]
fn token_cap_eviction_drops_oldest_non_system_first() {
    let mut wm = WorkingMemory::new(100, 5);
    wm.append("system", "sys", label(DataClass::Internal), true).unwrap();
    wm.append("user", "a very long message indeed", label(DataClass::Internal), false).unwrap();
    wm.append("user", "short", label(DataClass::Internal), false).unwrap();

    assert!(wm.messages().iter().any(|m| m.content == "sys"));
    assert!(!wm.messages().iter().any(|m| m.content == "a very long message indeed"));
}

#[test]
fn combined_label_is_none_when_empty() {
    let wm = WorkingMemory::new(10, 1000);
    assert!(wm.combined_label().is_none());
}

#[test]
fn combined_label_reflects_least_trusted_most_sensitive() {
    let mut wm = WorkingMemory::new(10, 1000);
    wm.append("user", "a", label(DataClass::Internal), false).unwrap();
    wm.append("tool", "b", label(DataClass::Sensitive), false).unwrap();
    let combined = wm.combined_label().unwrap();
    assert_eq!(combined.data_class, DataClass::Sensitive);
}

#[test]
fn clear_empties_the_buffer() {
    let mut wm = WorkingMemory::new(10, 1000);
    wm.append("user", "hello", label(DataClass::Internal), false).unwrap();
    wm.clear();
    assert!(wm.messages().is_empty());
}
