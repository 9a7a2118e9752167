//! Content labels and flow control.
//!
//! Every string that crosses a trust boundary (tool output, memory read,
//! web content) is attached to a [`ContentLabel`] describing how much it
//! should be trusted and how sensitive it is. [`combine`] folds two labels
//! together (§3, I-L1); the `FC-*` functions implement the flow-control
//! rules of §4.2 that decide whether a labelled value may cross a further
//! boundary (network egress, a memory write, a tool chain).
//!
//! Grounded on `safety::leak_detector::LeakDetector` and
//! `safety::prompt_guard::PromptGuard` (§4.1's secret and prompt-injection
//! scanners), wrapped here by [`secret_detector::SecretDetector`] into the
//! tiered-confidence findings shape §3 describes.

pub mod secret_detector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use secret_detector::{Confidence, SecretDetector, SecretFinding};

/// How much a piece of content should be trusted. Ordered
/// `Untrusted < User < Verified` per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Untrusted,
    User,
    Verified,
}

/// How sensitive a piece of content is. Ordered
/// `Public < Internal < Sensitive < Secret` per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    Public,
    Internal,
    Sensitive,
    Secret,
}

/// Provenance of a labelled value: where it came from and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSource {
    pub origin_id: String,
    pub timestamp: DateTime<Utc>,
    pub verified_by: Option<String>,
}

impl LabelSource {
    pub fn new(origin_id: impl Into<String>) -> Self {
        Self {
            origin_id: origin_id.into(),
            timestamp: Utc::now(),
            verified_by: None,
        }
    }
}

/// Audit record of an explicit, user-confirmed trust promotion (I-SEM1,
/// scenario 4). Never contains the promoted content itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelPromotion {
    pub original_trust_level: TrustLevel,
    pub promoted_to: TrustLevel,
    pub reason: String,
    pub authorized_by: String,
}

/// A trust/sensitivity label attached to any content crossing a boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentLabel {
    pub trust_level: TrustLevel,
    pub data_class: DataClass,
    pub source: LabelSource,
    pub label_promotion: Option<LabelPromotion>,
}

impl ContentLabel {
    pub fn new(trust_level: TrustLevel, data_class: DataClass, origin_id: impl Into<String>) -> Self {
        Self {
            trust_level,
            data_class,
            source: LabelSource::new(origin_id),
            label_promotion: None,
        }
    }

    /// A label for content directly supplied by the interactive user.
    pub fn from_user(origin_id: impl Into<String>) -> Self {
        Self::new(TrustLevel::User, DataClass::Internal, origin_id)
    }

    /// A label for content fetched from an untrusted external source
    /// (web pages, tool output from network-capable tools).
    pub fn from_untrusted_source(origin_id: impl Into<String>) -> Self {
        Self::new(TrustLevel::Untrusted, DataClass::Internal, origin_id)
    }

    /// Promote this label's trust level following an explicit user
    /// confirmation, recording the promotion for audit (never the content).
    pub fn promote(&mut self, to: TrustLevel, reason: impl Into<String>, authorized_by: impl Into<String>) {
        let promotion = LabelPromotion {
            original_trust_level: self.trust_level,
            promoted_to: to,
            reason: reason.into(),
            authorized_by: authorized_by.into(),
        };
        self.trust_level = to;
        self.label_promotion = Some(promotion);
    }
}

/// I-L1: combining two labels yields `min` trust and `max` data class.
/// Provenance is taken from whichever input is more sensitive/less
/// trusted, since that is the constraint that dominates the result.
pub fn combine(a: &ContentLabel, b: &ContentLabel) -> ContentLabel {
    let trust_level = a.trust_level.min(b.trust_level);
    let data_class = a.data_class.max(b.data_class);
    let dominant = if a.trust_level <= b.trust_level { a } else { b };
    ContentLabel {
        trust_level,
        data_class,
        source: dominant.source.clone(),
        label_promotion: None,
    }
}

/// Fold `combine` over a sequence of labels. Returns `None` for an empty
/// slice (callers should supply a neutral default in that case).
pub fn combine_all<'a>(labels: impl IntoIterator<Item = &'a ContentLabel>) -> Option<ContentLabel> {
    let mut iter = labels.into_iter();
    let first = iter.next()?.clone();
    Some(iter.fold(first, |acc, next| combine(&acc, next)))
}

/// I-L2: promote a capability's declared default output label based on
/// what the secret detector found in the raw output. `probable` or
/// `definite` findings force the data class to at least `secret` (the
/// content must be treated as carrying a secret until redacted).
pub fn label_output(
    default_trust: TrustLevel,
    default_class: DataClass,
    findings: &[SecretFinding],
    origin_id: impl Into<String>,
) -> ContentLabel {
    let mut data_class = default_class;
    if findings
        .iter()
        .any(|f| matches!(f.confidence, Confidence::Probable | Confidence::Definite))
    {
        data_class = data_class.max(DataClass::Secret);
    } else if !findings.is_empty() {
        data_class = data_class.max(DataClass::Sensitive);
    }
    ContentLabel::new(default_trust, data_class, origin_id)
}

/// The outcome of a flow-control check (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDecision {
    Allowed,
    Denied { reason: String },
    Ask { reason: String, can_override: bool },
}

impl FlowDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, FlowDecision::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, FlowDecision::Denied { .. })
    }
}

/// FC-1: network egress. `secret` data never leaves; `sensitive` data
/// from an `untrusted` source is rejected outright (it was likely scraped
/// from the same untrusted surface it would be sent back to); any other
/// `sensitive` egress requires asking the user.
pub fn fc1_egress(label: &ContentLabel) -> FlowDecision {
    match label.data_class {
        DataClass::Secret => FlowDecision::Denied {
            reason: "secret data must never leave the system".into(),
        },
        DataClass::Sensitive if label.trust_level == TrustLevel::Untrusted => FlowDecision::Denied {
            reason: "sensitive data from an untrusted source cannot be sent over the network".into(),
        },
        DataClass::Sensitive => FlowDecision::Ask {
            reason: "sending sensitive data over the network requires confirmation".into(),
            can_override: true,
        },
        DataClass::Public | DataClass::Internal => FlowDecision::Allowed,
    }
}

/// FC-2: semantic memory write. `untrusted` content is rejected unless the
/// caller has separately confirmed it (handled by the memory manager,
/// which promotes the label and re-checks); `verified` content still asks
/// (see Open Questions, §9); `user`/`system`-originated content is
/// allowed outright.
pub fn fc2_semantic_write(label: &ContentLabel) -> FlowDecision {
    match label.trust_level {
        TrustLevel::Untrusted => FlowDecision::Denied {
            reason: "untrusted content cannot be written to semantic memory without confirmation".into(),
        },
        TrustLevel::Verified => FlowDecision::Ask {
            reason: "verified content still requires confirmation before becoming a stored fact".into(),
            can_override: true,
        },
        TrustLevel::User => FlowDecision::Allowed,
    }
}

/// FC-3: working memory write. Only `secret` data class is rejected — it
/// must be redacted by the caller (the secret detector) before it can be
/// held even in process-local working memory.
pub fn fc3_working_memory_write(label: &ContentLabel) -> FlowDecision {
    if label.data_class == DataClass::Secret {
        FlowDecision::Denied {
            reason: "secret data must be redacted before entering working memory".into(),
        }
    } else {
        FlowDecision::Allowed
    }
}

/// FC-4: tool chaining — using one tool's output as another tool's input.
/// `untrusted` source content flowing into a network-capable tool must be
/// confirmed (prevents untrusted web content steering an outbound
/// request); `secret` content flowing into a tool that does not sanitise
/// its own inputs is rejected outright.
pub fn fc4_tool_chaining(
    source_label: &ContentLabel,
    target_network_capable: bool,
    target_sanitizes_input: bool,
) -> FlowDecision {
    if source_label.data_class == DataClass::Secret && !target_sanitizes_input {
        return FlowDecision::Denied {
            reason: "secret-labelled content cannot flow into a tool that does not sanitise its inputs".into(),
        };
    }
    if source_label.trust_level == TrustLevel::Untrusted && target_network_capable {
        return FlowDecision::Ask {
            reason: "untrusted content steering a network-capable tool requires confirmation".into(),
            can_override: true,
        };
    }
    FlowDecision::Allowed
}
