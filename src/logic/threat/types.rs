//! Threat Types
//!
//! Core types for threat classification. No logic - data structures only.

use serde::{Deserialize, Serialize};

// ============================================================================
// SEVERITY
// ============================================================================

/// Severity ladder shared by threats, anomalies, and incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// THREAT KIND & SCOPE
// ============================================================================

/// The sealed set of threat categories. Unknown values coming back from the
/// AI are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    None,
    PromptInjection,
    Jailbreak,
    PiiLeak,
    ToxicContent,
}

impl ThreatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::None => "none",
            ThreatKind::PromptInjection => "prompt_injection",
            ThreatKind::Jailbreak => "jailbreak",
            ThreatKind::PiiLeak => "pii_leak",
            ThreatKind::ToxicContent => "toxic_content",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(ThreatKind::None),
            "prompt_injection" => Some(ThreatKind::PromptInjection),
            "jailbreak" => Some(ThreatKind::Jailbreak),
            "pii_leak" | "pii_leakage" => Some(ThreatKind::PiiLeak),
            "toxic_content" => Some(ThreatKind::ToxicContent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of the exchange a verdict applies to. At most one verdict per
/// scope is produced for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Prompt,
    Response,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Prompt => "prompt",
            Scope::Response => "response",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// VERDICT
// ============================================================================

/// Final classification for one scope of one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatVerdict {
    pub kind: ThreatKind,
    pub confidence: f64,
    pub severity: Severity,
    pub indicators: Vec<String>,
    pub scope: Scope,
}

impl ThreatVerdict {
    pub fn none(scope: Scope) -> Self {
        Self {
            kind: ThreatKind::None,
            confidence: 0.0,
            severity: Severity::Low,
            indicators: vec![],
            scope,
        }
    }

    pub fn is_threat(&self) -> bool {
        self.kind != ThreatKind::None
    }
}
