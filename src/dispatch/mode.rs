//! Gateway operating mode
//!
//! Brownout sheds expensive work: arbitration tiers stay closed to requests
//! that trip no escalation marker, unless the caller's priority is high or
//! above. The remote classifier tier is marker-gated in every mode.

use crate::classifier::EscalationReport;
use crate::envelope::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    #[default]
    Normal,
    Brownout,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Brownout => "brownout",
        }
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    NormalMode,
    EscalationMarkers,
    PriorityOverride,
    BrownoutDenied,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NormalMode => "normal_mode",
            Self::EscalationMarkers => "escalation_markers",
            Self::PriorityOverride => "priority_override",
            Self::BrownoutDenied => "brownout_denied",
        }
    }
}

/// Whether arbitration tiers are open to one request, and why
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierGate {
    pub allowed: bool,
    pub reason: GateReason,
}

impl TierGate {
    pub fn evaluate(mode: GatewayMode, report: &EscalationReport, priority: Priority) -> Self {
        let (allowed, reason) = match mode {
            GatewayMode::Normal => (true, GateReason::NormalMode),
            GatewayMode::Brownout if report.triggered() => (true, GateReason::EscalationMarkers),
            GatewayMode::Brownout if priority >= Priority::High => {
                (true, GateReason::PriorityOverride)
            }
            GatewayMode::Brownout => (false, GateReason::BrownoutDenied),
        };
        Self { allowed, reason }
    }
}
