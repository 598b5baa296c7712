use std::fmt;

/// The condition types a ProxyDef's status may carry.
///
/// Each type names one convergence phase; at most one of them is recorded on
/// a resource at a time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// The ConfigMap has been materialized from the current spec.
    Ready,
    /// The ConfigMap is being generated.
    Syncing,
    /// A failure prevented the ConfigMap from being generated.
    Degraded,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Why a condition was recorded. A reason fully determines the condition's
/// type, status, and message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reason {
    Reconciling,
    ConfigMapCreated,
    ConfigMapUpdated,
    ConfigMapSynced,
    ConfigMapCreationFailed,
    ConfigMapUpdateFailed,
    ConfigMapNotOwned,
}

/// The convergence phase of a single ProxyDef.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncState {
    Unknown,
    Syncing,
    Ready,
    Degraded,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("illegal ProxyDef status transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SyncState,
    pub to: SyncState,
}

// === impl ConditionType ===

impl ConditionType {
    pub const ALL: [Self; 3] = [Self::Ready, Self::Syncing, Self::Degraded];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Syncing => "Syncing",
            Self::Degraded => "Degraded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ConditionStatus ===

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "True" => Some(Self::True),
            "False" => Some(Self::False),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Reason ===

impl Reason {
    pub const ALL: [Self; 7] = [
        Self::Reconciling,
        Self::ConfigMapCreated,
        Self::ConfigMapUpdated,
        Self::ConfigMapSynced,
        Self::ConfigMapCreationFailed,
        Self::ConfigMapUpdateFailed,
        Self::ConfigMapNotOwned,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }

    pub fn condition_type(&self) -> ConditionType {
        match self {
            Self::Reconciling => ConditionType::Syncing,
            Self::ConfigMapCreated | Self::ConfigMapUpdated | Self::ConfigMapSynced => {
                ConditionType::Ready
            }
            Self::ConfigMapCreationFailed
            | Self::ConfigMapUpdateFailed
            | Self::ConfigMapNotOwned => ConditionType::Degraded,
        }
    }

    pub fn status(&self) -> ConditionStatus {
        match self.condition_type() {
            ConditionType::Syncing => ConditionStatus::Unknown,
            ConditionType::Ready => ConditionStatus::True,
            ConditionType::Degraded => ConditionStatus::False,
        }
    }

    /// The state a resource is in once this reason has been recorded.
    pub fn state(&self) -> SyncState {
        match self.condition_type() {
            ConditionType::Syncing => SyncState::Syncing,
            ConditionType::Ready => SyncState::Ready,
            ConditionType::Degraded => SyncState::Degraded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reconciling => "Reconciling",
            Self::ConfigMapCreated => "ConfigMapCreated",
            Self::ConfigMapUpdated => "ConfigMapUpdated",
            Self::ConfigMapSynced => "ConfigMapSynced",
            Self::ConfigMapCreationFailed => "ConfigMapCreationFailed",
            Self::ConfigMapUpdateFailed => "ConfigMapUpdateFailed",
            Self::ConfigMapNotOwned => "ConfigMapNotOwned",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Reconciling => "Starting reconciliation",
            Self::ConfigMapCreated => "ConfigMap created successfully",
            Self::ConfigMapUpdated => "ConfigMap updated to match the ProxyDef spec",
            Self::ConfigMapSynced => "ConfigMap matches the ProxyDef spec",
            Self::ConfigMapCreationFailed => "Failed to create ConfigMap",
            Self::ConfigMapUpdateFailed => "Failed to update ConfigMap",
            Self::ConfigMapNotOwned => "ConfigMap exists and is controlled by another resource",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl SyncState ===

impl SyncState {
    /// Determines the state described by a set of `(type, status)` pairs.
    ///
    /// A true `Ready` condition wins over everything else; otherwise a
    /// `Degraded` condition wins over a `Syncing` one. Unrecognized types are
    /// ignored.
    pub fn from_conditions<'c>(
        conditions: impl IntoIterator<Item = (&'c str, &'c str)>,
    ) -> Self {
        let mut state = Self::Unknown;
        for (type_, status) in conditions {
            match ConditionType::parse(type_) {
                Some(ConditionType::Ready) if status == ConditionStatus::True.as_str() => {
                    return Self::Ready;
                }
                Some(ConditionType::Degraded) => state = Self::Degraded,
                Some(ConditionType::Syncing) if state == Self::Unknown => state = Self::Syncing,
                _ => {}
            }
        }
        state
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        use SyncState::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Unknown, Syncing)
                | (Syncing, Ready)
                | (Syncing, Degraded)
                | (Degraded, Syncing)
                | (Ready, Degraded)
        )
    }

    pub fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "Unknown",
            Self::Syncing => "Syncing",
            Self::Ready => "Ready",
            Self::Degraded => "Degraded",
        })
    }
}
