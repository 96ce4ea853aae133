//! Order states, the transition lattice and the exchange status table.

use std::fmt;

/// Lifecycle state of a tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderState {
    /// Submitted locally, not yet acknowledged.
    PendingCreate,
    /// Resting on the book with no fills.
    Open,
    /// Resting with some fills.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancel requested, not yet confirmed.
    PendingCancel,
    /// Cancelled.
    Cancelled,
    /// Rejected or failed to submit.
    Failed,
}

impl OrderState {
    /// Returns true for `Filled`, `Cancelled` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }

    /// Returns true for every non-terminal state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the lattice allows moving from `self` to `next`.
    ///
    /// Terminal states accept nothing and nothing returns to
    /// `PendingCreate`. Every live state may jump to `Filled` or `Cancelled`;
    /// only `PendingCreate` and `Open` may fail.
    #[must_use]
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (from, to) if from == &to => false,
            (Filled | Cancelled | Failed, _) => false,
            (_, PendingCreate) => false,
            (PendingCreate, Open | PartiallyFilled | Filled | Cancelled | Failed) => true,
            (Open, PartiallyFilled | Filled | PendingCancel | Cancelled | Failed) => true,
            (PartiallyFilled, Open | Filled | PendingCancel | Cancelled) => true,
            (PendingCancel, Open | PartiallyFilled | Filled | Cancelled) => true,
            _ => false,
        }
    }

    /// Maps an exchange status string, case-insensitively.
    ///
    /// Unrecognized statuses read as `Open`.
    #[must_use]
    pub fn from_exchange_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "open" | "new" => Self::Open,
            "partial" => Self::PartiallyFilled,
            "filled" => Self::Filled,
            "cancelled" | "canceled" => Self::Cancelled,
            "rejected" => Self::Failed,
            _ => Self::Open,
        }
    }

    /// Snake-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingCreate => "pending_create",
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::PendingCancel => "pending_cancel",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
