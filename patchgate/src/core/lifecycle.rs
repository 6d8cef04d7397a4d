//! Plan lifecycle states and the transitions between them.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Planned,
    Branched,
    Applied,
    Committed,
    VerifiedOk,
    VerifiedFailed,
    Unverified,
    MergePending,
    Merged,
    CleanedUp,
    RolledBack,
}

impl LifecycleState {
    /// Whether the engine may move from `self` to `next`.
    ///
    /// Any state may return to `Planned` (a new plan replaces the old one) or
    /// move to `CleanedUp`. Terminal states behave like `Idle`.
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::{
            Applied, Branched, CleanedUp, Committed, MergePending, Merged, Planned, RolledBack,
            Unverified, VerifiedFailed, VerifiedOk,
        };
        if matches!(next, Planned | CleanedUp) {
            return true;
        }
        match (self, next) {
            (Planned, Branched)
            | (Branched, Applied | RolledBack)
            | (Applied, Committed | RolledBack)
            | (Committed, VerifiedOk | VerifiedFailed | Unverified | RolledBack)
            | (VerifiedOk | VerifiedFailed | Unverified, MergePending) => true,
            // Merge is gated on the persisted records, not on in-memory state,
            // so a fresh process (or any later state) may attempt it.
            (_, Merged) => true,
            _ => false,
        }
    }
}
