//! Capped resource accounting for a single run.
//!
//! Each named resource (e.g. `unit_calls`, `deep_calls`) has a fixed cap.
//! Work is budgeted in two steps:
//!
//! 1. [`BudgetLedger::reserve`] checks the request against the remaining
//!    headroom and, when allowed, returns a [`Reservation`] token. `used` is
//!    not touched; the amount is held so concurrent reservations in the same
//!    round can never over-commit the cap.
//! 2. The token is consumed by exactly one of [`BudgetLedger::commit`] (the
//!    work was attempted, successfully or not) or [`BudgetLedger::release`]
//!    (the work was never attempted).
//!
//! Resources are independent: exhausting one never blocks another.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::errors::{BudgetDenied, DenialReason, EngineError, EngineResult};

// ============================================================================
// Supporting types
// ============================================================================

/// Usage of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub used: u64,
    pub cap: u64,
    /// Reserved but not yet committed or released.
    pub held: u64,
}

impl ResourceUsage {
    const fn headroom(&self) -> u64 {
        self.cap.saturating_sub(self.used).saturating_sub(self.held)
    }
}

/// Proof that an amount was reserved. Must be committed or released.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    id: u64,
    resource: String,
    amount: u64,
}

impl Reservation {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub const fn amount(&self) -> u64 {
        self.amount
    }
}

// ============================================================================
// BudgetLedger
// ============================================================================

/// Tracks consumption of named resource quotas against fixed caps.
#[derive(Debug, Clone, Default)]
pub struct BudgetLedger {
    resources: BTreeMap<String, ResourceUsage>,
    holds: BTreeMap<u64, (String, u64)>,
    next_hold: u64,
}

impl BudgetLedger {
    /// Create a ledger with the given caps and nothing used.
    pub fn new<I, S>(caps: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let resources = caps
            .into_iter()
            .map(|(name, cap)| {
                (
                    name.into(),
                    ResourceUsage {
                        used: 0,
                        cap,
                        held: 0,
                    },
                )
            })
            .collect();
        Self {
            resources,
            holds: BTreeMap::new(),
            next_hold: 0,
        }
    }

    /// Create a ledger from a configured cap map.
    pub fn from_caps(caps: &BTreeMap<String, u64>) -> Self {
        Self::new(caps.iter().map(|(k, v)| (k.clone(), *v)))
    }

    // -------------------------------------------------------------------------
    // Reservation lifecycle
    // -------------------------------------------------------------------------

    /// Check `amount` against the remaining headroom of `resource`.
    ///
    /// Denials are final for this request; the caller decides what a denial
    /// means for the run.
    pub fn reserve(&mut self, resource: &str, amount: u64) -> Result<Reservation, BudgetDenied> {
        let Some(usage) = self.resources.get_mut(resource) else {
            return Err(BudgetDenied {
                resource: resource.to_string(),
                requested: amount,
                remaining: 0,
                reason: DenialReason::UnknownResource,
            });
        };

        let remaining = usage.headroom();
        if amount == 0 {
            return Err(BudgetDenied {
                resource: resource.to_string(),
                requested: amount,
                remaining,
                reason: DenialReason::ZeroAmount,
            });
        }
        if amount > remaining {
            debug!(resource, amount, remaining, "reservation denied");
            return Err(BudgetDenied {
                resource: resource.to_string(),
                requested: amount,
                remaining,
                reason: DenialReason::InsufficientHeadroom,
            });
        }

        usage.held += amount;
        let id = self.next_hold;
        self.next_hold += 1;
        self.holds.insert(id, (resource.to_string(), amount));

        Ok(Reservation {
            id,
            resource: resource.to_string(),
            amount,
        })
    }

    /// Consume a reservation: the reserved amount becomes `used`.
    pub fn commit(&mut self, reservation: Reservation) -> EngineResult<()> {
        let usage = self.settle(&reservation)?;
        let used = usage.used + reservation.amount;
        if used > usage.cap {
            return Err(EngineError::invariant(format!(
                "commit of {} on '{}' would exceed cap {} (used {})",
                reservation.amount, reservation.resource, usage.cap, usage.used
            )));
        }
        usage.used = used;
        Ok(())
    }

    /// Return a reservation's amount to the pool without consuming it.
    pub fn release(&mut self, reservation: Reservation) -> EngineResult<()> {
        self.settle(&reservation)?;
        Ok(())
    }

    /// Drop the hold behind `reservation` and hand back its resource entry.
    fn settle(&mut self, reservation: &Reservation) -> EngineResult<&mut ResourceUsage> {
        let Some((resource, amount)) = self.holds.remove(&reservation.id) else {
            warn!(
                resource = %reservation.resource,
                hold = reservation.id,
                "settling unknown or already settled reservation"
            );
            return Err(EngineError::invariant(format!(
                "reservation {} on '{}' is not outstanding",
                reservation.id, reservation.resource
            )));
        };
        if resource != reservation.resource || amount != reservation.amount {
            return Err(EngineError::invariant(format!(
                "reservation {} does not match its hold ({resource}/{amount})",
                reservation.id
            )));
        }
        let usage = self.resources.get_mut(&resource).ok_or_else(|| {
            EngineError::invariant(format!("hold references unknown resource '{resource}'"))
        })?;
        usage.held -= amount;
        Ok(usage)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Headroom left for new reservations; 0 for unknown resources.
    pub fn remaining(&self, resource: &str) -> u64 {
        self.resources
            .get(resource)
            .map_or(0, ResourceUsage::headroom)
    }

    pub fn used(&self, resource: &str) -> u64 {
        self.resources.get(resource).map_or(0, |u| u.used)
    }

    pub fn cap(&self, resource: &str) -> u64 {
        self.resources.get(resource).map_or(0, |u| u.cap)
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    /// Number of reservations neither committed nor released.
    pub fn outstanding(&self) -> usize {
        self.holds.len()
    }

    /// Point-in-time copy of every resource's usage.
    pub fn snapshot(&self) -> BTreeMap<String, ResourceUsage> {
        self.resources.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> BudgetLedger {
        BudgetLedger::new([("unit_calls", 3), ("deep_calls", 1)])
    }

    #[test]
    fn test_reserve_does_not_consume() {
        let mut ledger = ledger();
        let r = ledger.reserve("unit_calls", 1).unwrap();
        assert_eq!(ledger.used("unit_calls"), 0);
        assert_eq!(ledger.remaining("unit_calls"), 2);
        ledger.commit(r).unwrap();
        assert_eq!(ledger.used("unit_calls"), 1);
        assert_eq!(ledger.remaining("unit_calls"), 2);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_holds_prevent_over_reservation() {
        let mut ledger = ledger();
        let held: Vec<_> = (0..3)
            .map(|_| ledger.reserve("unit_calls", 1).unwrap())
            .collect();
        let denied = ledger.reserve("unit_calls", 1).unwrap_err();
        assert_eq!(denied.reason, DenialReason::InsufficientHeadroom);
        assert_eq!(denied.remaining, 0);

        for r in held {
            ledger.commit(r).unwrap();
        }
        assert_eq!(ledger.used("unit_calls"), 3);
        assert_eq!(ledger.cap("unit_calls"), 3);
    }

    #[test]
    fn test_release_restores_headroom() {
        let mut ledger = ledger();
        let r = ledger.reserve("deep_calls", 1).unwrap();
        assert_eq!(ledger.remaining("deep_calls"), 0);
        ledger.release(r).unwrap();
        assert_eq!(ledger.remaining("deep_calls"), 1);
        assert_eq!(ledger.used("deep_calls"), 0);
    }

    #[test]
    fn test_resources_are_independent() {
        let mut ledger = ledger();
        let r = ledger.reserve("deep_calls", 1).unwrap();
        ledger.commit(r).unwrap();
        assert!(ledger.reserve("deep_calls", 1).is_err());
        assert!(ledger.reserve("unit_calls", 1).is_ok());
    }

    #[test]
    fn test_unknown_and_zero_denied() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.reserve("draft_calls", 1).unwrap_err().reason,
            DenialReason::UnknownResource
        );
        assert_eq!(
            ledger.reserve("unit_calls", 0).unwrap_err().reason,
            DenialReason::ZeroAmount
        );
        assert_eq!(ledger.remaining("draft_calls"), 0);
    }

    #[test]
    fn test_zero_cap_denies_everything() {
        let mut ledger = BudgetLedger::new([("unit_calls", 0)]);
        assert_eq!(ledger.remaining("unit_calls"), 0);
        assert!(ledger.reserve("unit_calls", 1).is_err());
    }

    #[test]
    fn test_forged_reservation_is_invariant_violation() {
        let mut ledger = ledger();
        let forged = Reservation {
            id: 99,
            resource: "unit_calls".into(),
            amount: 1,
        };
        let err = ledger.commit(forged).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
    }

    #[test]
    fn test_mismatched_reservation_is_invariant_violation() {
        let mut ledger = ledger();
        let real = ledger.reserve("unit_calls", 1).unwrap();
        let tampered = Reservation {
            id: real.id,
            resource: "unit_calls".into(),
            amount: 2,
        };
        assert!(matches!(
            ledger.commit(tampered),
            Err(EngineError::InvariantViolation(_))
        ));
    }
}
