//! Order transition table and role permissions.
//!
//! [`apply_transition`] is the only function that writes `Order::state`
//! for a requested transition; every engine path goes through it.

use super::model::{Order, OrderState};
use crate::collab::Role;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// States reachable in one step from `from`.
pub fn allowed_targets(from: OrderState) -> &'static [OrderState] {
    use OrderState::*;
    match from {
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[Preparing, Cancelled],
        Preparing => &[Ready, Cancelled],
        Ready => &[EnRoute, Cancelled],
        EnRoute => &[Delivered, Cancelled],
        Delivered | Cancelled => &[],
    }
}

pub fn can_transition(from: OrderState, to: OrderState) -> bool {
    allowed_targets(from).contains(&to)
}

/// Target states a caller may request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermittedStates {
    /// No restriction beyond the transition table.
    Any,
    /// Only these targets.
    Only(Vec<OrderState>),
}

impl PermittedStates {
    pub fn none() -> Self {
        PermittedStates::Only(Vec::new())
    }

    pub fn only(states: &[OrderState]) -> Self {
        PermittedStates::Only(states.to_vec())
    }

    pub fn permits(&self, state: OrderState) -> bool {
        match self {
            PermittedStates::Any => true,
            PermittedStates::Only(states) => states.contains(&state),
        }
    }
}

/// Role → permitted target states.
#[derive(Debug, Clone)]
pub struct RolePolicy {
    table: HashMap<Role, PermittedStates>,
}

impl Default for RolePolicy {
    fn default() -> Self {
        use OrderState::*;
        let mut table = HashMap::new();
        table.insert(Role::Customer, PermittedStates::none());
        table.insert(
            Role::Store,
            PermittedStates::only(&[Confirmed, Preparing, Ready, Cancelled]),
        );
        table.insert(Role::Courier, PermittedStates::only(&[EnRoute, Delivered]));
        table.insert(Role::Admin, PermittedStates::Any);
        RolePolicy { table }
    }
}

impl RolePolicy {
    pub fn with_role(mut self, role: Role, permitted: PermittedStates) -> Self {
        self.table.insert(role, permitted);
        self
    }

    /// Permitted targets for `role`. Roles missing from the table get none.
    pub fn permitted(&self, role: Role) -> PermittedStates {
        self.table
            .get(&role)
            .cloned()
            .unwrap_or_else(PermittedStates::none)
    }
}

/// Move `order` to `to`, returning the state it left.
///
/// The permission check runs before the table check, so a role asking for a
/// target it may never request gets `AuthorizationDenied` whatever the
/// current state. On error `order` is untouched.
pub fn apply_transition(
    order: &mut Order,
    to: OrderState,
    permitted: &PermittedStates,
    now: DateTime<Utc>,
) -> Result<OrderState> {
    let from = order.state;
    if !permitted.permits(to) {
        return Err(Error::AuthorizationDenied(format!(
            "transition to {} is not permitted",
            to
        )));
    }
    if !can_transition(from, to) {
        return Err(Error::InvalidTransition { from, to });
    }

    order.state = to;
    order.updated_at = now;
    if to == OrderState::Delivered {
        order.delivered_at = Some(now);
    }
    Ok(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderState::*;

    #[test]
    fn test_cancel_reachable_from_every_open_state() {
        for state in OrderState::ALL {
            assert_eq!(
                can_transition(state, Cancelled),
                !state.is_terminal(),
                "{}",
                state
            );
        }
    }

    #[test]
    fn test_no_skipping() {
        assert!(can_transition(Pending, Confirmed));
        assert!(!can_transition(Pending, Preparing));
        assert!(!can_transition(Ready, Delivered));
        assert!(!can_transition(Confirmed, Pending));
        assert!(!can_transition(Pending, Pending));
    }

    #[test]
    fn test_default_role_policy() {
        let policy = RolePolicy::default();
        assert!(!policy.permitted(Role::Customer).permits(Cancelled));
        assert!(policy.permitted(Role::Store).permits(Ready));
        assert!(!policy.permitted(Role::Store).permits(EnRoute));
        assert!(policy.permitted(Role::Courier).permits(Delivered));
        assert!(!policy.permitted(Role::Courier).permits(Cancelled));
        assert!(policy.permitted(Role::Admin).permits(Delivered));
    }

    #[test]
    fn test_role_policy_override() {
        let policy =
            RolePolicy::default().with_role(Role::Customer, PermittedStates::only(&[Cancelled]));
        assert!(policy.permitted(Role::Customer).permits(Cancelled));
    }
}
