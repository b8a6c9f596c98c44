//! Authorization: access evaluation, menu visibility and the per-operation guard.
//!
//! Access is evaluated against the role grant graph in the store. A request without
//! a principal is evaluated as the configured public role.

mod evaluator;
mod guard;
mod principal;

pub use evaluator::{render_menu, render_side, AccessEvaluator, StoreAccessEvaluator};
pub use guard::{AccessDecision, AccessDenied, Guard};
pub use principal::Principal;

/// Prefix every resolved permission name carries.
pub const PERMISSION_PREFIX: &str = "can_";

/// Synthetic permission controlling navigation entry visibility.
pub const MENU_ACCESS: &str = "menu_access";
