//! The cart state machine: a pure `(state, action) -> state` transition.
//!
//! Totals are never adjusted incrementally. Every applied transition ends by
//! recomputing them from the resulting item list.

use chrono::Utc;
use shared::{
    domain::{CartItem, CartState, ItemId},
    error::CartError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum CartAction {
    BeginLoad,
    /// Wholesale replacement, from a reconciliation or a restored snapshot.
    Load {
        items: Vec<CartItem>,
        coupon_code: Option<String>,
    },
    Add(CartItem),
    Remove(ItemId),
    /// Quantities at or below zero remove the item.
    UpdateQuantity {
        id: ItemId,
        quantity: i64,
    },
    ToggleSelect(ItemId),
    SelectAll(bool),
    Clear,
    SetOnline(bool),
    SetPendingSync(usize),
    Fail(CartError),
    ClearError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: CartState,
    /// Set when the action was refused. `state` then only differs from the
    /// input by its `error`.
    pub rejection: Option<CartError>,
}

impl Transition {
    fn applied(state: CartState) -> Self {
        Self {
            state,
            rejection: None,
        }
    }

    fn rejected(previous: &CartState, error: CartError) -> Self {
        let mut state = previous.clone();
        state.error = Some(error.clone());
        Self {
            state,
            rejection: Some(error),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CartStateMachine {
    max_quantity_per_item: u32,
}

impl CartStateMachine {
    pub fn new(max_quantity_per_item: u32) -> Self {
        Self {
            max_quantity_per_item: max_quantity_per_item.max(1),
        }
    }

    pub fn max_quantity_per_item(&self) -> u32 {
        self.max_quantity_per_item
    }

    pub fn reduce(&self, state: &CartState, action: CartAction) -> Transition {
        let mut next = state.clone();
        let now = Utc::now();

        match action {
            CartAction::BeginLoad => {
                next.is_loading = true;
            }
            CartAction::Load { items, coupon_code } => {
                next.items = dedupe(items);
                next.coupon_code = coupon_code;
                next.is_loading = false;
                next.last_updated = Some(now);
            }
            CartAction::Add(item) => match next.position(&item.id) {
                Some(index) => {
                    let existing = &mut next.items[index];
                    let wanted = existing.quantity.saturating_add(1);
                    if wanted > self.max_quantity_per_item {
                        return Transition::rejected(
                            state,
                            CartError::validation(format!(
                                "cannot add more than {} of item {}",
                                self.max_quantity_per_item, existing.id
                            )),
                        );
                    }
                    existing.quantity = wanted;
                    existing.updated_at = now;
                    next.last_updated = Some(now);
                }
                None => {
                    next.items.push(CartItem {
                        quantity: 1,
                        selected: true,
                        added_at: now,
                        updated_at: now,
                        ..item
                    });
                    next.last_updated = Some(now);
                }
            },
            CartAction::Remove(id) => {
                next.items.retain(|item| item.id != id);
                next.last_updated = Some(now);
            }
            CartAction::UpdateQuantity { id, quantity } => {
                if quantity <= 0 {
                    next.items.retain(|item| item.id != id);
                    next.last_updated = Some(now);
                } else {
                    let max = self.max_quantity_per_item;
                    let Some(index) = next.position(&id) else {
                        return Transition::rejected(
                            state,
                            CartError::validation(format!("item {id} is not in the cart")),
                        );
                    };
                    let quantity = match u32::try_from(quantity) {
                        Ok(quantity) if quantity <= max => quantity,
                        _ => {
                            return Transition::rejected(
                                state,
                                CartError::validation(format!(
                                    "quantity {quantity} for item {id} must be between 1 and {max}"
                                )),
                            );
                        }
                    };
                    let item = &mut next.items[index];
                    item.quantity = quantity;
                    item.updated_at = now;
                    next.last_updated = Some(now);
                }
            }
            CartAction::ToggleSelect(id) => {
                let Some(index) = next.position(&id) else {
                    return Transition::rejected(
                        state,
                        CartError::validation(format!("item {id} is not in the cart")),
                    );
                };
                let item = &mut next.items[index];
                item.selected = !item.selected;
                item.updated_at = now;
                next.last_updated = Some(now);
            }
            CartAction::SelectAll(selected) => {
                for item in &mut next.items {
                    item.selected = selected;
                }
                next.last_updated = Some(now);
            }
            CartAction::Clear => {
                next.items.clear();
                next.last_updated = Some(now);
            }
            CartAction::SetOnline(online) => {
                next.is_online = online;
            }
            CartAction::SetPendingSync(count) => {
                next.pending_sync_count = count;
            }
            CartAction::Fail(error) => {
                next.error = Some(error);
                next.is_loading = false;
            }
            CartAction::ClearError => {
                next.error = None;
            }
        }

        next.recompute_totals();
        Transition::applied(next)
    }
}

/// Keeps the first occurrence of every id; later duplicates fold their
/// quantity into it.
fn dedupe(items: Vec<CartItem>) -> Vec<CartItem> {
    let mut unique: Vec<CartItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity == 0 {
            continue;
        }
        match unique.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(item.quantity);
            }
            None => unique.push(item),
        }
    }
    unique
}

#[cfg(test)]
#[path = "tests/reducer_tests.rs"]
mod tests;
