use super::*;

use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    domain::{ItemMetadata, LockDiscount, ProductDetails, UnitPrice},
    error::CartErrorKind,
};

const A: &str = "64b7f0c2a1e4d3b2c1a09f01";
const B: &str = "64b7f0c2a1e4d3b2c1a09f02";
const C: &str = "64b7f0c2a1e4d3b2c1a09f03";

fn machine() -> CartStateMachine {
    CartStateMachine::new(5)
}

fn item(id: &str, price: i64) -> CartItem {
    CartItem::new(
        id,
        UnitPrice::flat(Decimal::from(price)),
        ItemMetadata::Product(ProductDetails {
            name: format!("product {id}"),
            ..ProductDetails::default()
        }),
    )
}

fn apply(state: &CartState, actions: Vec<CartAction>) -> CartState {
    let machine = machine();
    actions.into_iter().fold(state.clone(), |state, action| {
        machine.reduce(&state, action).state
    })
}

#[test]
fn adding_a_new_item_sets_totals() {
    let state = apply(&CartState::default(), vec![CartAction::Add(item(A, 100))]);
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0].quantity, 1);
    assert!(state.items[0].selected);
    assert_eq!(state.total_items, 1);
    assert_eq!(state.total_price, Decimal::from(100));
    assert!(state.last_updated.is_some());
}

#[test]
fn adding_the_same_id_increments_quantity() {
    let state = apply(
        &CartState::default(),
        vec![CartAction::Add(item(A, 100)), CartAction::Add(item(A, 100))],
    );
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0].quantity, 2);
    assert_eq!(state.total_price, Decimal::from(200));
}

#[test]
fn draft_quantity_and_selection_are_ignored_on_first_add() {
    let mut draft = item(A, 10);
    draft.quantity = 40;
    draft.selected = false;
    let state = apply(&CartState::default(), vec![CartAction::Add(draft)]);
    assert_eq!(state.items[0].quantity, 1);
    assert!(state.items[0].selected);
}

#[test]
fn update_to_zero_removes_item_and_resets_totals() {
    let state = apply(
        &CartState::default(),
        vec![
            CartAction::Add(item(A, 100)),
            CartAction::UpdateQuantity {
                id: ItemId::new(A),
                quantity: 0,
            },
        ],
    );
    assert!(state.item(&ItemId::new(A)).is_none());
    assert_eq!(state.total_items, 0);
    assert_eq!(state.total_price, Decimal::ZERO);
    assert!(state.error.is_none());
}

#[test]
fn negative_quantity_is_a_removal_not_an_error() {
    let state = apply(
        &CartState::default(),
        vec![
            CartAction::Add(item(A, 100)),
            CartAction::UpdateQuantity {
                id: ItemId::new(A),
                quantity: -3,
            },
        ],
    );
    assert!(state.items.is_empty());
    assert!(state.error.is_none());
}

#[test]
fn adding_beyond_the_limit_is_rejected_not_clamped() {
    let at_limit = apply(
        &CartState::default(),
        vec![
            CartAction::Add(item(A, 100)),
            CartAction::UpdateQuantity {
                id: ItemId::new(A),
                quantity: 5,
            },
        ],
    );
    let transition = machine().reduce(&at_limit, CartAction::Add(item(A, 100)));
    assert!(transition.is_rejected());
    assert_eq!(transition.state.items[0].quantity, 5);
    assert_eq!(transition.state.total_price, at_limit.total_price);
    let error = transition.state.error.expect("error set");
    assert_eq!(error.kind(), CartErrorKind::Validation);
}

#[test]
fn out_of_range_update_leaves_state_unchanged_with_error() {
    let state = apply(&CartState::default(), vec![CartAction::Add(item(A, 100))]);
    let transition = machine().reduce(
        &state,
        CartAction::UpdateQuantity {
            id: ItemId::new(A),
            quantity: 6,
        },
    );
    assert!(transition.is_rejected());
    assert_eq!(transition.state.items, state.items);
    assert!(transition.state.error.is_some());
}

#[test]
fn updating_an_unknown_item_is_rejected() {
    let transition = machine().reduce(
        &CartState::default(),
        CartAction::UpdateQuantity {
            id: ItemId::new(A),
            quantity: 2,
        },
    );
    assert!(transition.is_rejected());
}

#[test]
fn remove_drops_item_unconditionally() {
    let state = apply(
        &CartState::default(),
        vec![
            CartAction::Add(item(A, 100)),
            CartAction::Add(item(B, 50)),
            CartAction::Remove(ItemId::new(A)),
            CartAction::Remove(ItemId::new(C)),
        ],
    );
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0].id, ItemId::new(B));
    assert_eq!(state.total_price, Decimal::from(50));
}

#[test]
fn toggling_selection_recomputes_totals() {
    let state = apply(
        &CartState::default(),
        vec![
            CartAction::Add(item(A, 100)),
            CartAction::Add(item(B, 50)),
            CartAction::ToggleSelect(ItemId::new(A)),
        ],
    );
    assert_eq!(state.total_items, 1);
    assert_eq!(state.total_price, Decimal::from(50));

    let none = apply(&state, vec![CartAction::SelectAll(false)]);
    assert_eq!(none.total_items, 0);
    assert_eq!(none.total_price, Decimal::ZERO);

    let all = apply(&none, vec![CartAction::SelectAll(true)]);
    assert_eq!(all.total_items, 2);
    assert_eq!(all.total_price, Decimal::from(150));
}

#[test]
fn clear_empties_the_cart() {
    let state = apply(
        &CartState::default(),
        vec![
            CartAction::Add(item(A, 100)),
            CartAction::Add(item(B, 50)),
            CartAction::Clear,
        ],
    );
    assert!(state.items.is_empty());
    assert_eq!(state.total_items, 0);
    assert_eq!(state.total_price, Decimal::ZERO);
}

#[test]
fn load_replaces_items_and_merges_duplicate_ids() {
    let mut first = item(A, 10);
    first.quantity = 2;
    let mut duplicate = item(A, 10);
    duplicate.quantity = 3;
    let mut empty = item(C, 10);
    empty.quantity = 0;

    let state = apply(
        &CartState::default(),
        vec![
            CartAction::Add(item(B, 99)),
            CartAction::BeginLoad,
            CartAction::Load {
                items: vec![first, duplicate, empty],
                coupon_code: Some("SPRING".into()),
            },
        ],
    );
    assert!(!state.is_loading);
    assert_eq!(state.items.len(), 1);
    assert_eq!(state.items[0].quantity, 5);
    assert_eq!(state.total_price, Decimal::from(50));
    assert_eq!(state.coupon_code.as_deref(), Some("SPRING"));
}

#[test]
fn errors_are_single_and_cleared_explicitly() {
    let state = apply(
        &CartState::default(),
        vec![
            CartAction::BeginLoad,
            CartAction::Fail(CartError::network("first")),
            CartAction::Fail(CartError::network("second")),
        ],
    );
    assert!(!state.is_loading);
    assert_eq!(state.error, Some(CartError::network("second")));

    let cleared = apply(&state, vec![CartAction::ClearError]);
    assert!(cleared.error.is_none());
}

#[test]
fn connectivity_and_pending_count_are_tracked() {
    let state = apply(
        &CartState::default(),
        vec![CartAction::SetOnline(false), CartAction::SetPendingSync(3)],
    );
    assert!(!state.is_online);
    assert_eq!(state.pending_sync_count, 3);
}

#[test]
fn locked_discount_applies_to_totals() {
    let discounted = item(A, 100).with_discount(LockDiscount {
        per_unit: Decimal::from(10),
        locked_quantity: 1,
    });
    let state = apply(
        &CartState::default(),
        vec![CartAction::Add(discounted.clone()), CartAction::Add(discounted)],
    );
    assert_eq!(state.total_price, Decimal::from(190));
}

#[derive(Debug, Clone)]
enum Step {
    Add(usize),
    Remove(usize),
    Update(usize, i64),
    Toggle(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0usize..3).prop_map(Step::Add),
        (0usize..3).prop_map(Step::Remove),
        ((0usize..3), (-2i64..8)).prop_map(|(i, q)| Step::Update(i, q)),
        (0usize..3).prop_map(Step::Toggle),
    ]
}

proptest! {
    #[test]
    fn totals_always_match_selected_items(steps in prop::collection::vec(step_strategy(), 0..40)) {
        let ids = [A, B, C];
        let prices = [100i64, 35, 7];
        let machine = machine();
        let mut state = CartState::default();

        for step in steps {
            let action = match step {
                Step::Add(i) => CartAction::Add(
                    item(ids[i], prices[i]).with_discount(LockDiscount {
                        per_unit: Decimal::from(3),
                        locked_quantity: 2,
                    }),
                ),
                Step::Remove(i) => CartAction::Remove(ItemId::new(ids[i])),
                Step::Update(i, q) => CartAction::UpdateQuantity { id: ItemId::new(ids[i]), quantity: q },
                Step::Toggle(i) => CartAction::ToggleSelect(ItemId::new(ids[i])),
            };
            state = machine.reduce(&state, action).state;

            let expected_items: u32 = state.items.iter().filter(|i| i.selected).map(|i| i.quantity).sum();
            let expected_price: Decimal = state
                .items
                .iter()
                .filter(|i| i.selected)
                .map(|i| i.unit_price.discounted * Decimal::from(i.quantity) - i.discount_total())
                .sum();
            prop_assert_eq!(state.total_items, expected_items);
            prop_assert_eq!(state.total_price, expected_price);
            prop_assert!(state.items.iter().all(|i| i.quantity >= 1 && i.quantity <= 5));
        }
    }

    #[test]
    fn update_to_zero_always_removes(existing in 0usize..3, quantity in -5i64..=0) {
        let ids = [A, B, C];
        let mut state = CartState::default();
        for id in ids {
            state = machine().reduce(&state, CartAction::Add(item(id, 10))).state;
        }
        let id = ItemId::new(ids[existing]);
        let state = machine().reduce(&state, CartAction::UpdateQuantity { id: id.clone(), quantity }).state;
        prop_assert!(state.item(&id).is_none());
    }
}
