//! In-process stand-ins shared by the unit test modules.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use shared::{
    domain::{CartItem, ItemMetadata, ProductDetails, ProductId, UnitPrice},
    error::ErrorCode,
    protocol::{RemoteCart, RemoteCartItem},
};

use crate::gateway::{GatewayError, GatewayResult, RemoteCartGateway};

pub(crate) const P1: &str = "64b7f0c2a1e4d3b2c1a09f01";
pub(crate) const P2: &str = "64b7f0c2a1e4d3b2c1a09f02";
pub(crate) const P3: &str = "64b7f0c2a1e4d3b2c1a09f03";

pub(crate) const CATALOG_PRICE: i64 = 25;

pub(crate) fn product(id: &str) -> CartItem {
    CartItem::new(
        id,
        UnitPrice::flat(Decimal::from(CATALOG_PRICE)),
        ItemMetadata::Product(ProductDetails {
            name: format!("product {id}"),
            ..ProductDetails::default()
        }),
    )
}

/// Remote cart kept in memory. Behaves like the backend: adds accumulate,
/// updates of absent lines are `NotFound`.
#[derive(Default)]
pub(crate) struct FakeGateway {
    cart: Mutex<RemoteCart>,
    calls: Mutex<Vec<String>>,
    unreachable: AtomicBool,
    failing: Mutex<HashSet<&'static str>>,
    prices: Mutex<HashMap<ProductId, Decimal>>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_items(items: &[(&str, u32)]) -> Self {
        let gateway = Self::default();
        let lines = items
            .iter()
            .map(|(id, quantity)| gateway.line(ProductId::new(*id), *quantity))
            .collect();
        gateway.cart.lock().items = lines;
        gateway
    }

    /// Catalog price the backend reports for a product. Defaults to
    /// [`CATALOG_PRICE`].
    pub(crate) fn priced(self, product_id: &str, price: i64) -> Self {
        self.prices
            .lock()
            .insert(ProductId::new(product_id), Decimal::from(price));
        self
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes every call of the named operation fail with a transport error.
    pub(crate) fn fail_operation(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    /// Removes a line server-side, as another session would.
    pub(crate) fn drop_line(&self, product_id: &str) {
        self.cart
            .lock()
            .items
            .retain(|item| item.product_id.as_str() != product_id);
    }

    pub(crate) fn recover_operation(&self, operation: &'static str) {
        self.failing.lock().remove(operation);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub(crate) fn cart(&self) -> RemoteCart {
        self.cart.lock().clone()
    }

    pub(crate) fn quantity_of(&self, product_id: &str) -> Option<u32> {
        self.cart
            .lock()
            .items
            .iter()
            .find(|item| item.product_id.as_str() == product_id)
            .map(|item| item.quantity)
    }

    fn line(&self, product_id: ProductId, quantity: u32) -> RemoteCartItem {
        let price = self
            .prices
            .lock()
            .get(&product_id)
            .copied()
            .unwrap_or(Decimal::from(CATALOG_PRICE));
        RemoteCartItem {
            product_id,
            variant: None,
            quantity,
            unit_price: UnitPrice::flat(price),
            discount: None,
            metadata: ItemMetadata::default(),
        }
    }

    fn enter(&self, operation: &'static str, call: String) -> GatewayResult<()> {
        self.calls.lock().push(call);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        if self.failing.lock().contains(operation) {
            return Err(GatewayError::Transport(format!("{operation} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCartGateway for FakeGateway {
    async fn get_cart(&self) -> GatewayResult<RemoteCart> {
        self.enter("get_cart", "get_cart".into())?;
        Ok(self.cart())
    }

    async fn add_to_cart(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> GatewayResult<RemoteCart> {
        self.enter("add_to_cart", format!("add_to_cart {product_id} {quantity}"))?;
        let mut cart = self.cart.lock();
        match cart
            .items
            .iter_mut()
            .find(|item| &item.product_id == product_id)
        {
            Some(item) => item.quantity += quantity,
            None => {
                let line = self.line(product_id.clone(), quantity);
                cart.items.push(line);
            }
        }
        Ok(cart.clone())
    }

    async fn update_cart_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant: Option<&str>,
    ) -> GatewayResult<RemoteCart> {
        self.enter(
            "update_cart_item",
            format!("update_cart_item {product_id} {quantity}"),
        )?;
        let mut cart = self.cart.lock();
        let item = cart
            .items
            .iter_mut()
            .find(|item| &item.product_id == product_id)
            .ok_or(GatewayError::NotFound)?;
        item.quantity = quantity;
        if let Some(variant) = variant {
            item.variant = Some(variant.to_string());
        }
        Ok(cart.clone())
    }

    async fn remove_cart_item(
        &self,
        product_id: &ProductId,
        _variant: Option<&str>,
    ) -> GatewayResult<RemoteCart> {
        self.enter("remove_cart_item", format!("remove_cart_item {product_id}"))?;
        let mut cart = self.cart.lock();
        let before = cart.items.len();
        cart.items.retain(|item| &item.product_id != product_id);
        if cart.items.len() == before {
            return Err(GatewayError::NotFound);
        }
        Ok(cart.clone())
    }

    async fn clear_cart(&self) -> GatewayResult<()> {
        self.enter("clear_cart", "clear_cart".into())?;
        self.cart.lock().items.clear();
        Ok(())
    }

    async fn apply_coupon(&self, code: &str) -> GatewayResult<()> {
        self.enter("apply_coupon", format!("apply_coupon {code}"))?;
        if code == "EXPIRED" {
            return Err(GatewayError::Rejected {
                code: ErrorCode::Validation,
                message: "coupon expired".into(),
            });
        }
        self.cart.lock().coupon_code = Some(code.to_string());
        Ok(())
    }

    async fn remove_coupon(&self) -> GatewayResult<()> {
        self.enter("remove_coupon", "remove_coupon".into())?;
        self.cart.lock().coupon_code = None;
        Ok(())
    }
}
