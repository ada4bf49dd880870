use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CartError;

/// Separator between the entity part and the variant part of a composite item id.
pub const ITEM_ID_SEPARATOR: char = '_';
/// Remote product ids are document ids: 24 hexadecimal characters.
pub const REMOTE_ID_LEN: usize = 24;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ItemId);
id_newtype!(ProductId);

/// The identity a local item is known by on the remote cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub product_id: ProductId,
    pub variant: Option<String>,
}

impl ItemId {
    /// Builds the local id for a product, appending the variant when present.
    pub fn compose(product_id: &ProductId, variant: Option<&str>) -> Self {
        match variant {
            Some(variant) if !variant.is_empty() => {
                Self(format!("{}{ITEM_ID_SEPARATOR}{variant}", product_id.0))
            }
            _ => Self(product_id.0.clone()),
        }
    }

    /// Splits the id at the first separator. Does not validate.
    pub fn split(&self) -> (&str, Option<&str>) {
        match self.0.split_once(ITEM_ID_SEPARATOR) {
            Some((entity, variant)) => (entity, Some(variant).filter(|v| !v.is_empty())),
            None => (self.0.as_str(), None),
        }
    }

    pub fn remote_identity(&self) -> Result<RemoteIdentity, CartError> {
        let (entity, variant) = self.split();
        if !is_valid_remote_id(entity) {
            return Err(CartError::validation(format!(
                "item id '{}' does not resolve to a valid product id",
                self.0
            )));
        }
        Ok(RemoteIdentity {
            product_id: ProductId::new(entity),
            variant: variant.map(str::to_string),
        })
    }
}

pub fn is_valid_remote_id(candidate: &str) -> bool {
    candidate.len() == REMOTE_ID_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrice {
    pub original: Decimal,
    pub discounted: Decimal,
}

impl UnitPrice {
    pub fn flat(price: Decimal) -> Self {
        Self {
            original: price,
            discounted: price,
        }
    }
}

/// Per-unit fee waiver that only applies to the first `locked_quantity` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDiscount {
    pub per_unit: Decimal,
    pub locked_quantity: u32,
}

impl LockDiscount {
    pub fn total_for(&self, quantity: u32) -> Decimal {
        self.per_unit * Decimal::from(self.locked_quantity.min(quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBooking {
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBooking {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum ItemMetadata {
    Product(ProductDetails),
    ServiceBooking(ServiceBooking),
    EventBooking(EventBooking),
}

impl Default for ItemMetadata {
    fn default() -> Self {
        Self::Product(ProductDetails::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: ItemId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub selected: bool,
    pub unit_price: UnitPrice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<LockDiscount>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: ItemMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl CartItem {
    /// A draft item as handed to an add mutation. Quantity, selection and
    /// timestamps are assigned by the reducer.
    pub fn new(id: impl Into<ItemId>, unit_price: UnitPrice, metadata: ItemMetadata) -> Self {
        let id = id.into();
        let (entity, variant) = id.split();
        let product_id = ProductId::new(entity);
        let variant = variant.map(str::to_string);
        let now = Utc::now();
        Self {
            id,
            product_id,
            quantity: 1,
            selected: true,
            unit_price,
            discount: None,
            added_at: now,
            updated_at: now,
            metadata,
            variant,
        }
    }

    pub fn with_discount(mut self, discount: LockDiscount) -> Self {
        self.discount = Some(discount);
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Identity used for remote calls. An explicit `variant` wins over the
    /// variant segment of a composite id.
    pub fn remote_identity(&self) -> Result<RemoteIdentity, CartError> {
        let mut identity = self.id.remote_identity()?;
        if self.variant.is_some() {
            identity.variant = self.variant.clone();
        }
        Ok(identity)
    }

    pub fn discount_total(&self) -> Decimal {
        self.discount
            .map(|discount| discount.total_for(self.quantity))
            .unwrap_or_default()
    }

    /// Discounted price times quantity, less the lock discount, never negative.
    pub fn line_total(&self) -> Decimal {
        let gross = self.unit_price.discounted * Decimal::from(self.quantity);
        (gross - self.discount_total()).max(Decimal::ZERO)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartState {
    pub items: Vec<CartItem>,
    pub total_items: u32,
    pub total_price: Decimal,
    pub is_loading: bool,
    pub error: Option<CartError>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub pending_sync_count: usize,
    pub coupon_code: Option<String>,
}

impl Default for CartState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_items: 0,
            total_price: Decimal::ZERO,
            is_loading: false,
            error: None,
            last_updated: None,
            is_online: true,
            pending_sync_count: 0,
            coupon_code: None,
        }
    }
}

impl CartState {
    pub fn item(&self, id: &ItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn position(&self, id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    /// Derives both totals from the current item list.
    pub fn recompute_totals(&mut self) {
        let selected = self.items.iter().filter(|item| item.selected);
        let (count, price) = selected.fold((0u32, Decimal::ZERO), |(count, price), item| {
            (
                count.saturating_add(item.quantity),
                price + item.line_total(),
            )
        });
        self.total_items = count;
        self.total_price = price;
    }
}
