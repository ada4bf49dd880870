use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{ItemMetadata, LockDiscount, ProductId, UnitPrice},
    error::{ApiError, ErrorCode},
};

/// A remote cart mutation. Quantities are absolute targets, never deltas, so
/// replaying a mutation converges on the same server state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CartMutation {
    AddItem {
        product_id: ProductId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
        quantity: u32,
    },
    UpdateQuantity {
        product_id: ProductId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
        quantity: u32,
    },
    RemoveItem {
        product_id: ProductId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
    },
    Clear,
    ApplyCoupon {
        code: String,
    },
    RemoveCoupon,
}

impl CartMutation {
    pub fn op_type(&self) -> &'static str {
        match self {
            Self::AddItem { .. } => "add_item",
            Self::UpdateQuantity { .. } => "update_quantity",
            Self::RemoveItem { .. } => "remove_item",
            Self::Clear => "clear",
            Self::ApplyCoupon { .. } => "apply_coupon",
            Self::RemoveCoupon => "remove_coupon",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub mutation: CartMutation,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedOperation {
    pub fn new(mutation: CartMutation) -> Self {
        Self {
            id: Uuid::new_v4(),
            mutation,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCartItem {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub quantity: u32,
    pub unit_price: UnitPrice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<LockDiscount>,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

/// The authoritative cart as reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteCart {
    pub items: Vec<RemoteCartItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

/// Success/failure envelope wrapping every backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
            code: None,
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            code: Some(code),
        }
    }

    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.success {
            return Ok(self.data);
        }
        Err(ApiError::new(
            self.code.unwrap_or(ErrorCode::Internal),
            self.message
                .unwrap_or_else(|| "request was not successful".to_string()),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}
