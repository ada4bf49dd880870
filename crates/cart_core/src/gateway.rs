use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::ProductId,
    error::{CartError, ErrorCode},
    protocol::{
        AddToCartRequest, ApplyCouponRequest, Envelope, RemoteCart, UpdateCartItemRequest,
        VariantQuery,
    },
};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("not authenticated")]
    Unauthorized,
    #[error("item not found on the remote cart")]
    NotFound,
    #[error("remote cart rejected the request ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("remote cart backend is unavailable")]
    Unavailable,
}

impl From<GatewayError> for CartError {
    fn from(value: GatewayError) -> Self {
        CartError::network(value.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Backend cart API. The authoritative source of truth for cart contents.
#[async_trait]
pub trait RemoteCartGateway: Send + Sync {
    async fn get_cart(&self) -> GatewayResult<RemoteCart>;
    async fn add_to_cart(&self, product_id: &ProductId, quantity: u32)
        -> GatewayResult<RemoteCart>;
    async fn update_cart_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant: Option<&str>,
    ) -> GatewayResult<RemoteCart>;
    async fn remove_cart_item(
        &self,
        product_id: &ProductId,
        variant: Option<&str>,
    ) -> GatewayResult<RemoteCart>;
    async fn clear_cart(&self) -> GatewayResult<()>;
    async fn apply_coupon(&self, code: &str) -> GatewayResult<()>;
    async fn remove_coupon(&self) -> GatewayResult<()>;
}

pub struct MissingRemoteCartGateway;

#[async_trait]
impl RemoteCartGateway for MissingRemoteCartGateway {
    async fn get_cart(&self) -> GatewayResult<RemoteCart> {
        Err(GatewayError::Unavailable)
    }

    async fn add_to_cart(
        &self,
        _product_id: &ProductId,
        _quantity: u32,
    ) -> GatewayResult<RemoteCart> {
        Err(GatewayError::Unavailable)
    }

    async fn update_cart_item(
        &self,
        _product_id: &ProductId,
        _quantity: u32,
        _variant: Option<&str>,
    ) -> GatewayResult<RemoteCart> {
        Err(GatewayError::Unavailable)
    }

    async fn remove_cart_item(
        &self,
        _product_id: &ProductId,
        _variant: Option<&str>,
    ) -> GatewayResult<RemoteCart> {
        Err(GatewayError::Unavailable)
    }

    async fn clear_cart(&self) -> GatewayResult<()> {
        Err(GatewayError::Unavailable)
    }

    async fn apply_coupon(&self, _code: &str) -> GatewayResult<()> {
        Err(GatewayError::Unavailable)
    }

    async fn remove_coupon(&self) -> GatewayResult<()> {
        Err(GatewayError::Unavailable)
    }
}

/// Creates a remote line, then attaches the variant when there is one.
pub(crate) async fn create_item(
    gateway: &dyn RemoteCartGateway,
    product_id: &ProductId,
    quantity: u32,
    variant: Option<&str>,
) -> GatewayResult<()> {
    gateway.add_to_cart(product_id, quantity).await?;
    if variant.is_some() {
        gateway
            .update_cart_item(product_id, quantity, variant)
            .await?;
    }
    Ok(())
}

/// Sets an absolute quantity, creating the line when the backend lacks it.
pub(crate) async fn upsert_item(
    gateway: &dyn RemoteCartGateway,
    product_id: &ProductId,
    quantity: u32,
    variant: Option<&str>,
) -> GatewayResult<()> {
    match gateway
        .update_cart_item(product_id, quantity, variant)
        .await
    {
        Ok(_) => Ok(()),
        Err(GatewayError::NotFound) => create_item(gateway, product_id, quantity, variant).await,
        Err(err) => Err(err),
    }
}

/// Supplies the bearer credential for backend calls.
pub trait AuthProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
    fn is_authenticated(&self) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    token: Option<String>,
}

impl StaticAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl AuthProvider for StaticAuth {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.is_empty())
    }
}

/// JSON-over-HTTP adapter for the backend cart API.
pub struct HttpCartGateway {
    http: Client,
    base_url: Url,
    auth: Arc<dyn AuthProvider>,
}

impl HttpCartGateway {
    pub fn new(base_url: &str, auth: Arc<dyn AuthProvider>) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> GatewayResult<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let token = self.auth.bearer_token().ok_or(GatewayError::Unauthorized)?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<Option<T>> {
        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(GatewayError::Unauthorized)
            }
            StatusCode::NOT_FOUND => return Err(GatewayError::NotFound),
            _ => {}
        }

        let status = response.status();
        let envelope: Envelope<T> = response.json().await.map_err(|err| {
            if status.is_success() {
                GatewayError::Decode(err.to_string())
            } else {
                GatewayError::Transport(format!("http status {status}"))
            }
        })?;

        envelope.into_result().map_err(|err| match err.code {
            ErrorCode::NotFound => GatewayError::NotFound,
            ErrorCode::Unauthorized => GatewayError::Unauthorized,
            code => GatewayError::Rejected {
                code,
                message: err.message,
            },
        })
    }

    async fn send_cart(&self, request: RequestBuilder) -> GatewayResult<RemoteCart> {
        self.send::<RemoteCart>(request)
            .await?
            .ok_or_else(|| GatewayError::Decode("response carried no cart".to_string()))
    }

    async fn send_empty(&self, request: RequestBuilder) -> GatewayResult<()> {
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }

    fn item_path(product_id: &ProductId) -> String {
        format!("cart/items/{}", product_id.as_str())
    }
}

#[async_trait]
impl RemoteCartGateway for HttpCartGateway {
    async fn get_cart(&self) -> GatewayResult<RemoteCart> {
        self.send_cart(self.request(Method::GET, "cart")?).await
    }

    async fn add_to_cart(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> GatewayResult<RemoteCart> {
        let request = self
            .request(Method::POST, "cart/items")?
            .json(&AddToCartRequest {
                product_id: product_id.clone(),
                quantity,
            });
        self.send_cart(request).await
    }

    async fn update_cart_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant: Option<&str>,
    ) -> GatewayResult<RemoteCart> {
        let request = self
            .request(Method::PUT, &Self::item_path(product_id))?
            .json(&UpdateCartItemRequest {
                quantity,
                variant: variant.map(str::to_string),
            });
        self.send_cart(request).await
    }

    async fn remove_cart_item(
        &self,
        product_id: &ProductId,
        variant: Option<&str>,
    ) -> GatewayResult<RemoteCart> {
        let request = self
            .request(Method::DELETE, &Self::item_path(product_id))?
            .query(&VariantQuery {
                variant: variant.map(str::to_string),
            });
        self.send_cart(request).await
    }

    async fn clear_cart(&self) -> GatewayResult<()> {
        self.send_empty(self.request(Method::DELETE, "cart")?).await
    }

    async fn apply_coupon(&self, code: &str) -> GatewayResult<()> {
        let request = self
            .request(Method::POST, "cart/coupon")?
            .json(&ApplyCouponRequest {
                code: code.to_string(),
            });
        self.send_empty(request).await
    }

    async fn remove_coupon(&self) -> GatewayResult<()> {
        self.send_empty(self.request(Method::DELETE, "cart/coupon")?)
            .await
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
