//! Server cart calls

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::client::{ClientError, ClientResult};
use crate::domain::value_objects::ItemRef;
use crate::http::cart::CartItemRequest;
use crate::services::CartContents;

#[async_trait]
pub trait CartApi: Send + Sync {
    async fn add_item(&self, token: &str, item: ItemRef, quantity: i32) -> ClientResult<()>;
    async fn fetch_cart(&self, token: &str) -> ClientResult<CartContents>;
    async fn delete_item(&self, token: &str, item: ItemRef) -> ClientResult<()>;
    async fn update_quantity(&self, token: &str, item: ItemRef, quantity: i32) -> ClientResult<()>;
}

#[derive(Debug, Clone)]
pub struct HttpCartApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCartApi {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base_url, path) }

    async fn send<B: Serialize + Sync>(&self, method: reqwest::Method, path: &str, token: &str, body: Option<&B>) -> ClientResult<reqwest::Response> {
        let mut req = self.client.request(method, self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        Self::check(req.send().await?).await
    }

    async fn check(resp: reqwest::Response) -> ClientResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            StatusCode::FORBIDDEN => ClientError::Forbidden(text),
            StatusCode::NOT_FOUND => ClientError::NotFound(text),
            StatusCode::BAD_REQUEST => ClientError::Validation(text),
            StatusCode::CONFLICT => ClientError::Conflict(text),
            _ => ClientError::Internal(text),
        })
    }

    async fn json<T: DeserializeOwned>(resp: reqwest::Response) -> ClientResult<T> {
        resp.json().await.map_err(Into::into)
    }
}

#[async_trait]
impl CartApi for HttpCartApi {
    async fn add_item(&self, token: &str, item: ItemRef, quantity: i32) -> ClientResult<()> {
        self.send(reqwest::Method::POST, "/cart/addtocart", token, Some(&CartItemRequest::new(item, quantity))).await?;
        Ok(())
    }

    async fn fetch_cart(&self, token: &str) -> ClientResult<CartContents> {
        let resp = self.send::<()>(reqwest::Method::GET, "/cart/fetchcart", token, None).await?;
        Self::json(resp).await
    }

    async fn delete_item(&self, token: &str, item: ItemRef) -> ClientResult<()> {
        self.send(reqwest::Method::DELETE, "/cart/deleteitem", token, Some(&CartItemRequest::new(item, 0))).await?;
        Ok(())
    }

    async fn update_quantity(&self, token: &str, item: ItemRef, quantity: i32) -> ClientResult<()> {
        self.send(reqwest::Method::PUT, "/cart/updatequantity", token, Some(&CartItemRequest::new(item, quantity))).await?;
        Ok(())
    }
}
