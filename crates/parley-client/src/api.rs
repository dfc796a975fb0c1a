use std::future::Future;

use reqwest::{RequestBuilder, Response};
use serde_json::json;
use uuid::Uuid;

use parley_types::api::{ErrorBody, ReactResponse, SendMessageRequest};
use parley_types::models::{Message, User};

use crate::error::ClientError;

/// The store-backed half of the conversation: everything the client reads
/// or writes over REST.
pub trait ChatApi {
    fn contacts(&self) -> impl Future<Output = Result<Vec<User>, ClientError>> + Send;

    fn conversation(
        &self,
        peer_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Message>, ClientError>> + Send;

    fn send_message(
        &self,
        peer_id: Uuid,
        req: &SendMessageRequest,
    ) -> impl Future<Output = Result<Message, ClientError>> + Send;

    fn react(
        &self,
        message_id: Uuid,
        emoji: Option<&str>,
    ) -> impl Future<Output = Result<ReactResponse, ClientError>> + Send;
}

/// [`ChatApi`] over HTTP with a bearer token.
#[derive(Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }
}

/// Turn non-2xx responses into [`ClientError::Server`], keeping the
/// server's error message when it sent one.
async fn check(res: Response) -> Result<Response, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let message = match res.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

impl ChatApi for HttpApi {
    async fn contacts(&self) -> Result<Vec<User>, ClientError> {
        let res = check(self.get("/contacts").send().await?).await?;
        Ok(res.json().await?)
    }

    async fn conversation(&self, peer_id: Uuid) -> Result<Vec<Message>, ClientError> {
        let path = format!("/conversation/{}", peer_id);
        let res = check(self.get(&path).send().await?).await?;
        Ok(res.json().await?)
    }

    async fn send_message(
        &self,
        peer_id: Uuid,
        req: &SendMessageRequest,
    ) -> Result<Message, ClientError> {
        let res = check(
            self.post(&format!("/messages/{}", peer_id))
                .json(req)
                .send()
                .await?,
        )
        .await?;
        Ok(res.json().await?)
    }

    async fn react(
        &self,
        message_id: Uuid,
        emoji: Option<&str>,
    ) -> Result<ReactResponse, ClientError> {
        let res = check(
            self.post(&format!("/messages/{}/react", message_id))
                .json(&json!({ "emoji": emoji }))
                .send()
                .await?,
        )
        .await?;
        Ok(res.json().await?)
    }
}
