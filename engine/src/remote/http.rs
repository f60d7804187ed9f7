//! HTTP adapter for the stash-server API.

use super::wire::{self, ErrorBody};
use super::{ChangeCallback, RemoteAdapter, RemoteResult, Subscription};
use crate::config::RemoteConfig;
use crate::error::{ConfigError, RemoteError};
use crate::item::sort_newest_first;
use crate::{Item, OwnerId};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode, Url};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// First delay before reconnecting a dropped change socket.
const RECONNECT_INITIAL: Duration = Duration::from_millis(500);
/// Upper bound for the reconnect backoff.
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// [`RemoteAdapter`] talking to stash-server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    endpoint: Url,
    credential: String,
    client: Client,
}

impl HttpRemote {
    /// Build an adapter from a configuration with both values set.
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        let (Some(endpoint), Some(credential)) = (&config.endpoint, &config.credential) else {
            return Err(ConfigError::InvalidEndpoint(
                config.endpoint.clone().unwrap_or_default(),
            ));
        };

        let endpoint =
            Url::parse(endpoint).map_err(|_| ConfigError::InvalidEndpoint(endpoint.clone()))?;
        if endpoint.cannot_be_a_base() {
            return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            endpoint,
            credential: credential.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Endpoint with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        // Checked in `new`: the endpoint can be a base.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn items_url(&self, collection: &str) -> Url {
        self.url(&["collections", collection, "items"])
    }

    fn item_url(&self, collection: &str, id: &str) -> Url {
        self.url(&["collections", collection, "items", id])
    }

    /// Change socket address: the endpoint with its scheme moved to ws(s).
    fn changes_url(&self, collection: &str) -> Url {
        let mut url = self.url(&["collections", collection, "changes"]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) to ws(s) is always a permitted scheme change.
        let _ = url.set_scheme(scheme);
        url
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Network(e.to_string())
}

async fn error_from(response: Response, target: Option<&str>) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.json::<ErrorBody>().await.ok();
    wire::classify(status, body, target)
}

#[async_trait]
impl RemoteAdapter for HttpRemote {
    fn is_available(&self) -> bool {
        true
    }

    async fn fetch(&self, collection: &str, owner: Option<&OwnerId>) -> RemoteResult<Vec<Item>> {
        let mut request = self
            .client
            .get(self.items_url(collection))
            .bearer_auth(&self.credential);
        if let Some(owner) = owner {
            request = request.query(&[(wire::OWNER_QUERY, owner)]);
        }

        let response = request.send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(error_from(response, None).await);
        }

        let mut items: Vec<Item> = response
            .json()
            .await
            .map_err(|e| RemoteError::Query(format!("malformed item list: {e}")))?;
        sort_newest_first(&mut items);
        Ok(items)
    }

    async fn insert(&self, collection: &str, item: &Item) -> RemoteResult<()> {
        let response = self
            .client
            .post(self.items_url(collection))
            .bearer_auth(&self.credential)
            .json(item)
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response, None).await)
        }
    }

    async fn update(&self, collection: &str, item: &Item) -> RemoteResult<()> {
        let response = self
            .client
            .put(self.item_url(collection, &item.id))
            .bearer_auth(&self.credential)
            .json(item)
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response, Some(&item.id)).await)
        }
    }

    async fn remove(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.item_url(collection, id))
            .bearer_auth(&self.credential)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(error_from(response, Some(id)).await),
        }
    }

    fn subscribe(&self, collection: &str, on_change: ChangeCallback) -> Subscription {
        let url = self.changes_url(collection);
        let credential = self.credential.clone();
        let collection = collection.to_string();

        Subscription::new(tokio::spawn(async move {
            let mut backoff = RECONNECT_INITIAL;
            let mut connected_before = false;

            loop {
                match open_change_socket(&url, &credential).await {
                    Ok(mut socket) => {
                        tracing::debug!(collection = %collection, "change socket connected");
                        backoff = RECONNECT_INITIAL;
                        // Notices may have been missed while disconnected.
                        if connected_before {
                            on_change();
                        }
                        connected_before = true;

                        while let Some(message) = socket.next().await {
                            match message {
                                Ok(Message::Text(_) | Message::Binary(_)) => on_change(),
                                Ok(Message::Close(_)) => {
                                    tracing::debug!(collection = %collection, "change socket closed by server");
                                    break;
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    tracing::warn!(collection = %collection, error = %e, "change socket failed");
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(collection = %collection, error = %e, "change socket unavailable");
                    }
                }

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);
            }
        }))
    }
}

type ChangeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the change socket with the bearer credential on the handshake.
async fn open_change_socket(url: &Url, credential: &str) -> RemoteResult<ChangeSocket> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RemoteError::Network(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
        .map_err(|_| RemoteError::Network("credential is not a valid header value".into()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (socket, _) = connect_async(request)
        .await
        .map_err(|e| RemoteError::Network(e.to_string()))?;
    Ok(socket)
}
