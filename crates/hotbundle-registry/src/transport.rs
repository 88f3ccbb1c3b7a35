use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hotbundle_core::{
    BodyEvent, EngineConfig, HeadReply, HttpResponse, HttpTransport, JsonReply, UpdateError,
    UpdateResult,
};

const USER_AGENT: &str = concat!("hotbundle/", env!("CARGO_PKG_VERSION"));

/// `HttpTransport` over an async reqwest client with bounded connect and read
/// timeouts.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> UpdateResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| UpdateError::Network(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &EngineConfig) -> UpdateResult<Self> {
        Self::new(config.connect_timeout(), config.read_timeout())
    }
}

fn network(action: &str, url: &str, err: reqwest::Error) -> UpdateError {
    UpdateError::Network(format!("failed to {action} {url}: {err}"))
}

async fn json_reply(url: &str, response: reqwest::Response) -> UpdateResult<JsonReply> {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|err| network("read response from", url, err))?;
    let body = if text.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
    };
    Ok(JsonReply { status, body })
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> UpdateResult<HttpResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| network("fetch", url, err))?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let source = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| BodyEvent::Data(bytes.to_vec()))
                    .map_err(|err| network("read body of", &source, err))
            })
            .boxed();

        Ok(HttpResponse {
            status,
            content_length,
            body,
        })
    }

    async fn get_json(&self, url: &str) -> UpdateResult<JsonReply> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| network("fetch", url, err))?;
        json_reply(url, response).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> UpdateResult<JsonReply> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| network("post to", url, err))?;
        json_reply(url, response).await
    }

    async fn head(&self, url: &str, timeout: Duration) -> UpdateResult<HeadReply> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| network("probe", url, err))?;
        Ok(HeadReply {
            status: response.status().as_u16(),
            final_url: response.url().to_string(),
        })
    }
}
