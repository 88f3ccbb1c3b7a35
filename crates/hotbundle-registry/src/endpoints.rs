use std::time::Duration;

use futures::future::select_ok;
use futures::FutureExt;
use hotbundle_core::{HttpTransport, JsonReply, ServerConfig, UpdateError, UpdateResult};
use tracing::{debug, warn};

/// Plain-http twin of an https URL.
pub(crate) fn http_fallback(url: &str) -> Option<String> {
    url.strip_prefix("https://")
        .map(|rest| format!("http://{rest}"))
}

/// POSTs `body`, retrying once over plain http when an https request fails
/// outright or is answered with a non-success status.
pub(crate) async fn post_with_fallback(
    transport: &dyn HttpTransport,
    url: &str,
    body: &serde_json::Value,
) -> UpdateResult<JsonReply> {
    let primary = transport.post_json(url, body).await;
    if matches!(&primary, Ok(reply) if reply.is_success()) {
        return primary;
    }
    let Some(fallback) = http_fallback(url) else {
        return primary;
    };

    match &primary {
        Ok(reply) => debug!(url, status = reply.status, "retrying over http"),
        Err(err) => debug!(url, error = %err, "retrying over http"),
    }
    transport.post_json(&fallback, body).await
}

/// Races every endpoint and returns the first successful reply.
pub(crate) async fn race_post(
    transport: &dyn HttpTransport,
    urls: &[String],
    body: &serde_json::Value,
) -> UpdateResult<JsonReply> {
    if urls.is_empty() {
        return Err(UpdateError::Network("no backup endpoints available".to_string()));
    }

    let attempts = urls.iter().map(|url| {
        async move {
            let reply = post_with_fallback(transport, url, body).await?;
            if reply.is_success() {
                Ok(reply)
            } else {
                Err(UpdateError::Network(format!(
                    "server responded with status {} for {url}",
                    reply.status
                )))
            }
        }
        .boxed()
    });
    let (reply, _) = select_ok(attempts).await.map_err(|err| {
        UpdateError::Network(format!("all backup endpoints failed, last error: {err}"))
    })?;
    Ok(reply)
}

/// Static backups plus the first endpoint list any query URL returns,
/// deduplicated in order.
pub(crate) async fn backup_endpoints(
    transport: &dyn HttpTransport,
    server: &ServerConfig,
) -> Vec<String> {
    let mut endpoints = Vec::new();
    for endpoint in &server.backups {
        push_unique(&mut endpoints, endpoint);
    }
    if server.query_urls.is_empty() {
        return endpoints;
    }

    let queries = server
        .query_urls
        .iter()
        .map(|url| fetch_endpoint_list(transport, url).boxed());
    match select_ok(queries).await {
        Ok((remote, _)) => {
            debug!(count = remote.len(), "fetched remote endpoints");
            for endpoint in &remote {
                push_unique(&mut endpoints, endpoint);
            }
        }
        Err(err) => warn!(error = %err, "failed to fetch remote endpoint lists"),
    }
    endpoints
}

async fn fetch_endpoint_list(
    transport: &dyn HttpTransport,
    url: &str,
) -> UpdateResult<Vec<String>> {
    let reply = transport.get_json(url).await?;
    if !reply.is_success() {
        return Err(UpdateError::Network(format!(
            "server responded with status {} for {url}",
            reply.status
        )));
    }
    serde_json::from_value(reply.body).map_err(|err| {
        UpdateError::Network(format!("malformed endpoint list from {url}: {err}"))
    })
}

fn push_unique(endpoints: &mut Vec<String>, endpoint: &str) {
    let endpoint = endpoint.trim();
    if !endpoint.is_empty() && !endpoints.iter().any(|existing| existing == endpoint) {
        endpoints.push(endpoint.to_string());
    }
}

/// Picks the download host: the first candidate answering a HEAD probe with
/// 200 inside `timeout`, otherwise the first candidate.
pub(crate) async fn pick_url(
    transport: &dyn HttpTransport,
    urls: &[String],
    timeout: Duration,
) -> Option<String> {
    let first = urls.first()?.clone();
    if urls.len() == 1 {
        return Some(first);
    }

    let probes = urls.iter().map(|url| ping(transport, url, timeout).boxed());
    match tokio::time::timeout(timeout, select_ok(probes)).await {
        Ok(Ok((url, _))) => {
            debug!(url = %url, "probe succeeded");
            Some(url)
        }
        Ok(Err(err)) => {
            debug!(error = %err, url = %first, "all probes failed, using first url");
            Some(first)
        }
        Err(_) => {
            debug!(url = %first, "probes timed out, using first url");
            Some(first)
        }
    }
}

async fn ping(
    transport: &dyn HttpTransport,
    url: &str,
    timeout: Duration,
) -> UpdateResult<String> {
    let mut reply = transport.head(url, timeout).await;
    if !matches!(&reply, Ok(head) if head.status == 200) {
        if let Some(fallback) = http_fallback(url) {
            reply = transport.head(&fallback, timeout).await;
        }
    }

    let reply = reply?;
    if reply.status != 200 {
        return Err(UpdateError::Network(format!(
            "probe of {url} returned status {}",
            reply.status
        )));
    }
    if reply.final_url.is_empty() {
        Ok(url.to_string())
    } else {
        Ok(reply.final_url)
    }
}
