//! Webhook observer: batches parsed results and periodic stats snapshots,
//! posting them to a configured URL.

use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::coordinator::{Observer, ScanStats};
use crate::parser::ParsedServer;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub batch_size: usize,
    pub include_stats: bool,
}

#[derive(Serialize)]
struct ResultPayload {
    ip: String,
    port: u16,
    version: String,
    software: String,
}

pub struct WebhookObserver {
    client: reqwest::Client,
    config: WebhookConfig,
    pending: Mutex<Vec<ResultPayload>>,
}

impl WebhookObserver {
    pub fn new(config: WebhookConfig) -> Self {
        WebhookObserver {
            client: reqwest::Client::new(),
            config,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Buffers one successful result; flushes once the batch fills.
    pub async fn notify_result(&self, ip: &str, port: u16, parsed: &ParsedServer) {
        let should_flush = {
            let mut pending = self.pending.lock().unwrap();
            pending.push(ResultPayload {
                ip: ip.to_string(),
                port,
                version: parsed.version_name.clone(),
                software: parsed.server_software.to_string(),
            });
            pending.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush().await;
        }
    }

    async fn flush(&self) {
        let batch = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self
            .client
            .post(&self.config.url)
            .json(&json!({"results": batch}))
            .send()
            .await
        {
            log::debug!("webhook result batch delivery failed: {e}");
        }
    }

    /// Pushed every 1000 completed probes and once more on `STOPPED`.
    pub async fn notify_stats(&self, stats: &ScanStats, complete: bool) {
        if !self.config.include_stats {
            return;
        }
        self.flush().await;
        let payload = json!({
            "stats": stats,
            "complete": complete,
        });
        if let Err(e) = self.client.post(&self.config.url).json(&payload).send().await {
            log::debug!("webhook stats delivery failed: {e}");
        }
    }
}

#[async_trait]
impl Observer for WebhookObserver {
    async fn on_result(&self, ip: IpAddr, port: u16, parsed: &ParsedServer) {
        self.notify_result(&ip.to_string(), port, parsed).await;
    }

    async fn on_stats(&self, stats: &ScanStats, complete: bool) {
        self.notify_stats(stats, complete).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffers_until_batch_size() {
        let observer = WebhookObserver::new(WebhookConfig {
            url: "http://127.0.0.1:1/unused".to_string(),
            batch_size: 100,
            include_stats: false,
        });
        let parsed = ParsedServer {
            version_name: "1.21".into(),
            protocol_version: 770,
            server_software: crate::model::ServerSoftware::Vanilla,
            motd_raw: "hi".into(),
            motd_clean: "hi".into(),
            max_players: 20,
            online_players: 0,
            players_sample: vec![],
            favicon_hash: None,
            favicon_data: None,
            mods: vec![],
            online_mode: crate::model::OnlineMode::Unknown,
            enforces_secure_chat: None,
            prevents_chat_reports: None,
            latency_ms: 1,
            legacy: false,
        };
        observer.notify_result("203.0.113.1", 25565, &parsed).await;
        assert_eq!(observer.pending.lock().unwrap().len(), 1);
    }
}
