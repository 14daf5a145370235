#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use newsrelay::ai::{prompts, ChatBackend};
use newsrelay::config::Config;
use newsrelay::db::Repository;
use newsrelay::models::RawItem;
use newsrelay::publish::{Channel, MakeChannel, TelegramChannel, WhatsAppChannel};
use newsrelay::scoring::RuleSet;
use newsrelay::{AppContext, AppError, Pipeline, Result};

/// Answers classification and generation prompts with fixed, valid JSON.
pub struct ScriptedLlm {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ChatBackend for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if system == prompts::CLASSIFY_SYSTEM {
            return Ok(json!({
                "template": "ANALISE_INTEL",
                "risk": "medium",
                "priority": "P1",
                "requires_review": false
            })
            .to_string());
        }
        Ok(json!({"payload": {
            "tema": "Acordo com a SEC",
            "status_confirmacao": "alegação — não confirmada",
            "leitura_rapida": ["Rumor de acordo", "Sem comunicado oficial", "Mercado reage"],
            "por_que_importa": ["Precedente regulatório", "Impacto em cripto"],
            "checklist_osint": ["Site da SEC", "Registros judiciais", "Porta-vozes"],
            "insight_central": "Aguardar confirmação oficial."
        }})
        .to_string())
    }
}

/// Every call fails like an unreachable model endpoint.
pub struct DownLlm;

#[async_trait]
impl ChatBackend for DownLlm {
    fn model(&self) -> &str {
        "down"
    }

    async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
        Err(AppError::LlmResponse("HTTP 503 Service Unavailable".into()))
    }
}

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn ctx(&self) -> &AppContext {
        self.pipeline.context()
    }
}

/// Context with unconfigured real channels, so publishing never leaves the process.
pub async fn harness(backend: Arc<dyn ChatBackend>) -> Harness {
    let config = Config::default();
    let channels: Vec<Arc<dyn Channel>> = vec![
        Arc::new(TelegramChannel::new(&config.telegram, &config.retry).unwrap()),
        Arc::new(WhatsAppChannel::new(&config.whatsapp, &config.retry).unwrap()),
        Arc::new(MakeChannel::new(&config.make).unwrap()),
    ];
    harness_with(backend, config, channels).await
}

/// Context over a throwaway database with the given config and channels.
pub async fn harness_with(
    backend: Arc<dyn ChatBackend>,
    mut config: Config,
    channels: Vec<Arc<dyn Channel>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    config.db_path = dir.path().join("relay.db").to_string_lossy().into_owned();

    let repo = Repository::new(&config.db_path).await.unwrap();
    let ctx = AppContext::with_parts(
        config,
        repo,
        None,
        backend,
        channels,
        RuleSet::defaults().unwrap(),
    );
    Harness {
        _dir: dir,
        pipeline: Pipeline::new(Arc::new(ctx)),
    }
}

pub fn scripted_llm() -> Arc<ScriptedLlm> {
    Arc::new(ScriptedLlm {
        calls: AtomicUsize::new(0),
    })
}

pub fn sec_rumor() -> RawItem {
    RawItem {
        title: "Rumor of SEC settlement".into(),
        url: Some("https://news.example.com/markets/sec-settlement?utm_source=feed".into()),
        summary: Some("Unconfirmed reports point to a settlement between the SEC and an exchange.".into()),
        source_name: Some("Reuters".into()),
        source_type: "rss".into(),
        published_at: None,
    }
}
