use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use qa_chat::{
    ChatComponents, ChatConfig, ChatService, IntentClassifier, OrderLookup, ResponseGenerator,
};
use qa_llm::make_providers;
use qa_rag::{DocumentAdmin, Retriever, RetrieverExecutors};
use qa_resilience::ResilientExecutor;
use qa_store::SqliteProvisioner;
use qa_tenant::TenantManager;
use qa_vector::{MemoryVectorBackend, QdrantVectorBackend, VectorProvisioner};
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

mod config;
mod jobs;

use config::{load_config, AppConfig, VectorBackendKind, DEFAULT_CONFIG_PATH};
use jobs::JobRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let path = std::env::var("QA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (cfg, missing) = load_config(&path)?;
    init_tracing(&cfg.logging.level);
    for key in &missing {
        warn!(key = %key, "config placeholder has no env value");
    }
    info!(
        name = %cfg.server.name,
        config = %path.display(),
        vector_backend = ?cfg.vector.backend,
        dimension = cfg.vector.dimension,
        "qa-worker starting"
    );

    let tenants = build_tenants(&cfg)?;
    for tenant_id in &cfg.server.preload_tenants {
        if let Err(e) = tenants.resolve(tenant_id).await {
            error!(tenant_id = %tenant_id, error = %e, "failed to preload tenant");
        }
    }
    let (chat, admin) = build_services(&cfg, tenants.clone())?;

    let sweeper = tokio::spawn(sweep_sessions(
        tenants.clone(),
        Duration::from_secs(cfg.server.sweep_interval_secs.max(1)),
    ));

    let runner = JobRunner::new(chat, admin, tenants.clone());
    let mut stdout = tokio::io::stdout();
    tokio::select! {
        res = runner.run(BufReader::new(tokio::io::stdin()), &mut stdout) => {
            if let Err(e) = res {
                error!(error = %e, "job loop failed");
            }
            info!("job input closed");
        }
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    sweeper.abort();
    tenants.close().await;
    info!("qa-worker stopped");
    Ok(())
}

fn init_tracing(default_level: &str) {
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn build_tenants(cfg: &AppConfig) -> anyhow::Result<Arc<TenantManager>> {
    let vectors: Arc<dyn VectorProvisioner> = match cfg.vector.backend {
        VectorBackendKind::Memory => Arc::new(MemoryVectorBackend::new()),
        VectorBackendKind::Qdrant => Arc::new(QdrantVectorBackend::connect(
            &cfg.vector.url,
            cfg.vector.api_key.clone().filter(|k| !k.is_empty()),
        )?),
    };
    let databases = Arc::new(
        SqliteProvisioner::new(&cfg.database.base_path)
            .with_max_connections(cfg.database.max_connections),
    );
    Ok(Arc::new(TenantManager::new(
        vectors,
        databases,
        cfg.vector.dimension,
    )))
}

fn build_services(
    cfg: &AppConfig,
    tenants: Arc<TenantManager>,
) -> anyhow::Result<(Arc<ChatService>, DocumentAdmin)> {
    let providers = make_providers(cfg.llm.clone(), cfg.embedding.clone())?;
    let resilience = &cfg.resilience;

    let components = ChatComponents {
        classifier: IntentClassifier::new(providers.chat.clone(), cfg.intent.clone())
            .with_executor(ResilientExecutor::from_config("classifier_llm", resilience)),
        retriever: Retriever::new(
            tenants.clone(),
            providers.embed.clone(),
            providers.chat.clone(),
            cfg.rag.clone(),
        )
        .with_executors(RetrieverExecutors::from_config(resilience)),
        lookup: OrderLookup::new(tenants.clone(), providers.chat.clone()).with_executors(
            ResilientExecutor::from_config("order_llm", resilience),
            ResilientExecutor::from_config("order_db", resilience),
        ),
        generator: ResponseGenerator::new(providers.chat.clone())
            .with_executor(ResilientExecutor::from_config("response_llm", resilience)),
    };
    let chat_config = ChatConfig {
        session: cfg.session.clone(),
        parallel: cfg.parallel.clone(),
    };
    let chat = Arc::new(ChatService::new(tenants.clone(), components, chat_config));
    let admin = DocumentAdmin::new(tenants, providers.embed)
        .with_executor(ResilientExecutor::from_config("admin_embedding", resilience));
    Ok((chat, admin))
}

/// 定期清理已加载租户的过期会话
async fn sweep_sessions(tenants: Arc<TenantManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for tenant_id in tenants.list().await {
            let resources = match tenants.resolve(&tenant_id).await {
                Ok(resources) => resources,
                Err(e) => {
                    warn!(tenant_id = %tenant_id, error = %e, "skip session sweep");
                    continue;
                }
            };
            match resources.sessions.delete_expired().await {
                Ok(0) => {}
                Ok(n) => info!(tenant_id = %tenant_id, deleted = n, "expired sessions removed"),
                Err(e) => warn!(tenant_id = %tenant_id, error = %e, "session sweep failed"),
            }
        }
    }
}
