//! 按行读取 JSON 任务并写回 JSON 结果，流式任务每个输出块一行。

use std::sync::Arc;

use futures::StreamExt;
use qa_chat::ChatService;
use qa_core::{ChatRequest, Metadata};
use qa_error::{QaError, Result};
use qa_rag::DocumentAdmin;
use qa_resilience::CancellationToken;
use qa_tenant::TenantManager;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Job {
    Chat(ChatRequest),
    ChatStream(ChatRequest),
    ChatParallel(ChatRequest),
    AddDocuments {
        tenant_id: String,
        texts: Vec<String>,
        #[serde(default)]
        metadata: Metadata,
    },
    DeleteDocuments {
        tenant_id: String,
        ids: Vec<String>,
    },
    CountDocuments {
        tenant_id: String,
    },
    GetDocument {
        tenant_id: String,
        id: String,
    },
    CreateTenant {
        tenant_id: String,
        #[serde(default)]
        name: String,
    },
    DeleteTenant {
        tenant_id: String,
    },
    TenantInfo {
        tenant_id: String,
    },
    ListTenants,
}

pub struct JobRunner {
    chat: Arc<ChatService>,
    admin: DocumentAdmin,
    tenants: Arc<TenantManager>,
}

impl JobRunner {
    pub fn new(chat: Arc<ChatService>, admin: DocumentAdmin, tenants: Arc<TenantManager>) -> Self {
        Self {
            chat,
            admin,
            tenants,
        }
    }

    /// 处理输入直到 EOF
    pub async fn run<R, W>(&self, input: R, out: &mut W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Job>(line) {
                Ok(job) => self.handle(job, out).await?,
                Err(e) => {
                    warn!(error = %e, "invalid job line");
                    write_line(out, &json!({ "error": format!("invalid job: {}", e) })).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn handle<W>(&self, job: Job, out: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        debug!(?job, "handling job");
        if let Job::ChatStream(req) = job {
            return self.stream(req, out).await;
        }
        let reply = match self.execute(job).await {
            Ok(value) => value,
            Err(err) => json!({ "error": err.to_string(), "message": err.user_message() }),
        };
        write_line(out, &reply).await
    }

    async fn stream<W>(&self, req: ChatRequest, out: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut chunks = match self.chat.execute_turn_streaming(req) {
            Ok(chunks) => chunks,
            Err(err) => {
                return write_line(out, &json!({ "error": err.to_string() })).await;
            }
        };
        while let Some(chunk) = chunks.next().await {
            write_line(out, &serde_json::to_value(&chunk)?).await?;
        }
        Ok(())
    }

    async fn execute(&self, job: Job) -> Result<Value> {
        let cancel = CancellationToken::new();
        let value = match job {
            Job::Chat(req) => serde_json::to_value(self.chat.execute_turn(&req).await?)?,
            Job::ChatParallel(req) => {
                let timeout = self.chat.config().parallel.timeout();
                serde_json::to_value(self.chat.execute_turn_parallel(&req, timeout).await?)?
            }
            Job::ChatStream(_) => return Err(QaError::internal("streaming job is written directly")),
            Job::AddDocuments {
                tenant_id,
                texts,
                metadata,
            } => {
                let ids = self
                    .admin
                    .add_documents(&tenant_id, texts, metadata, &cancel)
                    .await?;
                json!({ "ids": ids })
            }
            Job::DeleteDocuments { tenant_id, ids } => {
                json!({ "deleted": self.admin.delete_documents(&tenant_id, &ids).await? })
            }
            Job::CountDocuments { tenant_id } => {
                json!({ "count": self.admin.document_count(&tenant_id).await? })
            }
            Job::GetDocument { tenant_id, id } => {
                serde_json::to_value(self.admin.get_document(&tenant_id, &id).await?)?
            }
            Job::CreateTenant { tenant_id, name } => {
                serde_json::to_value(self.tenants.create(&tenant_id, &name).await?)?
            }
            Job::DeleteTenant { tenant_id } => {
                self.tenants.delete(&tenant_id).await?;
                json!({ "deleted": tenant_id })
            }
            Job::TenantInfo { tenant_id } => serde_json::to_value(self.tenants.info(&tenant_id).await?)?,
            Job::ListTenants => json!({ "tenants": self.tenants.list().await }),
        };
        Ok(value)
    }
}

async fn write_line<W>(out: &mut W, value: &Value) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}
