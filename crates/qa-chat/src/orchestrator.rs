use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use qa_core::{
    ChatRequest, ChatTurnResult, Document, Intent, IntentType, Message, Session, StreamChunk,
    TurnMetadata,
};
use qa_error::{ErrorMetadataBuilder, QaError, Result};
use qa_rag::{RetrievalAnswer, Retriever};
use qa_resilience::CancellationToken;
use qa_tenant::{TenantManager, TenantResources};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::generator::{error_message, handoff_message, ResponseGenerator, FALLBACK_MESSAGE};
use crate::stream::{turn_channel, ChunkSender, TurnStream};
use crate::{IntentClassifier, OrderLookup};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    /// 交给生成模型的最大历史消息数
    pub max_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            max_history: 20,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub timeout_ms: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl ParallelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub session: SessionConfig,
    pub parallel: ParallelConfig,
}

/// 编排所需的各个策略组件
pub struct ChatComponents {
    pub classifier: IntentClassifier,
    pub retriever: Retriever,
    pub lookup: OrderLookup,
    pub generator: ResponseGenerator,
}

/// 进行中的一轮对话
struct Turn {
    resources: TenantResources,
    session: Session,
    started: Instant,
}

impl Turn {
    fn tenant_id(&self) -> &str {
        self.resources.tenant_id()
    }
}

struct RouteOutcome {
    answer: String,
    sources: Vec<Document>,
}

impl RouteOutcome {
    fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
        }
    }
}

impl From<RetrievalAnswer> for RouteOutcome {
    fn from(r: RetrievalAnswer) -> Self {
        Self {
            answer: r.answer,
            sources: r.sources,
        }
    }
}

/// 对话编排服务
///
/// 每轮流程：解析会话 → 追加用户消息 → 意图识别 → 按路由生成回答 → 追加助手消息并保存。
/// 路由失败转为面向用户的文本，只有入口校验失败才会向调用方返回错误。
/// 同一会话上的并发轮次不做互斥，后保存者覆盖会话元数据。
pub struct ChatService {
    tenants: Arc<TenantManager>,
    classifier: IntentClassifier,
    retriever: Arc<Retriever>,
    lookup: Arc<OrderLookup>,
    generator: ResponseGenerator,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(tenants: Arc<TenantManager>, components: ChatComponents, config: ChatConfig) -> Self {
        Self {
            tenants,
            classifier: components.classifier,
            retriever: Arc::new(components.retriever),
            lookup: Arc::new(components.lookup),
            generator: components.generator,
            config,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn tenants(&self) -> &Arc<TenantManager> {
        &self.tenants
    }

    /// 同步执行一轮对话
    pub async fn execute_turn(&self, req: &ChatRequest) -> Result<ChatTurnResult> {
        self.execute_turn_with(req, &CancellationToken::new()).await
    }

    #[instrument(skip(self, req, cancel), fields(tenant_id = %req.tenant_id))]
    pub async fn execute_turn_with(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatTurnResult> {
        req.validate()?;
        let turn = self.begin_turn(req).await?;
        let intent = self.classify(&turn, &req.query, cancel).await;
        let outcome = self.dispatch(&turn, &intent, &req.query, cancel).await;
        Ok(self.finish_turn(turn, &intent, outcome).await)
    }

    /// 流式执行：直接回答逐片输出，其他路由输出单个内容块；
    /// 最后总是恰好一个 `Done` 块，出错时先发 `Error` 块。
    pub fn execute_turn_streaming(self: &Arc<Self>, req: ChatRequest) -> Result<TurnStream> {
        req.validate()?;
        let (sender, stream) = turn_channel();
        let service = Arc::clone(self);
        tokio::spawn(async move { service.stream_turn(req, sender).await });
        Ok(stream)
    }

    /// 直接回答意图时并行查询课程与订单并合并；超时后放弃等待，改为直接生成
    #[instrument(skip(self, req), fields(tenant_id = %req.tenant_id))]
    pub async fn execute_turn_parallel(
        &self,
        req: &ChatRequest,
        timeout: Duration,
    ) -> Result<ChatTurnResult> {
        req.validate()?;
        let cancel = CancellationToken::new();
        let turn = self.begin_turn(req).await?;
        let intent = self.classify(&turn, &req.query, &cancel).await;
        let outcome = match intent.kind {
            IntentType::Direct => self.fan_out(&turn, &req.query, timeout, &cancel).await,
            _ => self.dispatch(&turn, &intent, &req.query, &cancel).await,
        };
        Ok(self.finish_turn(turn, &intent, outcome).await)
    }

    async fn begin_turn(&self, req: &ChatRequest) -> Result<Turn> {
        let started = Instant::now();
        let resources = self.tenants.resolve(&req.tenant_id).await?;
        let mut session = self.load_or_create(&resources, &req.session_id).await;

        let message = Message::user(req.query.as_str())?;
        if let Err(err) = session.add_message(message.clone()) {
            debug!(session_id = %session.id, error = %err, "session rejected message, starting a new one");
            session = Session::new(resources.tenant_id(), self.config.session.ttl());
            session.add_message(message)?;
        }
        Ok(Turn {
            resources,
            session,
            started,
        })
    }

    async fn load_or_create(&self, resources: &TenantResources, session_id: &str) -> Session {
        let ttl = self.config.session.ttl();
        if !session_id.is_empty() {
            match resources.sessions.load(session_id).await {
                Ok(mut session)
                    if session.tenant_id == resources.tenant_id() && !session.is_expired() =>
                {
                    session.extend(ttl);
                    return session;
                }
                Ok(_) => {
                    info!(old_session_id = %session_id, "session not usable, creating new session")
                }
                Err(QaError::NotFound { .. }) => {
                    info!(old_session_id = %session_id, "session missing or expired, creating new session")
                }
                Err(err) => {
                    warn!(old_session_id = %session_id, error = %err, "failed to load session, creating new session")
                }
            }
        }
        let session = Session::new(resources.tenant_id(), ttl);
        info!(session_id = %session.id, "new session created");
        session
    }

    /// 分类失败按转人工处理
    async fn classify(&self, turn: &Turn, query: &str, cancel: &CancellationToken) -> Intent {
        let messages = &turn.session.messages;
        let history = &messages[..messages.len().saturating_sub(1)];
        match self.classifier.classify(query, history, cancel).await {
            Ok(intent) => intent,
            Err(err) => {
                self.log_error(&err, turn, "classify");
                Intent::new(IntentType::Handoff, 0.0).with_meta("classification_error", err.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        turn: &Turn,
        intent: &Intent,
        query: &str,
        cancel: &CancellationToken,
    ) -> RouteOutcome {
        debug!(route = %intent.kind, "dispatching turn");
        match intent.kind {
            IntentType::Course => self.answer_course(turn, query, cancel).await,
            IntentType::Order => self.answer_order(turn, query, cancel).await,
            IntentType::Direct => self.answer_direct(turn, cancel).await,
            IntentType::Handoff => RouteOutcome::text(handoff_message(intent.reason())),
        }
    }

    async fn answer_course(&self, turn: &Turn, query: &str, cancel: &CancellationToken) -> RouteOutcome {
        match self.retriever.retrieve(turn.tenant_id(), query, cancel).await {
            Ok(retrieved) => retrieved.into(),
            Err(err) => {
                if matches!(err, QaError::NoRelevantDocuments { .. }) {
                    self.record_missed(turn, query).await;
                }
                self.log_error(&err, turn, "course");
                RouteOutcome::text(FALLBACK_MESSAGE)
            }
        }
    }

    async fn answer_order(&self, turn: &Turn, query: &str, cancel: &CancellationToken) -> RouteOutcome {
        match self.lookup.query(turn.tenant_id(), query, cancel).await {
            Ok(answer) => RouteOutcome::text(answer),
            Err(err) => {
                self.log_error(&err, turn, "order");
                RouteOutcome::text(error_message(&err))
            }
        }
    }

    async fn answer_direct(&self, turn: &Turn, cancel: &CancellationToken) -> RouteOutcome {
        match self.generator.generate(self.history(turn), cancel).await {
            Ok(answer) => RouteOutcome::text(answer),
            Err(err) => {
                self.log_error(&err, turn, "direct");
                RouteOutcome::text(error_message(&err))
            }
        }
    }

    fn history<'a>(&self, turn: &'a Turn) -> &'a [Message] {
        turn.session.recent_messages(self.config.session.max_history)
    }

    async fn fan_out(
        &self,
        turn: &Turn,
        query: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RouteOutcome {
        let branch_cancel = cancel.child_token();
        let course = {
            let retriever = Arc::clone(&self.retriever);
            let tenant = turn.tenant_id().to_string();
            let query = query.to_string();
            let token = branch_cancel.clone();
            tokio::spawn(async move { retriever.retrieve(&tenant, &query, &token).await })
        };
        let order = {
            let lookup = Arc::clone(&self.lookup);
            let tenant = turn.tenant_id().to_string();
            let query = query.to_string();
            let token = branch_cancel.clone();
            tokio::spawn(async move { lookup.query(&tenant, &query, &token).await })
        };

        let joined = tokio::time::timeout(timeout, async move {
            let (course, order) = tokio::join!(course, order);
            (flatten(course), flatten(order))
        })
        .await;

        let (course, order) = match joined {
            Ok(results) => results,
            Err(_) => {
                // 超时后分支任务被分离，仅收到取消信号
                branch_cancel.cancel();
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "parallel retrieval timed out, falling back to direct generation"
                );
                return self.answer_direct(turn, cancel).await;
            }
        };

        match (course, order) {
            (Ok(course), Ok(order)) => {
                match self.generator.merge(query, &course.answer, &order, cancel).await {
                    Ok(merged) => RouteOutcome {
                        answer: merged,
                        sources: course.sources,
                    },
                    Err(err) => {
                        self.log_error(&err, turn, "merge");
                        course.into()
                    }
                }
            }
            (Ok(course), Err(err)) => {
                self.log_error(&err, turn, "parallel_order");
                course.into()
            }
            (Err(err), Ok(order)) => {
                self.log_error(&err, turn, "parallel_course");
                RouteOutcome::text(order)
            }
            (Err(course_err), Err(order_err)) => {
                self.log_error(&course_err, turn, "parallel_course");
                self.log_error(&order_err, turn, "parallel_order");
                RouteOutcome::text(FALLBACK_MESSAGE)
            }
        }
    }

    /// 追加助手消息并保存；保存失败只记录日志
    async fn finish_turn(&self, mut turn: Turn, intent: &Intent, outcome: RouteOutcome) -> ChatTurnResult {
        match Message::assistant(outcome.answer.as_str()) {
            Ok(message) => {
                if let Err(err) = turn.session.add_message(message) {
                    warn!(session_id = %turn.session.id, error = %err, "failed to add assistant message");
                }
            }
            Err(_) => warn!(session_id = %turn.session.id, "empty answer not recorded"),
        }
        if let Err(err) = turn.resources.sessions.save(&turn.session).await {
            self.log_error(&err, &turn, "save_session");
        }

        let metadata = TurnMetadata {
            route: intent.kind,
            confidence: intent.confidence,
            latency_ms: turn.started.elapsed().as_millis() as u64,
            reason: intent.reason().map(str::to_string),
        };
        info!(
            tenant_id = %turn.tenant_id(),
            session_id = %turn.session.id,
            route = %intent.kind,
            latency_ms = metadata.latency_ms,
            "chat turn completed"
        );
        ChatTurnResult {
            answer: outcome.answer,
            route: intent.kind,
            sources: outcome.sources,
            session_id: turn.session.id,
            metadata,
        }
    }

    async fn stream_turn(&self, req: ChatRequest, sender: ChunkSender) {
        let cancel = sender.token().child_token();
        let turn = match self.begin_turn(&req).await {
            Ok(turn) => turn,
            Err(err) => {
                warn!(tenant_id = %req.tenant_id, error = %err, "failed to start streaming turn");
                sender
                    .send(StreamChunk::Error {
                        message: error_message(&err),
                    })
                    .await;
                sender
                    .send(StreamChunk::Done {
                        session_id: String::new(),
                        metadata: None,
                        sources: Vec::new(),
                    })
                    .await;
                return;
            }
        };

        let intent = self.classify(&turn, &req.query, &cancel).await;
        let outcome = if intent.kind == IntentType::Direct {
            self.stream_direct(&turn, &sender, &cancel).await
        } else {
            let outcome = self.dispatch(&turn, &intent, &req.query, &cancel).await;
            sender
                .send(StreamChunk::Content {
                    content: outcome.answer.clone(),
                })
                .await;
            outcome
        };

        let result = self.finish_turn(turn, &intent, outcome).await;
        sender
            .send(StreamChunk::Done {
                session_id: result.session_id,
                metadata: Some(result.metadata),
                sources: result.sources,
            })
            .await;
    }

    /// 逐片转发生成内容；消费端关闭后停止读取
    async fn stream_direct(
        &self,
        turn: &Turn,
        sender: &ChunkSender,
        cancel: &CancellationToken,
    ) -> RouteOutcome {
        let mut fragments = match self.generator.generate_stream(self.history(turn), cancel).await {
            Ok(fragments) => fragments,
            Err(err) => {
                self.log_error(&err, turn, "direct_stream");
                let message = error_message(&err);
                sender
                    .send(StreamChunk::Error {
                        message: message.clone(),
                    })
                    .await;
                return RouteOutcome::text(message);
            }
        };

        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("stream consumer closed, stopping generation");
                    break;
                }
                next = fragments.next() => next,
            };
            match next {
                None => break,
                Some(Ok(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    answer.push_str(&text);
                    if !sender.send(StreamChunk::Content { content: text }).await {
                        debug!("stream consumer closed, stopping generation");
                        break;
                    }
                }
                Some(Err(err)) => {
                    self.log_error(&err, turn, "direct_stream");
                    let message = error_message(&err);
                    sender
                        .send(StreamChunk::Error {
                            message: message.clone(),
                        })
                        .await;
                    answer.push_str(&message);
                    break;
                }
            }
        }
        RouteOutcome::text(answer)
    }

    async fn record_missed(&self, turn: &Turn, query: &str) {
        if let Err(err) = turn
            .resources
            .missed
            .record(query, Some(turn.session.id.as_str()))
            .await
        {
            warn!(tenant_id = %turn.tenant_id(), error = %err, "failed to record missed query");
        }
    }

    fn log_error(&self, err: &QaError, turn: &Turn, operation: &str) {
        let metadata = ErrorMetadataBuilder::new("chat_service")
            .operation(operation)
            .tenant_id(turn.tenant_id())
            .session_id(&turn.session.id)
            .build(err);
        err.log(&metadata);
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    joined.map_err(QaError::from).and_then(|r| r)
}
