use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use qa_core::StreamChunk;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

const CHANNEL_CAPACITY: usize = 16;

/// 单轮对话的输出流，单消费者
///
/// 丢弃该流会取消生产端：生产端在下一次发送时停止。
pub struct TurnStream {
    inner: ReceiverStream<StreamChunk>,
    _guard: DropGuard,
}

impl Stream for TurnStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// 生产端句柄
pub(crate) struct ChunkSender {
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
}

impl ChunkSender {
    /// 消费端已关闭时返回 false
    pub(crate) async fn send(&self, chunk: StreamChunk) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(chunk) => sent.is_ok(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

pub(crate) fn turn_channel() -> (ChunkSender, TurnStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let sender = ChunkSender {
        tx,
        cancel: cancel.clone(),
    };
    let stream = TurnStream {
        inner: ReceiverStream::new(rx),
        _guard: cancel.drop_guard(),
    };
    (sender, stream)
}
