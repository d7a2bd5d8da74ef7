//! 传输数据流包装：计数、限速与取消检查

use super::bandwidth::BandwidthThrottle;
use super::TransferProgress;
use crate::core::status::TransferStatus;
use crate::session::ByteStream;
use futures::StreamExt;
use std::sync::Arc;

/// 每个数据块写入前更新文件与传输的字节数
pub fn counting(
    stream: ByteStream,
    status: Arc<TransferStatus>,
    progress: Arc<TransferProgress>,
    throttle: Arc<BandwidthThrottle>,
) -> ByteStream {
    Box::pin(stream.then(move |chunk| {
        let status = status.clone();
        let progress = progress.clone();
        let throttle = throttle.clone();
        async move {
            status.validate()?;
            let chunk = chunk?;
            let len = chunk.len() as u64;
            throttle.acquire(len).await;
            status.progress(len);
            progress.add_transferred(len);
            Ok(chunk)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackgroundError;
    use bytes::Bytes;
    use futures::TryStreamExt;

    fn source(chunks: &[&'static [u8]]) -> ByteStream {
        let items: Vec<crate::error::Result<Bytes>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_counts_every_chunk() {
        let status = Arc::new(TransferStatus::new().with_length(6));
        let progress = Arc::new(TransferProgress::default());
        let stream = counting(
            source(&[b"abc", b"de", b"f"]),
            status.clone(),
            progress.clone(),
            Arc::new(BandwidthThrottle::unlimited()),
        );
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(status.current(), 6);
        assert_eq!(progress.transferred(), Some(6));
    }

    #[tokio::test]
    async fn test_canceled_status_stops_stream() {
        let status = Arc::new(TransferStatus::new());
        status.set_canceled();
        let mut stream = counting(
            source(&[b"abc"]),
            status,
            Arc::new(TransferProgress::default()),
            Arc::new(BandwidthThrottle::unlimited()),
        );
        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err(), BackgroundError::Canceled);
    }
}
