//! 消息传输
//!
//! 帧格式：`[u32 大端长度][JSON 消息体]`。单帧上限 [`MAX_FRAME_BYTES`]。
//! 在长度前缀之前读到 EOF 表示对端正常关闭，返回 `None`。

use std::time::Duration;

use pipeline_core::{Message, PipelineError, PipelineResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// 写出一帧
pub async fn write_message<W>(writer: &mut W, message: &Message) -> PipelineResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(PipelineError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一帧，对端关闭时返回 `None`
pub async fn read_message<R>(reader: &mut R) -> PipelineResult<Option<Message>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    let first = reader.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[first..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(PipelineError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// 建立连接后发送一条消息并关闭连接
pub async fn send_message(
    address: &str,
    message: &Message,
    connect_timeout: Duration,
) -> PipelineResult<()> {
    let mut stream = connect(address, connect_timeout).await?;
    write_message(&mut stream, message).await?;
    stream.shutdown().await?;
    Ok(())
}

/// 带超时的 TCP 连接
pub async fn connect(address: &str, connect_timeout: Duration) -> PipelineResult<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(PipelineError::Network(format!("连接 {address} 失败: {e}"))),
        Err(_) => Err(PipelineError::Network(format!(
            "连接 {address} 超时 ({}ms)",
            connect_timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::MessageKind;

    #[tokio::test]
    async fn test_frames_preserve_order() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        for i in 0..3 {
            let message = Message::stage_result("1", serde_json::json!(i));
            write_message(&mut client, &message).await.unwrap();
        }
        drop(client);

        for i in 0..3 {
            let message = read_message(&mut server).await.unwrap().unwrap();
            assert_eq!(message.description, MessageKind::StageResult);
            assert_eq!(message.contents, serde_json::json!(i));
        }
        assert!(read_message(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 10, b'{']).await.unwrap();
        drop(client);
        let err = read_message(&mut server).await.unwrap_err();
        assert!(err.is_connection_level());
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, PipelineError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_serialization_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&3u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = send_message(&address, &Message::start_worker(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Network(_)));
    }
}
