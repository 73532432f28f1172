//! TCP listener for the install RPC surface

use std::sync::Arc;

use anyhow::{Context, Result};
use provision_shared::codec::{self, FrameDecoder};
use provision_shared::{Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::frontend::ProvisionFrontEnd;

/// Accept connections forever, one task per connection.
pub async fn serve(addr: &str, frontend: Arc<ProvisionFrontEnd>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let frontend = frontend.clone();
        tokio::spawn(async move {
            debug!("connection from {}", peer);
            if let Err(err) = handle_connection(stream, frontend).await {
                error!("connection from {} failed: {}", peer, err);
            }
        });
    }
}

async fn handle_connection<S>(mut stream: S, frontend: Arc<ProvisionFrontEnd>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        while let Some(request) = decoder.decode_next::<Request>()? {
            let response = dispatch(request, &frontend).await;
            let frame = codec::encode(&response)?;
            stream.write_all(&frame).await?;
        }
    }
}

async fn dispatch(request: Request, frontend: &Arc<ProvisionFrontEnd>) -> Response {
    match request {
        Request::Install(install) => Response::Operation(frontend.clone().install(install).await),
        Request::GetOperation { name } => match frontend.get(&name).await {
            Some(op) => Response::Operation(op),
            None => Response::Error {
                message: format!("unknown operation {}", name),
            },
        },
        Request::CancelOperation { name } => {
            frontend.cancel(&name).await;
            match frontend.get(&name).await {
                Some(op) => Response::Operation(op),
                None => Response::Error {
                    message: format!("unknown operation {}", name),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OperationRegistry;
    use crate::server::ServerConfig;
    use provision_shared::OperationResult;

    fn frontend() -> Arc<ProvisionFrontEnd> {
        ProvisionFrontEnd::new(Arc::new(OperationRegistry::new()), ServerConfig::default())
    }

    async fn roundtrip(frontend: Arc<ProvisionFrontEnd>, request: Request) -> Response {
        let (mut client, server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let _ = handle_connection(server, frontend).await;
        });

        let frame = codec::encode(&request).expect("encode failed");
        client.write_all(&frame).await.expect("write failed");

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = client.read(&mut buf).await.expect("read failed");
            assert!(n > 0, "connection closed without a response");
            decoder.extend(&buf[..n]);
            if let Some(response) = decoder.decode_next::<Response>().expect("decode failed") {
                return response;
            }
        }
    }

    #[tokio::test]
    async fn test_get_unknown_operation_is_an_error() {
        let response = roundtrip(
            frontend(),
            Request::GetOperation {
                name: "operations/nope".into(),
            },
        )
        .await;

        match response {
            Response::Error { message } => assert!(message.contains("operations/nope")),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_returns_completed_operation() {
        let frontend = frontend();
        let op = frontend.registry().new_operation().await;
        frontend
            .registry()
            .set_result(&op.name, OperationResult::ok())
            .await
            .expect("completion should succeed");

        let response = roundtrip(
            frontend.clone(),
            Request::GetOperation {
                name: op.name.clone(),
            },
        )
        .await;

        match response {
            Response::Operation(found) => {
                assert_eq!(found.name, op.name);
                assert!(found.done);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
