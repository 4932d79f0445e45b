//! Test WebSocket client.
//!
//! Speaks lifecycle phases directly so tests can drive the Upend step by
//! step and assert on every frame it sends back.

use std::time::Duration;
use tether_proto::{ConnectionDescriptor, Phase, Secret, SecondaryToken, SessionIdentifier};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use futures_util::{SinkExt, StreamExt};

/// A raw test client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// What the Upend announced in the upgrade response.
    pub descriptor: ConnectionDescriptor,
}

impl TestClient {
    /// Connect and read the descriptor headers.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, response) = connect_async(url).await?;
        let descriptor = ConnectionDescriptor::from_headers(response.headers())?;
        Ok(Self { ws, descriptor })
    }

    pub async fn send_phase(&mut self, phase: &Phase) -> anyhow::Result<()> {
        self.ws.send(Message::Text(phase.encode()?)).await?;
        Ok(())
    }

    /// Send an application frame.
    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Receive the next text frame.
    pub async fn recv_text(&mut self) -> anyhow::Result<String> {
        self.recv_text_timeout(Duration::from_secs(5)).await
    }

    /// Receive a text frame with a timeout. Control frames are skipped.
    pub async fn recv_text_timeout(&mut self, dur: Duration) -> anyhow::Result<String> {
        timeout(dur, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text),
                    Some(Ok(Message::Close(_))) | None => anyhow::bail!("channel closed"),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        })
        .await?
    }

    /// Receive the next lifecycle phase.
    pub async fn recv_phase(&mut self) -> anyhow::Result<Phase> {
        let text = self.recv_text().await?;
        match Phase::decode_text(&text) {
            Some(phase) => Ok(phase?),
            None => anyhow::bail!("expected a phase, got application frame {text:?}"),
        }
    }

    /// Send a WebSocket ping and wait for the pong.
    #[allow(dead_code)]
    pub async fn ping(&mut self) -> anyhow::Result<()> {
        self.ws.send(Message::Ping(b"hb".to_vec())).await?;
        timeout(Duration::from_secs(5), async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Pong(_))) => return Ok(()),
                    Some(Ok(Message::Close(_))) | None => anyhow::bail!("channel closed"),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        })
        .await?
    }

    /// Primary signon. Returns the Upend's answer.
    pub async fn signon(&mut self, login: &str, secret: &str) -> anyhow::Result<Phase> {
        self.send_phase(&Phase::SignonAttempt {
            login: login.to_string(),
            secret: Secret::new(secret),
        })
        .await?;
        self.recv_phase().await
    }

    /// Answer a secondary challenge.
    #[allow(dead_code)]
    pub async fn secondary(&mut self, token: SecondaryToken, code: &str) -> anyhow::Result<Phase> {
        self.send_phase(&Phase::SecondarySignonAttempt {
            token,
            code: Secret::new(code),
        })
        .await?;
        self.recv_phase().await
    }

    /// Ask to resume `session` on this channel.
    #[allow(dead_code)]
    pub async fn resume(&mut self, session: &SessionIdentifier) -> anyhow::Result<Phase> {
        self.send_phase(&Phase::ResumeSession {
            session: session.clone(),
        })
        .await?;
        self.recv_phase().await
    }

    /// Sign on and return the session, failing on any other answer.
    #[allow(dead_code)]
    pub async fn sign_in(&mut self, login: &str, secret: &str) -> anyhow::Result<SessionIdentifier> {
        match self.signon(login, secret).await? {
            Phase::SessionValid { session } => Ok(session),
            other => anyhow::bail!("signon refused: {other:?}"),
        }
    }

    /// True if the Upend closes the channel within `dur`.
    #[allow(dead_code)]
    pub async fn closed_within(&mut self, dur: Duration) -> bool {
        let wait = async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                }
            }
        };
        timeout(dur, wait).await.is_ok()
    }

    /// Close the channel without signing off.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        // Drain until the close handshake completes.
        while let Some(Ok(_)) = self.ws.next().await {}
        Ok(())
    }
}
