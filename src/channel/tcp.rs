//! TCP channel (spec.md §4.2): a connection cache keyed by remote
//! endpoint, grounded in the teacher's `Router`/`processer` relay pattern
//! (one `mpsc::Sender<Bytes>` per peer, a lazily-spawned task owns the
//! actual socket). Idle connections close after `max_idle`; a broken or
//! refused connection surfaces as [`TcpSendError::Unreachable`] so the
//! router can fall back to UDP.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

use super::{FaultInjector, InboundFrame, NetFailMode, SendAction, Transport};

const OUTBOUND_QUEUE_DEPTH: usize = 256;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TcpSendError {
    #[error("no tcp route to {0}")]
    Unreachable(SocketAddr),
}

pub struct TcpChannel {
    local_addr: SocketAddr,
    senders: Mutex<HashMap<SocketAddr, mpsc::Sender<Bytes>>>,
    max_idle: Duration,
    fault: FaultInjector,
    inbound: mpsc::Sender<InboundFrame>,
}

impl TcpChannel {
    pub async fn bind(
        tcp_ep: SocketAddr,
        max_idle: Duration,
        inbound: mpsc::Sender<InboundFrame>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(tcp_ep)
            .await
            .with_context(|| format!("binding tcp channel on {tcp_ep}"))?;
        let local_addr = listener.local_addr()?;

        let channel = Arc::new(Self {
            local_addr,
            senders: Mutex::new(HashMap::new()),
            max_idle,
            fault: FaultInjector::default(),
            inbound,
        });

        tokio::spawn(accept_loop(listener, channel.clone()));
        Ok(channel)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_fail_mode(&self, mode: NetFailMode) {
        self.fault.set_mode(mode);
    }

    /// Sends to `to`, connecting lazily on first use. Returns
    /// [`TcpSendError::Unreachable`] if the peer refuses the connection or
    /// the existing relay task has already exited.
    pub async fn transmit(self: &Arc<Self>, to: SocketAddr, bytes: Bytes) -> Result<(), TcpSendError> {
        match self.fault.decide() {
            SendAction::Drop => Ok(()),
            SendAction::Send => self.send_once(to, bytes).await,
            SendAction::DelayThenSend(delay) => {
                tokio::time::sleep(delay).await;
                self.send_once(to, bytes).await
            }
            SendAction::SendTwice => {
                self.send_once(to, bytes.clone()).await?;
                self.send_once(to, bytes).await
            }
        }
    }

    async fn send_once(self: &Arc<Self>, to: SocketAddr, bytes: Bytes) -> Result<(), TcpSendError> {
        let sender = self.get_or_connect(to).await?;
        if sender.send(bytes).await.is_err() {
            self.senders.lock().remove(&to);
            return Err(TcpSendError::Unreachable(to));
        }
        Ok(())
    }

    async fn get_or_connect(self: &Arc<Self>, to: SocketAddr) -> Result<mpsc::Sender<Bytes>, TcpSendError> {
        if let Some(sender) = self.senders.lock().get(&to) {
            return Ok(sender.clone());
        }

        let stream = TcpStream::connect(to)
            .await
            .map_err(|_| TcpSendError::Unreachable(to))?;

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        self.senders.lock().insert(to, tx.clone());
        tokio::spawn(relay(self.clone(), to, stream, rx));
        Ok(tx)
    }
}

async fn accept_loop(listener: TcpListener, channel: Arc<TcpChannel>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(error) => {
                log::warn!("tcp accept error: {error}");
                continue;
            }
        };
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        channel.senders.lock().insert(peer, tx);
        tokio::spawn(relay(channel.clone(), peer, stream, rx));
    }
}

/// Owns one peer's socket: pumps queued outbound bytes to the write half
/// and decoded frames from the read half into the shared inbound channel,
/// closing after `max_idle` with no traffic in either direction.
async fn relay(channel: Arc<TcpChannel>, peer: SocketAddr, stream: TcpStream, mut outbound: mpsc::Receiver<Bytes>) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        tokio::select! {
            read = tokio::time::timeout(channel.max_idle, reader.read_buf(&mut buf)) => {
                match read {
                    Ok(Ok(0)) | Err(_) => break,
                    Ok(Ok(len)) => {
                        let frame = InboundFrame {
                            from: peer,
                            transport: Transport::Tcp,
                            bytes: buf.split_to(len).freeze(),
                        };
                        if channel.inbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(error)) => {
                        log::trace!("tcp read error from {peer}: {error}");
                        break;
                    }
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(bytes) => {
                        if let Err(error) = writer.write_all(&bytes).await {
                            log::trace!("tcp write error to {peer}: {error}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    channel.senders.lock().remove(&peer);
}
