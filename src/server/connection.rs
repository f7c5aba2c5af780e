//! Per-connection task
//!
//! A [`Connection`] owns an upgraded byte stream and runs its whole lifecycle
//! on one task: it decodes inbound frames, answers pings, tracks
//! acknowledgements in a [`TimeoutManager`], writes queued notification
//! batches, and performs the close handshake.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::auth::AuthContext;
use crate::error::{Error, Result};
use crate::protocol::{
    encode_notifications, CloseCode, Frame, FrameCodec, InboundMessage, Message,
    MessageAssembler, Opcode, Role, SubscribeParams,
};
use crate::registry::{Batch, ConnectionHandle, Mailbox};
use crate::session::{
    CloseInitiator, ConnectionContext, ConnectionPhase, ConnectionState, Subscription,
    TimeoutManager, TimeoutReason,
};
use crate::stats::ConnectionStats;

use super::config::ServerConfig;
use super::hooks::HookEvent;
use super::hub::Hub;

/// One upgraded connection
pub struct Connection<S> {
    hub: Arc<Hub>,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    codec: FrameCodec,
    assembler: MessageAssembler,
    timeouts: TimeoutManager,
    state: ConnectionState,
    ctx: ConnectionContext,
    handle: Arc<ConnectionHandle>,
    mailbox: Mailbox,
    subscription: Subscription,
    generation: u64,
    ticks: watch::Receiver<u64>,
    ping_interval: Duration,
    write_timeout: Duration,
    last_ping: Instant,
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an upgraded stream
    ///
    /// The connection is not registered anywhere until [`Connection::run`].
    pub fn new(
        hub: Arc<Hub>,
        stream: S,
        peer_addr: SocketAddr,
        auth: AuthContext,
        config: &ServerConfig,
    ) -> Self {
        let id = hub.next_connection_id();
        let (handle, mailbox) =
            ConnectionHandle::new(id, peer_addr, auth.clone(), config.outbound_queue_capacity);
        let (reader, writer) = tokio::io::split(stream);
        let ticks = hub.ticks();

        Self {
            hub,
            reader,
            writer,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: BytesMut::with_capacity(1024),
            codec: FrameCodec::new(Role::Server, config.max_message_size),
            assembler: MessageAssembler::new(config.max_message_size),
            timeouts: TimeoutManager::with_timeouts(config.timeout, config.keep_alive_timeout),
            state: ConnectionState::new(),
            ctx: ConnectionContext::new(id, peer_addr, auth),
            handle,
            mailbox,
            subscription: Subscription::default(),
            generation: 0,
            ticks,
            ping_interval: config.ping_interval,
            write_timeout: config.write_timeout,
            last_ping: Instant::now(),
            stats: ConnectionStats::new(),
        }
    }

    /// Connection context as passed to hooks
    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Handle the dispatcher and registry see
    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Serve the connection until it is closed
    ///
    /// The close hook has fired and the connection is deregistered by the
    /// time this returns. The error, if any, is what ended the connection.
    pub async fn run(mut self) -> Result<()> {
        self.open();
        let result = self.serve().await;
        self.finish(&result).await;
        result
    }

    fn open(&mut self) {
        self.state.open();
        self.hub.registry().register(Arc::clone(&self.handle));
        self.hub.stats().connection_opened();

        tracing::info!(
            connection_id = %self.ctx.connection_id,
            peer = %self.ctx.peer_addr,
            session = %self.ctx.session_id(),
            "Connection opened"
        );

        self.hub.hooks().fire(HookEvent::Open, &self.ctx);
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            // Drain complete frames already buffered before waiting again
            while !self.state.is_closed() {
                match self.codec.decode(&mut self.read_buf) {
                    Ok(Some(frame)) => {
                        if let Err(e) = self.handle_frame(frame).await {
                            return self.fail(e).await;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return self.fail(e.into()).await,
                }
            }

            if self.state.is_closed() {
                return Ok(());
            }

            let open = self.state.is_open();

            tokio::select! {
                read = self.reader.read_buf(&mut self.read_buf) => {
                    if read? == 0 {
                        tracing::debug!(
                            connection_id = %self.ctx.connection_id,
                            phase = ?self.state.phase(),
                            "Peer closed the stream"
                        );
                        return Ok(());
                    }
                }
                Some(batch) = self.mailbox.outbound.recv(), if open => {
                    self.deliver(batch).await?;
                }
                changed = self.mailbox.close_requests.changed(), if open => {
                    if changed.is_ok() {
                        let requested = *self.mailbox.close_requests.borrow_and_update();
                        if let Some(code) = requested {
                            self.initiate_close(code, close_reason(code)).await?;
                        }
                    }
                }
                changed = self.ticks.changed() => {
                    if changed.is_ok() {
                        self.on_tick().await?;
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.payload.len() as u64;
        self.hub.stats().record_frame_received();
        self.timeouts.acknowledge_frame_receipt(&frame);

        tracing::trace!(
            connection_id = %self.ctx.connection_id,
            opcode = ?frame.opcode,
            len = frame.payload.len(),
            "Frame received"
        );

        match frame.opcode {
            Opcode::Ping => {
                if self.state.is_open() {
                    self.send_frame(Frame::pong(frame.payload)).await?;
                }
                Ok(())
            }
            Opcode::Pong => Ok(()),
            Opcode::Close => self.on_close_frame(frame).await,
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                if !self.state.is_open() {
                    return Ok(());
                }
                match self.assembler.push(frame)? {
                    Some(message) => self.on_message(message).await,
                    None => Ok(()),
                }
            }
        }
    }

    async fn on_close_frame(&mut self, frame: Frame) -> Result<()> {
        let peer_code = frame.close_code();

        match self.state.phase() {
            ConnectionPhase::Open => {
                let code = peer_code.unwrap_or(CloseCode::Clean);
                tracing::debug!(
                    connection_id = %self.ctx.connection_id,
                    code = %code,
                    reason = frame.close_reason().unwrap_or(""),
                    "Close requested by peer"
                );

                self.state.begin_closing(code, CloseInitiator::Remote);
                self.stop_delivery().await;

                let echo = match peer_code {
                    Some(code) => Frame::close(code, ""),
                    None => Frame::close_empty(),
                };
                let sent = self.send_frame(echo).await;
                self.state.complete_close(code);
                sent
            }
            ConnectionPhase::Closing => {
                // Acknowledgement of our close
                self.state.complete_close(CloseCode::Clean);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_message(&mut self, message: Message) -> Result<()> {
        match InboundMessage::parse(&message.payload) {
            Ok(InboundMessage::Subscribe(data)) => {
                // A stale session is reported as such even for a bad subscription
                if !self.hub.auth().is_valid(self.handle.auth()).await {
                    return self.expire_session().await;
                }
                match SubscribeParams::from_data(data) {
                    Ok(params) => self.on_subscribe(params).await,
                    Err(e) => {
                        tracing::debug!(
                            connection_id = %self.ctx.connection_id,
                            error = %e,
                            "Undecodable subscription"
                        );
                        self.initiate_close(CloseCode::IncorrectData, "invalid message")
                            .await
                    }
                }
            }
            Ok(InboundMessage::Unrecognized { event_name }) => {
                tracing::debug!(
                    connection_id = %self.ctx.connection_id,
                    event_name = %event_name,
                    "Ignoring unrecognized event"
                );
                Ok(())
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %self.ctx.connection_id,
                    error = %e,
                    "Undecodable message"
                );
                self.initiate_close(CloseCode::IncorrectData, "invalid message")
                    .await
            }
        }
    }

    async fn on_subscribe(&mut self, params: SubscribeParams) -> Result<()> {
        let SubscribeParams { channels, last } = params;
        let subscription = Subscription::new(channels.iter().cloned(), last);

        match self
            .hub
            .dispatcher()
            .subscribe(&self.handle, channels, last)
            .await
        {
            Ok(subscribed) => {
                tracing::debug!(
                    connection_id = %self.ctx.connection_id,
                    channels = subscription.len(),
                    last = last,
                    backlog = subscribed.backlog,
                    "Subscribed"
                );
                // Batches of older generations still queued are dropped on delivery
                self.generation = subscribed.generation;
                self.subscription = subscription;
                Ok(())
            }
            Err(Error::AuthorizationStale) => self.expire_session().await,
            // The dispatcher already requested the close
            Err(Error::ResourceExhausted) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.ctx.connection_id,
                    error = %e,
                    "Subscription failed"
                );
                self.initiate_close(CloseCode::ServerError, "subscription failed")
                    .await
            }
        }
    }

    async fn expire_session(&mut self) -> Result<()> {
        self.hub.stats().record_session_expired();
        self.initiate_close(CloseCode::SessionExpired, close_reason(CloseCode::SessionExpired))
            .await
    }

    async fn deliver(&mut self, batch: Batch) -> Result<()> {
        if batch.generation != self.generation {
            tracing::trace!(
                connection_id = %self.ctx.connection_id,
                generation = batch.generation,
                "Dropping batch of a replaced subscription"
            );
            return Ok(());
        }

        let accepted: Vec<_> = batch
            .notifications
            .into_iter()
            .filter(|n| self.subscription.accept(n))
            .collect();
        if accepted.is_empty() {
            return Ok(());
        }

        let text = encode_notifications(&accepted)?;
        self.stats.notifications_sent += accepted.len() as u64;
        self.send_frame(Frame::text(text)).await
    }

    async fn on_tick(&mut self) -> Result<()> {
        if self.timeouts.has_timed_out() {
            let reason = self
                .timeouts
                .timeout_reason()
                .unwrap_or(TimeoutReason::KeepAlive);

            return match self.state.phase() {
                ConnectionPhase::Open => {
                    tracing::info!(
                        connection_id = %self.ctx.connection_id,
                        reason = %reason,
                        "Connection timed out"
                    );
                    self.initiate_close(CloseCode::Timeout, reason.as_str()).await
                }
                ConnectionPhase::Closing => {
                    tracing::debug!(
                        connection_id = %self.ctx.connection_id,
                        reason = %reason,
                        "Close handshake timed out"
                    );
                    self.state.complete_close(CloseCode::Timeout);
                    Err(Error::Timeout(reason))
                }
                _ => Ok(()),
            };
        }

        if self.state.is_open()
            && self.timeouts.awaited_opcode().is_none()
            && self.last_ping.elapsed() >= self.ping_interval
        {
            self.last_ping = Instant::now();
            self.stats.pings_sent += 1;
            self.send_frame(Frame::ping(Bytes::new())).await?;
        }

        Ok(())
    }

    async fn initiate_close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if !self.state.begin_closing(code, CloseInitiator::Local) {
            return Ok(());
        }

        tracing::info!(
            connection_id = %self.ctx.connection_id,
            code = %code,
            reason = reason,
            "Closing connection"
        );

        self.stop_delivery().await;
        self.send_frame(Frame::close(code, reason)).await
    }

    /// Stop accepting batches: leave the dispatch table and cancel the queue
    async fn stop_delivery(&mut self) {
        self.handle.mark_closing();
        self.hub
            .dispatcher()
            .unsubscribe_all(self.ctx.connection_id)
            .await;
        self.mailbox.outbound.close();
        while self.mailbox.outbound.try_recv().is_ok() {}
    }

    async fn fail(&mut self, err: Error) -> Result<()> {
        if let Error::Protocol(ref violation) = err {
            let code = violation.close_code();
            tracing::debug!(
                connection_id = %self.ctx.connection_id,
                error = %violation,
                code = %code,
                "Protocol violation"
            );

            if self.state.begin_closing(code, CloseInitiator::Local) {
                self.stop_delivery().await;
                // Best effort; the connection ends either way
                let _ = self.send_frame(Frame::close(code, &violation.to_string())).await;
            }
            self.state.complete_close(code);
        }
        Err(err)
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.write_buf.clear();
        self.codec.encode(&frame, &mut self.write_buf);

        let writer = &mut self.writer;
        let buf = &self.write_buf;
        let write = async move {
            writer.write_all(buf).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "frame write timed out",
                )))
            }
        }

        self.timeouts.acknowledge_frame_sent(&frame);
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        self.hub.stats().record_frame_sent();
        Ok(())
    }

    async fn finish(&mut self, result: &Result<()>) {
        self.state.complete_close(CloseCode::Abnormal);
        let code = self.state.close_code().unwrap_or(CloseCode::Abnormal);
        let id = self.ctx.connection_id;

        self.stop_delivery().await;
        self.hub.registry().deregister(id);

        let _ = tokio::time::timeout(self.write_timeout, self.writer.shutdown()).await;

        self.ctx.close_code = Some(code);
        self.hub.stats().connection_closed(code);

        match result {
            Ok(()) => tracing::info!(
                connection_id = %id,
                code = %code,
                frames_in = self.stats.frames_received,
                frames_out = self.stats.frames_sent,
                notifications = self.stats.notifications_sent,
                "Connection closed"
            ),
            Err(e) => tracing::info!(
                connection_id = %id,
                code = %code,
                error = %e,
                "Connection closed with error"
            ),
        }

        self.hub.hooks().fire(HookEvent::Close, &self.ctx);
    }
}

fn close_reason(code: CloseCode) -> &'static str {
    match code {
        CloseCode::SessionExpired => "session expired",
        CloseCode::ResourceExhausted => "outbound queue full",
        CloseCode::GoingAway => "server shutting down",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use crate::auth::MemorySessionStore;
    use crate::store::MemoryNotificationStore;

    use super::*;

    fn hub() -> Arc<Hub> {
        Arc::new(Hub::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryNotificationStore::new()),
        ))
    }

    fn client_bytes(frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FrameCodec::client().encode(&frame, &mut buf);
        buf.to_vec()
    }

    fn server_bytes(frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FrameCodec::server().encode(&frame, &mut buf);
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_ping_answered_then_clean_close() {
        let hub = hub();
        let mock = Builder::new()
            .read(&client_bytes(Frame::ping("hi")))
            .write(&server_bytes(Frame::pong("hi")))
            .read(&client_bytes(Frame::close(CloseCode::Clean, "bye")))
            .write(&server_bytes(Frame::close(CloseCode::Clean, "")))
            .build();

        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let conn = Connection::new(
            Arc::clone(&hub),
            mock,
            addr,
            AuthContext::anonymous("s"),
            &ServerConfig::default(),
        );

        conn.run().await.unwrap();

        assert!(hub.registry().is_empty());
        let stats = hub.stats().snapshot();
        assert_eq!(stats.connections_active, 0);
        assert_eq!(stats.closes.get(&1000), Some(&1));
    }

    #[tokio::test]
    async fn test_reserved_bits_close_with_protocol_error() {
        let hub = hub();
        let mut bad = client_bytes(Frame::text("{}"));
        bad[0] |= 0x40;

        let mock = Builder::new()
            .read(&bad)
            .write(&server_bytes(Frame::close(
                CloseCode::ProtocolError,
                &crate::error::ProtocolError::ReservedBitsSet.to_string(),
            )))
            .build();

        let addr: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        let conn = Connection::new(
            Arc::clone(&hub),
            mock,
            addr,
            AuthContext::anonymous("s"),
            &ServerConfig::default(),
        );

        let result = conn.run().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(hub.stats().snapshot().closes.get(&1002), Some(&1));
    }

    #[test]
    fn test_close_reasons() {
        assert_eq!(close_reason(CloseCode::SessionExpired), "session expired");
        assert_eq!(close_reason(CloseCode::Clean), "");
    }
}
