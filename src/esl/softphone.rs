// src/esl/softphone.rs
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::FreeSwitchConfig;
use crate::esl::channels::ChannelTracker;
use crate::esl::codec::{EslCodec, EslFrame};
use crate::sdk::{SdkError, SdkEvent, SdkEvents, TelephonySdk};

const SUBSCRIBED_EVENTS: &str = "CHANNEL_CREATE CHANNEL_PROGRESS CHANNEL_PROGRESS_MEDIA \
     CHANNEL_ANSWER CHANNEL_HANGUP_COMPLETE CHANNEL_HOLD CHANNEL_UNHOLD BACKGROUND_JOB";

const EVENT_BUFFER: usize = 256;

type PendingReplies = Arc<Mutex<VecDeque<oneshot::Sender<EslFrame>>>>;

struct Session {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    pending: PendingReplies,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// Softphone over a FreeSWITCH inbound Event Socket connection.
///
/// Commands and their replies share the socket with events; replies come
/// back in command order, so each command queues a oneshot that the reader
/// task completes.
pub struct EslSoftphone {
    config: FreeSwitchConfig,
    session: AsyncMutex<Option<Session>>,
    tracker: Arc<Mutex<ChannelTracker>>,
}

impl EslSoftphone {
    pub fn new(config: FreeSwitchConfig) -> Self {
        let tracker = ChannelTracker::new(config.extension.clone());
        Self {
            config,
            session: AsyncMutex::new(None),
            tracker: Arc::new(Mutex::new(tracker)),
        }
    }

    pub fn server_id(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    async fn handshake(
        &self,
        frames: &mut FramedRead<OwnedReadHalf, EslCodec>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), SdkError> {
        let secs = self.config.command_timeout_secs;

        let greeting = next_frame(frames, secs).await?;
        if greeting.content_type() != Some("auth/request") {
            return Err(SdkError::Connection("Invalid greeting from FreeSWITCH".to_string()));
        }
        debug!("Received auth request from {}", self.server_id());

        write_raw(writer, &format!("auth {}", self.config.password)).await?;
        let auth = next_frame(frames, secs).await?;
        if !auth.is_ok() {
            return Err(SdkError::Authentication(auth.reply_text().to_string()));
        }
        info!("✅ Authenticated to FreeSWITCH: {}", self.server_id());

        write_raw(writer, &format!("event plain {}", SUBSCRIBED_EVENTS)).await?;
        let subscribed = next_frame(frames, secs).await?;
        if !subscribed.is_ok() {
            return Err(SdkError::Connection(format!(
                "Failed to subscribe to events: {}",
                subscribed.reply_text()
            )));
        }
        info!("✅ Subscribed to events: {}", self.server_id());
        Ok(())
    }

    /// Send a command and wait for its reply. `-ERR` replies become
    /// `SdkError::Command`.
    async fn command(&self, command: &str) -> Result<EslFrame, SdkError> {
        let (writer, pending) = {
            let session = self.session.lock().await;
            let session = session.as_ref().ok_or(SdkError::NotConnected)?;
            if !session.alive.load(Ordering::SeqCst) {
                return Err(SdkError::NotConnected);
            }
            (session.writer.clone(), session.pending.clone())
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            // Queue and write under one lock so replies line up with commands
            let mut writer = writer.lock().await;
            pending.lock().push_back(reply_tx);
            write_raw(&mut writer, command).await?;
        }
        debug!("ESL command sent: {}", command.lines().next().unwrap_or(""));

        let secs = self.config.command_timeout_secs;
        let reply = timeout(self.command_timeout(), reply_rx)
            .await
            .map_err(|_| SdkError::Timeout(secs))?
            .map_err(|_| SdkError::NotConnected)?;

        if reply.is_ok() {
            Ok(reply)
        } else {
            Err(SdkError::Command(reply.reply_text().to_string()))
        }
    }

    async fn api(&self, command: &str) -> Result<EslFrame, SdkError> {
        self.command(&format!("api {}", command)).await
    }

    async fn teardown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.alive.store(false, Ordering::SeqCst);
            session.reader.abort();
            session.pending.lock().clear();
            let mut writer = session.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.tracker.lock().clear();
    }
}

async fn next_frame(
    frames: &mut FramedRead<OwnedReadHalf, EslCodec>,
    secs: u64,
) -> Result<EslFrame, SdkError> {
    match timeout(Duration::from_secs(secs), frames.next()).await {
        Err(_) => Err(SdkError::Timeout(secs)),
        Ok(None) => Err(SdkError::Connection("connection closed during handshake".to_string())),
        Ok(Some(Err(e))) => Err(SdkError::Connection(e.to_string())),
        Ok(Some(Ok(frame))) => Ok(frame),
    }
}

async fn write_raw(writer: &mut OwnedWriteHalf, command: &str) -> Result<(), SdkError> {
    writer
        .write_all(format!("{}\n\n", command).as_bytes())
        .await
        .map_err(|e| SdkError::Connection(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| SdkError::Connection(e.to_string()))
}

/// Routes replies to waiting commands and events to the SDK channel
async fn read_loop(
    mut frames: FramedRead<OwnedReadHalf, EslCodec>,
    pending: PendingReplies,
    alive: Arc<AtomicBool>,
    tracker: Arc<Mutex<ChannelTracker>>,
    events: mpsc::Sender<SdkEvent>,
) {
    let reason = loop {
        let frame = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break format!("read error: {}", e),
            None => break "connection closed by FreeSWITCH".to_string(),
        };

        if frame.is_reply() {
            match pending.lock().pop_front() {
                Some(waiter) => {
                    let _ = waiter.send(frame);
                }
                None => warn!("Unsolicited ESL reply: {}", frame.reply_text()),
            }
            continue;
        }

        let content_type = frame.content_type().unwrap_or("").to_string();
        match content_type.as_str() {
            "text/event-plain" => {
                let Some(event) = frame.into_event() else { continue };
                let mapped = tracker.lock().handle(&event);
                if let Some(sdk_event) = mapped {
                    debug!("📨 {} for call {:?}", sdk_event.name(), sdk_event.call_id());
                    if events.send(sdk_event).await.is_err() {
                        debug!("SDK event receiver dropped, stopping reader");
                        return;
                    }
                }
            }
            "text/disconnect-notice" => break "disconnect notice".to_string(),
            other => debug!("Ignoring ESL frame type '{}'", other),
        }
    };

    warn!("❌ ESL connection lost: {}", reason);
    alive.store(false, Ordering::SeqCst);
    pending.lock().clear();
    tracker.lock().clear();
    let _ = events.send(SdkEvent::Disconnected { reason }).await;
}

fn is_dialable(number: &str) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
impl TelephonySdk for EslSoftphone {
    #[instrument(skip(self), fields(server = %self.server_id()))]
    async fn connect(&self) -> Result<SdkEvents, SdkError> {
        self.teardown().await;
        info!("Connecting to FreeSWITCH ESL: {}", self.server_id());

        let stream = timeout(
            self.command_timeout(),
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| SdkError::Timeout(self.config.command_timeout_secs))?
        .map_err(|e| SdkError::Connection(e.to_string()))?;

        let (read_half, mut write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, EslCodec);
        self.handshake(&mut frames, &mut write_half).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let pending: PendingReplies = Arc::new(Mutex::new(VecDeque::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            frames,
            pending.clone(),
            alive.clone(),
            self.tracker.clone(),
            events_tx,
        ));

        *self.session.lock().await = Some(Session {
            writer: Arc::new(AsyncMutex::new(write_half)),
            pending,
            alive,
            reader,
        });

        Ok(events_rx)
    }

    async fn disconnect(&self) -> Result<(), SdkError> {
        self.teardown().await;
        info!("Disconnected from FreeSWITCH: {}", self.server_id());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn make_call(&self, number: &str) -> Result<String, SdkError> {
        if !is_dialable(number) {
            return Err(SdkError::Command(format!("invalid destination '{}'", number)));
        }

        let call_id = Uuid::new_v4().to_string();
        let job_id = Uuid::new_v4().to_string();
        {
            let mut tracker = self.tracker.lock();
            tracker.track_outbound(&call_id);
            tracker.track_job(&job_id, &call_id);
        }

        let extension = &self.config.extension;
        let command = format!(
            "bgapi originate {{origination_uuid={},origination_caller_id_number={}}}{}{} &bridge(user/{})\nJob-UUID: {}",
            call_id, extension, self.config.dial_prefix, number, extension, job_id
        );

        match self.command(&command).await {
            Ok(_) => {
                info!("📞 Originated {} as {}", number, call_id);
                Ok(call_id)
            }
            Err(e) => {
                self.tracker.lock().forget(&call_id);
                Err(e)
            }
        }
    }

    async fn answer_call(&self, call_id: &str) -> Result<(), SdkError> {
        self.api(&format!("uuid_answer {}", call_id)).await.map(|_| ())
    }

    async fn reject_call(&self, call_id: &str) -> Result<(), SdkError> {
        self.api(&format!("uuid_kill {} CALL_REJECTED", call_id))
            .await
            .map(|_| ())
    }

    async fn end_call(&self, call_id: &str) -> Result<(), SdkError> {
        self.api(&format!("uuid_kill {}", call_id)).await.map(|_| ())
    }

    async fn set_muted(&self, call_id: &str, muted: bool) -> Result<(), SdkError> {
        let command = if muted {
            format!("uuid_audio {} start read mute 1", call_id)
        } else {
            format!("uuid_audio {} stop", call_id)
        };
        self.api(&command).await.map(|_| ())
    }

    async fn set_on_hold(&self, call_id: &str, on_hold: bool) -> Result<(), SdkError> {
        let command = if on_hold {
            format!("uuid_hold {}", call_id)
        } else {
            format!("uuid_hold off {}", call_id)
        };
        self.api(&command).await.map(|_| ())
    }

    async fn send_dtmf(&self, call_id: &str, digit: char) -> Result<(), SdkError> {
        self.api(&format!("uuid_send_dtmf {} {}", call_id, digit))
            .await
            .map(|_| ())
    }
}

impl Drop for EslSoftphone {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.reader.abort();
        }
    }
}
