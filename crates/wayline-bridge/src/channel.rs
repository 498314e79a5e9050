//! Process-backed message channel to the agent bridge.
//!
//! One reader task owns the bridge's stdout and routes every reply through
//! the pending-request map. Replies that echo a request id complete that
//! request; replies without one complete the oldest outstanding request,
//! since the bridge works through requests one at a time. A request that
//! timed out keeps its place in line so its late reply is dropped instead of
//! completing the next request.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wayline_common::bridge::{BridgeRequest, BridgeResponse, ResponseKind};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge command is empty")]
    EmptyCommand,

    #[error("Failed to start bridge: {0}")]
    Spawn(std::io::Error),

    #[error("Bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Bridge has not announced readiness")]
    NotReady,

    #[error("Bridge process exited")]
    Exited,

    #[error("Bridge did not answer within {0}ms")]
    Timeout(u64),
}

/// `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Starting,
    Ready,
    Exited,
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    order: VecDeque<String>,
    waiters: HashMap<String, oneshot::Sender<BridgeResponse>>,
    /// Requests the bridge still owes a reply that nobody will read.
    orphans: HashSet<String>,
}

impl PendingRequests {
    pub(crate) fn register(&mut self, id: String) -> oneshot::Receiver<BridgeResponse> {
        let (tx, rx) = oneshot::channel();
        self.order.push_back(id.clone());
        self.waiters.insert(id, tx);
        rx
    }

    /// Forgets a request the bridge never received.
    pub(crate) fn cancel(&mut self, id: &str) {
        self.waiters.remove(id);
        self.order.retain(|p| p != id);
    }

    /// Stops waiting for a request the bridge is still working on.
    pub(crate) fn abandon(&mut self, id: &str) {
        if self.waiters.remove(id).is_some() {
            self.orphans.insert(id.to_string());
        }
    }

    /// Hands `response` to its waiter. Returns it back when nobody is waiting.
    pub(crate) fn dispatch(&mut self, response: BridgeResponse) -> Option<BridgeResponse> {
        let id = match response
            .id
            .as_deref()
            .filter(|id| self.waiters.contains_key(*id) || self.orphans.contains(*id))
        {
            Some(id) => id.to_string(),
            None => match self.order.front() {
                Some(oldest) => oldest.clone(),
                None => return Some(response),
            },
        };
        self.order.retain(|p| *p != id);
        if self.orphans.remove(&id) {
            debug!("Discarding late {:?} reply to bridge request {}", response.kind, id);
            return None;
        }
        match self.waiters.remove(&id) {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!("Waiter for bridge request {} went away", id);
                }
                None
            }
            None => Some(response),
        }
    }

    /// Dropping the senders wakes every waiter with a closed channel.
    pub(crate) fn fail_all(&mut self) {
        self.order.clear();
        self.waiters.clear();
        self.orphans.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

pub struct BridgeChannel {
    child: Child,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Arc<Mutex<PendingRequests>>,
    state: watch::Receiver<ChannelState>,
    reader: JoinHandle<()>,
}

impl BridgeChannel {
    /// Starts the bridge process. `command` is the program followed by its
    /// arguments.
    pub fn spawn(command: &[String]) -> Result<Self, BridgeError> {
        let (program, args) = command.split_first().ok_or(BridgeError::EmptyCommand)?;
        info!("Starting agent bridge: {}", command.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(BridgeError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn(std::io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn(std::io::Error::other("stdout not captured")))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "wayline_bridge::agent", "{}", line);
                }
            });
        }

        let (state_tx, state) = watch::channel(ChannelState::Starting);
        let pending = Arc::new(Mutex::new(PendingRequests::default()));
        let reader = tokio::spawn(read_loop(stdout, pending.clone(), state_tx));

        Ok(Self {
            child,
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            state,
            reader,
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Waits for the bridge's `ready` message.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), BridgeError> {
        let mut state = self.state.clone();
        let settled = tokio::time::timeout(timeout, async move {
            state
                .wait_for(|s| *s != ChannelState::Starting)
                .await
                .map(|s| *s)
        })
        .await;
        match settled {
            Ok(Ok(ChannelState::Ready)) => Ok(()),
            Ok(_) => Err(BridgeError::Exited),
            Err(_) => Err(BridgeError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Sends `request` and waits for the reply routed to it.
    pub async fn request(
        &self,
        request: &BridgeRequest,
        timeout: Duration,
    ) -> Result<BridgeResponse, BridgeError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let reply = {
            let mut pending = self.pending.lock();
            match self.state() {
                ChannelState::Starting => return Err(BridgeError::NotReady),
                ChannelState::Exited => return Err(BridgeError::Exited),
                ChannelState::Ready => pending.register(request.id.clone()),
            }
        };

        debug!("-> bridge {:?} ({})", request.kind, request.id);
        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().cancel(&request.id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(response)) => {
                debug!("<- bridge {:?} ({})", response.kind, request.id);
                Ok(response)
            }
            Ok(Err(_)) => Err(BridgeError::Exited),
            Err(_) => {
                self.pending.lock().abandon(&request.id);
                Err(BridgeError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// Closes stdin so the bridge can exit on its own, killing it if it
    /// lingers.
    pub async fn shutdown(self) -> Result<(), BridgeError> {
        let BridgeChannel {
            mut child,
            stdin,
            reader,
            ..
        } = self;
        drop(stdin);
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => debug!("Agent bridge exited with {}", status?),
            Err(_) => {
                warn!("Agent bridge did not exit after stdin closed; killing it");
                child.kill().await?;
            }
        }
        let _ = reader.await;
        Ok(())
    }
}

async fn read_loop(
    stdout: ChildStdout,
    pending: Arc<Mutex<PendingRequests>>,
    state: watch::Sender<ChannelState>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(raw)) => {
                let line = raw.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<BridgeResponse>(line) {
                    Ok(response) if response.kind == ResponseKind::Ready => {
                        info!("Agent bridge ready");
                        state.send_replace(ChannelState::Ready);
                    }
                    Ok(response) => {
                        if let Some(unclaimed) = pending.lock().dispatch(response) {
                            warn!(
                                "Unsolicited bridge message {:?}: {}",
                                unclaimed.kind,
                                unclaimed.message.unwrap_or_default()
                            );
                        }
                    }
                    Err(e) => debug!("Ignoring non-protocol bridge output '{}': {}", line, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Reading bridge output failed: {}", e);
                break;
            }
        }
    }
    info!("Agent bridge output closed");
    state.send_replace(ChannelState::Exited);
    let mut pending = pending.lock();
    if pending.len() > 0 {
        warn!("Failing {} outstanding bridge request(s)", pending.len());
    }
    pending.fail_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(kind: ResponseKind, id: Option<&str>, message: &str) -> BridgeResponse {
        BridgeResponse {
            kind,
            data: None,
            message: Some(message.to_string()),
            id: id.map(str::to_string),
            timestamp: None,
        }
    }

    #[test]
    fn test_echoed_id_selects_request() {
        let mut pending = PendingRequests::default();
        let mut first = pending.register("a".into());
        let mut second = pending.register("b".into());

        assert!(pending.dispatch(reply(ResponseKind::Pong, Some("b"), "second")).is_none());
        assert_eq!(second.try_recv().unwrap().message.as_deref(), Some("second"));
        assert!(first.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_reply_without_id_completes_oldest() {
        let mut pending = PendingRequests::default();
        let mut first = pending.register("a".into());
        let mut second = pending.register("b".into());

        assert!(pending.dispatch(reply(ResponseKind::Success, None, "one")).is_none());
        assert!(pending.dispatch(reply(ResponseKind::Error, Some("zzz"), "two")).is_none());

        assert_eq!(first.try_recv().unwrap().message.as_deref(), Some("one"));
        assert_eq!(second.try_recv().unwrap().message.as_deref(), Some("two"));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_unclaimed_reply_is_returned() {
        let mut pending = PendingRequests::default();
        let back = pending.dispatch(reply(ResponseKind::Error, None, "LLM init failed"));
        assert_eq!(back.map(|r| r.kind), Some(ResponseKind::Error));
    }

    #[test]
    fn test_late_reply_to_abandoned_request_is_dropped() {
        let mut pending = PendingRequests::default();
        let _task = pending.register("task".into());
        pending.abandon("task");
        let mut ping = pending.register("ping".into());

        assert!(pending.dispatch(reply(ResponseKind::Success, None, "late")).is_none());
        assert!(ping.try_recv().is_err());
        assert_eq!(pending.len(), 1);

        assert!(pending.dispatch(reply(ResponseKind::Pong, None, "pong")).is_none());
        assert_eq!(ping.try_recv().unwrap().kind, ResponseKind::Pong);
    }

    #[test]
    fn test_late_reply_with_echoed_id_is_dropped() {
        let mut pending = PendingRequests::default();
        let _task = pending.register("task".into());
        pending.abandon("task");
        let mut ping = pending.register("ping".into());

        assert!(pending.dispatch(reply(ResponseKind::Success, Some("task"), "late")).is_none());
        assert!(pending.dispatch(reply(ResponseKind::Pong, None, "pong")).is_none());
        assert_eq!(ping.try_recv().unwrap().kind, ResponseKind::Pong);
    }

    #[test]
    fn test_cancel_and_fail_all() {
        let mut pending = PendingRequests::default();
        let _dropped = pending.register("a".into());
        let mut kept = pending.register("b".into());
        pending.cancel("a");
        assert_eq!(pending.len(), 1);

        pending.fail_all();
        assert!(matches!(
            kept.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
