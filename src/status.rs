use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl SocketState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SocketState::Closed | SocketState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamStatus {
    Streaming,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Status { status: StreamStatus },
    Socket { session_id: String, state: SocketState },
    Tally { total_vehicles: u64 },
    Error { session_id: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: StreamStatus,
    pub session_id: Option<String>,
    pub socket_state: Option<SocketState>,
    pub total_vehicles: u64,
    pub last_error: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: StreamStatus::Stopped,
            session_id: None,
            socket_state: None,
            total_vehicles: 0,
            last_error: None,
        }
    }
}

/// Current session state plus a broadcast of every transition.
pub struct StatusBoard {
    snapshot: Mutex<StatusSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            snapshot: Mutex::new(StatusSnapshot::default()),
            events,
        }
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn status(&self) -> StreamStatus {
        self.snapshot.lock().status
    }

    pub fn total_vehicles(&self) -> u64 {
        self.snapshot.lock().total_vehicles
    }

    pub fn set_status(&self, status: StreamStatus) {
        {
            let mut snapshot = self.snapshot.lock();
            if snapshot.status == status {
                return;
            }
            snapshot.status = status;
        }
        tracing::info!("Status: {:?}", status);
        self.publish(SessionEvent::Status { status });
    }

    pub fn set_socket_state(&self, session_id: &str, state: SocketState) {
        {
            let mut snapshot = self.snapshot.lock();
            snapshot.session_id = Some(session_id.to_string());
            snapshot.socket_state = Some(state);
            if state == SocketState::Connecting {
                snapshot.last_error = None;
            }
        }
        self.publish(SessionEvent::Socket {
            session_id: session_id.to_string(),
            state,
        });
    }

    pub fn set_tally(&self, total_vehicles: u64) {
        {
            let mut snapshot = self.snapshot.lock();
            if snapshot.total_vehicles == total_vehicles {
                return;
            }
            snapshot.total_vehicles = total_vehicles;
        }
        self.publish(SessionEvent::Tally { total_vehicles });
    }

    pub fn report_error(&self, session_id: &str, message: String) {
        self.snapshot.lock().last_error = Some(message.clone());
        self.publish(SessionEvent::Error {
            session_id: session_id.to_string(),
            message,
        });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
