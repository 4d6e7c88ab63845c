use detection_client::camera::{CameraError, CaptureDevice, DeviceProvider, TestPatternCamera};
use detection_client::config::BackendConfig;
use detection_client::controller::{CaptureController, ControllerSettings};
use detection_client::status::{SessionEvent, SocketState, StreamStatus};
use detection_client::telemetry::Metrics;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
};

const RESULT: &str = r#"{
    "detections": [
        {"box": [20, 60, 120, 140], "confidence": 0.873, "class_name": "car", "track_id": 7},
        {"box": [150, 4, 210, 50], "confidence": 0.61, "class_name": "truck", "track_id": null}
    ],
    "total_vehicles": 5,
    "line_y": 120,
    "frame_width": 320,
    "frame_height": 240
}"#;

struct PatternProvider;

impl DeviceProvider for PatternProvider {
    fn acquire(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Ok(Box::new(TestPatternCamera::new(64, 48, 0)))
    }
}

enum Reply {
    Result(&'static str),
    Close,
}

#[derive(Debug, Default)]
struct BackendLog {
    request_uri: String,
    frames: usize,
    close_received: bool,
    clean_close: bool,
}

/// Loopback backend: waits for `frames_before_reply` frames, replies once,
/// then drains the socket until it ends. `clean_close` is only set when the
/// close handshake completed instead of the connection just dropping.
async fn spawn_backend(frames_before_reply: usize, reply: Reply) -> (String, JoinHandle<BackendLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let uri = Arc::new(Mutex::new(String::new()));
        let captured = uri.clone();
        let callback =
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *captured.lock().unwrap() = request.uri().to_string();
                Ok(response)
            };
        let mut ws = accept_hdr_async(stream, callback).await.unwrap();

        let mut log = BackendLog::default();
        let mut replied = false;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(payload))) => {
                    assert!(payload.starts_with("data:image/jpeg;base64,"));
                    log.frames += 1;
                    if !replied && log.frames == frames_before_reply {
                        replied = true;
                        match reply {
                            Reply::Result(result) => {
                                ws.send(Message::Text(result.to_string())).await.unwrap()
                            }
                            Reply::Close => {
                                let _ = ws.close(None).await;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => log.close_received = true,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
                None => {
                    log.clean_close = true;
                    break;
                }
            }
        }
        log.request_uri = uri.lock().unwrap().clone();
        log
    });

    (url, handle)
}

fn controller(url: String) -> CaptureController {
    let settings = ControllerSettings {
        backend: BackendConfig { url },
        refresh_interval: Duration::from_millis(5),
        jpeg_quality: 50,
    };
    CaptureController::new(
        Arc::new(PatternProvider),
        settings,
        (64, 48),
        Arc::new(Metrics::new().unwrap()),
    )
}

async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event");
}

#[tokio::test]
async fn test_start_stream_receive_then_stop() {
    let (url, backend) = spawn_backend(3, Reply::Result(RESULT)).await;
    let controller = controller(url);
    let board = controller.board();
    let mut events = board.subscribe();

    let session_id = controller.start().await.unwrap();
    assert_eq!(board.status(), StreamStatus::Streaming);

    wait_for(&mut events, |event| {
        matches!(event, SessionEvent::Tally { total_vehicles: 5 })
    })
    .await;

    assert_eq!(board.total_vehicles(), 5);
    {
        let shared = controller.shared();
        let overlay = shared.overlay.lock();
        assert_eq!(overlay.dimensions(), (320, 240));
        assert_eq!(overlay.commands().len(), 5);
    }

    controller.stop().await;

    let shared = controller.shared();
    assert_eq!(board.total_vehicles(), 0);
    assert_eq!(board.status(), StreamStatus::Stopped);
    assert_eq!(board.snapshot().socket_state, Some(SocketState::Closed));
    assert!(shared.overlay.lock().is_empty());
    assert!(!shared.video.is_attached());

    let log = timeout(Duration::from_secs(5), backend)
        .await
        .expect("backend did not finish")
        .unwrap();
    assert!(log.frames >= 3);
    assert!(log.close_received);
    assert!(log.clean_close);
    assert!(log
        .request_uri
        .ends_with(&format!("/ws?client_id={}", session_id)));
}

#[tokio::test]
async fn test_remote_close_stops_streaming() {
    let (url, backend) = spawn_backend(2, Reply::Close).await;
    let controller = controller(url);
    let board = controller.board();
    let mut events = board.subscribe();

    controller.start().await.unwrap();

    wait_for(&mut events, |event| {
        matches!(
            event,
            SessionEvent::Status {
                status: StreamStatus::Stopped
            }
        )
    })
    .await;

    assert_eq!(board.snapshot().socket_state, Some(SocketState::Closed));
    assert!(!controller.shared().video.is_attached());
    assert!(board.snapshot().last_error.is_none());

    controller.stop().await;
    let log = timeout(Duration::from_secs(5), backend)
        .await
        .expect("backend did not finish")
        .unwrap();
    assert!(log.frames >= 2);
    // The client answered the backend's Close before going away.
    assert!(log.close_received);
    assert!(log.clean_close);
}

#[tokio::test]
async fn test_malformed_result_fails_session() {
    let (url, _backend) = spawn_backend(1, Reply::Result(r#"{"detections": 3}"#)).await;
    let controller = controller(url);
    let board = controller.board();
    let mut events = board.subscribe();

    controller.start().await.unwrap();

    wait_for(&mut events, |event| {
        matches!(
            event,
            SessionEvent::Socket {
                state: SocketState::Failed,
                ..
            }
        )
    })
    .await;
    controller.stop().await;

    let snapshot = board.snapshot();
    assert_eq!(snapshot.status, StreamStatus::Stopped);
    assert_eq!(snapshot.total_vehicles, 0);
    assert!(snapshot
        .last_error
        .unwrap()
        .starts_with("Malformed detection result"));
    assert!(controller.shared().overlay.lock().is_empty());
}
