//! Integration tests for training-dashboard
//!
//! Tests cover:
//! 1. Loss accumulation across a scripted stream
//! 2. Malformed frames between valid ones
//! 3. Disposal and reconnection lifecycle
//! 4. Heatmap downsampling and log scaling
//! 5. Attention normalization on arbitrary input
//! 6. Job submission against a local HTTP responder
//! 7. WebSocket transport against a local server, including release
//!    of a socket whose handshake never completes

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use training_dashboard::{
    normalize, render, ChannelConnection, ClientError, ConnectionEvent, ConnectionState,
    Dashboard, DashboardConfig, EventSender, JobId, JobStatus, LossPoint, RenderOptions,
    StreamIngest, TrainingClient, TrainingParams, VizError, WsConnection,
};

const WAIT: Duration = Duration::from_millis(20);

fn frame(value: Value) -> ConnectionEvent {
    ConnectionEvent::Frame(value.to_string())
}

fn scripted(events: Vec<ConnectionEvent>) -> (EventSender, StreamIngest<ChannelConnection>) {
    let (sender, conn) = ChannelConnection::pair();
    for event in events {
        sender.send(event);
    }
    (sender, StreamIngest::new(conn))
}

fn matrix(rows: usize, cols: usize) -> Value {
    let data: Vec<Vec<f64>> = (0..rows)
        .map(|r| (0..cols).map(|c| ((r * cols + c) % 10) as f64 / 10.0).collect())
        .collect();
    json!(data)
}

// ============================================================================
// Test 1: Loss Accumulation
// ============================================================================

#[test]
fn test_loss_series_accumulates_in_arrival_order() {
    let (_sender, mut ingest) = scripted(vec![
        ConnectionEvent::Opened,
        frame(json!({"step": 1, "loss": 0.9})),
        frame(json!({"step": 2, "loss": 0.5})),
        frame(json!({"step": 3, "loss": 0.2})),
    ]);

    assert_eq!(ingest.pump(WAIT), 4);
    let snapshot = ingest.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Streaming);
    assert!(!snapshot.is_loading());
    assert_eq!(
        snapshot.loss.to_vec(),
        vec![
            LossPoint::new(1.0, 0.9),
            LossPoint::new(2.0, 0.5),
            LossPoint::new(3.0, 0.2),
        ]
    );
    assert_eq!(snapshot.latest(), Some(LossPoint::new(3.0, 0.2)));
    assert!(snapshot.last_update.is_some());
}

#[test]
fn test_earlier_snapshots_are_not_mutated() {
    let (sender, mut ingest) = scripted(vec![frame(json!({"step": 1, "loss": 0.9}))]);
    ingest.pump(WAIT);
    let before = ingest.snapshot();

    sender.send(frame(json!({"step": 2, "loss": 0.5})));
    ingest.pump(WAIT);
    let after = ingest.snapshot();

    assert_eq!(before.loss.len(), 1);
    assert_eq!(after.loss.len(), 2);
    assert!(!before.loss.same_as(&after.loss));
}

#[test]
fn test_uppercase_aliases_accepted() {
    let (_sender, mut ingest) = scripted(vec![frame(json!({
        "STEP": 7,
        "LOSS": 1.25,
        "ATTENTION_WEIGHTS": [[0.1, 0.9], [0.8, 0.2]]
    }))]);
    ingest.pump(WAIT);

    let snapshot = ingest.snapshot();
    assert_eq!(snapshot.latest(), Some(LossPoint::new(7.0, 1.25)));
    let attention = snapshot.attention.expect("attention present");
    assert_eq!(attention.head_shape(0), Some((2, 2)));
}

#[test]
fn test_attention_only_frame_keeps_loading_flag() {
    let (_sender, mut ingest) = scripted(vec![frame(json!({"attention_weights": [[1.0]]}))]);
    ingest.pump(WAIT);

    let snapshot = ingest.snapshot();
    assert!(snapshot.is_loading());
    assert!(snapshot.loss.is_empty());
    assert!(snapshot.attention.is_some());
}

#[test]
fn test_step_without_loss_adds_no_point() {
    let (_sender, mut ingest) = scripted(vec![
        frame(json!({"step": 1})),
        frame(json!({"loss": 0.3})),
        frame(json!({"step": "2", "loss": 0.3})),
    ]);
    ingest.pump(WAIT);

    let snapshot = ingest.snapshot();
    assert!(snapshot.loss.is_empty());
    assert_eq!(snapshot.state, ConnectionState::Connecting);
    assert_eq!(snapshot.stats.frames, 3);
    assert_eq!(snapshot.stats.rejected, 0);
}

// ============================================================================
// Test 2: Malformed Frames
// ============================================================================

#[test]
fn test_malformed_frame_is_dropped_and_stream_continues() {
    let (sender, mut ingest) = scripted(vec![
        frame(json!({"step": 1, "loss": 0.9})),
        ConnectionEvent::Frame("{not json".to_string()),
        ConnectionEvent::Frame("[1, 2, 3]".to_string()),
        frame(json!({"step": 2, "loss": 0.5})),
    ]);
    ingest.pump(WAIT);

    let snapshot = ingest.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Streaming);
    assert_eq!(snapshot.loss.len(), 2);
    assert_eq!(snapshot.stats.frames, 4);
    assert_eq!(snapshot.stats.rejected, 2);
    assert_eq!(sender.close_count(), 0);
}

#[test]
fn test_attention_replaced_not_merged() {
    let (_sender, mut ingest) = scripted(vec![
        frame(json!({"attention_weights": [[[1, 2], [3, 4]], [[5, 6], [7, 8]]]})),
        frame(json!({"attention_weights": [[0.5]]})),
    ]);
    ingest.pump(WAIT);

    let attention = ingest.snapshot().attention.expect("attention present");
    assert_eq!(attention.heads(), &[vec![vec![0.5]]]);
}

// ============================================================================
// Test 3: Lifecycle
// ============================================================================

#[test]
fn test_dispose_while_connecting_is_idempotent() {
    let (sender, mut ingest) = scripted(vec![]);
    assert_eq!(ingest.state(), ConnectionState::Connecting);

    ingest.dispose();
    ingest.dispose();
    assert_eq!(ingest.state(), ConnectionState::Closed);
    assert_eq!(sender.close_count(), 1);

    // frames after disposal are never processed
    sender.send(frame(json!({"step": 1, "loss": 0.9})));
    assert_eq!(ingest.pump(WAIT), 0);
    assert!(ingest.snapshot().loss.is_empty());

    drop(ingest);
    assert_eq!(sender.close_count(), 1);
}

#[test]
fn test_transport_error_closes_stream() {
    let (sender, mut ingest) = scripted(vec![
        frame(json!({"step": 1, "loss": 0.9})),
        ConnectionEvent::Error("connection reset".to_string()),
        frame(json!({"step": 2, "loss": 0.5})),
    ]);
    ingest.pump(WAIT);

    assert_eq!(ingest.state(), ConnectionState::Closed);
    assert_eq!(ingest.snapshot().loss.len(), 1);
    assert_eq!(sender.close_count(), 1);
}

#[test]
fn test_subscribers_see_every_change() {
    let (sender, mut ingest) = scripted(vec![]);
    let updates = ingest.subscribe();

    sender.send(frame(json!({"step": 1, "loss": 0.9})));
    sender.send(ConnectionEvent::Frame("garbage".to_string()));
    sender.send(frame(json!({"step": 2, "loss": 0.5})));
    sender.send(ConnectionEvent::Closed);
    ingest.pump(WAIT);

    let seen: Vec<_> = updates.try_iter().collect();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].loss.len(), 1);
    assert_eq!(seen[1].loss.len(), 2);
    assert_eq!(seen[2].state, ConnectionState::Closed);
}

#[test]
fn test_reconnect_starts_fresh() {
    let (old, mut ingest) = scripted(vec![frame(json!({
        "step": 1,
        "loss": 0.9,
        "attention_weights": [[1.0]]
    }))]);
    ingest.pump(WAIT);

    let (new, conn) = ChannelConnection::pair();
    ingest.reconnect(conn);
    assert_eq!(old.close_count(), 1);
    assert!(ingest.snapshot().is_loading());
    assert!(ingest.snapshot().loss.is_empty());
    assert!(ingest.snapshot().attention.is_none());

    new.send(frame(json!({"step": 10, "loss": 0.1})));
    ingest.pump(WAIT);
    assert_eq!(ingest.snapshot().latest(), Some(LossPoint::new(10.0, 0.1)));
}

// ============================================================================
// Test 4: Heatmap Rendering
// ============================================================================

#[test]
fn test_large_heads_are_strided_within_cap() {
    for (rows, cols) in [(65, 65), (128, 10), (10, 200), (300, 301), (64, 64)] {
        let attention = normalize(Some(&matrix(rows, cols)));
        let grid = render(&attention, 0, RenderOptions::default()).unwrap();

        assert!(grid.num_rows() <= 64, "{rows}x{cols}");
        assert!(grid.num_cols() <= 64, "{rows}x{cols}");
        assert_eq!(grid.row_stride, rows.div_ceil(64).max(1));
        if rows > 64 || cols > 64 {
            assert!(grid.is_downsampled());
            assert_eq!(grid.num_rows(), rows.div_ceil(grid.row_stride));
            assert_eq!(grid.num_cols(), cols.div_ceil(grid.col_stride));
        } else {
            assert!(!grid.is_downsampled());
        }
    }
}

#[test]
fn test_strided_cells_are_source_samples() {
    let attention = normalize(Some(&matrix(130, 130)));
    let grid = render(&attention, 0, RenderOptions::default()).unwrap();
    let head = attention.head(0).unwrap();

    assert_eq!(grid.row_stride, 3);
    for (i, row) in grid.grid.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            assert_eq!(v, head[i * grid.row_stride][j * grid.col_stride]);
        }
    }
}

#[test]
fn test_log_scale_bounds_and_order() {
    let attention = normalize(Some(&json!([[0.0, 1e-12, 1e-4, 0.5, 1.0]])));
    let options = RenderOptions::default().with_log_scale(true);
    let grid = render(&attention, 0, options).unwrap();
    let row = &grid.grid[0];

    let floor = grid.value_range.0;
    assert!((floor + 10.0).abs() < 1e-9);
    assert_eq!(grid.value_range.1, 0.0);
    assert_eq!(row[0], floor);
    assert_eq!(row[1], floor);
    assert!((row[2] + 4.0).abs() < 1e-9);
    assert_eq!(row[4], 0.0);
    assert!(row.windows(2).all(|w| w[0] <= w[1]));
    assert!(row.iter().all(|v| v.is_finite()));
}

#[test]
fn test_linear_scale_passes_values_through() {
    let attention = normalize(Some(&json!([[0.25, 0.75]])));
    let grid = render(&attention, 0, RenderOptions::default()).unwrap();
    assert_eq!(grid.grid, vec![vec![0.25, 0.75]]);
    assert_eq!(grid.value_range, (0.0, 1.0));
}

#[test]
fn test_render_without_data() {
    assert_eq!(
        render(&normalize(None), 0, RenderOptions::default()).unwrap_err(),
        VizError::NoData
    );
    assert_eq!(
        render(&normalize(Some(&json!([[]]))), 0, RenderOptions::default()).unwrap_err(),
        VizError::NoData
    );
}

// ============================================================================
// Test 5: Normalization
// ============================================================================

#[test]
fn test_normalize_never_fails() {
    let inputs = [
        json!(null),
        json!(3.5),
        json!("attention"),
        json!({"heads": 2}),
        json!([]),
        json!([1, "x", null, true]),
        json!([[1, 2], 3, [4, [5]]]),
        json!([[[[1, 2], [3, 4]]]]),
        json!([[[1]], [[2, 3], [4]], []]),
    ];
    for input in &inputs {
        let attention = normalize(Some(input));
        for head in attention.heads() {
            let width = head.first().map(Vec::len).unwrap_or(0);
            assert!(head.iter().all(|row| row.len() == width), "{input}");
            assert!(head.iter().flatten().all(|v| v.is_finite()), "{input}");
        }
        // normalizing the canonical form again changes nothing
        let again = normalize(Some(&serde_json::to_value(&attention).unwrap()));
        assert_eq!(again, attention, "{input}");
    }
}

#[test]
fn test_normalize_shapes() {
    assert_eq!(normalize(Some(&json!([[1, 2], [3, 4]]))).head_count(), 1);
    assert_eq!(normalize(Some(&json!([[[1]], [[2]]]))).head_count(), 2);
    assert_eq!(normalize(Some(&json!([1, 2, 3]))).head_shape(0), Some((3, 1)));
    assert!(normalize(Some(&json!("nope"))).is_empty());
}

// ============================================================================
// Test 6: Job Submission
// ============================================================================

struct CapturedRequest {
    request_line: String,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Serve exactly one HTTP request with `status` and `body`, returning what was received.
fn one_shot_server(status: &'static str, body: &'static str) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let api_base = format!("http://{}/api", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        let mut content_length = 0;
        let mut content_type = None;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "content-length" => content_length = value.trim().parse().unwrap(),
                    "content-type" => content_type = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }

        let mut request_body = vec![0; content_length];
        reader.read_exact(&mut request_body).unwrap();

        let mut stream = reader.into_inner();
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .unwrap();
        stream.flush().unwrap();

        CapturedRequest {
            request_line: request_line.trim_end().to_string(),
            content_type,
            body: request_body,
        }
    });

    (api_base, handle)
}

#[test]
fn test_submit_posts_camel_case_and_reads_job_id() {
    let (api_base, server) = one_shot_server("200 OK", r#"{"jobId":"abc"}"#);
    let client = TrainingClient::new(&api_base);

    let job_id = client.submit(&TrainingParams::default()).unwrap();
    assert_eq!(job_id, JobId::new("abc"));

    let request = server.join().unwrap();
    assert_eq!(request.request_line, "POST /api/train HTTP/1.1");
    assert_eq!(request.content_type.as_deref(), Some("application/json"));
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(
        body,
        json!({
            "vocabSize": 30522,
            "embedSize": 128,
            "numHeads": 8,
            "numSteps": 100,
            "trainSentence": "Hello world",
            "pairSentence": "Goodbye world"
        })
    );
}

#[test]
fn test_dashboard_submit_round_trip() {
    let (api_base, server) = one_shot_server("200 OK", r#"{"jobId":"abc"}"#);
    let config = DashboardConfig::default().with_api_base(api_base);
    let client = TrainingClient::new(&config.api_base);

    let (_sender, conn) = ChannelConnection::pair();
    let mut dashboard = Dashboard::new(StreamIngest::new(conn), &config);

    let params = match dashboard.begin_submit() {
        Some(training_dashboard::Action::Submit(params)) => params,
        other => panic!("expected submit action, got {other:?}"),
    };
    dashboard.finish_submit(client.submit(&params));
    server.join().unwrap();

    assert_eq!(dashboard.job(), &JobStatus::Started(JobId::new("abc")));
    assert!(!dashboard.sidebar_open());
}

#[test]
fn test_server_error_status_is_reported() {
    let (api_base, server) = one_shot_server("500 Internal Server Error", r#"{"detail":"boom"}"#);
    let client = TrainingClient::new(&api_base);

    let err = client.submit(&TrainingParams::default()).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, ClientError::Status(500)), "{err:?}");
}

#[test]
fn test_response_without_job_id() {
    let (api_base, server) = one_shot_server("200 OK", r#"{"status":"queued"}"#);
    let client = TrainingClient::new(&api_base);

    let err = client.submit(&TrainingParams::default()).unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, ClientError::MissingJobId));
}

// ============================================================================
// Test 7: WebSocket Transport
// ============================================================================

#[test]
fn test_websocket_stream_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/ws/metrics", listener.local_addr().unwrap());

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut socket = tungstenite::accept(stream).unwrap();
        for text in [
            r#"{"step": 1, "loss": 0.9}"#,
            "not json",
            r#"{"step": 2, "loss": 0.4, "attention_weights": [[0.2, 0.8]]}"#,
        ] {
            socket.send(tungstenite::Message::text(text)).unwrap();
        }
        let _ = socket.close(None);
        // drain until the client acknowledges the close
        while socket.read().is_ok() {}
    });

    let mut ingest = StreamIngest::new(WsConnection::connect(&url).unwrap());
    let deadline = Instant::now() + Duration::from_secs(10);
    while ingest.state() != ConnectionState::Closed && Instant::now() < deadline {
        ingest.pump(Duration::from_millis(50));
    }
    server.join().unwrap();

    let snapshot = ingest.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Closed);
    assert_eq!(snapshot.loss.len(), 2);
    assert_eq!(snapshot.latest(), Some(LossPoint::new(2.0, 0.4)));
    assert_eq!(snapshot.stats.rejected, 1);
    assert!(snapshot.attention.is_some());
}

/// Read until EOF or reset; false if the read timeout expires first.
fn peer_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return false
            }
            Err(_) => return true,
        }
    }
}

#[test]
fn test_dispose_during_handshake_releases_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/ws/metrics", listener.local_addr().unwrap());

    let mut ingest = StreamIngest::new(WsConnection::connect(&url).unwrap());
    // accept the TCP connection but never answer the upgrade request
    let (mut server_side, _) = listener.accept().unwrap();
    server_side
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    thread::sleep(Duration::from_millis(200));
    ingest.pump(Duration::from_millis(10));
    assert_eq!(ingest.state(), ConnectionState::Connecting);

    let disposed_at = Instant::now();
    ingest.dispose();
    assert_eq!(ingest.state(), ConnectionState::Closed);

    let released = peer_closed(&mut server_side);
    assert!(released, "client socket still open after dispose in Connecting");
    assert!(disposed_at.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_dropping_ingest_during_handshake_releases_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/ws/metrics", listener.local_addr().unwrap());

    let ingest = StreamIngest::new(WsConnection::connect(&url).unwrap());
    let (mut server_side, _) = listener.accept().unwrap();
    server_side
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    drop(ingest);

    let released = peer_closed(&mut server_side);
    assert!(released, "client socket still open after drop in Connecting");
}
