use std::time::Duration;

use pw_protocol::{CommandArgs, Request};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

use super::*;

fn create_test_connection() -> (Connection, DuplexStream) {
	let (local, peer) = duplex(4096);
	(Connection::new(local), peer)
}

fn run_call(tool: &str) -> DaemonCall {
	DaemonCall::run(CommandArgs::parse([tool]))
}

async fn read_request(lines: &mut tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>) -> Request {
	let line = lines.next_line().await.unwrap().expect("request line");
	serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_request_ids_start_at_one_and_increment() {
	let (connection, peer) = create_test_connection();
	let (read_half, mut write_half) = tokio::io::split(peer);

	let daemon = tokio::spawn(async move {
		let mut lines = BufReader::new(read_half).lines();
		let mut seen = Vec::new();
		for _ in 0..3 {
			let request = read_request(&mut lines).await;
			seen.push(request.id);
			let reply = serde_json::to_string(&Response::ok(request.id, json!(request.id))).unwrap();
			write_half.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
		}
		seen
	});

	for expected in 1..=3u64 {
		let result = connection.send(run_call("tab-list")).await.unwrap();
		assert_eq!(result, json!(expected));
	}
	assert_eq!(daemon.await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated_by_id() {
	let (connection, peer) = create_test_connection();
	let (read_half, mut write_half) = tokio::io::split(peer);

	tokio::spawn(async move {
		let mut lines = BufReader::new(read_half).lines();
		let first = read_request(&mut lines).await;
		let second = read_request(&mut lines).await;
		// Reply to the later request first.
		for request in [second, first] {
			let tool = request.params["args"]["_"][0].clone();
			let reply = serde_json::to_string(&Response::ok(request.id, tool)).unwrap();
			write_half.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
		}
	});

	let (a, b) = tokio::join!(connection.send(run_call("alpha")), connection.send(run_call("beta")));
	assert_eq!(a.unwrap(), json!("alpha"));
	assert_eq!(b.unwrap(), json!("beta"));
	assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test]
async fn test_error_response_is_remote_error() {
	let (connection, peer) = create_test_connection();
	let (read_half, mut write_half) = tokio::io::split(peer);

	tokio::spawn(async move {
		let mut lines = BufReader::new(read_half).lines();
		let request = read_request(&mut lines).await;
		let reply = serde_json::to_string(&Response::err(request.id, "Unknown command: frobnicate")).unwrap();
		write_half.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
	});

	let err = connection.send(run_call("frobnicate")).await.unwrap_err();
	match err {
		Error::Remote(message) => assert_eq!(message, "Unknown command: frobnicate"),
		other => panic!("expected remote error, got {other:?}"),
	}
}

#[tokio::test]
async fn test_pending_requests_rejected_when_peer_closes() {
	let (connection, peer) = create_test_connection();
	let (read_half, write_half) = tokio::io::split(peer);

	tokio::spawn(async move {
		let mut lines = BufReader::new(read_half).lines();
		let _ = read_request(&mut lines).await;
		// Dropping both halves closes the stream without answering.
		drop(lines);
		drop(write_half);
	});

	let result = connection.send(DaemonCall::stop()).await;
	assert!(matches!(result, Err(Error::ConnectionClosed)));
	assert!(connection.is_closed());
	assert!(matches!(connection.send(run_call("open")).await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_dropped_request_future_removes_callback() {
	let (connection, _peer) = create_test_connection();

	let result = tokio::time::timeout(Duration::from_millis(50), connection.send(run_call("open"))).await;
	assert!(result.is_err(), "no daemon reply expected");
	assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test]
async fn test_unknown_and_malformed_frames_are_ignored() {
	let (connection, peer) = create_test_connection();
	let (read_half, mut write_half) = tokio::io::split(peer);

	tokio::spawn(async move {
		let mut lines = BufReader::new(read_half).lines();
		let request = read_request(&mut lines).await;
		write_half.write_all(b"{\"id\":999,\"result\":1}\n").await.unwrap();
		write_half.write_all(b"garbage\n").await.unwrap();
		let reply = serde_json::to_string(&Response::ok(request.id, json!("ok"))).unwrap();
		write_half.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
	});

	assert_eq!(connection.send(run_call("open")).await.unwrap(), json!("ok"));
}
