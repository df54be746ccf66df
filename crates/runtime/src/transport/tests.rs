use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::*;

/// Serves one canned response and hands back the raw request text.
async fn serve_once(response: &'static str) -> (String, oneshot::Receiver<String>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let (tx, rx) = oneshot::channel();

	tokio::spawn(async move {
		let (mut socket, _) = listener.accept().await.unwrap();
		let mut raw = Vec::new();
		let mut buf = [0u8; 1024];
		loop {
			let n = socket.read(&mut buf).await.unwrap();
			if n == 0 {
				break;
			}
			raw.extend_from_slice(&buf[..n]);
			if request_complete(&raw) {
				break;
			}
		}
		socket.write_all(response.as_bytes()).await.unwrap();
		socket.shutdown().await.unwrap();
		let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
	});

	(format!("http://{addr}"), rx)
}

/// Ignores proxy settings from the environment.
fn direct_transport() -> HttpTransport {
	HttpTransport::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

fn request_complete(raw: &[u8]) -> bool {
	let text = String::from_utf8_lossy(raw);
	let Some(header_end) = text.find("\r\n\r\n") else {
		return false;
	};
	let content_length = text[..header_end]
		.lines()
		.find_map(|line| {
			let (name, value) = line.split_once(':')?;
			name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
		})
		.unwrap_or(0);
	raw.len() >= header_end + 4 + content_length
}

#[tokio::test]
async fn test_json_post_round_trip() {
	let (base, request) =
		serve_once("HTTP/1.1 200 OK\r\nContent-Length: 16\r\nConnection: close\r\n\r\n{\"success\":true}").await;
	let transport = direct_transport();
	let options = RequestOptions::post(json!({"key": "s1"})).header("X-Trace", "abc");

	let response = transport.send(&format!("{base}/sessions"), &options).await.unwrap();

	assert_eq!(response, HttpResponse::new(200, "{\"success\":true}"));
	let request = request.await.unwrap().to_ascii_lowercase();
	assert!(request.starts_with("post /sessions http/1.1"));
	assert!(request.contains("content-type: application/json"));
	assert!(request.contains("x-trace: abc"));
	assert!(request.ends_with("{\"key\":\"s1\"}"));
}

#[tokio::test]
async fn test_error_status_is_not_an_error() {
	let (base, _request) =
		serve_once("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy").await;
	let transport = direct_transport();

	let response = transport.send(&base, &RequestOptions::get()).await.unwrap();

	assert_eq!(response.status, 503);
	assert_eq!(response.body, "busy");
	assert!(!response.is_success());
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	drop(listener);

	let transport = direct_transport();
	let err = transport
		.send(&format!("http://{addr}/"), &RequestOptions::get())
		.await
		.unwrap_err();

	assert!(err.is_transport());
	assert_eq!(err.status(), None);
}

#[tokio::test]
async fn test_invalid_method_rejected() {
	let transport = direct_transport();
	let options = RequestOptions::get().method("BAD METHOD");

	let err = transport.send("http://127.0.0.1:9/", &options).await.unwrap_err();

	assert!(err.is_transport());
}
