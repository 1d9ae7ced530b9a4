//! HTTP analyzer 클라이언트 테스트 -- mockito 서버로 wire 계약 검증

use mockito::{Matcher, Server};
use serde_json::json;

use logrelay_core::types::{LogLevel, LogMessage, LogPacket};
use logrelay_distributor::client::{EMITTER_ID_HEADER, PACKET_ID_HEADER};
use logrelay_distributor::{AnalyzerClient, HttpAnalyzerClient, TransportError};

fn sample_packet() -> LogPacket {
    LogPacket::new("svc-a").with_messages(vec![
        LogMessage::new(LogLevel::Info, "user logged in", "auth"),
        LogMessage::new(LogLevel::Error, "db timeout", "api"),
    ])
}

/// 닫힌 포트 주소 (연결 거부)
fn refused_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn probe_succeeds_on_2xx() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"ok"}"#)
        .create_async()
        .await;

    let client = HttpAnalyzerClient::new().unwrap();
    client.probe(&server.url()).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn probe_reports_non_success_status() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/health")
        .with_status(503)
        .create_async()
        .await;

    let client = HttpAnalyzerClient::new().unwrap();
    let result = client.probe(&server.url()).await;

    assert_eq!(result, Err(TransportError::Status(503)));
}

#[tokio::test]
async fn probe_of_closed_port_is_unreachable() {
    let client = HttpAnalyzerClient::new().unwrap();
    let err = client.probe(&refused_endpoint()).await.unwrap_err();

    assert!(matches!(err, TransportError::Unreachable(_)), "got {err:?}");
    assert!(err.is_unreachable());
}

#[tokio::test]
async fn deliver_posts_packet_with_identity_headers() {
    let packet = sample_packet();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_header(PACKET_ID_HEADER, Matcher::Exact(packet.id().to_owned()))
        .match_header(EMITTER_ID_HEADER, "svc-a")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "id": packet.id(),
            "emitterId": "svc-a",
            "size": 2,
            "messages": [
                { "level": "info", "message": "user logged in", "source": "auth" },
                { "level": "error", "message": "db timeout", "source": "api" }
            ]
        })))
        .with_status(202)
        .create_async()
        .await;

    let client = HttpAnalyzerClient::new().unwrap();
    client.deliver(&server.url(), &packet).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn deliver_reports_server_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/logs")
        .with_status(500)
        .create_async()
        .await;

    let client = HttpAnalyzerClient::new().unwrap();
    let err = client
        .deliver(&server.url(), &sample_packet())
        .await
        .unwrap_err();

    assert_eq!(err, TransportError::Status(500));
    assert!(!err.is_unreachable());
}

#[tokio::test]
async fn deliver_to_closed_port_is_unreachable() {
    let client = HttpAnalyzerClient::new().unwrap();
    let err = client
        .deliver(&refused_endpoint(), &sample_packet())
        .await
        .unwrap_err();

    assert!(err.is_unreachable(), "got {err:?}");
}
