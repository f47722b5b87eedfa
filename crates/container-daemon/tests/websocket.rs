//! End-to-end protocol tests over a real WebSocket connection

use async_net::TcpStream;
use async_tungstenite::client_async;
use async_tungstenite::tungstenite::Message;
use container_daemon::protocol::{Request, Response};
use container_daemon::{DaemonState, server};
use container_orchestration::{ErrorKind, Orchestrator, OrchestratorConfig};
use container_runtime::testing::FakeRuntime;
use container_store::{ContainerStatus, MemoryStore};
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

async fn spawn_daemon() -> (SocketAddr, Arc<FakeRuntime>) {
    let runtime = Arc::new(FakeRuntime::new());
    let orchestrator = Orchestrator::new(
        runtime.clone(),
        Arc::new(MemoryStore::new()),
        OrchestratorConfig::default(),
    );
    let state = Arc::new(DaemonState {
        orchestrator: Arc::new(orchestrator),
        public_host: "preview.test".to_string(),
    });

    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    smol::spawn(server::serve(listener, state)).detach();
    (addr, runtime)
}

struct Client {
    ws: async_tungstenite::WebSocketStream<TcpStream>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (ws, _) = client_async(format!("ws://{}", addr), stream)
            .await
            .unwrap();
        Self { ws }
    }

    async fn send_raw(&mut self, text: &str) -> Response {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
        loop {
            match self.ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn request(&mut self, request: &Request) -> Response {
        let text = serde_json::to_string(request).unwrap();
        self.send_raw(&text).await
    }
}

#[smol_potat::test]
async fn test_start_status_stop_over_websocket() {
    let (addr, runtime) = spawn_daemon().await;
    let mut client = Client::connect(addr).await;

    let response = client
        .request(&Request::StartContainer {
            project_id: "p1".to_string(),
            source_tree: BTreeMap::from([("index.js".to_string(), "x".to_string())]),
            env: BTreeMap::new(),
            port: None,
            force: false,
        })
        .await;
    let Response::Container { container } = response else {
        panic!("unexpected response {:?}", response);
    };
    assert_eq!(container.status, ContainerStatus::Running);
    assert_eq!(container.url.as_deref(), Some("http://preview.test:3000"));
    assert_eq!(runtime.running().len(), 1);

    let status = client
        .request(&Request::ProjectStatus {
            project_id: "p1".to_string(),
        })
        .await;
    assert!(matches!(
        status,
        Response::Container { container: ref current } if current.id == container.id
    ));

    let stopped = client
        .request(&Request::StopContainer {
            id: container.id.clone(),
            timeout_secs: None,
        })
        .await;
    let Response::Container { container: stopped } = stopped else {
        panic!("unexpected response {:?}", stopped);
    };
    assert_eq!(stopped.status, ContainerStatus::Stopped);
    assert!(runtime.running().is_empty());
}

#[smol_potat::test]
async fn test_errors_carry_kind_and_code() {
    let (addr, _) = spawn_daemon().await;
    let mut client = Client::connect(addr).await;

    let response = client
        .request(&Request::ContainerLogs {
            id: "missing".to_string(),
            tail: Some(10),
        })
        .await;
    match response {
        Response::Error {
            kind,
            status_code,
            message,
            container,
            ..
        } => {
            assert_eq!(kind, ErrorKind::NotFound);
            assert_eq!(status_code, 404);
            assert!(message.contains("missing"));
            assert!(container.is_none());
        }
        other => panic!("unexpected response {:?}", other),
    }

    let response = client.send_raw(r#"{"type":"LaunchRocket"}"#).await;
    assert!(matches!(response, Response::BadRequest { .. }));

    // The connection survives a bad frame
    let response = client.request(&Request::ListContainers).await;
    assert_eq!(response, Response::Containers { containers: vec![] });
}

#[smol_potat::test]
async fn test_connections_share_state() {
    let (addr, _) = spawn_daemon().await;
    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;

    let start = Request::StartContainer {
        project_id: "shared".to_string(),
        source_tree: BTreeMap::new(),
        env: BTreeMap::new(),
        port: Some(3100),
        force: false,
    };
    let response = first.request(&start).await;
    assert!(matches!(response, Response::Container { .. }));

    match second.request(&start).await {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::AlreadyRunning),
        other => panic!("unexpected response {:?}", other),
    }
}
