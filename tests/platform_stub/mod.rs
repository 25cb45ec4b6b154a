use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const API_KEY: &str = "stub-secret";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Serves `/ok/*` (200), `/gone/*` (404), `/flaky` (503 once, then 200) and
/// `POST /metadata` (200 with the right bearer token, 401 otherwise).
pub struct PlatformStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PlatformStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start platform stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut flaky_calls = 0_usize;
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_owned());
                let method = request.method().as_str().to_owned();
                let path = request.url().to_string();

                recorded.lock().expect("lock requests").push(RecordedRequest {
                    method: method.clone(),
                    path: path.clone(),
                    authorization: authorization.clone(),
                    body,
                });

                let status = if path.starts_with("/ok") {
                    200
                } else if path.starts_with("/gone") {
                    404
                } else if path == "/flaky" {
                    flaky_calls += 1;
                    if flaky_calls == 1 { 503 } else { 200 }
                } else if path == "/metadata" && method == "POST" {
                    if authorization.as_deref() == Some(&format!("Bearer {API_KEY}")) {
                        200
                    } else {
                        401
                    }
                } else {
                    404
                };

                let _ = request
                    .respond(tiny_http::Response::from_string("{}").with_status_code(status));
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock requests").clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

impl Drop for PlatformStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
