//! Local HTTP server and media processor fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::media::{MediaJob, MediaProcessor};
use crate::Result;

pub struct Route {
    path: String,
    status: u16,
    body: Vec<u8>,
}

impl Route {
    pub fn ok(path: &str, body: Vec<u8>) -> Self {
        Self { path: path.to_string(), status: 200, body }
    }

    pub fn status(path: &str, status: u16) -> Self {
        Self { path: path.to_string(), status, body: Vec::new() }
    }
}

pub struct TestServer {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    /// Number of requests served for `path`
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Serve `routes` on an ephemeral port; unknown paths answer 404
pub fn spawn_server(routes: Vec<Route>) -> TestServer {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let hits = Arc::new(Mutex::new(HashMap::new()));
    let (shutdown, shutdown_rx) = mpsc::channel::<()>();

    let counter = Arc::clone(&hits);
    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let request = match server.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(_) => break,
        };

        let path = request.url().split('?').next().unwrap_or_default().to_string();
        *counter.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

        let response = match routes.iter().find(|route| route.path == path) {
            Some(route) => tiny_http::Response::from_data(route.body.clone()).with_status_code(route.status),
            None => tiny_http::Response::from_data(b"not found".to_vec()).with_status_code(404),
        };
        let _ = request.respond(response);
    });

    TestServer {
        base_url,
        hits,
        shutdown,
        handle: Some(handle),
    }
}

/// Media processor that records every job and writes a small output file
#[derive(Default)]
pub struct RecordingProcessor {
    jobs: Mutex<Vec<MediaJob>>,
}

impl RecordingProcessor {
    pub fn jobs(&self) -> Vec<MediaJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaProcessor for RecordingProcessor {
    async fn process(&self, job: &MediaJob) -> Result<()> {
        std::fs::write(&job.output, job.input.to_string_lossy().as_bytes())?;
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    fn tool_name(&self) -> &'static str {
        "recorder"
    }
}
