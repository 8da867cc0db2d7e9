//! In-process CDN for HTTP tests.

use std::io::Read;
use std::sync::{Arc, Mutex};
use tiny_http::{Method, Response, Server};

pub(crate) type Handler = fn(&Method, &str, &[u8]) -> (u16, Vec<u8>);

/// Serves every request through `handler` on a random local port until dropped.
pub(crate) struct TestCdn {
    pub(crate) url: String,
    server: Arc<Server>,
    requests: Arc<Mutex<Vec<String>>>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestCdn {
    pub(crate) fn start(handler: Handler) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let srv = Arc::clone(&server);
        let log = Arc::clone(&requests);
        let handle = std::thread::spawn(move || {
            for mut request in srv.incoming_requests() {
                let method = request.method().clone();
                let url = request.url().to_owned();
                let mut body = Vec::new();
                let _ = request.as_reader().read_to_end(&mut body);
                log.lock().unwrap().push(format!("{method} {url}"));
                let (code, data) = handler(&method, &url, &body);
                let _ = request.respond(Response::from_data(data).with_status_code(code));
            }
        });

        Self {
            url: format!("http://127.0.0.1:{port}"),
            server,
            requests,
            _handle: handle,
        }
    }

    /// `METHOD url` of every request served so far.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for TestCdn {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
