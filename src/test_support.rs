//! Local HTTP fixtures shared by unit tests.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::engine::client::PoliteClient;

/// Client with no delay and instant retries.
pub fn quick_client() -> PoliteClient {
    PoliteClient::builder()
        .delay_ms(0)
        .retry_base_secs(0)
        .timeout_secs(5)
        .build()
        .expect("client")
}

/// Serve requests with `handler` until the returned sender is signalled.
pub fn spawn_server<F>(handler: F) -> (String, mpsc::Sender<()>, thread::JoinHandle<()>)
where
    F: Fn(&mut tiny_http::Request) -> tiny_http::ResponseBox + Send + 'static,
{
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }
        let mut request = match server.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(_) => break,
        };
        let response = handler(&mut request);
        let _ = request.respond(response);
    });
    (base_url, shutdown_tx, handle)
}

pub fn header(name: &str, value: &str) -> tiny_http::Header {
    tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("header")
}

/// UTF-8 HTML response.
pub fn html(body: &str) -> tiny_http::ResponseBox {
    tiny_http::Response::from_string(body)
        .with_header(header("Content-Type", "text/html; charset=utf-8"))
        .boxed()
}
