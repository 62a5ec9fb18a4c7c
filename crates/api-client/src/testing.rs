//! Shared test fixtures

use std::sync::Mutex;

use tokio::net::TcpListener;

use crate::error::{ClassifiedError, ErrorKind};
use crate::notify::Notifier;

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Records every side effect instead of rendering it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<(String, ErrorKind)>>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<(String, ErrorKind)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, path: &str, error: &ClassifiedError) {
        self.notifications
            .lock()
            .unwrap()
            .push((path.to_owned(), error.kind()));
    }

    fn redirect(&self, route: &str) {
        self.redirects.lock().unwrap().push(route.to_owned());
    }
}
