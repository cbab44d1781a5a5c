use ingest_service::config::ServiceConfig;
use ingest_service::startup::Application;
use std::time::{Duration, Instant};

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Build and run the service against in-memory adapters on a random port.
/// Each call gets fully isolated state.
pub async fn spawn_app_with(customize: impl FnOnce(&mut ServiceConfig)) -> TestApp {
    std::env::set_var("DISABLE_EXTERNAL_CONNECTIONS", "true");
    let mut config = ServiceConfig::load().expect("Failed to load configuration");
    config.port = 0; // Random port
    config.worker.poll_interval_ms = 20;
    config.worker.base_delay_ms = 10;
    config.worker.max_delay_ms = 50;
    config.reconcile.interval_secs = 3600; // Keep the sweep quiet during tests
    customize(&mut config);

    let app = Application::build(config)
        .await
        .expect("Failed to build application");
    let port = app.port();

    tokio::spawn(app.run_until_stopped());

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub async fn upload(
        &self,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> reqwest::Response {
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(data)
                .file_name(filename.to_string())
                .mime_str(content_type)
                .unwrap(),
        );

        self.client
            .post(format!("{}/documents", self.address))
            .header("X-User-ID", "test_user_123")
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute upload request")
    }

    pub async fn get_document(&self, id: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/documents/{}", self.address, id))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Poll the document until it reaches the expected status.
    pub async fn wait_for_status(&self, id: &str, expected: &str) -> serde_json::Value {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.get_document(id).await;
            assert!(response.status().is_success());
            let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");

            if body["status"] == expected {
                return body;
            }
            if Instant::now() > deadline {
                panic!(
                    "Document {} never reached status {:?}, last seen {:?}",
                    id, expected, body["status"]
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
