#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use clap::Parser;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use travelnet_portal::config::Args;
use travelnet_portal::gateway::hotspot::HotspotBackend;
use travelnet_portal::gateway::{CommandOutput, CommandRunner, CommandSpec, GatewayError};
use travelnet_portal::state::AppState;

/// Answers commands from a prefix table; unmatched commands succeed silently.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, CommandOutput)>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn on(mut self, prefix: &str, stdout: &str) -> Self {
        self.rules.push((prefix.to_string(), CommandOutput::ok(stdout)));
        self
    }

    pub fn fail(mut self, prefix: &str, stderr: &str) -> Self {
        self.rules.push((prefix.to_string(), CommandOutput::failed(1, stderr)));
        self
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, GatewayError> {
        let line = cmd.command_line();
        self.calls.lock().unwrap().push(line.clone());
        Ok(self
            .rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn spawn_detached(&self, cmd: &CommandSpec) -> Result<u32, GatewayError> {
        self.calls.lock().unwrap().push(cmd.command_line());
        Ok(31337)
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub dir: TempDir,
}

pub fn build(runner: ScriptedRunner, extra_args: &[&str]) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut argv = vec![
        "travelnet-portal".to_string(),
        "--data-dir".to_string(),
        dir.path().display().to_string(),
        "--connectivity-url".to_string(),
        "http://127.0.0.1:9/".to_string(),
    ];
    argv.extend(extra_args.iter().map(|s| s.to_string()));
    let args = Args::parse_from(argv);
    std::fs::create_dir_all(args.vpn_dir()).unwrap();

    let backend = HotspotBackend::NetworkManager {
        interface: args.ap_interface.clone(),
        connection: args.hotspot_connection.clone(),
    };
    let state = Arc::new(AppState::new(&args, Arc::new(runner), backend));
    TestApp {
        router: travelnet_portal::app(state.clone()),
        state,
        dir,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "10.0.0.50")
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", "10.0.0.50")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", "10.0.0.50")
        .body(Body::empty())
        .unwrap()
}

pub async fn send(app: &TestApp, req: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(req).await.unwrap()
}

pub async fn json_body(res: Response<Body>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
