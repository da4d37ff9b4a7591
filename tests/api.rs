mod common;

use axum::http::{StatusCode, header};
use http_body_util::BodyExt;
use serde_json::json;

use common::{ScriptedRunner, build, get, json_body, post_empty, post_json, send};

#[tokio::test]
async fn health_is_outside_the_gate_and_carries_security_headers() {
    let app = build(ScriptedRunner::default(), &["--rate-limit-read", "0"]);

    for _ in 0..3 {
        let res = send(&app, get("/health")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(res.headers()[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(res.headers()[header::REFERRER_POLICY], "no-referrer");
    }
    assert!(!app.state.limiter.is_blocked("10.0.0.50"));
}

#[tokio::test]
async fn scan_returns_deduplicated_networks() {
    let app = build(
        ScriptedRunner::default().on(
            "nmcli --colors no -t -f SSID,SECURITY,SIGNAL",
            "Cafe:WPA2:-70\nCafe:WPA2:-50\nTravelNet-Portal:WPA2:90\nLibrary::40\n",
        ),
        &[],
    );

    let res = send(&app, get("/api/v1/networks/scan")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["networks"][0]["ssid"], "Library");
    assert_eq!(body["networks"][1]["signal_strength"], -50);
}

#[tokio::test]
async fn scan_failure_is_a_network_error() {
    let app = build(ScriptedRunner::default().fail("nmcli", "Error: NetworkManager is not running"), &[]);
    let res = send(&app, get("/api/v1/networks/scan")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(res).await["error"], "network_error");
}

#[tokio::test]
async fn tripping_a_limit_blocks_the_client_everywhere() {
    let app = build(ScriptedRunner::default(), &[]);

    for _ in 0..2 {
        let res = send(&app, post_empty("/api/v1/system/reboot")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = send(&app, post_empty("/api/v1/system/reboot")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()[header::RETRY_AFTER], "120");
    assert_eq!(json_body(res).await["error"], "rate_limit_exceeded");

    // a polling route is refused too while the block lasts
    let res = send(&app, get("/api/v1/networks/status")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(res).await["error"], "ip_blocked");

    // other clients are unaffected
    let mut req = get("/api/v1/networks/status");
    req.headers_mut().insert("x-forwarded-for", "10.0.0.99".parse().unwrap());
    assert_eq!(send(&app, req).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn polling_spends_the_same_budget_as_reboot() {
    let app = build(ScriptedRunner::default(), &[]);

    for _ in 0..2 {
        let res = send(&app, get("/api/v1/networks/status")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    // two requests already sit in this client's window; reboot allows two
    let res = send(&app, post_empty("/api/v1/system/reboot")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(res).await["error"], "rate_limit_exceeded");
    assert!(app.state.limiter.is_blocked("10.0.0.50"));
}

#[tokio::test]
async fn connect_validates_body() {
    let app = build(ScriptedRunner::default(), &[]);

    let res = send(&app, post_json("/api/v1/networks/connect", json!({"ssid": "bad;name"}))).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = json_body(res).await;
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["field"], "ssid");

    let res = send(
        &app,
        post_json("/api/v1/networks/connect", json!({"ssid": "Cafe", "password": "short"})),
    )
    .await;
    assert_eq!(json_body(res).await["field"], "password");

    let res = send(&app, post_empty("/api/v1/networks/connect")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = send(&app, post_json("/api/v1/networks/connect", json!({}))).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // validation failures don't feed the block list
    assert!(!app.state.limiter.is_blocked("10.0.0.50"));
}

#[tokio::test]
async fn connect_reports_authentication_failure() {
    let app = build(
        ScriptedRunner::default().fail(
            "nmcli device wifi connect",
            "Error: Connection activation failed: Secrets were required, but not provided.",
        ),
        &[],
    );
    let res = send(
        &app,
        post_json("/api/v1/networks/connect", json!({"ssid": "Cafe", "password": "wrongpass1"})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(res).await;
    assert_eq!(body["error"], "network_error");
    assert_eq!(body["message"], "Authentication failed. Please check the password.");
}

#[tokio::test]
async fn disconnect_with_nothing_connected() {
    let app = build(
        ScriptedRunner::default().on("nmcli --colors no -t -f DEVICE", "wlan1:disconnected:--\n"),
        &[],
    );
    let res = send(&app, post_empty("/api/v1/networks/disconnect")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "No active WiFi connection to disconnect from");
}

#[tokio::test]
async fn disabled_features_are_forbidden() {
    let app = build(
        ScriptedRunner::default(),
        &["--enable-system-reboot", "false", "--enable-vpn-tunnel", "false", "--enable-qr-generation", "false"],
    );

    for req in [
        post_empty("/api/v1/system/reboot"),
        get("/api/v1/vpn/status"),
        post_json("/api/v1/qr/generate", json!({"ssid": "Cafe"})),
    ] {
        let res = send(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(res).await["error"], "security_error");
    }
}

#[tokio::test]
async fn unknown_ssh_action_and_log_type_are_rejected() {
    let app = build(ScriptedRunner::default(), &[]);

    let res = send(&app, post_empty("/api/v1/system/ssh/restart")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = send(&app, get("/api/v1/system/logs?type=kernel")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(res).await["error"], "validation_error");

    let res = send(&app, get("/api/v1/system/logs?type=app&lines=9999")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["lines"], 500);
}

#[tokio::test]
async fn vpn_config_lifecycle() {
    let app = build(ScriptedRunner::default(), &[]);
    let config = "[Interface]\nPrivateKey = aGVsbG8=\n\n[Peer]\nPublicKey = d29ybGQ=\nEndpoint = 203.0.113.1:51820\n";

    let res = send(
        &app,
        post_json("/api/v1/vpn/configs", json!({"config_name": "home", "config_content": config})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(app.dir.path().join("vpn_configs/home.conf").exists());

    let body = json_body(send(&app, get("/api/v1/vpn/configs")).await).await;
    assert_eq!(body["configs"], json!(["home"]));

    let res = send(
        &app,
        axum::http::Request::builder()
            .method("DELETE")
            .uri("/api/v1/vpn/configs/ghost")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(res).await["error"], "not_found");

    let res = send(
        &app,
        post_json("/api/v1/vpn/configs", json!({"config_name": "bad", "config_content": "[Interface]\n"})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn qr_generate_and_parse() {
    let app = build(ScriptedRunner::default(), &[]);

    let res = send(
        &app,
        post_json("/api/v1/qr/generate", json!({"ssid": "My Net", "password": "Secr3t;Pass", "security": "wpa"})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert!(body["qr_code"].as_str().unwrap().starts_with("data:image/png;base64,"));

    let res = send(
        &app,
        post_json("/api/v1/qr/parse", json!({"qr_data": r"WIFI:T:WPA;S:My Net;P:Secr3t\;Pass;;"})),
    )
    .await;
    let body = json_body(res).await;
    assert_eq!(body["network"]["password"], "Secr3t;Pass");

    let res = send(&app, post_json("/api/v1/qr/parse", json!({"qr_data": "not a wifi code"}))).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hotspot_config_hides_password() {
    let app = build(ScriptedRunner::default().fail("sudo nmcli -s -g", "Error: unknown connection"), &[]);
    let res = send(&app, get("/api/v1/hotspot/config")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["ssid"], "TravelNet-Portal");
    assert_eq!(body["password_set"], true);
    assert!(body.get("password").is_none());
}

#[tokio::test]
async fn metrics_are_exposed() {
    let app = build(ScriptedRunner::default(), &[]);
    send(&app, get("/api/v1/networks/status")).await;

    let res = send(&app, get("/metrics")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("travelnet_requests_total"));
}
