use clipbridge_core::PayloadBlob;
use clipbridge_store::{AppState, ClipboardKey, build_router};
use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};
use tokio::{net::TcpListener, sync::oneshot};

const KEY_QUERY: &str = "WOPISrc=https%3A%2F%2Fwopi.example%2Ffiles%2F1&ServerId=srv-a&ViewId=0&Tag=key-1";

fn sample_key() -> ClipboardKey {
    ClipboardKey {
        wopi_src: "https://wopi.example/files/1".to_owned(),
        server_id: "srv-a".to_owned(),
        view_id: "0".to_owned(),
        tag: "key-1".to_owned(),
    }
}

#[tokio::test]
async fn posted_payload_is_served_whole_and_by_mime() {
    let (base, state, shutdown_tx) = start_store().await;
    let client = reqwest::Client::new();

    let mut blob = PayloadBlob::new();
    blob.push("text/plain", "Hello\nworld");
    blob.push("text/html", "<p>Hello<br>world</p>");
    let encoded = blob.encode().expect("encode payload");

    let response = client
        .post(format!("{base}/clipboard?{KEY_QUERY}"))
        .multipart(Form::new().part("file", Part::bytes(encoded.to_vec()).file_name("clipboard")))
        .send()
        .await
        .expect("post clipboard");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.get(&sample_key()).await, Some(encoded.clone()));

    let whole = client
        .get(format!("{base}/clipboard?{KEY_QUERY}"))
        .send()
        .await
        .expect("get clipboard");
    assert_eq!(whole.status(), StatusCode::OK);
    assert_eq!(whole.bytes().await.expect("body"), encoded);

    let html = client
        .get(format!("{base}/clipboard?{KEY_QUERY}&MimeType=text/html"))
        .send()
        .await
        .expect("get html part");
    assert_eq!(html.status(), StatusCode::OK);
    assert_eq!(
        html.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/html")
    );
    assert_eq!(html.text().await.expect("html body"), "<p>Hello<br>world</p>");

    let missing_mime = client
        .get(format!("{base}/clipboard?{KEY_QUERY}&MimeType=image/png"))
        .send()
        .await
        .expect("get missing part");
    assert_eq!(missing_mime.status(), StatusCode::NOT_FOUND);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn malformed_file_payload_is_rejected() {
    let (base, state, shutdown_tx) = start_store().await;

    let response = reqwest::Client::new()
        .post(format!("{base}/clipboard?{KEY_QUERY}"))
        .multipart(Form::new().part("file", Part::bytes(b"text/plain\nff\nshort\n".to_vec())))
        .send()
        .await
        .expect("post malformed payload");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.is_empty().await);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn data_field_is_stored_untouched() {
    let (base, state, shutdown_tx) = start_store().await;

    let opaque = vec![0_u8, 159, 146, 150, 10, 13];
    let response = reqwest::Client::new()
        .post(format!("{base}/clipboard?{KEY_QUERY}"))
        .multipart(Form::new().part("data", Part::bytes(opaque.clone()).file_name("clipboard")))
        .send()
        .await
        .expect("post opaque data");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        state.get(&sample_key()).await.map(|b| b.to_vec()),
        Some(opaque)
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn unknown_key_and_missing_field_are_client_errors() {
    let (base, _state, shutdown_tx) = start_store().await;
    let client = reqwest::Client::new();

    let unknown = client
        .get(format!("{base}/clipboard?{KEY_QUERY}"))
        .send()
        .await
        .expect("get unknown clipboard");
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let no_field = client
        .post(format!("{base}/clipboard?{KEY_QUERY}"))
        .multipart(Form::new().text("other", "value"))
        .send()
        .await
        .expect("post without clipboard field");
    assert_eq!(no_field.status(), StatusCode::BAD_REQUEST);

    let missing_query = client
        .get(format!("{base}/clipboard?WOPISrc=x"))
        .send()
        .await
        .expect("get with partial key");
    assert_eq!(missing_query.status(), StatusCode::BAD_REQUEST);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn healthz_reports_entry_count() {
    let (base, state, shutdown_tx) = start_store().await;
    let mut blob = PayloadBlob::new();
    blob.push("text/plain", "x");
    state
        .put_payload(sample_key(), blob)
        .await
        .expect("seed clipboard");

    let text = reqwest::get(format!("{base}/healthz"))
        .await
        .expect("healthz")
        .text()
        .await
        .expect("healthz body");
    let body: serde_json::Value = serde_json::from_str(&text).expect("healthz json");
    assert_eq!(body["ok"], true);
    assert_eq!(body["entries"], 1);

    let _ = shutdown_tx.send(());
}

async fn start_store() -> (String, AppState, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral store socket");
    let address = listener.local_addr().expect("store local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let state = AppState::new();
    let server = axum::serve(listener, build_router(state.clone())).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", address), state, shutdown_tx)
}
