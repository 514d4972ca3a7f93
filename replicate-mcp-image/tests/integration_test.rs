//! Integration tests for the replicate-mcp-image HTTP relay.
//!
//! The predictions API and the image host are both served by wiremock, and the
//! relay router runs on an ephemeral local port. No network access or API
//! token is required.
//!
//! Run with: `cargo test --package replicate-mcp-image --test integration_test`

use replicate_mcp_common::config::{Config, ImageDirectories, ImageInputEncoding};
use replicate_mcp_image::{ImageHandler, router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_MODEL: &str = "acme/painter";
const MODIFY_MODEL: &str = "acme/retoucher";
const IMAGE_BYTES: &[u8] = b"\x52\x49\x46\x46fake-webp-bytes";

/// A relay bound to a local port plus its mocked upstream.
struct TestRelay {
    addr: SocketAddr,
    upstream: MockServer,
    root: TempDir,
    http: reqwest::Client,
}

impl TestRelay {
    async fn start() -> Self {
        Self::start_with(ImageInputEncoding::Path).await
    }

    async fn start_with(encoding: ImageInputEncoding) -> Self {
        let upstream = MockServer::start().await;
        let root = tempfile::tempdir().unwrap();

        let config = Config {
            api_token: "r8_integration".to_string(),
            api_base_url: upstream.uri(),
            port: 0,
            generate_model: GENERATE_MODEL.to_string(),
            modify_model: MODIFY_MODEL.to_string(),
            directories: ImageDirectories::under(root.path()).ensure().unwrap(),
            output_extension: "webp".to_string(),
            image_input_encoding: encoding,
        };

        let app = router(Arc::new(ImageHandler::new(config)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            upstream,
            root,
            http: reqwest::Client::new(),
        }
    }

    fn dirs(&self) -> ImageDirectories {
        ImageDirectories::under(self.root.path()).ensure().unwrap()
    }

    fn image_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.upstream.uri(), name)
    }

    async fn post(&self, body: Value) -> (u16, Value) {
        let response = self
            .http
            .post(format!("http://{}/mcp", self.addr))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn mock_prediction(&self, model: &str, output: Value) {
        Mock::given(method("POST"))
            .and(path(format!("/models/{}/predictions", model)))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "p1",
                "status": "succeeded",
                "output": output,
            })))
            .mount(&self.upstream)
            .await;
    }

    async fn mock_image(&self, name: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/files/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE_BYTES))
            .mount(&self.upstream)
            .await;
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    files
}

fn timestamp_of(file: &str, prefix: &str) -> u64 {
    let name = Path::new(file).file_name().unwrap().to_str().unwrap();
    name.strip_prefix(prefix)
        .unwrap()
        .split(|c: char| c == '.' || c == '_')
        .next()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_generate_image_end_to_end() {
    let relay = TestRelay::start().await;
    let url = relay.image_url("fox.webp");

    Mock::given(method("POST"))
        .and(path(format!("/models/{}/predictions", GENERATE_MODEL)))
        .and(header("Authorization", "Bearer r8_integration"))
        .and(header("Prefer", "wait"))
        .and(body_json(json!({"input": {"prompt": "a red fox"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p1",
            "status": "succeeded",
            "output": [url],
        })))
        .expect(1)
        .mount(&relay.upstream)
        .await;
    relay.mock_image("fox.webp").await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": "a red fox"}}))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["message"], "Image generated successfully.");
    assert!(body.get("error").is_none());

    let file = PathBuf::from(body["file"].as_str().unwrap());
    assert!(file.is_absolute());
    assert!(file.starts_with(relay.dirs().generated));
    let name = file.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("generated_"));
    assert!(name.ends_with(".webp"));
    assert_eq!(std::fs::read(&file).unwrap(), IMAGE_BYTES);
}

#[tokio::test]
async fn test_generate_image_uses_first_output_element() {
    let relay = TestRelay::start().await;
    relay
        .mock_prediction(
            GENERATE_MODEL,
            json!([relay.image_url("first.webp"), relay.image_url("second.webp")]),
        )
        .await;
    relay.mock_image("first.webp").await;
    Mock::given(method("GET"))
        .and(path("/files/second.webp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&relay.upstream)
        .await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": "two options"}}))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["message"], "Image generated successfully.");
}

#[tokio::test]
async fn test_generate_image_accepts_single_string_output() {
    let relay = TestRelay::start().await;
    relay
        .mock_prediction(GENERATE_MODEL, json!(relay.image_url("single.webp")))
        .await;
    relay.mock_image("single.webp").await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": "one"}}))
        .await;

    assert_eq!(status, 200);
    assert!(body["file"].is_string());
}

#[tokio::test]
async fn test_consecutive_generations_get_distinct_files() {
    let relay = TestRelay::start().await;
    relay
        .mock_prediction(GENERATE_MODEL, json!([relay.image_url("img.webp")]))
        .await;
    relay.mock_image("img.webp").await;

    let mut timestamps = Vec::new();
    for _ in 0..3 {
        let (status, body) = relay
            .post(json!({"name": "generate_image", "arguments": {"prompt": "again"}}))
            .await;
        assert_eq!(status, 200);
        timestamps.push(timestamp_of(body["file"].as_str().unwrap(), "generated_"));
    }

    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(files_in(&relay.dirs().generated).len(), 3);
}

#[tokio::test]
async fn test_generate_image_missing_prompt_skips_upstream() {
    let relay = TestRelay::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&relay.upstream)
        .await;

    let (status, body) = relay.post(json!({"name": "generate_image", "arguments": {}})).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"error": "Missing prompt parameter."}));

    let (status, body) = relay.post(json!({"name": "generate_image"})).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"error": "Missing prompt parameter."}));
}

#[tokio::test]
async fn test_generate_image_without_output() {
    let relay = TestRelay::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{}/predictions", GENERATE_MODEL)))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"id": "p1", "status": "succeeded"})),
        )
        .mount(&relay.upstream)
        .await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": "nothing"}}))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"error": "No output received from the model."}));
    assert!(files_in(&relay.dirs().generated).is_empty());
}

#[tokio::test]
async fn test_generate_image_unexpected_output_format() {
    let relay = TestRelay::start().await;
    relay.mock_prediction(GENERATE_MODEL, json!(42)).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&relay.upstream)
        .await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": "numbers"}}))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"error": "Unexpected output format"}));
}

#[tokio::test]
async fn test_generate_image_upstream_error() {
    let relay = TestRelay::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{}/predictions", GENERATE_MODEL)))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthenticated"))
        .mount(&relay.upstream)
        .await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": "denied"}}))
        .await;

    assert_eq!(status, 200);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("401"), "unexpected error: {}", error);
    assert!(error.contains("Unauthenticated"));
    assert!(files_in(&relay.dirs().generated).is_empty());
}

#[tokio::test]
async fn test_generate_image_download_failure() {
    let relay = TestRelay::start().await;
    relay
        .mock_prediction(GENERATE_MODEL, json!([relay.image_url("gone.webp")]))
        .await;
    Mock::given(method("GET"))
        .and(path("/files/gone.webp"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&relay.upstream)
        .await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": "lost"}}))
        .await;

    assert_eq!(status, 200);
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("Failed to download image"), "unexpected error: {}", error);
    assert!(files_in(&relay.dirs().generated).is_empty());
}

#[tokio::test]
async fn test_modify_image_end_to_end() {
    let relay = TestRelay::start().await;
    let dirs = relay.dirs();
    let source = dirs.input.join("cat.png");
    std::fs::write(&source, b"png-bytes").unwrap();

    Mock::given(method("POST"))
        .and(path(format!("/models/{}/predictions", MODIFY_MODEL)))
        .and(body_json(json!({
            "input": {
                "prompt": "make it blue",
                "image": source.to_string_lossy(),
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p2",
            "status": "succeeded",
            "output": [relay.image_url("blue.png")],
        })))
        .expect(1)
        .mount(&relay.upstream)
        .await;
    relay.mock_image("blue.png").await;

    let (status, body) = relay
        .post(json!({
            "name": "modify_image",
            "arguments": {"prompt": "make it blue", "image_filename": "cat.png"}
        }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["message"], "Image modified successfully.");
    let file = PathBuf::from(body["file"].as_str().unwrap());
    assert!(file.starts_with(&dirs.modified));
    let name = file.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("modified_"));
    assert!(name.ends_with("_cat.png"));
    assert_eq!(std::fs::read(&file).unwrap(), IMAGE_BYTES);

    // The source image is left untouched
    assert_eq!(std::fs::read(&source).unwrap(), b"png-bytes");
}

#[tokio::test]
async fn test_modify_image_sends_data_uri_when_configured() {
    let relay = TestRelay::start_with(ImageInputEncoding::DataUri).await;
    std::fs::write(relay.dirs().input.join("dot.png"), [1u8, 2, 3]).unwrap();

    Mock::given(method("POST"))
        .and(path(format!("/models/{}/predictions", MODIFY_MODEL)))
        .and(body_json(json!({
            "input": {"prompt": "sharpen", "image": "data:image/png;base64,AQID"}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "status": "succeeded",
            "output": relay.image_url("dot.png"),
        })))
        .expect(1)
        .mount(&relay.upstream)
        .await;
    relay.mock_image("dot.png").await;

    let (status, body) = relay
        .post(json!({
            "name": "modify_image",
            "arguments": {"prompt": "sharpen", "image_filename": "dot.png"}
        }))
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["message"], "Image modified successfully.");
}

#[tokio::test]
async fn test_modify_image_missing_file() {
    let relay = TestRelay::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&relay.upstream)
        .await;

    for filename in ["nope.png", "../secret.png", "/etc/passwd"] {
        let (status, body) = relay
            .post(json!({
                "name": "modify_image",
                "arguments": {"prompt": "p", "image_filename": filename}
            }))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"error": "Specified image file does not exist."}));
    }
}

#[tokio::test]
async fn test_modify_image_missing_parameters() {
    let relay = TestRelay::start().await;

    for arguments in [
        json!({}),
        json!({"prompt": "p"}),
        json!({"image_filename": "cat.png"}),
        json!({"prompt": "", "image_filename": "cat.png"}),
    ] {
        let (status, body) = relay
            .post(json!({"name": "modify_image", "arguments": arguments}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(
            body,
            json!({"error": "Missing required parameters (prompt, image_filename)."})
        );
    }
}

#[tokio::test]
async fn test_unknown_tool_is_bad_request() {
    let relay = TestRelay::start().await;

    let (status, body) = relay.post(json!({"name": "upscale_image", "arguments": {}})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Unknown tool requested."}));

    let (status, body) = relay.post(json!({"arguments": {"prompt": "x"}})).await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "Unknown tool requested."}));
}

#[tokio::test]
async fn test_invalid_body_is_bad_request() {
    let relay = TestRelay::start().await;

    let response = relay
        .http
        .post(format!("http://{}/mcp", relay.addr))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body")
    );
}

#[tokio::test]
async fn test_only_post_is_routed() {
    let relay = TestRelay::start().await;

    let response = relay
        .http
        .get(format!("http://{}/mcp", relay.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 405);

    let response = relay
        .http
        .post(format!("http://{}/other", relay.addr))
        .json(&json!({"name": "generate_image"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_badly_typed_arguments_reach_the_tool() {
    let relay = TestRelay::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&relay.upstream)
        .await;

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": {"prompt": 42}}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"error": "Missing prompt parameter."}));

    let (status, body) = relay
        .post(json!({"name": "generate_image", "arguments": "a red fox"}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"error": "Missing prompt parameter."}));

    let (status, body) = relay
        .post(json!({
            "name": "modify_image",
            "arguments": {"prompt": "p", "image_filename": 7}
        }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({"error": "Missing required parameters (prompt, image_filename)."})
    );
}

#[tokio::test]
async fn test_unknown_tool_wins_over_badly_typed_arguments() {
    let relay = TestRelay::start().await;

    for body in [
        json!({"name": "upscale_image", "arguments": {"prompt": 42}}),
        json!({"name": 42, "arguments": {"prompt": "p"}}),
        json!(["generate_image"]),
    ] {
        let (status, response) = relay.post(body).await;
        assert_eq!(status, 400);
        assert_eq!(response, json!({"error": "Unknown tool requested."}));
    }
}
