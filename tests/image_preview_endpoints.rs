use std::io::Cursor;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::{json, Value};
use tower::ServiceExt;

use preview_bridge::api::server::build_router;
use preview_bridge::codec::decode_wire_image;
use preview_bridge::config::BridgeSettings;
use preview_bridge::host::nodes::stock_registry;
use preview_bridge::host::{
    FnNode, HostEnvironment, InputSchema, InputSpec, NodeError, NodeOutput,
};

#[tokio::test]
async fn unknown_node_falls_back_to_generic_brightness() {
    let app = test_app();

    let response = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": png_data_uri(gray_rgb(8, 6, 100)),
            "node_type": "DoesNotExist",
            "params": {"brightness": 2.0},
        }),
        StatusCode::OK,
    )
    .await;

    assert_eq!(response["success"], json!(true));
    assert_eq!(response["width"], json!(8));
    assert_eq!(response["height"], json!(6));
    let output = decoded_mean(&response);
    assert!(
        (output - 200.0 / 255.0).abs() < 0.02,
        "expected brightened gray, got mean {output}"
    );
}

#[tokio::test]
async fn rgba_input_is_returned_as_rgb_jpeg() {
    let app = test_app();
    let rgba = RgbaImage::from_pixel(5, 4, Rgba([40, 80, 120, 255]));

    let response = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": png_data_uri(DynamicImage::ImageRgba8(rgba)),
            "node_type": "DoesNotExist",
            "params": {},
        }),
        StatusCode::OK,
    )
    .await;

    let image_data = response["image_data"].as_str().expect("image data");
    assert!(image_data.starts_with("data:image/jpeg;base64,"));
    let decoded = decode_wire_image(image_data).expect("decodable output");
    assert_eq!(decoded.channels(), 3);
    assert_eq!((decoded.width(), decoded.height()), (5, 4));
}

#[tokio::test]
async fn registered_node_processes_the_image() {
    let app = test_app();

    let response = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": png_data_uri(gray_rgb(4, 4, 100)),
            "node_type": "Invert",
            "params": {},
        }),
        StatusCode::OK,
    )
    .await;

    let output = decoded_mean(&response);
    assert!((output - 155.0 / 255.0).abs() < 0.02, "got mean {output}");
}

#[tokio::test]
async fn stock_color_adjust_node_uses_request_params() {
    let app = test_app();

    let response = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": png_data_uri(gray_rgb(6, 6, 100)),
            "node_type": "ColorAdjust",
            "params": {"brightness": 2.0, "contrast": 1.0, "saturation": 1.0, "gamma": 1.0},
        }),
        StatusCode::OK,
    )
    .await;

    let output = decoded_mean(&response);
    assert!((output - 200.0 / 255.0).abs() < 0.02, "got mean {output}");
}

#[tokio::test]
async fn panicking_node_falls_back_instead_of_failing() {
    let app = test_app();

    let response = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": png_data_uri(gray_rgb(4, 4, 100)),
            "node_type": "Explode",
            "params": {"brightness": 2.0},
        }),
        StatusCode::OK,
    )
    .await;

    assert_eq!(response["success"], json!(true));
    let output = decoded_mean(&response);
    assert!((output - 200.0 / 255.0).abs() < 0.02, "got mean {output}");
}

#[tokio::test]
async fn output_only_preview_node_falls_back() {
    let app = test_app();

    let response = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": png_data_uri(gray_rgb(4, 4, 100)),
            "node_type": "ImagePreviewNode",
            "params": {},
        }),
        StatusCode::OK,
    )
    .await;

    let output = decoded_mean(&response);
    assert!((output - 100.0 / 255.0).abs() < 0.02, "got mean {output}");
}

#[tokio::test]
async fn size_hints_are_echoed() {
    let app = test_app();
    let image_data = png_data_uri(gray_rgb(4, 4, 100));

    let with_hints = send_json(
        app.clone(),
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": image_data,
            "node_type": "Invert",
            "params": {},
            "original_width": 640,
            "original_height": 480,
            "scale_factor": 0.5,
        }),
        StatusCode::OK,
    )
    .await;
    assert_eq!(with_hints["original_width"], json!(640));
    assert_eq!(with_hints["original_height"], json!(480));
    assert_eq!(with_hints["scale_factor"], json!(0.5));

    let without_hints = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({"image_data": image_data, "node_type": "Invert"}),
        StatusCode::OK,
    )
    .await;
    assert_eq!(without_hints["original_width"], Value::Null);
    assert_eq!(without_hints["original_height"], Value::Null);
    assert_eq!(without_hints["scale_factor"], json!(1.0));
}

#[tokio::test]
async fn malformed_image_reports_failure() {
    let app = test_app();

    let response = send_json(
        app.clone(),
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": "data:image/png;base64,bm90IGFuIGltYWdl",
            "node_type": "Invert",
            "params": {},
        }),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .await;
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error_code"], json!("malformed_image"));
    assert_eq!(response["error_kind"], json!("infra"));
    assert!(response["error"].as_str().is_some_and(|error| !error.is_empty()));

    let missing = send_json(
        app,
        Method::POST,
        "/image_preview/process",
        json!({"node_type": "Invert"}),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .await;
    assert_eq!(missing["success"], json!(false));
}

#[tokio::test]
async fn unparsable_bodies_fail_with_server_error() {
    for uri in ["/image_preview/process", "/image_preview/process_chain"] {
        let payload = send_raw(
            test_app(),
            uri,
            Some("application/json"),
            String::from("{not json"),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .await;
        assert_eq!(payload["success"], json!(false), "{uri}");
        assert_eq!(payload["error_code"], json!("invalid_json"), "{uri}");
    }
}

#[tokio::test]
async fn content_type_header_is_not_required() {
    let body = json!({
        "image_data": png_data_uri(gray_rgb(4, 4, 100)),
        "node_type": "Invert",
        "params": {},
    })
    .to_string();

    for content_type in [None, Some("text/plain;charset=UTF-8")] {
        let response = send_raw(
            test_app(),
            "/image_preview/process",
            content_type,
            body.clone(),
            StatusCode::OK,
        )
        .await;
        assert_eq!(response["success"], json!(true), "{content_type:?}");
        let output = decoded_mean(&response);
        assert!((output - 155.0 / 255.0).abs() < 0.02, "got mean {output}");
    }
}

#[tokio::test]
async fn full_resolution_payloads_are_accepted() {
    let image_data = png_data_uri(noise_rgb(1024, 1024));
    assert!(image_data.len() > 2 * 1024 * 1024, "payload is {} bytes", image_data.len());

    let response = send_json(
        test_app(),
        Method::POST,
        "/image_preview/process",
        json!({
            "image_data": image_data,
            "node_type": "Unknown",
            "params": {},
        }),
        StatusCode::OK,
    )
    .await;

    assert_eq!(response["success"], json!(true));
    assert_eq!(response["width"], json!(1024));
    assert_eq!(response["height"], json!(1024));
}

#[tokio::test]
async fn bodies_over_the_configured_limit_are_refused() {
    let settings = BridgeSettings {
        max_body_bytes: 1024,
        ..BridgeSettings::default()
    };
    let body = json!({
        "image_data": png_data_uri(noise_rgb(64, 64)),
        "node_type": "Invert",
        "params": {},
    })
    .to_string();
    assert!(body.len() > 1024);

    let payload = send_raw(
        test_app_with(&settings),
        "/image_preview/process",
        Some("application/json"),
        body,
        StatusCode::PAYLOAD_TOO_LARGE,
    )
    .await;
    assert_eq!(payload["success"], json!(false));
    assert_eq!(payload["error_code"], json!("payload_too_large"));
}

#[tokio::test]
async fn apply_is_a_compatibility_stub() {
    let app = test_app();

    let response = send_json(
        app,
        Method::POST,
        "/image_preview/apply",
        json!({"anything": [1, 2, 3]}),
        StatusCode::OK,
    )
    .await;
    assert_eq!(response, json!({"success": true}));
}

#[tokio::test]
async fn node_listing_covers_every_visible_registry() {
    let app = test_app();

    let response = send_empty(app, Method::GET, "/image_preview/nodes", StatusCode::OK).await;

    assert_eq!(response["success"], json!(true));
    let names = response["nodes"]
        .as_array()
        .expect("nodes array")
        .iter()
        .filter_map(|node| node["type_name"].as_str())
        .collect::<Vec<_>>();
    assert_eq!(response["count"], json!(names.len()));
    assert_eq!(
        names,
        vec!["ColorAdjust", "Explode", "ImagePreviewNode", "Invert"]
    );
}

#[tokio::test]
async fn health_reports_service_identity() {
    let app = test_app();

    let response = send_empty(app, Method::GET, "/health", StatusCode::OK).await;

    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["service"], json!("preview-bridge"));
    assert_eq!(response["route_count"], json!(6));
}

fn test_app() -> Router {
    test_app_with(&BridgeSettings::default())
}

fn test_app_with(settings: &BridgeSettings) -> Router {
    let host = Arc::new(HostEnvironment::new());
    let mut registry = stock_registry();
    registry.register_node("Invert", invert_node());
    registry.register_node("Explode", explode_node());
    host.publish_execution_registry(Some(registry.into_shared()));
    build_router(host, settings)
}

fn invert_node() -> Arc<dyn preview_bridge::host::HostNode> {
    FnNode::new(InputSchema::new().required(InputSpec::new("image", "IMAGE")))
        .function("invert")
        .method("invert", |args| {
            let inverted = args.image("image")?.as_array().mapv(|v| 1.0 - v).into_dyn();
            Ok(NodeOutput::Tuple(vec![NodeOutput::Tensor(inverted)]))
        })
        .into_shared()
}

fn explode_node() -> Arc<dyn preview_bridge::host::HostNode> {
    FnNode::new(InputSchema::new().required(InputSpec::new("image", "IMAGE")))
        .method("execute", |_args| -> Result<NodeOutput, NodeError> {
            panic!("node blew up")
        })
        .into_shared()
}

fn gray_rgb(width: u32, height: u32, level: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([level; 3])))
}

fn noise_rgb(width: u32, height: u32) -> DynamicImage {
    let mut state = 0x2545_f491_u32;
    let image = RgbImage::from_fn(width, height, |_, _| {
        let mut channel = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };
        Rgb([channel(), channel(), channel()])
    });
    DynamicImage::ImageRgb8(image)
}

fn png_data_uri(image: DynamicImage) -> String {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("png encode should succeed");
    format!("data:image/png;base64,{}", STANDARD.encode(buffer.into_inner()))
}

fn decoded_mean(response: &Value) -> f32 {
    let image_data = response["image_data"].as_str().expect("image data");
    decode_wire_image(image_data).expect("decodable output").mean()
}

async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: Value,
    expected_status: StatusCode,
) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    read_response(app, request, expected_status).await
}

async fn send_raw(
    app: Router,
    uri: &str,
    content_type: Option<&str>,
    body: String,
    expected_status: StatusCode,
) -> Value {
    let mut builder = Request::builder().method(Method::POST).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    let request = builder.body(Body::from(body)).expect("request should build");
    read_response(app, request, expected_status).await
}

async fn send_empty(app: Router, method: Method, uri: &str, expected_status: StatusCode) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    read_response(app, request, expected_status).await
}

async fn read_response(app: Router, request: Request<Body>, expected_status: StatusCode) -> Value {
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), expected_status);

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");
    serde_json::from_slice::<Value>(&bytes).expect("response should be JSON")
}
