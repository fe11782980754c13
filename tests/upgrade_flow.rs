mod common;

use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::{App, test, web};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};

use atelier::configure;
use atelier::models::{Owner, UpgradeAnalysis};
use atelier::services::{JobProcessor, JobStore};
use common::test_context;

const BOUNDARY: &str = "atelier-test-boundary";

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(32, 32, Rgb([212, 175, 55]));
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

fn multipart_body(guest: Option<&str>, file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(guest) = guest {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"guestClientId\"\r\n\r\n{}\r\n",
                BOUNDARY, guest
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/upgrade/upload")
        .insert_header((
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(body)
}

/// Polls the analysis endpoint until the background run reaches a terminal
/// status.
macro_rules! wait_for_analysis {
    ($app:expr, $analysis_id:expr) => {{
        let mut finished = None;
        for _ in 0..200 {
            let req = test::TestRequest::get()
                .uri(&format!("/upgrade/analysis/{}", $analysis_id))
                .to_request();
            let analysis: Value =
                test::read_body_json(test::call_service($app, req).await).await;
            if analysis["status"] == 2 || analysis["status"] == 3 {
                finished = Some(analysis);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        finished.expect("analysis never finished")
    }};
}

#[actix_web::test]
async fn guest_upload_analysis_and_preview() {
    let ctx = test_context(0).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(configure),
    )
    .await;

    let png = png_bytes();
    let body = multipart_body(Some("g1"), Some(("ring.png", "image/png", png.as_slice())));
    let resp = test::call_service(&app, upload_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let uploaded: Value = test::read_body_json(resp).await;
    let analysis_id = uploaded["analysisId"].as_str().unwrap().to_string();
    let image_url = uploaded["imageUrl"].as_str().unwrap();
    assert!(image_url.starts_with("http://media.test/upgrade-images/"));
    assert!(image_url.ends_with(".png"));

    let analysis = wait_for_analysis!(&app, &analysis_id);
    assert_eq!(analysis["status"], 2);
    assert_eq!(analysis["detected"]["jewelryType"], "ring");
    assert_eq!(analysis["detected"]["metal"], "yellow_gold");
    assert_eq!(analysis["detected"]["style"], "classic");
    assert_eq!(analysis["suggestionCount"], 4);
    assert_eq!(analysis["limitations"][0], "Back of the ring not visible");

    let req = test::TestRequest::get()
        .uri(&format!("/upgrade/suggestions/{}", analysis_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let suggestions: Value = test::read_body_json(resp).await;
    let categories = suggestions["categories"].as_array().unwrap();
    let ids: Vec<&str> = categories.iter().map(|c| c["id"].as_str().unwrap()).collect();
    assert_eq!(
        ids,
        vec![
            "material_finish",
            "stone_setting",
            "proportions_balance",
            "craftsmanship_detail"
        ]
    );
    assert_eq!(categories[1]["suggestions"][0]["id"], "sug_2");
    assert_eq!(categories[1]["suggestions"][0]["impact"], "high");
    assert_eq!(suggestions["keepOriginal"]["title"], "Keep it as it is");

    // Unknown suggestion ids are rejected before anything is queued.
    let req = test::TestRequest::post()
        .uri("/upgrade/preview")
        .set_json(json!({
            "analysisId": analysis_id,
            "selectedSuggestionIds": ["sug_2", "sug_99"]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(!ctx.state.upgrade.process_next().await.unwrap());

    let req = test::TestRequest::post()
        .uri("/upgrade/preview")
        .set_json(json!({
            "analysisId": analysis_id,
            "selectedSuggestionIds": ["sug_2", "sug_3"],
            "keepOriginal": false
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["status"], 0);
    assert_eq!(created["appliedSuggestionIds"], json!(["sug_2", "sug_3"]));
    assert!(created["prompt"].as_str().is_some_and(|p| !p.is_empty()));
    let job_id = created["id"].as_str().unwrap().to_string();

    assert!(ctx.state.upgrade.process_next().await.unwrap());

    let req = test::TestRequest::get()
        .uri(&format!("/upgrade/preview/{}", job_id))
        .to_request();
    let done: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(done["status"], 2);
    assert_eq!(
        done["enhancedImageUrl"],
        format!(
            "http://media.test/upgrade-previews/{}/{}/enhanced.png",
            analysis_id, job_id
        )
        .as_str()
    );
}

#[actix_web::test]
async fn keep_original_preview_needs_no_selection() {
    let ctx = test_context(0).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(configure),
    )
    .await;

    let png = png_bytes();
    let body = multipart_body(Some("g7"), Some(("ring.png", "image/png", png.as_slice())));
    let uploaded: Value =
        test::read_body_json(test::call_service(&app, upload_request(body).to_request()).await)
            .await;
    let analysis_id = uploaded["analysisId"].as_str().unwrap().to_string();
    assert_eq!(wait_for_analysis!(&app, &analysis_id)["status"], 2);

    let req = test::TestRequest::post()
        .uri("/upgrade/preview")
        .set_json(json!({ "analysisId": analysis_id }))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );

    let req = test::TestRequest::post()
        .uri("/upgrade/preview")
        .set_json(json!({ "analysisId": analysis_id, "keepOriginal": true }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["keepOriginal"], true);
    assert_eq!(created["appliedSuggestionIds"], json!([]));
}

#[actix_web::test]
async fn suggestions_wait_for_a_completed_analysis() {
    let ctx = test_context(0).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(configure),
    )
    .await;

    let pending = UpgradeAnalysis::new(
        Owner::Guest("g2".into()),
        "http://media.test/upgrade-images/x.png".into(),
        "upgrade-images/x.png".into(),
        "image/png".into(),
    );
    ctx.jobs.insert_analysis(&pending).await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/upgrade/suggestions/{}", pending.id))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );

    let req = test::TestRequest::get()
        .uri(&format!("/upgrade/analysis/{}", pending.id))
        .to_request();
    let analysis: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(analysis["status"], 0);

    let req = test::TestRequest::post()
        .uri("/upgrade/preview")
        .set_json(json!({ "analysisId": pending.id, "keepOriginal": true }))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[actix_web::test]
async fn uploads_are_validated() {
    let ctx = test_context(0).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(configure),
    )
    .await;

    // No file part.
    let body = multipart_body(Some("g1"), None);
    let resp = test::call_service(&app, upload_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Not an accepted image type.
    let body = multipart_body(Some("g1"), Some(("notes.txt", "text/plain", &b"hello"[..])));
    let resp = test::call_service(&app, upload_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Declared PNG that does not decode.
    let body = multipart_body(
        Some("g1"),
        Some(("ring.png", "image/png", &b"definitely not a png"[..])),
    );
    let resp = test::call_service(&app, upload_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Anonymous upload without a guest id.
    let png = png_bytes();
    let body = multipart_body(None, Some(("ring.png", "image/png", png.as_slice())));
    let resp = test::call_service(&app, upload_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert!(ctx.storage.keys().await.is_empty());
}
