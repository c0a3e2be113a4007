use evaluator_config::MetadataApiConfig;
use evaluator_domain::entities::SubmissionStatus;
use evaluator_domain::ports::MetadataApi;
use evaluator_errors::EvaluatorError;
use evaluator_infrastructure::HttpMetadataClient;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpMetadataClient {
    let config = MetadataApiConfig {
        base_url: format!("{}/", server.uri()),
        request_timeout_seconds: 5,
    };
    HttpMetadataClient::new(&config).expect("client")
}

#[tokio::test]
async fn test_fetch_system_and_file_metadata() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/system_metadata/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "system_id": 3,
            "name": "Golden CO",
            "azimuth": 180.0,
            "tilt": 25.0,
            "elevation": 1800.0,
            "latitude": 39.74,
            "longitude": -105.18,
            "tracking": false,
            "dc_capacity": 5.2
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/file_metadata/11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "file_id": 11,
            "system_id": 3,
            "file_name": "11.csv",
            "data_sampling_frequency": 15,
            "issue": "time shift",
            "subissue": null
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let system = client.system_metadata(3).await.unwrap();
    assert_eq!(system.system_id, 3);
    assert_eq!(system.latitude, Some(39.74));
    assert_eq!(system.tracking, Some(false));

    let file = client.file_metadata(11).await.unwrap();
    assert_eq!(file.file_name, "11.csv");
    assert_eq!(file.data_sampling_frequency, Some(15.0));
    assert_eq!(file.issue.as_deref(), Some("time shift"));
    assert_eq!(file.subissue, None);
}

#[tokio::test]
async fn test_missing_record_maps_to_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/file_metadata/99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server).file_metadata(99).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, EvaluatorError::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_server_error_is_not_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server).system_metadata(1).await.unwrap_err();
    assert!(!err.is_not_found());
    assert!(matches!(err, EvaluatorError::HttpStatus { status: 503, .. }));
}

#[tokio::test]
async fn test_update_submission_status() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/submissions/analysis/2/change_submission_status/42"))
        .and(body_json(json!({ "status": "running" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .update_submission_status(2, 42, SubmissionStatus::Running)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_submission_result() {
    let server = MockServer::start().await;

    let metrics = json!({
        "module": "sdt_submission",
        "mean_run_time": 0.25,
        "mean_absolute_error_tilt": 0.0
    });

    Mock::given(method("PUT"))
        .and(path("/submissions/analysis/2/update_submission_result/42"))
        .and(body_json(metrics.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let payload = metrics.as_object().unwrap().clone();
    client_for(&server)
        .update_submission_result(2, 42, &payload)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_update_surfaces_status() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .update_submission_status(2, 42, SubmissionStatus::Failed)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), evaluator_errors::ErrorKind::Reporting);
}
