use std::time::Duration;

use services::{HttpSinkConfig, HttpSubmissionSink, SubmissionSink, TransportError};
use testprep_core::model::{AnswerRecord, QuestionId, SessionId, SubmissionPayload};

fn payload() -> SubmissionPayload {
    SubmissionPayload {
        submission_id: Default::default(),
        session_id: SessionId::new(42),
        answers: vec![
            AnswerRecord {
                question_id: QuestionId::new(1),
                answer: Some("B".into()),
                elapsed_seconds: 9,
            },
            AnswerRecord {
                question_id: QuestionId::new(2),
                answer: None,
                elapsed_seconds: 0,
            },
        ],
        session_elapsed_seconds: 9,
    }
}

fn sink(server: &mockito::ServerGuard) -> HttpSubmissionSink {
    let config = HttpSinkConfig::new(&format!("{}/api", server.url()))
        .unwrap()
        .with_api_token("secret")
        .with_timeout(Duration::from_secs(5));
    HttpSubmissionSink::new(config).unwrap()
}

#[tokio::test]
async fn posts_payload_and_decodes_summary() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/sessions/42/submit")
        .match_header("authorization", "Bearer secret")
        .match_header("idempotency-key", "00000000-0000-0000-0000-000000000000")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "session_id": 42,
            "session_elapsed_seconds": 9,
            "answers": [
                {"question_id": 1, "answer": "B", "elapsed_seconds": 9},
                {"question_id": 2, "elapsed_seconds": 0}
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"session_id": 42, "score": {"correct": 1, "total": 2}}"#)
        .create_async()
        .await;

    let summary = sink(&server).submit_all(&payload()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(summary.session_id, SessionId::new(42));
    assert_eq!(summary.score.unwrap().percent(), 50.0);
}

#[tokio::test]
async fn server_error_maps_to_http_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/sessions/42/submit")
        .with_status(503)
        .create_async()
        .await;

    let err = sink(&server).submit_all(&payload()).await.unwrap_err();
    assert_eq!(err, TransportError::HttpStatus(503));
}

#[tokio::test]
async fn unprocessable_entity_is_a_rejection() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/sessions/42/submit")
        .with_status(422)
        .with_body("session already closed")
        .create_async()
        .await;

    let err = sink(&server).submit_all(&payload()).await.unwrap_err();
    assert_eq!(err, TransportError::Rejected("session already closed".into()));
}

#[tokio::test]
async fn unreadable_rejection_body_is_a_decode_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/sessions/42/submit")
        .with_status(422)
        .with_chunked_body(|w| {
            w.write_all(b"session alr")?;
            Err(std::io::Error::other("connection reset"))
        })
        .create_async()
        .await;

    let err = sink(&server).submit_all(&payload()).await.unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/sessions/42/submit")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let err = sink(&server).submit_all(&payload()).await.unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)));
}
