use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{http, Request};
use remote_abac_runtime::{
    core::{Authorizer, Engine},
    policy::PolicyList,
    Authorize, AUTHORIZE_PATH,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const ALICE: &str = r#"{"apiVersion": "abac.authorization.kubernetes.io/v1beta1", "kind": "Policy", "spec": {"user": "alice", "namespace": "*", "resource": "pods", "apiGroup": "*"}}"#;
const MALLORY: &str = r#"{"apiVersion": "abac.authorization.kubernetes.io/v1beta1", "kind": "Policy", "spec": {"user": "mallory", "nonResourcePath": "/version"}}"#;

fn authorizer(policy: &str) -> Authorizer<PolicyList> {
    Authorizer::new(PolicyList::parse(policy).expect("policy must parse"))
}

async fn send<E: Engine>(
    authorize: &Authorize<E>,
    method: http::Method,
    uri: &str,
    body: impl Into<Bytes>,
) -> (http::StatusCode, Bytes) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(body.into()))
        .unwrap();
    let rsp = authorize.clone().oneshot(req).await.unwrap();
    let status = rsp.status();
    let body = rsp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn review<E: Engine>(authorize: &Authorize<E>, spec: Value) -> Value {
    let review = json!({
        "kind": "SubjectAccessReview",
        "apiVersion": "authorization.k8s.io/v1beta1",
        "spec": spec,
    });
    let (status, body) = send(
        authorize,
        http::Method::POST,
        AUTHORIZE_PATH,
        serde_json::to_vec(&review).unwrap(),
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    serde_json::from_slice(&body).expect("response must be JSON")
}

fn pods(user: &str) -> Value {
    json!({
        "user": user,
        "resourceAttributes": { "verb": "get", "resource": "pods", "namespace": "default" },
    })
}

#[tokio::test]
async fn allows_permitted_user() {
    let authorize = Authorize::new(authorizer(ALICE));
    assert_eq!(
        review(&authorize, pods("alice")).await,
        json!({
            "kind": "SubjectAccessReview",
            "apiVersion": "authorization.k8s.io/v1beta1",
            "status": { "allowed": true },
        })
    );
}

#[tokio::test]
async fn denies_other_users_with_reason() {
    let authorize = Authorize::new(authorizer(ALICE));
    let rsp = review(&authorize, pods("mallory")).await;
    assert_eq!(rsp["status"]["allowed"], json!(false));
    let reason = rsp["status"]["reason"].as_str().expect("denials must have a reason");
    assert!(!reason.is_empty());
}

#[tokio::test]
async fn decides_non_resource_requests() {
    let authorize = Authorize::new(authorizer(MALLORY));
    let rsp = review(
        &authorize,
        json!({
            "user": "mallory",
            "nonResourceAttributes": { "verb": "get", "path": "/version" },
        }),
    )
    .await;
    assert_eq!(rsp["status"], json!({ "allowed": true }));

    let rsp = review(
        &authorize,
        json!({
            "user": "mallory",
            "nonResourceAttributes": { "verb": "get", "path": "/metrics" },
        }),
    )
    .await;
    assert_eq!(rsp["status"]["allowed"], json!(false));
}

#[tokio::test]
async fn malformed_requests_have_no_content() {
    let authorize = Authorize::new(authorizer(ALICE));

    for body in ["", "{", "[1, 2, 3]", r#"{"spec": {"user": 7}}"#] {
        let (status, body) = send(&authorize, http::Method::POST, AUTHORIZE_PATH, body).await;
        assert_eq!(status, http::StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    // The service keeps answering.
    let rsp = review(&authorize, pods("alice")).await;
    assert_eq!(rsp["status"]["allowed"], json!(true));
}

#[tokio::test]
async fn rejects_other_routes() {
    let authorize = Authorize::new(authorizer(ALICE));

    let (status, _) = send(&authorize, http::Method::POST, "/healthz", "{}").await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);

    let (status, _) = send(&authorize, http::Method::GET, AUTHORIZE_PATH, "").await;
    assert_eq!(status, http::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn decides_against_latest_policy() {
    let authorizer = authorizer(ALICE);
    let authorize = Authorize::new(authorizer.clone());
    assert_eq!(
        review(&authorize, pods("mallory")).await["status"]["allowed"],
        json!(false)
    );

    let policy = format!("{ALICE}\n{}", ALICE.replace("alice", "mallory"));
    authorizer.set(PolicyList::parse(&policy).unwrap());
    assert_eq!(
        review(&authorize, pods("mallory")).await["status"]["allowed"],
        json!(true)
    );
}
