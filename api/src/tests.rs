//! End-to-end tests against the full router.

use std::time::Duration;

use askboard_shared::Role;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{
    auth::{self, Claims},
    config::Config,
    cors_layer, db,
    notifier::Notifier,
    router, AppState, DbPool,
};

struct TestApp {
    router: Router,
    pool: DbPool,
    secret: String,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::for_tests();
        let pool = db::test_pool();
        let (notifier, _) = Notifier::spawn(pool.clone(), config.notify_queue_capacity);
        let state = AppState {
            db: pool.clone(),
            jwt_secret: config.jwt_secret.clone(),
            token_ttl_days: config.token_ttl_days,
            notifier,
        };
        Self {
            router: router(state, cors_layer(&config.cors_origin).unwrap()),
            pool,
            secret: config.jwt_secret,
        }
    }

    /// Inserts a user and returns (id, bearer token).
    fn user(&self, username: &str, role: Role) -> (i64, String) {
        let conn = self.pool.get().unwrap();
        let id = db::insert_user(&conn, username, role);
        let claims = Claims::new(id, &format!("{username}@example.com"), role, 7);
        (id, auth::issue_token(&claims, &self.secret).unwrap())
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn ask(&self, token: &str, title: &str) -> i64 {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/questions",
                Some(token),
                Some(json!({
                    "title": title,
                    "description": "What is going on here?",
                    "tags": ["rust"]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }

    async fn answer(&self, token: &str, question_id: i64, content: &str) -> i64 {
        let (status, body) = self
            .send(
                Method::POST,
                &format!("/api/questions/{question_id}/answers"),
                Some(token),
                Some(json!({ "content": content })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }

    /// Polls until the background consumer has stored `expected` notifications.
    async fn wait_for_unread(&self, token: &str, expected: i64) {
        for _ in 0..100 {
            let (_, body) = self
                .send(Method::GET, "/api/notifications/unread-count", Some(token), None)
                .await;
            if body["data"]["unreadCount"].as_i64() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("unread count never reached {expected}");
    }
}

#[tokio::test]
async fn health_check() {
    let app = TestApp::new();
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn out_of_range_page_returns_empty_page() {
    let app = TestApp::new();
    let (_, token) = app.user("asker", Role::User);
    app.ask(&token, "Only question").await;

    let (status, body) = app
        .send(
            Method::GET,
            "/api/questions?page=9223372036854775807&limit=10",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 0);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["hasPrevPage"], true);
}

#[tokio::test]
async fn ask_answer_accept_flow() {
    let app = TestApp::new();
    let (_, asker) = app.user("u1", Role::User);
    let (helper_id, helper) = app.user("u2", Role::User);

    let question = app.ask(&asker, "How do I share state in axum?").await;
    let answer = app.answer(&helper, question, "Put it in an Arc behind State.").await;

    let (status, body) = app
        .send(Method::GET, &format!("/api/questions/{question}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["question"]["answerCount"], 1);
    assert_eq!(body["data"]["question"]["views"], 1);
    assert_eq!(body["data"]["answers"][0]["author"]["id"], helper_id);

    // The asker hears about the new answer.
    app.wait_for_unread(&asker, 1).await;
    let (_, body) = app
        .send(Method::GET, "/api/notifications", Some(&asker), None)
        .await;
    let note = &body["data"]["items"][0];
    assert_eq!(note["type"], "answer");
    assert_eq!(note["relatedQuestion"], question);
    assert_eq!(note["sender"]["id"], helper_id);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/questions/{question}/answers/{answer}/accept"),
            Some(&asker),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["isAccepted"], true);

    let (_, body) = app
        .send(Method::GET, &format!("/api/questions/{question}"), None, None)
        .await;
    assert_eq!(body["data"]["question"]["acceptedAnswer"], answer);
    assert_eq!(body["data"]["answers"][0]["isAccepted"], true);

    app.wait_for_unread(&helper, 1).await;
    let (_, body) = app
        .send(Method::GET, "/api/auth/profile", Some(&helper), None)
        .await;
    assert_eq!(body["data"]["acceptedAnswers"], 1);
    assert_eq!(body["data"]["reputation"], 15);
}

#[tokio::test]
async fn only_the_asker_can_accept() {
    let app = TestApp::new();
    let (_, asker) = app.user("u1", Role::User);
    let (_, helper) = app.user("u2", Role::User);
    let (_, bystander) = app.user("u3", Role::User);

    let question = app.ask(&asker, "Who may accept?").await;
    let answer = app.answer(&helper, question, "Only you.").await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/questions/{question}/answers/{answer}/accept"),
            Some(&bystander),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (_, body) = app
        .send(Method::GET, &format!("/api/questions/{question}"), None, None)
        .await;
    assert_eq!(body["data"]["question"]["acceptedAnswer"], Value::Null);
    assert_eq!(body["data"]["answers"][0]["isAccepted"], false);
}

#[tokio::test]
async fn voting_over_http() {
    let app = TestApp::new();
    let (_, asker) = app.user("u1", Role::User);
    let (_, voter) = app.user("u2", Role::User);
    let question = app.ask(&asker, "Vote on me").await;

    let vote = |vote_type: &str| {
        json!({ "targetType": "question", "targetId": question, "voteType": vote_type })
    };

    let (status, _) = app
        .send(Method::POST, "/api/questions/vote", None, Some(vote("upvote")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(Method::POST, "/api/questions/vote", Some(&voter), Some(vote("sideways")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid vote type");

    let (status, body) = app
        .send(Method::POST, "/api/questions/vote", Some(&voter), Some(vote("upvote")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Vote recorded");
    assert_eq!(body["data"]["totalVotes"], 1);

    let (_, body) = app
        .send(Method::POST, "/api/questions/vote", Some(&voter), Some(vote("upvote")))
        .await;
    assert_eq!(body["message"], "Vote removed");
    assert_eq!(body["data"]["userVote"], Value::Null);

    let (status, _) = app
        .send(
            Method::POST,
            "/api/questions/vote",
            Some(&voter),
            Some(json!({ "targetType": "answer", "targetId": 999, "voteType": "upvote" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/questions/vote?targetType=question&targetId={question}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["upvotes"], 0);
}

#[tokio::test]
async fn signup_login_and_profile() {
    let app = TestApp::new();
    let signup = json!({
        "name": "Grace Hopper",
        "email": "grace@example.com",
        "username": "grace",
        "password": "cobol-rules"
    });

    let (status, body) = app
        .send(Method::POST, "/api/auth/signup", None, Some(signup.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["user"]["role"], "user");

    let (status, _) = app
        .send(Method::POST, "/api/auth/signup", None, Some(signup))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "grace@example.com", "password": "cobol-rules" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/auth/profile",
            Some(&token),
            Some(json!({ "bio": "Compilers" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["bio"], "Compilers");

    let (status, _) = app
        .send(Method::GET, "/api/auth/profile", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_requires_a_token() {
    let app = TestApp::new();
    let (_, token) = app.user("leaver", Role::User);

    let (status, body) = app
        .send(Method::POST, "/api/auth/logout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out successfully");

    let (status, _) = app.send(Method::POST, "/api/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_json_gets_the_error_envelope() {
    let app = TestApp::new();
    let request = Request::post("/api/auth/login")
        .header("content-type", "application/json")
        .body(Body::from("{\"email\":"))
        .unwrap();
    let (status, body) = app.dispatch(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}

fn multipart_body(boundary: &str, images: usize) -> String {
    let mut body = String::new();
    for (name, value) in [
        ("title", "Why does my image upload fail?"),
        ("description", "The form posts but nothing arrives."),
        ("tags", r#"["forms","Uploads"]"#),
    ] {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    for i in 0..images {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{i}.png\"\r\n\
             Content-Type: image/png\r\n\r\nnot-really-a-png\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    body
}

#[tokio::test]
async fn multipart_question_form() {
    let app = TestApp::new();
    let (_, token) = app.user("u1", Role::User);
    let boundary = "askboard-boundary";

    let post = |images: usize| {
        Request::post("/api/questions")
            .header("Authorization", format!("Bearer {token}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(multipart_body(boundary, images)))
            .unwrap()
    };

    let (status, body) = app.dispatch(post(2)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["tags"], json!(["forms", "uploads"]));

    let (status, _) = app.dispatch(post(6)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_require_admin() {
    let app = TestApp::new();
    let (user_id, user) = app.user("u1", Role::User);
    let (_, admin) = app.user("root", Role::Admin);

    let (status, body) = app
        .send(Method::GET, "/api/admin/stats", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Access denied. Admin privileges required.");

    let (status, body) = app
        .send(Method::GET, "/api/admin/stats", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalUsers"], 2);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/admin/users/{user_id}/ban"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["banReason"], "Admin action");

    let (status, body) = app
        .send(Method::POST, "/api/admin/recount", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["users"], 0);
}

#[tokio::test]
async fn report_moderation_lifecycle() {
    let app = TestApp::new();
    let (_, reporter) = app.user("u1", Role::User);
    let (_, admin) = app.user("root", Role::Admin);
    let (_, author) = app.user("u2", Role::User);
    let question = app.ask(&author, "Buy cheap watches").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/reports",
            Some(&reporter),
            Some(json!({
                "targetType": "question",
                "targetId": question,
                "reason": "spam",
                "description": "Advertising"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let report = body["data"]["id"].as_i64().unwrap();

    let (_, body) = app
        .send(Method::GET, "/api/admin/reports?status=pending", Some(&admin), None)
        .await;
    assert_eq!(body["data"]["total"], 1);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/admin/reports/{report}/resolve"),
            Some(&admin),
            Some(json!({ "action": "question removed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "resolved");

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/api/admin/reports/{report}/dismiss"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn notification_stream_pushes_unread_counts() {
    let app = TestApp::new();
    let (_, asker) = app.user("u1", Role::User);
    let (_, helper) = app.user("u2", Role::User);
    let question = app.ask(&asker, "Streaming?").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/api/notifications/stream")
                .header("Authorization", format!("Bearer {asker}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut events = response.into_body().into_data_stream();

    let first = events.next().await.unwrap().unwrap();
    let first = String::from_utf8_lossy(&first);
    assert!(first.contains("event: unread-count"), "{first}");
    assert!(first.contains(r#"{"unreadCount":0}"#), "{first}");

    app.answer(&helper, question, "Yes, over SSE.").await;

    let next = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("no event before timeout")
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&next).contains(r#"{"unreadCount":1}"#));
}
