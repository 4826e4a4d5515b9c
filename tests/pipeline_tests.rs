//! End-to-end pipeline tests against a mock GitHub API.
//!
//! These go through the real HTTP client, so they exercise URL layout,
//! payload shapes, and the failure isolation of the executor together.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use triage::{
    ActionExecutor, ActionOutcome, GitHubClient, RepoApi, RuleMatcher, RuleSet, TargetKind,
    TargetRef, TriageEvent, TriagePipeline, TriggerKind,
};

fn rules_from_yaml(yaml: &str) -> RuleSet {
    let file: triage::RuleFile = serde_yaml::from_str(yaml).unwrap();
    RuleSet::compile(&file).unwrap()
}

fn pipeline_for(server: &MockServer, rules: RuleSet, action_timeout: Duration) -> TriagePipeline {
    let api = Arc::new(
        GitHubClient::new(Some("test-token".to_string()), "octo".into(), "repo".into())
            .unwrap()
            .with_base_url(server.uri()),
    );
    TriagePipeline::new(
        Arc::clone(&api) as Arc<dyn RepoApi>,
        RuleMatcher::new(rules),
        ActionExecutor::new(api, action_timeout),
    )
}

fn label_event(number: u64, kind: TargetKind, labels: &[&str]) -> TriageEvent {
    TriageEvent::new(
        TargetRef { number, kind },
        TriggerKind::LabelAdded,
        labels.iter().map(|s| (*s).to_string()).collect(),
    )
}

#[tokio::test]
async fn labeling_an_issue_mentions_subscribers_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/repo/issues/42/comments"))
        .and(body_string_contains("@alice"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let rules = rules_from_yaml(
        r#"
mentions:
  - id: wasi-subscribers
    label: wasi
    users: ["@alice"]
"#,
    );
    let pipeline = pipeline_for(&server, rules, Duration::from_secs(5));

    let report = pipeline
        .run(&label_event(42, TargetKind::Issue, &["wasi"]))
        .await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].rule_id, "wasi-subscribers");
    assert_eq!(report.results[0].outcome, ActionOutcome::Applied);
}

#[tokio::test]
async fn changed_paths_label_the_pull_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/repo/pulls/7/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "filename": "src/wasi/host.rs" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/repo/issues/7/labels"))
        .and(body_string_contains("wasi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let rules = rules_from_yaml(
        r#"
paths:
  - id: wasi-paths
    globs: ["src/wasi/**"]
    label: wasi
"#,
    );
    let pipeline = pipeline_for(&server, rules, Duration::from_secs(5));

    let report = pipeline
        .run(&label_event(7, TargetKind::PullRequest, &[]))
        .await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].outcome, ActionOutcome::Applied);
}

#[tokio::test]
async fn one_failing_action_leaves_the_rest_untouched() {
    let server = MockServer::start().await;
    // Label addition fails hard; the mention comment still goes out.
    Mock::given(method("GET"))
        .and(path("/repos/octo/repo/pulls/7/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "filename": "src/lib.rs" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/repo/issues/7/labels"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "message": "Server Error"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/repo/issues/7/comments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 2})))
        .expect(1)
        .mount(&server)
        .await;

    let rules = rules_from_yaml(
        r#"
paths:
  - id: core-paths
    globs: ["src/**"]
    label: core
mentions:
  - id: wasi-subscribers
    label: wasi
    users: ["@alice"]
"#,
    );
    let pipeline = pipeline_for(&server, rules, Duration::from_secs(5));

    let report = pipeline
        .run(&label_event(7, TargetKind::PullRequest, &["wasi"]))
        .await;

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].rule_id, "core-paths");
    assert_eq!(report.results[0].outcome, ActionOutcome::Failed);
    assert!(report.results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Server Error"));
    assert_eq!(report.results[1].rule_id, "wasi-subscribers");
    assert_eq!(report.results[1].outcome, ActionOutcome::Applied);
}

#[tokio::test]
async fn timed_out_action_fails_and_later_rules_still_run() {
    let server = MockServer::start().await;
    // The @alice mention hangs past the action deadline; @bob's is instant.
    Mock::given(method("POST"))
        .and(path("/repos/octo/repo/issues/9/comments"))
        .and(body_string_contains("@alice"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!({"id": 3}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/octo/repo/issues/9/comments"))
        .and(body_string_contains("@bob"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 4})))
        .expect(1)
        .mount(&server)
        .await;

    let rules = rules_from_yaml(
        r#"
mentions:
  - id: slow-subscribers
    label: wasi
    users: ["@alice"]
  - id: fast-subscribers
    label: wasi
    users: ["@bob"]
"#,
    );
    let pipeline = pipeline_for(&server, rules, Duration::from_millis(200));

    let report = pipeline
        .run(&label_event(9, TargetKind::Issue, &["wasi"]))
        .await;

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].rule_id, "slow-subscribers");
    assert_eq!(report.results[0].outcome, ActionOutcome::Failed);
    assert!(report.results[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert_eq!(report.results[1].outcome, ActionOutcome::Applied);
}

#[tokio::test]
async fn no_matching_rules_performs_no_actions() {
    let server = MockServer::start().await;
    // No mocks mounted: any API call would fail the run, which would show
    // up as a Failed result below.

    let rules = rules_from_yaml(
        r#"
mentions:
  - label: wasi
    users: ["@alice"]
"#,
    );
    let pipeline = pipeline_for(&server, rules, Duration::from_secs(5));

    let report = pipeline
        .run(&label_event(1, TargetKind::Issue, &["unrelated"]))
        .await;

    assert!(report.results.is_empty());
}
