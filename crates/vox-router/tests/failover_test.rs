//! Selection and failover behaviour against scripted endpoints.

mod common;

use common::{init_tracing, prefs, speak, tts_selector, Behavior, ScriptedClient, ScriptedDiscoverer};
use std::sync::Arc;
use std::time::Duration;
use vox_router::{
    ErrorKind, HealthPolicy, HealthState, ProviderType, RouterError, SelectorOptions, ServiceType,
    SpeechFailure, SpeechOutput, SpeechPayload,
};

const LOCAL: &str = "http://127.0.0.1:8880/v1";
const REMOTE: &str = "https://api.example.com/v1";
const BACKUP: &str = "https://backup.example.com/v1";

fn exhausted(err: RouterError) -> (vox_router::AttemptLog, bool) {
    match err {
        RouterError::AllCandidatesExhausted {
            attempts,
            deadline_exceeded,
            ..
        } => (attempts, deadline_exceeded),
        other => panic!("expected exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn preferred_item_wins_over_endpoint_order() {
    init_tracing();
    let e1 = "http://10.1.0.1:9000/v1";
    let e2 = "http://10.1.0.2:9000/v1";
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(e1, &[], &["v2"]).up(e2, &[], &["v1"]));
    let client = Arc::new(ScriptedClient::new());
    let selector = tts_selector(HealthPolicy::default(), &[e1, e2], discoverer, client.clone());

    let done = selector
        .select(ServiceType::Tts, &prefs(&["v1", "v2"]), &speak())
        .await
        .unwrap();
    assert_eq!(done.selection.endpoint_url, e2);
    assert_eq!(done.selection.resolved_item, "v1");
    assert_eq!(client.calls(), vec![(e2.to_string(), "v1".to_string())]);
}

#[tokio::test]
async fn exhaustion_reports_every_attempt() {
    init_tracing();
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(REMOTE, &[], &["nova"]).up(BACKUP, &[], &["nova"]));
    let client = Arc::new(
        ScriptedClient::new()
            .with(
                REMOTE,
                Behavior::Fail(SpeechFailure::Status {
                    code: 500,
                    body: "internal error".into(),
                }),
            )
            .with(BACKUP, Behavior::Fail(SpeechFailure::Transport("connection reset".into()))),
    );
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE, BACKUP], discoverer, client);

    let err = selector
        .select(ServiceType::Tts, &prefs(&["nova"]), &speak())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("HTTP 500"));
    assert!(err.to_string().contains("connection reset"));

    let (attempts, deadline_exceeded) = exhausted(err);
    assert!(!deadline_exceeded);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts.endpoints(), vec![REMOTE, BACKUP]);
    assert_ne!(attempts.entries()[0].message, attempts.entries()[1].message);
    assert!(attempts.iter().all(|a| a.error_kind == ErrorKind::RequestFailed));
}

#[tokio::test]
async fn local_endpoint_is_retried_before_falling_back() {
    init_tracing();
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(LOCAL, &[], &["sky"]).up(REMOTE, &[], &["nova"]));
    let client = Arc::new(ScriptedClient::new());
    let selector = tts_selector(HealthPolicy::default(), &[LOCAL, REMOTE], discoverer, client.clone());
    let preferred = prefs(&["sky", "nova"]);

    let first = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(first.selection.endpoint_url, LOCAL);
    assert_eq!(first.selection.resolved_item, "sky");
    assert_eq!(first.selection.provider_type, ProviderType::LocalKokoro);

    // Local server goes away: the request fails over, local stays eligible.
    client.set(LOCAL, Behavior::Fail(SpeechFailure::Transport("connection refused".into())));
    let second = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(second.selection.endpoint_url, REMOTE);
    assert_eq!(second.selection.resolved_item, "nova");
    assert_eq!(second.failed_attempts.endpoints(), vec![LOCAL]);

    let local = &selector.inspect()[0];
    assert!(local.is_local);
    assert_eq!(local.health, HealthState::RetryEligible);
    assert_eq!(local.consecutive_failures, 1);

    client.clear_calls();
    let third = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(
        client.calls(),
        vec![
            (LOCAL.to_string(), "sky".to_string()),
            (REMOTE.to_string(), "nova".to_string())
        ]
    );
    assert_eq!(third.selection.endpoint_url, REMOTE);
    assert_eq!(selector.inspect()[0].consecutive_failures, 2);
}

#[tokio::test]
async fn unchanged_state_gives_identical_selection() {
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(LOCAL, &["kokoro", "tts-1"], &["af_sky"]));
    let selector = tts_selector(HealthPolicy::default(), &[LOCAL, REMOTE], discoverer, Arc::new(ScriptedClient::new()));
    let preferred = prefs(&["af_sky", "alloy"]);

    let a = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    let b = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(a.selection, b.selection);
    assert_eq!(a.selection.resolved_model.as_deref(), Some("tts-1"));
    assert_eq!(a.output, SpeechOutput::Audio(format!("audio:{LOCAL}:af_sky").into_bytes()));
}

#[tokio::test(start_paused = true)]
async fn remote_failure_backs_off_then_recovers() {
    init_tracing();
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(REMOTE, &[], &["nova"]).up(BACKUP, &[], &["nova"]));
    let client = Arc::new(ScriptedClient::new().with(REMOTE, Behavior::Fail(SpeechFailure::Timeout)));
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE, BACKUP], discoverer, client.clone());
    let preferred = prefs(&["nova"]);

    let first = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(first.selection.endpoint_url, BACKUP);
    assert_eq!(first.failed_attempts.entries()[0].error_kind, ErrorKind::RequestTimeout);
    assert_eq!(selector.inspect()[0].health, HealthState::Unhealthy);

    // Inside the backoff window the failed endpoint is not even tried.
    client.set(REMOTE, Behavior::Succeed);
    client.clear_calls();
    tokio::time::advance(Duration::from_secs(10)).await;
    let second = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(second.selection.endpoint_url, BACKUP);
    assert_eq!(client.calls(), vec![(BACKUP.to_string(), "nova".to_string())]);

    tokio::time::advance(Duration::from_secs(21)).await;
    assert_eq!(selector.inspect()[0].health, HealthState::RetryEligible);
    let third = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(third.selection.endpoint_url, REMOTE);
    let remote = &selector.inspect()[0];
    assert_eq!(remote.health, HealthState::Healthy);
    assert_eq!(remote.consecutive_failures, 0);
    assert_eq!(remote.last_error, None);
}

#[tokio::test]
async fn local_endpoint_never_becomes_unhealthy() {
    let selector = tts_selector(
        HealthPolicy::default(),
        &[LOCAL],
        Arc::new(ScriptedDiscoverer::new().up(LOCAL, &[], &["af_sky"])),
        Arc::new(ScriptedClient::new()),
    );
    selector.plan(ServiceType::Tts, &prefs(&["af_sky"])).await;
    let entry = selector.tracker().registry().get(ServiceType::Tts, LOCAL).unwrap();
    for _ in 0..10 {
        let health = selector
            .tracker()
            .mark_failure(&entry, ErrorKind::RequestFailed, "connection refused");
        assert_eq!(health, HealthState::RetryEligible);
    }
    let planned = selector.plan(ServiceType::Tts, &prefs(&["af_sky"])).await;
    assert_eq!(planned.len(), 1);
    let snap = &selector.inspect()[0];
    assert_eq!(snap.consecutive_failures, 10);
    assert!(snap.last_error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn strict_policy_quarantines_local_endpoints_too() {
    let policy = HealthPolicy {
        always_retry_local: false,
        ..HealthPolicy::default()
    };
    let selector = tts_selector(
        policy,
        &[LOCAL],
        Arc::new(ScriptedDiscoverer::new().up(LOCAL, &[], &["af_sky"])),
        Arc::new(ScriptedClient::new().with(LOCAL, Behavior::Fail(SpeechFailure::Transport("down".into())))),
    );
    let err = selector
        .select(ServiceType::Tts, &prefs(&["af_sky"]), &speak())
        .await
        .unwrap_err();
    assert_eq!(exhausted(err).0.len(), 1);
    assert_eq!(selector.inspect()[0].health, HealthState::Unhealthy);
}

#[tokio::test(start_paused = true)]
async fn overall_deadline_bounds_the_pass() {
    init_tracing();
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(REMOTE, &[], &["nova"]).up(BACKUP, &[], &["nova"]));
    let client = Arc::new(ScriptedClient::new().with(REMOTE, Behavior::Hang).with(BACKUP, Behavior::Hang));
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE, BACKUP], discoverer, client.clone());

    let err = selector
        .select_within(ServiceType::Tts, &prefs(&["nova"]), &speak(), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deadline exceeded"));
    let (attempts, deadline_exceeded) = exhausted(err);
    assert!(deadline_exceeded);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts.entries()[0].error_kind, ErrorKind::RequestTimeout);
    assert_eq!(client.calls().len(), 1);

    // Running out of overall budget is not the endpoint's fault.
    let remote = &selector.inspect()[0];
    assert_eq!(remote.health, HealthState::Healthy);
    assert_eq!(remote.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn endpoint_cut_off_by_overall_deadline_stays_healthy() {
    init_tracing();
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(REMOTE, &[], &["nova"]).up(BACKUP, &[], &["nova"]));
    let client = Arc::new(
        ScriptedClient::new()
            .with(
                REMOTE,
                Behavior::SlowFail(
                    Duration::from_millis(1950),
                    SpeechFailure::Status {
                        code: 500,
                        body: "internal error".into(),
                    },
                ),
            )
            .with(BACKUP, Behavior::Slow(Duration::from_millis(100))),
    );
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE, BACKUP], discoverer, client.clone());
    let preferred = prefs(&["nova"]);

    let err = selector
        .select_within(ServiceType::Tts, &preferred, &speak(), Duration::from_secs(2))
        .await
        .unwrap_err();
    let (attempts, deadline_exceeded) = exhausted(err);
    assert!(deadline_exceeded);
    assert_eq!(attempts.endpoints(), vec![REMOTE, BACKUP]);
    assert_eq!(attempts.entries()[0].error_kind, ErrorKind::RequestFailed);
    assert_eq!(attempts.entries()[1].error_kind, ErrorKind::RequestTimeout);

    let snapshot = selector.inspect();
    assert_eq!(snapshot[0].health, HealthState::Unhealthy);
    assert_eq!(snapshot[1].health, HealthState::Healthy);
    assert_eq!(snapshot[1].consecutive_failures, 0);
    assert_eq!(snapshot[1].last_error, None);

    let done = selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(done.selection.endpoint_url, BACKUP);
    assert!(done.failed_attempts.is_empty());
}

#[tokio::test(start_paused = true)]
async fn per_attempt_timeout_counts_against_the_endpoint() {
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(REMOTE, &[], &["nova"]).up(BACKUP, &[], &["nova"]));
    let client = Arc::new(ScriptedClient::new().with(REMOTE, Behavior::Hang));
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE, BACKUP], discoverer, client).with_options(
        SelectorOptions {
            attempt_timeout: Duration::from_secs(1),
            ..SelectorOptions::default()
        },
    );

    let done = selector
        .select_within(ServiceType::Tts, &prefs(&["nova"]), &speak(), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.selection.endpoint_url, BACKUP);
    assert_eq!(done.failed_attempts.entries()[0].error_kind, ErrorKind::RequestTimeout);

    let remote = &selector.inspect()[0];
    assert_eq!(remote.health, HealthState::Unhealthy);
    assert_eq!(remote.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_select_leaves_health_untouched() {
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(REMOTE, &[], &["nova"]));
    let client = Arc::new(ScriptedClient::new().with(REMOTE, Behavior::Slow(Duration::from_secs(10))));
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE], discoverer, client.clone());

    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        selector.select(ServiceType::Tts, &prefs(&["nova"]), &speak()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(client.calls().len(), 1);

    let snap = &selector.inspect()[0];
    assert_eq!(snap.health, HealthState::Healthy);
    assert_eq!(snap.consecutive_failures, 0);
    assert_eq!(snap.last_error, None);
    assert_eq!(snap.last_used_item, None);
}

#[tokio::test(start_paused = true)]
async fn dropped_probe_writes_nothing() {
    let discoverer = Arc::new(
        ScriptedDiscoverer::new()
            .up(REMOTE, &[], &["nova"])
            .with_delay(Duration::from_secs(2)),
    );
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE], discoverer.clone(), Arc::new(ScriptedClient::new()));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        selector.plan(ServiceType::Tts, &prefs(&["nova"])),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(discoverer.probes(), 1);
    let snap = &selector.inspect()[0];
    assert!(snap.discovered_at.is_none());
    assert!(snap.supported_voices.is_empty());
}

#[tokio::test(start_paused = true)]
async fn capabilities_are_reprobed_only_after_ttl() {
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(LOCAL, &[], &["af_sky"]).up(REMOTE, &[], &["nova"]));
    let selector = tts_selector(HealthPolicy::default(), &[LOCAL, REMOTE], discoverer.clone(), Arc::new(ScriptedClient::new()));
    let preferred = prefs(&["af_sky"]);

    selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(discoverer.probes(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    selector.select(ServiceType::Tts, &preferred, &speak()).await.unwrap();
    assert_eq!(discoverer.probes(), 4);
}

#[tokio::test]
async fn unmatched_preferences_fall_back_to_defaults() {
    let cloud = "https://api.openai.com/v1";
    let discoverer = Arc::new(ScriptedDiscoverer::new().up(cloud, &["tts-1", "whisper-1"], &[]));
    let selector = tts_selector(HealthPolicy::default(), &[cloud], discoverer, Arc::new(ScriptedClient::new()));

    let planned = selector.plan(ServiceType::Tts, &prefs(&["af_sky"])).await;
    assert_eq!(planned.len(), 1);
    assert!(planned[0].fallback);

    let done = selector
        .select(ServiceType::Tts, &prefs(&["af_sky"]), &speak())
        .await
        .unwrap();
    assert_eq!(done.selection.provider_type, ProviderType::OpenAiCloud);
    assert_eq!(done.selection.resolved_item, "alloy");
    assert_eq!(done.selection.resolved_model.as_deref(), Some("tts-1"));
}

#[tokio::test]
async fn nothing_eligible_is_exhaustion_with_empty_log() {
    let discoverer = Arc::new(ScriptedDiscoverer::new().down(REMOTE, "connection refused"));
    let client = Arc::new(ScriptedClient::new());
    let selector = tts_selector(HealthPolicy::default(), &[REMOTE], discoverer, client.clone());

    let err = selector
        .select(ServiceType::Tts, &prefs(&["nova"]), &speak())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no eligible endpoints"));
    let (attempts, _) = exhausted(err);
    assert!(attempts.is_empty());
    assert!(client.calls().is_empty());

    let snap = &selector.inspect()[0];
    assert_eq!(snap.health, HealthState::Unhealthy);
    assert!(snap.last_error.as_deref().unwrap().starts_with("discovery_unavailable"));
}

#[tokio::test]
async fn request_shape_errors() {
    let selector = tts_selector(
        HealthPolicy::default(),
        &[LOCAL],
        Arc::new(ScriptedDiscoverer::new()),
        Arc::new(ScriptedClient::new()),
    );
    let upload = SpeechPayload::transcribe(vec![1, 2, 3], "clip.wav");

    let err = selector
        .select(ServiceType::Stt, &prefs(&["whisper-1"]), &upload)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::NoEndpointsConfigured(ServiceType::Stt)));

    let err = selector
        .select(ServiceType::Tts, &prefs(&["af_sky"]), &upload)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::InvalidRequest(_)));
}
