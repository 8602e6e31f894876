//! Integration tests for the tiered, state-aware response cache

use lobbyroute::audit::{AuditRecord, MemoryAuditLog};
use lobbyroute::cache::{
    CacheLookup, CachedResponse, HashingEmbedder, InvalidationReason, InvalidationScope,
    LookupKind, MemoryCacheStore, PrimerScope, ResponseCache, StateFacts, TtlTable,
};
use lobbyroute::classifier::{Classification, ClassifierTier, Domain, Intent};
use lobbyroute::clock::ManualClock;
use lobbyroute::envelope::InboundMessage;
use std::sync::Arc;

fn cache_at(start: i64, threshold: f32) -> (ResponseCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let cache = ResponseCache::new(
        Arc::new(MemoryCacheStore::new()),
        clock.clone(),
        Arc::new(HashingEmbedder::default()),
        TtlTable::default(),
        threshold,
    );
    (cache, clock)
}

fn status() -> Classification {
    Classification::new(Intent::StatusCheck, ClassifierTier::Keyword)
        .with_domain(Domain::new("operations"))
}

fn how_to() -> Classification {
    Classification::new(Intent::HowTo, ClassifierTier::Keyword)
}

fn deploy_facts() -> StateFacts {
    StateFacts::for_project("lobby")
        .with_revision("a1b2c3")
        .with_deploy_status("green")
}

fn message(text: &str, facts: StateFacts) -> InboundMessage {
    InboundMessage::new(text, "sam", "http", 0).with_state(facts)
}

fn answer(text: &str) -> CachedResponse {
    CachedResponse {
        text: text.to_string(),
        destination: Some("primary".to_string()),
        tokens: 42,
    }
}

#[test]
fn test_status_check_expires_after_sixty_seconds() {
    let (cache, clock) = cache_at(1_000, 0.85);
    let request = message("is the deploy healthy", deploy_facts());
    cache.store(&status(), &request, &answer("all green"));

    clock.set(1_059);
    let lookup = cache.lookup(&status(), &request);
    assert_eq!(lookup.kind(), LookupKind::Exact);
    match lookup {
        CacheLookup::Hit { response, .. } => assert_eq!(response.text, "all green"),
        other => panic!("expected hit, got {:?}", other),
    }

    clock.set(1_061);
    assert_eq!(cache.lookup(&status(), &request).kind(), LookupKind::Miss);
    // Expired read deletes the entry
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_state_change_misses_without_invalidation() {
    let (cache, _) = cache_at(1_000, 0.85);
    let before = message("is the deploy healthy", deploy_facts());
    cache.store(&status(), &before, &answer("all green"));

    let after = message(
        "is the deploy healthy",
        StateFacts::for_project("lobby")
            .with_revision("d4e5f6")
            .with_deploy_status("green"),
    );
    assert_eq!(cache.lookup(&status(), &after).kind(), LookupKind::Miss);
    assert_eq!(cache.lookup(&status(), &before).kind(), LookupKind::Exact);
}

#[test]
fn test_punctuation_and_case_share_a_key() {
    let (cache, _) = cache_at(0, 0.85);
    cache.store(&how_to(), &message("How do I rotate logs?", StateFacts::default()), &answer("logrotate"));
    let lookup = cache.lookup(&how_to(), &message("how do i rotate logs", StateFacts::default()));
    assert_eq!(lookup.kind(), LookupKind::Exact);
}

#[test]
fn test_near_duplicate_request_hits_by_similarity() {
    let (cache, _) = cache_at(0, 0.75);
    cache.store(
        &how_to(),
        &message("how do i rotate the logs", StateFacts::default()),
        &answer("use logrotate"),
    );

    let lookup = cache.lookup(&how_to(), &message("how do i rotate logs", StateFacts::default()));
    assert_eq!(lookup.kind(), LookupKind::Similarity);
    assert!(lookup.similarity().is_some_and(|s| s >= 0.75));

    let unrelated = cache.lookup(
        &how_to(),
        &message("what does the billing dashboard show", StateFacts::default()),
    );
    assert_eq!(unrelated.kind(), LookupKind::Miss);
}

#[test]
fn test_similarity_never_crosses_intents() {
    let (cache, _) = cache_at(0, 0.5);
    cache.store(&how_to(), &message("how do i rotate logs", StateFacts::default()), &answer("x"));
    let trivial = Classification::new(Intent::Trivial, ClassifierTier::Keyword);
    let lookup = cache.lookup(&trivial, &message("how do i rotate logs", StateFacts::default()));
    assert_eq!(lookup.kind(), LookupKind::Miss);
}

#[test]
fn test_uncacheable_intent_is_never_stored() {
    let (cache, _) = cache_at(0, 0.85);
    let debugging = Classification::new(Intent::Debugging, ClassifierTier::Keyword);
    let request = message("why does the worker crash", StateFacts::default());
    assert!(cache.store(&debugging, &request, &answer("oom")).is_none());
    assert_eq!(cache.lookup(&debugging, &request), CacheLookup::Bypassed);

    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.skipped_writes, 1);
    assert_eq!(stats.bypassed, 1);
}

#[test]
fn test_primer_attached_to_uncacheable_request() {
    let (cache, _) = cache_at(0, 0.85);
    cache.put_primer(
        &PrimerScope::Project("lobby".to_string()),
        "lobby is a rust gateway on axum",
    );

    let review = Classification::new(Intent::CodeReview, ClassifierTier::Keyword);
    let request = message("review my diff", StateFacts::for_project("lobby"));
    match cache.lookup(&review, &request) {
        CacheLookup::Primer { scope, text, .. } => {
            assert_eq!(scope, "project:lobby");
            assert_eq!(text, "lobby is a rust gateway on axum");
        }
        other => panic!("expected primer, got {:?}", other),
    }
    assert_eq!(cache.stats().primer_hits, 1);
}

#[test]
fn test_domain_primer_used_when_no_project_primer() {
    let (cache, _) = cache_at(0, 0.85);
    cache.put_primer(&PrimerScope::Domain(Domain::new("engineering")), "monorepo, cargo");
    let review = Classification::new(Intent::CodeReview, ClassifierTier::Keyword)
        .with_domain(Domain::new("engineering"));
    let lookup = cache.lookup(&review, &message("review my diff", StateFacts::for_project("other")));
    assert_eq!(lookup.kind(), LookupKind::Primer);
}

#[test]
fn test_invalidation_by_project_is_audited() {
    let clock = Arc::new(ManualClock::new(500));
    let audit = Arc::new(MemoryAuditLog::new());
    let cache = ResponseCache::new(
        Arc::new(MemoryCacheStore::new()),
        clock,
        Arc::new(HashingEmbedder::default()),
        TtlTable::default(),
        0.85,
    )
    .with_audit(audit.clone());

    let lobby = message("is the deploy healthy", deploy_facts());
    let billing = message("is the deploy healthy", StateFacts::for_project("billing"));
    cache.store(&status(), &lobby, &answer("green"));
    cache.store(&status(), &billing, &answer("green"));

    let record = cache.invalidate_for_event(
        "deploy",
        InvalidationScope::Project {
            project: "lobby".to_string(),
        },
    );
    assert_eq!(record.cleared, 1);
    assert_eq!(record.reason, InvalidationReason::ExternalChange);
    assert_eq!(cache.lookup(&status(), &lobby).kind(), LookupKind::Miss);
    assert_eq!(cache.lookup(&status(), &billing).kind(), LookupKind::Exact);

    let logged = audit
        .records()
        .into_iter()
        .filter(|r| matches!(r, AuditRecord::Invalidation(_)))
        .count();
    assert_eq!(logged, 1);
}

#[test]
fn test_context_switch_clears_everything() {
    let (cache, _) = cache_at(0, 0.85);
    assert!(cache.observe_context("lobby", "main").is_none());
    cache.store(&how_to(), &message("how do i rotate logs", StateFacts::default()), &answer("x"));

    assert!(cache.observe_context("lobby", "main").is_none());
    let record = cache
        .observe_context("lobby", "feature/retry")
        .expect("switch should invalidate");
    assert_eq!(record.reason, InvalidationReason::ContextSwitch);
    assert_eq!(record.cleared, 1);
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_sweep_removes_only_expired_entries() {
    let (cache, clock) = cache_at(0, 0.85);
    cache.store(&status(), &message("is ci green", deploy_facts()), &answer("yes"));
    cache.store(&how_to(), &message("how do i rotate logs", StateFacts::default()), &answer("x"));

    clock.set(61);
    assert_eq!(cache.clear_expired(), 1);
    assert_eq!(cache.stats().entries, 1);
}

#[test]
fn test_snapshot_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache").join("snapshot.json");

    let (cache, _) = cache_at(0, 0.85);
    let request = message("how do i rotate logs", StateFacts::default());
    cache.store(&how_to(), &request, &answer("logrotate"));
    cache.store(&status(), &message("is ci green", deploy_facts()), &answer("yes"));
    assert_eq!(cache.persist(&path).expect("persist"), 2);

    // Restarted 2 minutes later: the status answer has expired
    let (restored, _) = cache_at(120, 0.85);
    assert_eq!(restored.restore(&path).expect("restore"), 1);
    assert_eq!(restored.lookup(&how_to(), &request).kind(), LookupKind::Exact);
}

#[test]
fn test_missing_snapshot_restores_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, _) = cache_at(0, 0.85);
    assert_eq!(cache.restore(&dir.path().join("absent.json")).expect("restore"), 0);
}
