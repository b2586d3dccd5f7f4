use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use database::{
    CompletionFlag, DatabaseConfig, DatabaseError, EnrichmentStore, EnrichmentValues,
    LegacyMatch, LegacyMigrator, LegacySource, MatchMetadata, MatchRegistry, MedalRecord,
    ParticipantRecord, SharedStore,
};
use engine::{
    FailureKind, FailureStage, FetchError, MatchClient, RateLimiter, SyncConfig, SyncEngine,
    SyncError,
};
use tokio_util::sync::CancellationToken;
use types::{
    AccountId, EventTimeline, MatchDocument, MatchId, MatchInfo, MedalCount, PlayerStats,
    SkillData, SkillEntry, TeamScore, TimelineEvent,
};

#[derive(Default)]
struct FakeClient {
    documents: Mutex<HashMap<MatchId, MatchDocument>>,
    document_failures: Mutex<HashMap<MatchId, FetchError>>,
    event_failures: Mutex<HashMap<MatchId, FetchError>>,
    skill_failures: Mutex<HashMap<MatchId, FetchError>>,
    cancel_on_document: Mutex<Option<CancellationToken>>,
    document_calls: AtomicUsize,
    event_calls: AtomicUsize,
    skill_calls: AtomicUsize,
}

impl FakeClient {
    fn with_documents(documents: impl IntoIterator<Item = MatchDocument>) -> Arc<Self> {
        let client = FakeClient::default();
        for doc in documents {
            client.set_document(doc);
        }
        Arc::new(client)
    }

    fn set_document(&self, doc: MatchDocument) {
        self.documents.lock().unwrap().insert(doc.match_id.clone(), doc);
    }

    fn fail_document(&self, match_id: &str, error: FetchError) {
        self.document_failures
            .lock()
            .unwrap()
            .insert(MatchId::from(match_id), error);
    }

    fn fail_events(&self, match_id: &str, error: FetchError) {
        self.event_failures
            .lock()
            .unwrap()
            .insert(MatchId::from(match_id), error);
    }

    fn fail_skill(&self, match_id: &str, error: FetchError) {
        self.skill_failures
            .lock()
            .unwrap()
            .insert(MatchId::from(match_id), error);
    }

    fn heal(&self) {
        self.event_failures.lock().unwrap().clear();
        self.skill_failures.lock().unwrap().clear();
    }

    fn calls(&self) -> (usize, usize, usize) {
        (
            self.document_calls.load(Ordering::SeqCst),
            self.event_calls.load(Ordering::SeqCst),
            self.skill_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait::async_trait]
impl MatchClient for FakeClient {
    async fn fetch_match_document(&self, match_id: &MatchId) -> Result<MatchDocument, FetchError> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_document.lock().unwrap().as_ref() {
            token.cancel();
        }
        if let Some(error) = self.document_failures.lock().unwrap().get(match_id) {
            return Err(error.clone());
        }
        self.documents
            .lock()
            .unwrap()
            .get(match_id)
            .cloned()
            .ok_or_else(|| FetchError::Permanent(format!("{match_id} not found")))
    }

    async fn fetch_event_timeline(&self, match_id: &MatchId) -> Result<EventTimeline, FetchError> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.event_failures.lock().unwrap().get(match_id) {
            return Err(error.clone());
        }
        let doc = self.documents.lock().unwrap().get(match_id).cloned();
        let players = doc.map(|d| d.account_ids()).unwrap_or_default();
        Ok(EventTimeline(
            players
                .windows(2)
                .enumerate()
                .map(|(i, pair)| TimelineEvent {
                    event_type: "kill".to_string(),
                    time_offset_ms: 90_000 - i as i64 * 1_000,
                    actor: Some(pair[0].clone()),
                    target: Some(pair[1].clone()),
                })
                .collect(),
        ))
    }

    async fn fetch_skill(
        &self,
        match_id: &MatchId,
        account_ids: &[AccountId],
    ) -> Result<SkillData, FetchError> {
        self.skill_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.skill_failures.lock().unwrap().get(match_id) {
            return Err(error.clone());
        }
        Ok(SkillData {
            entries: account_ids
                .iter()
                .map(|account_id| SkillEntry {
                    account_id: account_id.clone(),
                    csr_before: Some(1480),
                    csr_after: Some(1492),
                    expected_kills: Some(11.5),
                    expected_deaths: Some(10.0),
                })
                .collect(),
        })
    }
}

fn player(id: &str, team: i64) -> PlayerStats {
    PlayerStats {
        account_id: AccountId::from(id),
        gamertag: Some(format!("Spartan {id}")),
        team_id: Some(team),
        outcome: if team == 0 { "win" } else { "loss" }.to_string(),
        rank: team + 1,
        score: 1100,
        kills: 14,
        deaths: 9,
        assists: 6,
        shots_fired: 320,
        shots_hit: 150,
        damage_dealt: 4400,
        damage_taken: 3900,
        medals: vec![MedalCount {
            medal_id: 622331684,
            count: 2,
        }],
    }
}

/// Eight players, p0 through p7, split across two teams.
fn document(match_id: &str) -> MatchDocument {
    MatchDocument {
        match_id: MatchId::from(match_id),
        info: MatchInfo {
            start_time: Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 6, 1, 18, 12, 0).unwrap(),
            map_id: "streets".to_string(),
            mode_id: "oddball".to_string(),
            playlist_id: Some("ranked-arena".to_string()),
        },
        teams: vec![
            TeamScore { team_id: 0, score: 2 },
            TeamScore { team_id: 1, score: 1 },
        ],
        players: (0..8).map(|i| player(&format!("p{i}"), i % 2)).collect(),
    }
}

fn ids(raw: &[&str]) -> Vec<MatchId> {
    raw.iter().map(|id| MatchId::from(*id)).collect()
}

async fn setup_test_store() -> (tempfile::TempDir, SharedStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = DatabaseConfig::new(dir.path().join("shared.db").display().to_string());
    let store = SharedStore::open(&config)
        .await
        .expect("Failed to open shared store");
    (dir, store)
}

fn engine(account: &str, store: &SharedStore, client: &Arc<FakeClient>) -> SyncEngine {
    let config = SyncConfig {
        batch_size: 10,
        ..SyncConfig::default()
    };
    SyncEngine::new(
        AccountId::from(account),
        store.clone(),
        client.clone(),
        RateLimiter::new(1000.0, 1000.0),
        config,
    )
    .expect("Failed to build sync engine")
}

#[tokio::test]
async fn test_second_account_reuses_shared_data() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);

    let first = engine("p0", &store, &client).run(&ids(&["m1"])).await.unwrap();
    assert_eq!(first.new_matches_written, 1);
    assert_eq!(first.api_calls_saved, 0);
    assert_eq!(client.calls(), (1, 1, 1));

    let record = store.match_record(&MatchId::from("m1")).await.unwrap().unwrap();
    assert!(record.completion.is_complete());
    assert_eq!(record.tracked_player_count, 1);
    assert_eq!(record.first_sync_owner, AccountId::from("p0"));
    assert_eq!(store.participants(&MatchId::from("m1")).await.unwrap().len(), 8);

    let second = engine("p3", &store, &client).run(&ids(&["m1"])).await.unwrap();
    assert_eq!(second.known_matches_already_complete, 1);
    assert_eq!(second.api_calls_saved, 1);
    assert!(second.errors.is_empty());
    // only the document is fetched again
    assert_eq!(client.calls(), (2, 1, 1));

    let record = store.match_record(&MatchId::from("m1")).await.unwrap().unwrap();
    assert_eq!(record.tracked_player_count, 2);
    assert_eq!(record.first_sync_owner, AccountId::from("p0"));
}

#[tokio::test]
async fn test_backfills_only_missing_events() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m2")]);
    client.fail_events("m2", FetchError::Transient("503 from stats service".to_string()));

    let first = engine("p0", &store, &client).run(&ids(&["m2"])).await.unwrap();
    assert_eq!(first.new_matches_written, 1);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].stage, FailureStage::Events);
    assert_eq!(first.errors[0].kind, FailureKind::TransientFetch);
    assert_eq!(first.skipped_matches(), 0);

    let record = store.match_record(&MatchId::from("m2")).await.unwrap().unwrap();
    assert!(record.completion.contains(CompletionFlag::Participants));
    assert!(record.completion.contains(CompletionFlag::Medals));
    assert!(!record.completion.contains(CompletionFlag::Events));
    assert!(store.events(&MatchId::from("m2")).await.unwrap().is_empty());

    client.heal();
    let (_, events_before, skill_before) = client.calls();

    let second = engine("p1", &store, &client).run(&ids(&["m2"])).await.unwrap();
    assert_eq!(second.known_matches_backfilled, 1);
    assert_eq!(second.api_calls_saved, 1);
    let (_, events_after, skill_after) = client.calls();
    assert_eq!(events_after, events_before + 1);
    assert_eq!(skill_after, skill_before);

    let record = store.match_record(&MatchId::from("m2")).await.unwrap().unwrap();
    assert!(record.completion.is_complete());
    assert_eq!(store.events(&MatchId::from("m2")).await.unwrap().len(), 7);

    let third = engine("p2", &store, &client).run(&ids(&["m2"])).await.unwrap();
    assert_eq!(third.known_matches_already_complete, 1);
    assert_eq!(third.api_calls_saved, 1);
    let (_, events_final, skill_final) = client.calls();
    assert_eq!((events_final, skill_final), (events_after, skill_after));
}

#[tokio::test]
async fn test_resync_is_idempotent() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);
    let m1 = MatchId::from("m1");

    engine("p0", &store, &client).run(&ids(&["m1"])).await.unwrap();
    let participants = store.participants(&m1).await.unwrap();
    let events = store.events(&m1).await.unwrap();
    let medals = store.medals(&m1).await.unwrap();

    let again = engine("p0", &store, &client).run(&ids(&["m1"])).await.unwrap();
    assert_eq!(again.known_matches_already_complete, 1);
    assert!(again.errors.is_empty());

    assert_eq!(store.participants(&m1).await.unwrap(), participants);
    assert_eq!(store.events(&m1).await.unwrap(), events);
    assert_eq!(store.medals(&m1).await.unwrap(), medals);
    let record = store.match_record(&m1).await.unwrap().unwrap();
    assert_eq!(record.tracked_player_count, 1);
}

#[tokio::test]
async fn test_tracked_count_equals_distinct_accounts_under_concurrency() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1"), document("m2")]);
    let accounts = ["p6", "p1", "p4", "p3"];

    let handles: Vec<_> = accounts
        .iter()
        .map(|account| {
            let engine = engine(account, &store, &client);
            tokio::spawn(async move { engine.run(&ids(&["m1", "m2"])).await })
        })
        .collect();
    for handle in handles {
        let summary = handle.await.unwrap().unwrap();
        assert!(summary.errors.is_empty());
        assert_eq!(summary.matches_written(), 2);
    }

    // a repeat sync by one of them changes nothing
    engine("p4", &store, &client).run(&ids(&["m2", "m1"])).await.unwrap();

    for match_id in ["m1", "m2"] {
        let record = store.match_record(&MatchId::from(match_id)).await.unwrap().unwrap();
        assert_eq!(record.tracked_player_count, 4);
        assert!(record.completion.is_complete());
        assert_eq!(store.participants(&MatchId::from(match_id)).await.unwrap().len(), 8);
    }
    assert!(store.orphans().await.unwrap().is_clean());
}

#[tokio::test]
async fn test_metadata_conflict_rolls_back_only_that_match() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);
    engine("p0", &store, &client).run(&ids(&["m1"])).await.unwrap();

    let mut rewritten = document("m1");
    rewritten.info.map_id = "recharge".to_string();
    client.set_document(rewritten);
    client.set_document(document("m2"));

    let summary = engine("p5", &store, &client)
        .run(&ids(&["m1", "m2"]))
        .await
        .unwrap();
    assert_eq!(summary.new_matches_written, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].match_id, MatchId::from("m1"));
    assert_eq!(summary.errors[0].kind, FailureKind::Conflict);
    assert_eq!(summary.errors[0].stage, FailureStage::Write);

    let record = store.match_record(&MatchId::from("m1")).await.unwrap().unwrap();
    assert_eq!(record.metadata.map_id, "streets");
    assert_eq!(record.tracked_player_count, 1);

    let p5 = EnrichmentStore::for_account(AccountId::from("p5"));
    assert!(p5.load(store.pool(), &MatchId::from("m1")).await.unwrap().is_none());
    assert!(p5.load(store.pool(), &MatchId::from("m2")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_document_failures_skip_match() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1"), document("m2"), document("m3")]);
    client.fail_document("m1", FetchError::Permanent("410 gone".to_string()));
    client.fail_document("m2", FetchError::Transient("429 slow down".to_string()));

    let summary = engine("p0", &store, &client)
        .run(&ids(&["m1", "m2", "m3", "m4"]))
        .await
        .unwrap();
    assert_eq!(summary.new_matches_written, 1);
    assert_eq!(summary.skipped_matches(), 3);

    let kind_of = |id: &str| summary.failures_for(&MatchId::from(id))[0].kind;
    assert_eq!(kind_of("m1"), FailureKind::PermanentFetch);
    assert_eq!(kind_of("m2"), FailureKind::TransientFetch);
    assert_eq!(kind_of("m4"), FailureKind::PermanentFetch);

    // no sub-fetches for matches whose document never arrived
    assert_eq!(client.calls(), (4, 1, 1));
    for id in ["m1", "m2", "m4"] {
        assert!(store.lookup(&MatchId::from(id)).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_account_outside_roster_is_rejected() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);

    let summary = engine("outsider", &store, &client)
        .run(&ids(&["m1"]))
        .await
        .unwrap();
    assert_eq!(summary.matches_written(), 0);
    assert_eq!(summary.errors[0].kind, FailureKind::PermanentFetch);
    assert!(summary.errors[0].message.contains("not in roster"));
    assert!(store.lookup(&MatchId::from("m1")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_skill_failure_leaves_participants_pending() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);
    client.fail_skill("m1", FetchError::Transient("timeout".to_string()));
    let m1 = MatchId::from("m1");

    let first = engine("p0", &store, &client).run(&ids(&["m1"])).await.unwrap();
    assert_eq!(first.new_matches_written, 1);
    assert_eq!(first.errors[0].stage, FailureStage::Skill);

    let state = store.lookup(&m1).await.unwrap().unwrap();
    assert!(!state.flags.contains(CompletionFlag::Participants));
    let roster = store.participants(&m1).await.unwrap();
    assert_eq!(roster.len(), 8);
    assert!(roster.iter().all(|p| p.csr_before.is_none()));

    // the retry fails again: nothing new lands
    let retry = engine("p2", &store, &client).run(&ids(&["m1"])).await.unwrap();
    assert_eq!(retry.known_matches_still_partial, 1);
    assert_eq!(retry.api_calls_saved, 1);

    client.heal();
    let healed = engine("p4", &store, &client).run(&ids(&["m1"])).await.unwrap();
    assert_eq!(healed.known_matches_backfilled, 1);
    assert_eq!(healed.api_calls_saved, 1);

    let state = store.lookup(&m1).await.unwrap().unwrap();
    assert!(state.flags.is_complete());
    assert_eq!(state.tracked_player_count, 3);
    let roster = store.participants(&m1).await.unwrap();
    assert!(roster.iter().all(|p| p.csr_after == Some(1492)));
}

#[tokio::test]
async fn test_cancellation_stops_at_batch_boundary() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1"), document("m2"), document("m3")]);
    let token = CancellationToken::new();
    *client.cancel_on_document.lock().unwrap() = Some(token.clone());

    let config = SyncConfig {
        batch_size: 1,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(
        AccountId::from("p0"),
        store.clone(),
        client.clone(),
        RateLimiter::new(1000.0, 1000.0),
        config,
    )
    .unwrap()
    .with_cancellation(token);

    let summary = engine.run(&ids(&["m1", "m2", "m3"])).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.new_matches_written, 1);
    assert!(store.lookup(&MatchId::from("m1")).await.unwrap().is_some());
    assert!(store.lookup(&MatchId::from("m2")).await.unwrap().is_none());
    assert_eq!(client.calls().0, 1);
}

#[tokio::test]
async fn test_duplicate_ids_are_synced_once() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);

    let summary = engine("p0", &store, &client)
        .run(&ids(&["m1", "m1", "m1"]))
        .await
        .unwrap();
    assert_eq!(summary.new_matches_written, 1);
    assert_eq!(summary.matches_written(), 1);
    assert_eq!(client.calls(), (1, 1, 1));
}

#[tokio::test]
async fn test_integrity_violation_halts_run() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("good"), document("broken")]);

    // completion bit set with no roster behind it
    let mut tx = store.begin_write().await.unwrap();
    MatchRegistry::create_if_absent(
        tx.conn(),
        &MatchMetadata::from_document(&document("broken")),
        &AccountId::from("p7"),
        Utc::now(),
    )
    .await
    .unwrap();
    MatchRegistry::set_flag(
        tx.conn(),
        &MatchId::from("broken"),
        CompletionFlag::Participants,
        Utc::now(),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let result = engine("p0", &store, &client)
        .run(&ids(&["good", "broken"]))
        .await;
    match result {
        Err(SyncError::Integrity { match_id, .. }) => assert_eq!(match_id, MatchId::from("broken")),
        other => panic!("expected integrity error, got {other:?}"),
    }

    // the batch was rolled back as a whole
    assert!(store.lookup(&MatchId::from("good")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_enrichment_stub_only_for_requesting_account() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);
    engine("p0", &store, &client).run(&ids(&["m1"])).await.unwrap();

    let p0 = EnrichmentStore::for_account(AccountId::from("p0"));
    let pending = p0.pending(store.pool(), 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].match_id, MatchId::from("m1"));
    assert!(pending[0].performance_score.is_none());

    let p1 = EnrichmentStore::for_account(AccountId::from("p1"));
    assert_eq!(p1.count(store.pool()).await.unwrap(), 0);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.enrichment, 1);
    assert_eq!(stats.aliases, 8);
}

#[tokio::test]
async fn test_engine_rejects_unusable_config() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1")]);

    let zero_batch = SyncConfig {
        batch_size: 0,
        ..SyncConfig::default()
    };
    let no_workers = SyncConfig {
        max_concurrent_matches: 0,
        ..SyncConfig::default()
    };
    for config in [zero_batch, no_workers] {
        let result = SyncEngine::new(
            AccountId::from("p0"),
            store.clone(),
            client.clone(),
            RateLimiter::new(1000.0, 1000.0),
            config,
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
    assert_eq!(client.calls(), (0, 0, 0));
}

#[tokio::test]
async fn test_calls_saved_counts_each_known_match_once() {
    let (_dir, store) = setup_test_store().await;
    let client = FakeClient::with_documents([document("m1"), document("m2"), document("m3")]);
    let all = ids(&["m1", "m2", "m3"]);

    let first = engine("p0", &store, &client).run(&all).await.unwrap();
    assert_eq!(first.new_matches_written, 3);
    assert_eq!(first.api_calls_saved, 0);

    let second = engine("p1", &store, &client).run(&all).await.unwrap();
    assert_eq!(second.known_matches_already_complete, 3);
    assert_eq!(second.api_calls_saved, 3);
}

/// A legacy store whose rosters were saved before skill data was collected.
struct SkillLessLegacy {
    account: AccountId,
    documents: Vec<MatchDocument>,
}

#[async_trait::async_trait]
impl LegacySource for SkillLessLegacy {
    fn account(&self) -> &AccountId {
        &self.account
    }

    async fn list_matches(&self) -> Result<Vec<MatchId>, DatabaseError> {
        Ok(self.documents.iter().map(|d| d.match_id.clone()).collect())
    }

    async fn read_full_match(&self, match_id: &MatchId) -> Result<LegacyMatch, DatabaseError> {
        let doc = self
            .documents
            .iter()
            .find(|d| &d.match_id == match_id)
            .ok_or_else(|| DatabaseError::MatchNotFound(match_id.to_string()))?;
        Ok(LegacyMatch {
            metadata: MatchMetadata::from_document(doc),
            participants: ParticipantRecord::roster_from_document(doc),
            events: Vec::new(),
            medals: MedalRecord::from_document(doc),
            aliases: Vec::new(),
            enrichment: EnrichmentValues::default(),
        })
    }

    async fn read_enrichment(&self, _match_id: &MatchId) -> Result<EnrichmentValues, DatabaseError> {
        Ok(EnrichmentValues::default())
    }
}

#[tokio::test]
async fn test_sync_backfills_skill_for_migrated_roster() {
    let (_dir, store) = setup_test_store().await;
    let legacy: Vec<Box<dyn LegacySource>> = vec![Box::new(SkillLessLegacy {
        account: AccountId::from("p0"),
        documents: vec![document("m1")],
    })];
    LegacyMigrator::new(store.clone())
        .migrate(&legacy)
        .await
        .unwrap();

    let m1 = MatchId::from("m1");
    let state = store.lookup(&m1).await.unwrap().unwrap();
    assert!(!state.flags.contains(CompletionFlag::Participants));
    assert!(state.flags.contains(CompletionFlag::Medals));

    let client = FakeClient::with_documents([document("m1")]);
    let summary = engine("p2", &store, &client).run(&ids(&["m1"])).await.unwrap();
    assert_eq!(summary.known_matches_backfilled, 1);
    assert!(summary.errors.is_empty());
    assert_eq!(client.calls(), (1, 1, 1));

    let state = store.lookup(&m1).await.unwrap().unwrap();
    assert!(state.flags.is_complete());
    assert_eq!(state.tracked_player_count, 2);
    let roster = store.participants(&m1).await.unwrap();
    assert_eq!(roster.len(), 8);
    assert!(roster.iter().all(|p| p.csr_before == Some(1480)));
}
