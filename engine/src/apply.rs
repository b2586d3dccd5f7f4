use chrono::{DateTime, Utc};
use database::{
    AliasDirectory, AliasRecord, CompletionFlag, CompletionFlags, Creation, DatabaseError,
    EnrichmentStore, EventLog, EventRecord, IntegrityChecker, MatchMetadata, MatchRegistry,
    MedalLedger, MedalRecord, ParticipantRecord, ParticipantStore,
};
use sqlx::SqliteConnection;
use types::AccountId;

use crate::fetch::FetchedMatch;
use crate::summary::MatchOutcome;

/// Writes one fetched match. The caller owns the surrounding savepoint.
///
/// Existence and completion are read again here rather than trusted from the
/// fetch phase, since another engine may have written the match in between.
pub(crate) async fn apply_match(
    conn: &mut SqliteConnection,
    account: &AccountId,
    fetched: &FetchedMatch,
    now: DateTime<Utc>,
) -> Result<MatchOutcome, DatabaseError> {
    let match_id = &fetched.match_id;
    let document = &fetched.document;
    let metadata = MatchMetadata::from_document(document);

    let creation = MatchRegistry::create_if_absent(&mut *conn, &metadata, account, now).await?;
    let stored = match creation {
        Creation::Created => CompletionFlags::empty(),
        Creation::AlreadyExisted(state) => {
            IntegrityChecker::verify_completion(&mut *conn, match_id, &state).await?;
            MatchRegistry::ensure_metadata_matches(&mut *conn, &metadata).await?;
            state.flags
        }
    };

    let mut loaded = Vec::new();

    if !stored.contains(CompletionFlag::Participants) {
        let roster = ParticipantRecord::roster_from_document(document);
        ParticipantStore::bulk_insert(&mut *conn, match_id, &roster).await?;
        if let Some(skill) = fetched.skill.fetched() {
            ParticipantStore::apply_skill(&mut *conn, match_id, skill).await?;
            loaded.push(CompletionFlag::Participants);
        }
    }

    if !stored.contains(CompletionFlag::Events) {
        if let Some(timeline) = fetched.events.fetched() {
            let rows = EventRecord::from_timeline(match_id, timeline);
            EventLog::bulk_insert(&mut *conn, match_id, &rows).await?;
            loaded.push(CompletionFlag::Events);
        }
    }

    if !stored.contains(CompletionFlag::Medals) {
        MedalLedger::bulk_insert(&mut *conn, match_id, &MedalRecord::from_document(document))
            .await?;
        loaded.push(CompletionFlag::Medals);
    }

    for flag in &loaded {
        MatchRegistry::set_flag(&mut *conn, match_id, *flag, now).await?;
    }

    AliasDirectory::observe_all(&mut *conn, &AliasRecord::from_document(document)).await?;

    let first_observation = EnrichmentStore::for_account(account.clone())
        .create_stub(&mut *conn, match_id, now)
        .await?;
    if first_observation {
        MatchRegistry::increment_tracked_count(&mut *conn, match_id, now).await?;
    }

    let now_complete = loaded
        .iter()
        .fold(stored, |flags, flag| flags.with(*flag))
        .is_complete();

    Ok(match creation {
        Creation::Created => MatchOutcome::New,
        Creation::AlreadyExisted(_) if !loaded.is_empty() => MatchOutcome::Backfilled,
        Creation::AlreadyExisted(_) if now_complete => MatchOutcome::AlreadyComplete,
        Creation::AlreadyExisted(_) => MatchOutcome::StillPartial,
    })
}
