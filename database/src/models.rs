use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::{AccountId, EventTimeline, MatchDocument, MatchId, PlayerStats, TeamScore};

/// One category of match data whose completeness is tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionFlag {
    Participants,
    Events,
    Medals,
}

impl CompletionFlag {
    pub const ALL: [CompletionFlag; 3] = [
        CompletionFlag::Participants,
        CompletionFlag::Events,
        CompletionFlag::Medals,
    ];

    pub fn bit(self) -> i64 {
        match self {
            CompletionFlag::Participants => 1,
            CompletionFlag::Events => 1 << 1,
            CompletionFlag::Medals => 1 << 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompletionFlag::Participants => "participants_loaded",
            CompletionFlag::Events => "events_loaded",
            CompletionFlag::Medals => "medals_loaded",
        }
    }
}

/// Completion bitmask stored on every match. Bits only ever go from unset to set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionFlags(i64);

impl CompletionFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        CompletionFlag::ALL
            .iter()
            .fold(Self::empty(), |flags, flag| flags.with(*flag))
    }

    pub fn from_bits(bits: i64) -> Self {
        Self(bits & Self::all_bits())
    }

    fn all_bits() -> i64 {
        CompletionFlag::ALL.iter().map(|f| f.bit()).sum()
    }

    pub fn bits(self) -> i64 {
        self.0
    }

    pub fn contains(self, flag: CompletionFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    #[must_use]
    pub fn with(self, flag: CompletionFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    pub fn is_complete(self) -> bool {
        self == Self::all()
    }

    pub fn present(self) -> Vec<CompletionFlag> {
        CompletionFlag::ALL
            .into_iter()
            .filter(|flag| self.contains(*flag))
            .collect()
    }

    pub fn missing(self) -> Vec<CompletionFlag> {
        CompletionFlag::ALL
            .into_iter()
            .filter(|flag| !self.contains(*flag))
            .collect()
    }
}

/// Descriptive match metadata. Immutable once the match record exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchMetadata {
    pub match_id: MatchId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub map_id: String,
    pub mode_id: String,
    pub playlist_id: Option<String>,
    pub team_scores: Vec<TeamScore>,
}

impl MatchMetadata {
    pub fn from_document(doc: &MatchDocument) -> Self {
        Self {
            match_id: doc.match_id.clone(),
            start_time: doc.info.start_time,
            end_time: doc.info.end_time,
            map_id: doc.info.map_id.clone(),
            mode_id: doc.info.mode_id.clone(),
            playlist_id: doc.info.playlist_id.clone(),
            team_scores: doc.sorted_teams(),
        }
    }

    /// Names of the fields on which `other` disagrees with `self`.
    pub fn differences(&self, other: &MatchMetadata) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.start_time != other.start_time {
            fields.push("start_time");
        }
        if self.end_time != other.end_time {
            fields.push("end_time");
        }
        if self.map_id != other.map_id {
            fields.push("map_id");
        }
        if self.mode_id != other.mode_id {
            fields.push("mode_id");
        }
        if self.playlist_id != other.playlist_id {
            fields.push("playlist_id");
        }
        if self.team_scores != other.team_scores {
            fields.push("team_scores");
        }
        fields
    }
}

/// Result of a registry lookup for a match that exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchState {
    pub flags: CompletionFlags,
    pub tracked_player_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub metadata: MatchMetadata,
    pub completion: CompletionFlags,
    pub first_sync_owner: AccountId,
    pub first_sync_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub tracked_player_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub match_id: MatchId,
    pub account_id: AccountId,
    pub team_id: Option<i64>,
    pub outcome: String,
    pub rank: i64,
    pub score: i64,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub shots_fired: i64,
    pub shots_hit: i64,
    pub damage_dealt: i64,
    pub damage_taken: i64,
    pub csr_before: Option<i64>,
    pub csr_after: Option<i64>,
    pub expected_kills: Option<f64>,
    pub expected_deaths: Option<f64>,
}

impl ParticipantRecord {
    pub fn from_player(match_id: &MatchId, player: &PlayerStats) -> Self {
        Self {
            match_id: match_id.clone(),
            account_id: player.account_id.clone(),
            team_id: player.team_id,
            outcome: player.outcome.clone(),
            rank: player.rank,
            score: player.score,
            kills: player.kills,
            deaths: player.deaths,
            assists: player.assists,
            shots_fired: player.shots_fired,
            shots_hit: player.shots_hit,
            damage_dealt: player.damage_dealt,
            damage_taken: player.damage_taken,
            csr_before: None,
            csr_after: None,
            expected_kills: None,
            expected_deaths: None,
        }
    }

    pub fn roster_from_document(doc: &MatchDocument) -> Vec<Self> {
        doc.players
            .iter()
            .map(|player| Self::from_player(&doc.match_id, player))
            .collect()
    }

    pub fn has_skill(&self) -> bool {
        self.csr_before.is_some()
            || self.csr_after.is_some()
            || self.expected_kills.is_some()
            || self.expected_deaths.is_some()
    }

    /// Compares the document-derived columns. Skill columns are filled in
    /// separately and are not part of the row's identity.
    pub fn same_stats(&self, other: &ParticipantRecord) -> bool {
        self.team_id == other.team_id
            && self.outcome == other.outcome
            && self.rank == other.rank
            && self.score == other.score
            && self.kills == other.kills
            && self.deaths == other.deaths
            && self.assists == other.assists
            && self.shots_fired == other.shots_fired
            && self.shots_hit == other.shots_hit
            && self.damage_dealt == other.damage_dealt
            && self.damage_taken == other.damage_taken
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub match_id: MatchId,
    pub seq: i64,
    pub event_type: String,
    pub time_offset_ms: i64,
    pub actor_id: Option<AccountId>,
    pub target_id: Option<AccountId>,
}

impl EventRecord {
    pub fn from_timeline(match_id: &MatchId, timeline: &EventTimeline) -> Vec<Self> {
        timeline
            .ordered()
            .into_iter()
            .enumerate()
            .map(|(seq, event)| Self {
                match_id: match_id.clone(),
                seq: seq as i64,
                event_type: event.event_type,
                time_offset_ms: event.time_offset_ms,
                actor_id: event.actor,
                target_id: event.target,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedalRecord {
    pub match_id: MatchId,
    pub account_id: AccountId,
    pub medal_id: i64,
    pub count: i64,
}

impl MedalRecord {
    /// Medal rows for every player in the document, tracked or not.
    /// Repeated entries for the same medal are summed and zero counts dropped.
    pub fn from_document(doc: &MatchDocument) -> Vec<Self> {
        let mut totals: BTreeMap<(AccountId, i64), i64> = BTreeMap::new();
        for player in &doc.players {
            for medal in &player.medals {
                *totals
                    .entry((player.account_id.clone(), medal.medal_id))
                    .or_default() += medal.count;
            }
        }

        totals
            .into_iter()
            .filter(|(_, count)| *count >= 1)
            .map(|((account_id, medal_id), count)| Self {
                match_id: doc.match_id.clone(),
                account_id,
                medal_id,
                count,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub account_id: AccountId,
    pub display_name: String,
    pub last_seen_at: DateTime<Utc>,
    pub provenance: String,
}

impl AliasRecord {
    pub const FROM_DOCUMENT: &'static str = "match_document";

    pub fn from_document(doc: &MatchDocument) -> Vec<Self> {
        doc.players
            .iter()
            .filter_map(|player| {
                let name = player.gamertag.as_ref()?;
                Some(Self {
                    account_id: player.account_id.clone(),
                    display_name: name.clone(),
                    last_seen_at: doc.info.start_time,
                    provenance: Self::FROM_DOCUMENT.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub match_id: MatchId,
    pub account_id: AccountId,
    pub performance_score: Option<f64>,
    pub session_id: Option<String>,
    pub with_associates: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Computed per-account fields produced by the downstream enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentValues {
    pub performance_score: Option<f64>,
    pub session_id: Option<String>,
    pub with_associates: Option<bool>,
}

impl EnrichmentValues {
    pub fn is_empty(&self) -> bool {
        self.performance_score.is_none()
            && self.session_id.is_none()
            && self.with_associates.is_none()
    }
}

/// Row counts from a bulk insert: fresh rows, and rows that were already
/// present with identical content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub unchanged: u64,
}
