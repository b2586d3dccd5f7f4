use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{AccountId, MatchId};

/// The full match document returned by the match-stats endpoint.
///
/// This is the only source of per-player fields, which is why the sync engine
/// fetches it for every (match, account) pair even when the match is already
/// stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchDocument {
    pub match_id: MatchId,
    pub info: MatchInfo,
    #[serde(default)]
    pub teams: Vec<TeamScore>,
    pub players: Vec<PlayerStats>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub map_id: String,
    pub mode_id: String,
    pub playlist_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamScore {
    pub team_id: i64,
    pub score: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub account_id: AccountId,
    pub gamertag: Option<String>,
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
    #[serde(default)]
    pub medals: Vec<MedalCount>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedalCount {
    pub medal_id: i64,
    pub count: i64,
}

impl MatchDocument {
    pub fn player(&self, account_id: &AccountId) -> Option<&PlayerStats> {
        self.players.iter().find(|p| &p.account_id == account_id)
    }

    pub fn includes(&self, account_id: &AccountId) -> bool {
        self.player(account_id).is_some()
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.players
            .iter()
            .map(|p| p.account_id.clone())
            .unique()
            .collect()
    }

    /// Team scores ordered by team id.
    pub fn sorted_teams(&self) -> Vec<TeamScore> {
        self.teams
            .iter()
            .cloned()
            .sorted_by_key(|t| t.team_id)
            .collect()
    }
}
