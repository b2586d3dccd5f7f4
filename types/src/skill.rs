use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Per-player rank data for one match, as returned by the skill endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillData {
    pub entries: Vec<SkillEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkillEntry {
    pub account_id: AccountId,
    pub csr_before: Option<i64>,
    pub csr_after: Option<i64>,
    pub expected_kills: Option<f64>,
    pub expected_deaths: Option<f64>,
}
