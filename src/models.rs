use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MONTHS_PER_YEAR: usize = 12;
pub const QUARTERS_PER_YEAR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    #[default]
    GreaterIsBetter,
    LessIsBetter,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GreaterIsBetter => "greater-is-better",
            Self::LessIsBetter => "less-is-better",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationMethod {
    #[default]
    Average,
    Sum,
}

impl AggregationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Sum => "sum",
        }
    }
}

/// Which half of a result/target pair a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Result,
    Target,
}

impl ValueKind {
    pub const ALL: [ValueKind; 2] = [ValueKind::Result, ValueKind::Target];
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyValues {
    #[serde(default)]
    pub result: [Option<f64>; MONTHS_PER_YEAR],
    #[serde(default)]
    pub target: [Option<f64>; MONTHS_PER_YEAR],
}

impl MonthlyValues {
    pub fn series(&self, kind: ValueKind) -> &[Option<f64>; MONTHS_PER_YEAR] {
        match kind {
            ValueKind::Result => &self.result,
            ValueKind::Target => &self.target,
        }
    }

    pub fn series_mut(&mut self, kind: ValueKind) -> &mut [Option<f64>; MONTHS_PER_YEAR] {
        match kind {
            ValueKind::Result => &mut self.result,
            ValueKind::Target => &mut self.target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterlyValues {
    #[serde(default)]
    pub result: [Option<f64>; QUARTERS_PER_YEAR],
    #[serde(default)]
    pub target: [Option<f64>; QUARTERS_PER_YEAR],
}

impl QuarterlyValues {
    pub fn series(&self, kind: ValueKind) -> &[Option<f64>; QUARTERS_PER_YEAR] {
        match kind {
            ValueKind::Result => &self.result,
            ValueKind::Target => &self.target,
        }
    }

    pub fn series_mut(&mut self, kind: ValueKind) -> &mut [Option<f64>; QUARTERS_PER_YEAR] {
        match kind {
            ValueKind::Result => &mut self.result,
            ValueKind::Target => &mut self.target,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelationSummary {
    pub relation_id: i64,
    pub indicator_id: i64,
    pub code: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    pub id: i64,
    pub code: String,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub unit: Option<String>,
    pub indicator_type: Option<String>,
    pub condition: Condition,
    pub method: AggregationMethod,
    pub monthly: MonthlyValues,
    pub quarterly: QuarterlyValues,
    pub year_to_date: Option<f64>,
    pub category_ids: Vec<i64>,
    pub children: Vec<RelationSummary>,
    pub parents: Vec<RelationSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create (no `id`) or update (with `id`). On update every omitted field
/// keeps its stored value; an empty string clears a text field and
/// `monthly`, when present, replaces all 24 months.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SaveIndicatorPayload {
    pub id: Option<i64>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub unit: Option<String>,
    pub indicator_type: Option<String>,
    pub condition: Option<Condition>,
    pub method: Option<AggregationMethod>,
    #[serde(default)]
    pub monthly: Option<MonthlyValues>,
    pub category_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListIndicatorsFilters {
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorRelation {
    pub id: i64,
    pub parent_id: i64,
    pub child_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationPayload {
    pub parent_id: i64,
    pub child_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub bsc_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SaveCategoryPayload {
    pub id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bsc {
    pub id: i64,
    pub name: String,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SaveBscPayload {
    pub id: Option<i64>,
    pub name: String,
    pub category_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InviteCode {
    pub id: i64,
    pub code: String,
    pub person_id: i64,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl InviteCode {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: i64,
    pub first_names: String,
    pub last_names: String,
    pub email: String,
    pub account_id: Option<i64>,
    pub has_account: bool,
    pub invite_code: Option<InviteCode>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SavePersonPayload {
    pub id: Option<i64>,
    pub first_names: String,
    pub last_names: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub profile_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemInvitePayload {
    pub code: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub invite_code_ttl_hours: u32,
    pub code_assignment_retries: u32,
    pub password_hash_rounds: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            invite_code_ttl_hours: 72,
            code_assignment_retries: 3,
            password_hash_rounds: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}
