use crate::config::ServiceConfig;
use crate::credentials::{hash_password, verify_password};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    Account, AppSettings, BooleanResponse, Bsc, Category, CreateRelationPayload, Indicator, IndicatorRelation,
    InviteCode, ListIndicatorsFilters, Person, RedeemInvitePayload, SaveBscPayload, SaveCategoryPayload,
    SaveIndicatorPayload, SavePersonPayload,
};
use crate::policy::PolicyEngine;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Operation facade: validates input, delegates to the store and logs every
/// mutation.
#[derive(Clone)]
pub struct ScorecardService {
    db: Arc<Database>,
    policy: PolicyEngine,
}

impl ScorecardService {
    pub fn open(config: &ServiceConfig) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&config.database_path())?);
        tracing::info!(path = %db.path().display(), "opened scorecard database");
        Ok(Self::with_database(db))
    }

    pub fn with_database(db: Arc<Database>) -> Arc<Self> {
        Arc::new(Self {
            db,
            policy: PolicyEngine::new(),
        })
    }

    pub fn create_or_update_indicator(&self, payload: SaveIndicatorPayload) -> AppResult<Indicator> {
        self.policy.validate_indicator(&payload)?;
        let indicator = self.db.save_indicator(&payload)?;
        tracing::info!(
            indicator_id = indicator.id,
            code = %indicator.code,
            parents = indicator.parents.len(),
            "indicator saved"
        );
        Ok(indicator)
    }

    pub fn get_indicator(&self, id: i64) -> AppResult<Indicator> {
        self.db
            .get_indicator(id)?
            .ok_or_else(|| AppError::NotFound(format!("indicator {id} not found")))
    }

    pub fn list_indicators(&self, filters: ListIndicatorsFilters) -> AppResult<Vec<Indicator>> {
        self.db.list_indicators(&filters)
    }

    pub fn delete_indicator(&self, id: i64) -> AppResult<BooleanResponse> {
        let success = self.db.delete_indicator(id)?;
        tracing::info!(indicator_id = id, success, "indicator deleted");
        Ok(BooleanResponse { success })
    }

    pub fn create_relation(&self, payload: CreateRelationPayload) -> AppResult<IndicatorRelation> {
        let relation = self.db.create_relation(payload.parent_id, payload.child_id)?;
        tracing::info!(
            relation_id = relation.id,
            parent_id = relation.parent_id,
            child_id = relation.child_id,
            "relation created"
        );
        Ok(relation)
    }

    pub fn list_relations(&self) -> AppResult<Vec<IndicatorRelation>> {
        self.db.list_relations()
    }

    pub fn delete_relation(&self, id: i64) -> AppResult<BooleanResponse> {
        let success = self.db.delete_relation(id)?;
        tracing::info!(relation_id = id, success, "relation deleted");
        Ok(BooleanResponse { success })
    }

    pub fn save_category(&self, payload: SaveCategoryPayload) -> AppResult<Category> {
        self.policy.validate_category(&payload)?;
        let category = self.db.save_category(&payload)?;
        tracing::info!(category_id = category.id, "category saved");
        Ok(category)
    }

    pub fn get_category(&self, id: i64) -> AppResult<Category> {
        self.db
            .get_category(id)?
            .ok_or_else(|| AppError::NotFound(format!("category {id} not found")))
    }

    pub fn list_categories(&self) -> AppResult<Vec<Category>> {
        self.db.list_categories()
    }

    pub fn delete_category(&self, id: i64) -> AppResult<BooleanResponse> {
        let success = self.db.delete_category(id)?;
        tracing::info!(category_id = id, success, "category deleted");
        Ok(BooleanResponse { success })
    }

    pub fn save_bsc(&self, payload: SaveBscPayload) -> AppResult<Bsc> {
        self.policy.validate_bsc(&payload)?;
        let bsc = self.db.save_bsc(&payload)?;
        tracing::info!(bsc_id = bsc.id, categories = bsc.categories.len(), "scorecard saved");
        Ok(bsc)
    }

    pub fn get_bsc(&self, id: i64) -> AppResult<Bsc> {
        self.db
            .get_bsc(id)?
            .ok_or_else(|| AppError::NotFound(format!("scorecard {id} not found")))
    }

    pub fn list_bscs(&self) -> AppResult<Vec<Bsc>> {
        self.db.list_bscs()
    }

    pub fn delete_bsc(&self, id: i64) -> AppResult<BooleanResponse> {
        let success = self.db.delete_bsc(id)?;
        tracing::info!(bsc_id = id, success, "scorecard deleted");
        Ok(BooleanResponse { success })
    }

    pub fn save_person(&self, payload: SavePersonPayload) -> AppResult<Person> {
        self.policy.validate_person(&payload)?;
        let person = self.db.save_person(&payload)?;
        tracing::info!(person_id = person.id, "person saved");
        Ok(person)
    }

    pub fn get_person(&self, id: i64) -> AppResult<Person> {
        self.db
            .get_person(id)?
            .ok_or_else(|| AppError::NotFound(format!("person {id} not found")))
    }

    pub fn list_persons(&self) -> AppResult<Vec<Person>> {
        self.db.list_persons()
    }

    pub fn delete_person(&self, id: i64) -> AppResult<BooleanResponse> {
        let success = self.db.delete_person(id)?;
        tracing::info!(person_id = id, success, "person deleted");
        Ok(BooleanResponse { success })
    }

    pub fn issue_invite_code(&self, person_id: i64) -> AppResult<InviteCode> {
        let ttl_hours = self.db.get_settings()?.invite_code_ttl_hours;
        let invite = self
            .db
            .issue_invite_code(person_id, Duration::hours(i64::from(ttl_hours)))?;
        tracing::info!(person_id, expires_at = %invite.expires_at, "invite code issued");
        Ok(invite)
    }

    pub fn get_invite_code(&self, person_id: i64) -> AppResult<Option<InviteCode>> {
        self.db.get_invite_code(person_id)
    }

    pub fn redeem_invite_code(&self, payload: RedeemInvitePayload) -> AppResult<Account> {
        self.policy.validate_redeem(&payload)?;
        let rounds = self.db.get_settings()?.password_hash_rounds;
        let password_hash = hash_password(&payload.password, rounds);
        let username = payload.username.trim();

        match self
            .db
            .redeem_invite_code(payload.code.trim(), username, &password_hash, Utc::now())
        {
            Ok(account) => {
                tracing::info!(account_id = account.id, username = %account.username, "invite code redeemed");
                Ok(account)
            }
            Err(error) => {
                tracing::warn!(username = %username, error = %error, "invite code redemption rejected");
                Err(error)
            }
        }
    }

    pub fn list_accounts(&self) -> AppResult<Vec<Account>> {
        self.db.list_accounts()
    }

    /// False for unknown or inactive usernames as well as wrong passwords.
    pub fn verify_account_password(&self, username: &str, password: &str) -> AppResult<bool> {
        match self.db.account_password_hash(username.trim())? {
            Some(encoded) => verify_password(password, &encoded),
            None => Ok(false),
        }
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let settings = self.db.update_settings(update)?;
        tracing::info!(
            invite_code_ttl_hours = settings.invite_code_ttl_hours,
            code_assignment_retries = settings.code_assignment_retries,
            "settings updated"
        );
        Ok(settings)
    }
}
