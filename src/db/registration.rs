use super::{parse_time, row_exists, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Account, InviteCode, Person, SavePersonPayload};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

const PERSON_COLUMNS: &str = "id, first_names, last_names, email, account_id, created_at";
const INVITE_COLUMNS: &str = "id, code, person_id, used, expires_at, created_at";

impl Database {
    pub fn save_person(&self, payload: &SavePersonPayload) -> AppResult<Person> {
        let first_names = payload.first_names.trim();
        let last_names = payload.last_names.trim();
        let email = payload.email.trim();

        let conn = self.lock()?;
        let id = match payload.id {
            Some(id) => {
                let updated = conn.execute(
                    "UPDATE persons SET first_names = ?1, last_names = ?2, email = ?3 WHERE id = ?4",
                    params![first_names, last_names, email, id],
                )?;
                if updated == 0 {
                    return Err(AppError::NotFound(format!("person {id} not found")));
                }
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO persons (first_names, last_names, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![first_names, last_names, email, Utc::now().to_rfc3339()],
                )?;
                conn.last_insert_rowid()
            }
        };

        load_person(&conn, id)?.ok_or_else(|| AppError::Internal(format!("person {id} vanished after save")))
    }

    pub fn get_person(&self, id: i64) -> AppResult<Option<Person>> {
        let conn = self.lock()?;
        load_person(&conn, id)
    }

    /// Newest first.
    pub fn list_persons(&self) -> AppResult<Vec<Person>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {PERSON_COLUMNS} FROM persons ORDER BY id DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], parse_person_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = Vec::with_capacity(rows.len());
        for mut person in rows {
            person.invite_code = load_invite_for_person(&conn, person.id)?;
            result.push(person);
        }
        Ok(result)
    }

    /// Removes the person, their invite code, and the account and profile
    /// created from it.
    pub fn delete_person(&self, id: i64) -> AppResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let account_id: Option<Option<i64>> = tx
            .query_row("SELECT account_id FROM persons WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        let Some(account_id) = account_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM persons WHERE id = ?1", params![id])?;
        if let Some(account_id) = account_id {
            tx.execute("DELETE FROM accounts WHERE id = ?1", params![account_id])?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Replaces any existing code for the person with a fresh one.
    pub fn issue_invite_code(&self, person_id: i64, ttl: Duration) -> AppResult<InviteCode> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let account_id: Option<Option<i64>> = tx
            .query_row(
                "SELECT account_id FROM persons WHERE id = ?1",
                params![person_id],
                |row| row.get(0),
            )
            .optional()?;
        match account_id {
            None => return Err(AppError::NotFound(format!("person {person_id} not found"))),
            Some(Some(_)) => {
                return Err(AppError::Validation(format!(
                    "person {person_id} already has an account"
                )))
            }
            Some(None) => {}
        }

        let now = Utc::now();
        let code = Uuid::new_v4().to_string();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AppError::Validation(format!("invite code lifetime of {ttl} is out of range")))?;
        tx.execute("DELETE FROM invite_codes WHERE person_id = ?1", params![person_id])?;
        tx.execute(
            "INSERT INTO invite_codes (code, person_id, used, expires_at, created_at) VALUES (?1, ?2, 0, ?3, ?4)",
            params![code, person_id, expires_at.to_rfc3339(), now.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(InviteCode {
            id,
            code,
            person_id,
            used: false,
            expires_at,
            created_at: now,
        })
    }

    pub fn get_invite_code(&self, person_id: i64) -> AppResult<Option<InviteCode>> {
        let conn = self.lock()?;
        if !row_exists(&conn, "persons", person_id)? {
            return Err(AppError::NotFound(format!("person {person_id} not found")));
        }
        load_invite_for_person(&conn, person_id)
    }

    /// Turns a valid invite code into an account in one transaction. The
    /// code is looked up, checked against `now`, the person and username
    /// are checked, then the account, its profile, the person link and the
    /// `used` flag are written together.
    pub fn redeem_invite_code(
        &self,
        code: &str,
        username: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Account> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!("SELECT {INVITE_COLUMNS} FROM invite_codes WHERE code = ?1");
        let invite = tx
            .query_row(&sql, params![code], parse_invite_row)
            .optional()?
            .ok_or_else(|| AppError::Validation("invalid invite code".to_string()))?;
        if !invite.is_valid_at(now) {
            return Err(AppError::Validation(
                "invite code has expired or was already used".to_string(),
            ));
        }

        let (email, existing_account): (String, Option<i64>) = tx.query_row(
            "SELECT email, account_id FROM persons WHERE id = ?1",
            params![invite.person_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if existing_account.is_some() {
            return Err(AppError::Validation("person already has an account".to_string()));
        }

        let taken: i64 = tx.query_row(
            "SELECT COUNT(1) FROM accounts WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(AppError::Validation(format!("username '{username}' is already taken")));
        }

        tx.execute(
            "INSERT INTO accounts (username, email, password_hash, is_active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
            params![username, email, password_hash, now.to_rfc3339()],
        )?;
        let account_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO user_profiles (account_id, created_at) VALUES (?1, ?2)",
            params![account_id, now.to_rfc3339()],
        )?;
        let profile_id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE persons SET account_id = ?1 WHERE id = ?2",
            params![account_id, invite.person_id],
        )?;
        tx.execute("UPDATE invite_codes SET used = 1 WHERE id = ?1", params![invite.id])?;
        tx.commit()?;

        Ok(Account {
            id: account_id,
            username: username.to_string(),
            email,
            is_active: true,
            profile_id: Some(profile_id),
            created_at: now,
        })
    }

    pub fn list_accounts(&self) -> AppResult<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.username, a.email, a.is_active, p.id, a.created_at
             FROM accounts a LEFT JOIN user_profiles p ON p.account_id = a.id
             ORDER BY a.id",
        )?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(5)?;
            Ok(Account {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                is_active: row.get::<_, i64>(3)? != 0,
                profile_id: row.get(4)?,
                created_at: parse_time(&created_at)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Stored hash for an active account.
    pub fn account_password_hash(&self, username: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT password_hash FROM accounts WHERE username = ?1 AND is_active = 1",
                params![username],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn load_person(conn: &Connection, id: i64) -> AppResult<Option<Person>> {
    let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1");
    let person = conn.query_row(&sql, params![id], parse_person_row).optional()?;
    match person {
        Some(mut person) => {
            person.invite_code = load_invite_for_person(conn, id)?;
            Ok(Some(person))
        }
        None => Ok(None),
    }
}

fn load_invite_for_person(conn: &Connection, person_id: i64) -> AppResult<Option<InviteCode>> {
    let sql = format!("SELECT {INVITE_COLUMNS} FROM invite_codes WHERE person_id = ?1");
    Ok(conn.query_row(&sql, params![person_id], parse_invite_row).optional()?)
}

fn parse_person_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let account_id: Option<i64> = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(Person {
        id: row.get(0)?,
        first_names: row.get(1)?,
        last_names: row.get(2)?,
        email: row.get(3)?,
        account_id,
        has_account: account_id.is_some(),
        invite_code: None,
        created_at: parse_time(&created_at)?,
    })
}

fn parse_invite_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InviteCode> {
    let expires_at: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(InviteCode {
        id: row.get(0)?,
        code: row.get(1)?,
        person_id: row.get(2)?,
        used: row.get::<_, i64>(3)? != 0,
        expires_at: parse_time(&expires_at)?,
        created_at: parse_time(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::SavePersonPayload;
    use chrono::{Duration, Utc};

    fn person(db: &Database, email: &str) -> i64 {
        db.save_person(&SavePersonPayload {
            id: None,
            first_names: "Ana".to_string(),
            last_names: "Pérez".to_string(),
            email: email.to_string(),
        })
        .expect("person")
        .id
    }

    fn account_count(db: &Database) -> usize {
        db.list_accounts().expect("accounts").len()
    }

    #[test]
    fn reissuing_replaces_the_previous_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let id = person(&db, "ana@example.com");

        let first = db.issue_invite_code(id, Duration::hours(72)).expect("first");
        let second = db.issue_invite_code(id, Duration::hours(72)).expect("second");
        assert_ne!(first.code, second.code);
        assert_eq!(second.expires_at - second.created_at, Duration::hours(72));

        let current = db.get_invite_code(id).expect("get").expect("code");
        assert_eq!(current.code, second.code);
        let err = db
            .redeem_invite_code(&first.code, "ana", "hash", Utc::now())
            .expect_err("old code");
        assert!(err.to_string().contains("invalid invite code"));
    }

    #[test]
    fn redeeming_creates_account_profile_and_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let id = person(&db, "ana@example.com");
        let invite = db.issue_invite_code(id, Duration::hours(1)).expect("invite");

        let account = db
            .redeem_invite_code(&invite.code, "ana", "hash", Utc::now())
            .expect("redeem");
        assert_eq!(account.email, "ana@example.com");
        assert!(account.profile_id.is_some());

        let person = db.get_person(id).expect("get").expect("person");
        assert!(person.has_account);
        assert_eq!(person.account_id, Some(account.id));
        assert!(person.invite_code.expect("code").used);
        assert_eq!(db.account_password_hash("ana").expect("hash").as_deref(), Some("hash"));
    }

    #[test]
    fn used_and_expired_codes_create_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let first = person(&db, "ana@example.com");
        let invite = db.issue_invite_code(first, Duration::hours(1)).expect("invite");
        db.redeem_invite_code(&invite.code, "ana", "hash", Utc::now())
            .expect("redeem");

        let err = db
            .redeem_invite_code(&invite.code, "ana2", "hash", Utc::now())
            .expect_err("used");
        assert!(err.to_string().contains("expired or was already used"));
        assert_eq!(account_count(&db), 1);

        let second = person(&db, "luis@example.com");
        let invite = db.issue_invite_code(second, Duration::hours(1)).expect("invite");
        let later = Utc::now() + Duration::hours(2);
        assert!(db.redeem_invite_code(&invite.code, "luis", "hash", later).is_err());
        assert_eq!(account_count(&db), 1);
        assert!(!db.get_person(second).expect("get").expect("person").has_account);
    }

    #[test]
    fn taken_username_leaves_the_code_unused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let first = person(&db, "ana@example.com");
        let second = person(&db, "luis@example.com");
        let invite = db.issue_invite_code(first, Duration::hours(1)).expect("invite");
        db.redeem_invite_code(&invite.code, "shared", "hash", Utc::now())
            .expect("redeem");

        let invite = db.issue_invite_code(second, Duration::hours(1)).expect("invite");
        let err = db
            .redeem_invite_code(&invite.code, "shared", "hash", Utc::now())
            .expect_err("taken");
        assert!(err.to_string().starts_with("VALIDATION:"));
        assert!(!db.get_invite_code(second).expect("get").expect("code").used);
    }

    #[test]
    fn person_with_account_cannot_get_a_new_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let id = person(&db, "ana@example.com");
        let invite = db.issue_invite_code(id, Duration::hours(1)).expect("invite");
        db.redeem_invite_code(&invite.code, "ana", "hash", Utc::now())
            .expect("redeem");

        let err = db.issue_invite_code(id, Duration::hours(1)).expect_err("has account");
        assert!(err.to_string().starts_with("VALIDATION:"));
        let err = db.issue_invite_code(999, Duration::hours(1)).expect_err("unknown");
        assert!(err.to_string().starts_with("NOT_FOUND:"));
    }

    #[test]
    fn deleting_a_person_removes_account_profile_and_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let id = person(&db, "ana@example.com");
        let invite = db.issue_invite_code(id, Duration::hours(1)).expect("invite");
        db.redeem_invite_code(&invite.code, "ana", "hash", Utc::now())
            .expect("redeem");

        assert!(db.delete_person(id).expect("delete"));
        assert!(db.get_person(id).expect("get").is_none());
        assert_eq!(account_count(&db), 0);
        let conn = db.lock().expect("lock");
        let leftovers: i64 = conn
            .query_row(
                "SELECT (SELECT COUNT(1) FROM user_profiles) + (SELECT COUNT(1) FROM invite_codes)",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn out_of_range_lifetime_is_rejected_without_a_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let id = person(&db, "ana@example.com");

        let err = db
            .issue_invite_code(id, Duration::hours(i64::from(u32::MAX)))
            .expect_err("too far in the future");
        assert!(err.to_string().starts_with("VALIDATION:"), "{err}");
        assert!(db.get_invite_code(id).expect("get").is_none());
    }

    #[test]
    fn persons_list_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let older = person(&db, "ana@example.com");
        let newer = person(&db, "luis@example.com");
        let ids: Vec<i64> = db.list_persons().expect("list").iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![newer, older]);
    }
}
