use indicator_scorecard_lib::models::{
    AggregationMethod, CreateRelationPayload, ListIndicatorsFilters, MonthlyValues, RedeemInvitePayload,
    SaveBscPayload, SaveCategoryPayload, SaveIndicatorPayload, SavePersonPayload,
};
use indicator_scorecard_lib::{AppError, ScorecardService, ServiceConfig};
use serde_json::json;
use std::process::Command;
use std::sync::Arc;

fn service(dir: &tempfile::TempDir) -> Arc<ScorecardService> {
    let config = ServiceConfig {
        data_dir: dir.path().to_path_buf(),
        ..ServiceConfig::default()
    };
    ScorecardService::open(&config).expect("open service")
}

fn indicator_with_january(service: &ScorecardService, january: Option<f64>) -> i64 {
    let mut monthly = MonthlyValues::default();
    monthly.result[0] = january;
    let payload = SaveIndicatorPayload {
        monthly: Some(monthly),
        ..SaveIndicatorPayload::default()
    };
    service.create_or_update_indicator(payload).expect("save indicator").id
}

fn relate(service: &ScorecardService, parent_id: i64, child_id: i64) -> i64 {
    service
        .create_relation(CreateRelationPayload { parent_id, child_id })
        .expect("relation")
        .id
}

fn ana(service: &ScorecardService) -> i64 {
    service
        .save_person(SavePersonPayload {
            id: None,
            first_names: "Ana María".to_string(),
            last_names: "Pérez".to_string(),
            email: "ana@example.com".to_string(),
        })
        .expect("person")
        .id
}

fn redeem(code: &str, username: &str) -> RedeemInvitePayload {
    RedeemInvitePayload {
        code: code.to_string(),
        username: username.to_string(),
        password: "s3cret-enough".to_string(),
    }
}

#[test]
fn parent_follows_children_and_its_own_method() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);

    let parent = indicator_with_january(&service, None);
    let c1 = indicator_with_january(&service, Some(10.0));
    let c2 = indicator_with_january(&service, Some(20.0));
    relate(&service, parent, c1);
    relate(&service, parent, c2);

    let averaged = service.get_indicator(parent).expect("parent");
    assert_eq!(averaged.monthly.result[0], Some(15.0));
    assert_eq!(averaged.quarterly.result[0], Some(15.0));
    assert_eq!(averaged.year_to_date, Some(15.0));
    assert_eq!(averaged.monthly.result[1], None);

    let summed = service
        .create_or_update_indicator(SaveIndicatorPayload {
            id: Some(parent),
            method: Some(AggregationMethod::Sum),
            ..SaveIndicatorPayload::default()
        })
        .expect("switch method");
    assert_eq!(summed.monthly.result[0], Some(30.0));
    assert_eq!(summed.year_to_date, Some(30.0));
}

#[test]
fn grandparent_sees_grandchild_updates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);

    let root = indicator_with_january(&service, None);
    let middle = indicator_with_january(&service, None);
    let leaf = indicator_with_january(&service, Some(4.0));
    relate(&service, root, middle);
    relate(&service, middle, leaf);
    assert_eq!(service.get_indicator(root).expect("root").monthly.result[0], Some(4.0));

    let mut monthly = MonthlyValues::default();
    monthly.result[0] = Some(9.5);
    monthly.result[11] = Some(0.5);
    let payload = SaveIndicatorPayload {
        id: Some(leaf),
        monthly: Some(monthly),
        ..SaveIndicatorPayload::default()
    };
    service.create_or_update_indicator(payload).expect("update leaf");

    let root = service.get_indicator(root).expect("root");
    assert_eq!(root.monthly.result[0], Some(9.5));
    assert_eq!(root.quarterly.result[3], Some(0.5));
    assert_eq!(root.year_to_date, Some(5.0));
}

#[test]
fn generated_codes_increase_and_explicit_duplicates_fail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);

    let first = service
        .create_or_update_indicator(SaveIndicatorPayload::default())
        .expect("first");
    let second = service
        .create_or_update_indicator(SaveIndicatorPayload::default())
        .expect("second");
    let first_code: i64 = first.code.parse().expect("numeric code");
    let second_code: i64 = second.code.parse().expect("numeric code");
    assert!(second_code > first_code);

    let err = service
        .create_or_update_indicator(SaveIndicatorPayload {
            code: Some(first.code.clone()),
            ..SaveIndicatorPayload::default()
        })
        .expect_err("duplicate code");
    assert!(matches!(err, AppError::Validation(_)));

    let err = service
        .create_or_update_indicator(SaveIndicatorPayload {
            code: Some("ABCDEFGHIJK".to_string()),
            ..SaveIndicatorPayload::default()
        })
        .expect_err("code too long");
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn relation_errors_are_validation_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);
    let a = indicator_with_january(&service, Some(1.0));
    let b = indicator_with_january(&service, Some(2.0));
    relate(&service, a, b);

    let duplicate = service
        .create_relation(CreateRelationPayload { parent_id: a, child_id: b })
        .expect_err("duplicate");
    assert!(duplicate.to_string().contains("duplicate"));

    let missing = service
        .create_relation(CreateRelationPayload { parent_id: a, child_id: 9_999 })
        .expect_err("missing");
    assert!(missing.to_string().contains("not found"));

    let cycle = service
        .create_relation(CreateRelationPayload { parent_id: b, child_id: a })
        .expect_err("cycle");
    assert!(matches!(cycle, AppError::Validation(_)));
}

#[test]
fn category_filter_and_scorecards() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);
    let finance = service
        .save_category(SaveCategoryPayload {
            id: None,
            name: "Finance".to_string(),
            description: Some("Money".to_string()),
        })
        .expect("category");
    let linked = service
        .create_or_update_indicator(SaveIndicatorPayload {
            category_ids: Some(vec![finance.id]),
            ..SaveIndicatorPayload::default()
        })
        .expect("linked");
    service
        .create_or_update_indicator(SaveIndicatorPayload::default())
        .expect("unlinked");

    let listed = service
        .list_indicators(ListIndicatorsFilters {
            category_id: Some(finance.id),
        })
        .expect("list");
    assert_eq!(listed.iter().map(|i| i.id).collect::<Vec<_>>(), vec![linked.id]);

    let bsc = service
        .save_bsc(SaveBscPayload {
            id: None,
            name: "Company".to_string(),
            category_ids: Some(vec![finance.id]),
        })
        .expect("bsc");
    assert_eq!(bsc.categories[0].name, "Finance");
    assert_eq!(service.get_category(finance.id).expect("category").bsc_ids, vec![bsc.id]);

    let err = service
        .save_bsc(SaveBscPayload {
            id: None,
            name: "x".repeat(101),
            category_ids: None,
        })
        .expect_err("long name");
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn invite_lifecycle_from_issue_to_login() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);
    let person = ana(&service);

    let first = service.issue_invite_code(person).expect("first code");
    let second = service.issue_invite_code(person).expect("second code");
    assert_ne!(first.code, second.code);
    assert_eq!(
        service.get_invite_code(person).expect("current").map(|c| c.code),
        Some(second.code.clone())
    );

    let stale = service.redeem_invite_code(redeem(&first.code, "ana")).expect_err("stale");
    assert!(matches!(stale, AppError::Validation(_)));

    let account = service.redeem_invite_code(redeem(&second.code, "ana")).expect("redeem");
    assert_eq!(account.email, "ana@example.com");
    assert!(service.get_person(person).expect("person").has_account);
    assert!(service.verify_account_password("ana", "s3cret-enough").expect("verify"));
    assert!(!service.verify_account_password("ana", "wrong-password").expect("verify"));
    assert!(!service.verify_account_password("nobody", "s3cret-enough").expect("verify"));

    let reused = service.redeem_invite_code(redeem(&second.code, "ana-two")).expect_err("used");
    assert!(matches!(reused, AppError::Validation(_)));
    assert_eq!(service.list_accounts().expect("accounts").len(), 1);

    let again = service.issue_invite_code(person).expect_err("already registered");
    assert!(matches!(again, AppError::Validation(_)));
}

#[test]
fn expired_codes_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);
    service
        .update_settings(json!({ "inviteCodeTtlHours": 0 }))
        .expect("settings");
    let person = ana(&service);
    let invite = service.issue_invite_code(person).expect("code");
    assert_eq!(invite.expires_at, invite.created_at);

    let err = service.redeem_invite_code(redeem(&invite.code, "ana")).expect_err("expired");
    assert!(err.to_string().contains("expired"));
    assert!(service.list_accounts().expect("accounts").is_empty());
}

#[test]
fn oversized_invite_lifetime_is_a_validation_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);
    service
        .update_settings(json!({ "inviteCodeTtlHours": u32::MAX }))
        .expect("settings");
    let person = ana(&service);

    let err = service.issue_invite_code(person).expect_err("lifetime out of range");
    assert!(matches!(err, AppError::Validation(_)), "{err}");
    assert!(service.get_invite_code(person).expect("current").is_none());
}

#[test]
fn json_update_without_months_keeps_them() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);
    let parent = indicator_with_january(&service, None);
    let child = indicator_with_january(&service, Some(7.0));
    relate(&service, parent, child);

    let renamed = service
        .create_or_update_indicator(
            serde_json::from_value(json!({ "id": child, "name": "Churn" })).expect("payload"),
        )
        .expect("rename");
    assert_eq!(renamed.name.as_deref(), Some("Churn"));
    assert_eq!(renamed.monthly.result[0], Some(7.0));
    assert_eq!(service.get_indicator(parent).expect("parent").monthly.result[0], Some(7.0));
}

#[test]
fn deleting_a_person_removes_their_account() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = service(&dir);
    let person = ana(&service);
    let invite = service.issue_invite_code(person).expect("code");
    service.redeem_invite_code(redeem(&invite.code, "ana")).expect("redeem");

    assert!(service.delete_person(person).expect("delete").success);
    assert!(service.list_accounts().expect("accounts").is_empty());
    assert!(matches!(service.get_person(person), Err(AppError::NotFound(_))));
    assert!(!service.verify_account_password("ana", "s3cret-enough").expect("verify"));
}

#[test]
fn cli_saves_and_lists_indicators_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let binary = env!("CARGO_BIN_EXE_scorecard");

    let saved = Command::new(binary)
        .arg("--data-dir")
        .arg(dir.path())
        .args(["indicator", "save", "--payload", r#"{"name":"Revenue","method":"sum"}"#])
        .output()
        .expect("run save");
    assert!(saved.status.success(), "{}", String::from_utf8_lossy(&saved.stderr));
    let saved: serde_json::Value = serde_json::from_slice(&saved.stdout).expect("save json");
    assert_eq!(saved["name"], "Revenue");
    assert_eq!(saved["method"], "sum");
    assert_eq!(saved["code"], "1");

    let listed = Command::new(binary)
        .arg("--data-dir")
        .arg(dir.path())
        .args(["indicator", "list"])
        .output()
        .expect("run list");
    assert!(listed.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&listed.stdout).expect("list json");
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let rejected = Command::new(binary)
        .arg("--data-dir")
        .arg(dir.path())
        .args(["relation", "create", "--parent", "1", "--child", "1"])
        .output()
        .expect("run relation");
    assert!(!rejected.status.success());
}
