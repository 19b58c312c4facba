use campus_notices::models::{
    Category, Notice, NoticeDraft, NoticeQuery, NoticeStatus, Role, SignupRequest,
    count_by_category,
};
use chrono::Utc;
use uuid::Uuid;

fn notice(status: NoticeStatus, category: Category, created_by: Uuid) -> Notice {
    Notice {
        id: Uuid::new_v4(),
        title: "Title".to_string(),
        content: "Content".to_string(),
        category,
        created_by,
        creator_role: Role::Faculty,
        status,
        approved_by: None,
        approved_at: None,
        created_at: Utc::now(),
    }
}

fn signup(password: &str, confirm: &str) -> SignupRequest {
    SignupRequest {
        name: "Ada".to_string(),
        email: "ada@campus.edu".to_string(),
        password: password.to_string(),
        confirm_password: confirm.to_string(),
        role: Role::Student,
    }
}

// --- Serialization ---

#[test]
fn test_enums_serialize_lowercase() {
    assert_eq!(serde_json::to_string(&Role::Faculty).unwrap(), r#""faculty""#);
    assert_eq!(serde_json::to_string(&NoticeStatus::Approved).unwrap(), r#""approved""#);
    assert_eq!(serde_json::to_string(&Category::Holidays).unwrap(), r#""holidays""#);
}

#[test]
fn test_notice_accepts_legacy_description_field() {
    let json = serde_json::json!({
        "id": Uuid::new_v4(),
        "title": "Library hours",
        "description": "Open until 10pm",
        "category": "general",
        "created_by": Uuid::new_v4(),
        "creator_role": "faculty",
        "status": "pending",
        "approved_by": null,
        "approved_at": null,
        "created_at": Utc::now(),
    });

    let parsed: Notice = serde_json::from_value(json).unwrap();
    assert_eq!(parsed.content, "Open until 10pm");

    let back = serde_json::to_value(&parsed).unwrap();
    assert_eq!(back["content"], "Open until 10pm");
    assert!(back.get("description").is_none());
}

// --- Parsing ---

#[test]
fn test_category_parse_is_trimmed_and_case_insensitive() {
    assert_eq!(" Exam ".parse::<Category>().unwrap(), Category::Exam);
    assert_eq!("EVENTS".parse::<Category>().unwrap(), Category::Events);
    assert!("sports".parse::<Category>().is_err());
}

#[test]
fn test_role_parse() {
    assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
    assert!("dean".parse::<Role>().is_err());
}

#[test]
fn test_only_faculty_and_admin_submit() {
    assert!(!Role::Student.can_submit_notices());
    assert!(Role::Faculty.can_submit_notices());
    assert!(Role::Admin.can_submit_notices());
}

// --- Validation ---

#[test]
fn test_notice_draft_validation() {
    let ok = NoticeDraft {
        title: "  Fee deadline ".to_string(),
        content: " Pay by Friday ".to_string(),
        category: "fees".to_string(),
    }
    .validate()
    .unwrap();
    assert_eq!(ok.title, "Fee deadline");
    assert_eq!(ok.content, "Pay by Friday");
    assert_eq!(ok.category, Category::Fees);

    let missing = NoticeDraft {
        title: "Fee deadline".to_string(),
        content: "   ".to_string(),
        category: "fees".to_string(),
    }
    .validate()
    .unwrap_err();
    assert_eq!(missing.to_string(), "All fields are required.");
}

#[test]
fn test_signup_validation_messages() {
    assert!(signup("secret1", "secret1").validate().is_ok());
    assert_eq!(
        signup("secret1", "secret2").validate().unwrap_err().to_string(),
        "Passwords do not match"
    );
    assert_eq!(
        signup("abc", "abc").validate().unwrap_err().to_string(),
        "Password must be at least 6 characters"
    );
    assert_eq!(
        signup("", "").validate().unwrap_err().to_string(),
        "Please fill in all fields"
    );
}

// --- Lifecycle rules ---

#[test]
fn test_students_see_only_approved() {
    let author = Uuid::new_v4();
    assert!(!notice(NoticeStatus::Pending, Category::General, author).is_visible_to_students());
    assert!(notice(NoticeStatus::Approved, Category::General, author).is_visible_to_students());
}

#[test]
fn test_detail_visibility() {
    let author = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let pending = notice(NoticeStatus::Pending, Category::Exam, author);

    assert!(pending.is_visible_to(author, Role::Faculty));
    assert!(pending.is_visible_to(stranger, Role::Admin));
    assert!(!pending.is_visible_to(stranger, Role::Student));
    assert!(!pending.is_visible_to(stranger, Role::Faculty));
}

#[test]
fn test_editable_only_by_owner_while_pending() {
    let author = Uuid::new_v4();
    let pending = notice(NoticeStatus::Pending, Category::Exam, author);
    let approved = notice(NoticeStatus::Approved, Category::Exam, author);

    assert!(pending.check_editable_by(author).is_ok());
    assert!(pending.check_editable_by(Uuid::new_v4()).is_err());
    assert_eq!(
        approved.check_editable_by(author).unwrap_err().to_string(),
        "Only pending notices can be edited."
    );
}

#[test]
fn test_queries_match_expected_notices() {
    let author = Uuid::new_v4();
    let pending = notice(NoticeStatus::Pending, Category::Fees, author);
    let approved = notice(NoticeStatus::Approved, Category::Fees, Uuid::new_v4());

    assert!(NoticeQuery::Pending.matches(&pending));
    assert!(!NoticeQuery::Pending.matches(&approved));
    assert!(NoticeQuery::Approved.matches(&approved));
    assert!(NoticeQuery::CreatedBy(author).matches(&pending));
    assert!(!NoticeQuery::CreatedBy(author).matches(&approved));
}

#[test]
fn test_category_counts_ignore_pending() {
    let author = Uuid::new_v4();
    let notices = vec![
        notice(NoticeStatus::Approved, Category::Exam, author),
        notice(NoticeStatus::Approved, Category::Exam, author),
        notice(NoticeStatus::Pending, Category::Exam, author),
        notice(NoticeStatus::Approved, Category::Holidays, author),
    ];

    let counts = count_by_category(&notices);

    assert_eq!(counts.len(), Category::ALL.len());
    let count_of = |c: Category| counts.iter().find(|e| e.category == c).unwrap().count;
    assert_eq!(count_of(Category::Exam), 2);
    assert_eq!(count_of(Category::Holidays), 1);
    assert_eq!(count_of(Category::Fees), 0);
}
