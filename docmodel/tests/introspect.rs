use bson::Bson;
use docmodel::prelude::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
#[serde(rename_all = "camelCase")]
struct AccountUser {
    #[serde(rename = "_id")]
    id: String,
    #[db("unique=account_email")]
    account_id: String,
    #[db("unique=account_email")]
    email: String,
    #[db("index")]
    age: i32,
    #[serde(skip)]
    #[db("unique")]
    session_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
struct Audit {
    #[db("index=audit_time")]
    created_by: String,
    #[db("index=audit_time")]
    created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
struct Invoice {
    #[db("pk")]
    number: String,
    #[serde(rename = "_id")]
    internal_id: String,
    #[db(embed)]
    #[serde(flatten)]
    audit: Audit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
struct Inner {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
struct Outer {
    #[serde(rename = "_id")]
    id: String,
    #[db(embed)]
    inner: Inner,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
struct Wrapper {
    label: String,
    #[db(embed)]
    inner: Option<Inner>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Introspect)]
struct HTTPRequestLog {
    #[serde(rename = "_id")]
    id: u64,
}

#[test]
fn model_names_are_snake_cased_type_names() {
    assert_eq!(get_model_name(&AccountUser::default()), "account_user");
    assert_eq!(get_model_name(&Box::new(Invoice::default())), "invoice");
    assert_eq!(get_model_name(&HTTPRequestLog::default()), "http_request_log");
    assert_eq!(get_model_name("AuditLog"), "audit_log");
    assert_eq!(get_model_name(&Map::new()), "");
    assert_eq!(get_model_name(&None::<AccountUser>), "");
}

#[test]
fn primary_key_tag_beats_id_field() {
    let invoice = Invoice {
        number: "INV-7".into(),
        internal_id: "internal".into(),
        ..Invoice::default()
    };

    assert_eq!(get_id(&invoice), Some(Bson::String("INV-7".into())));
}

#[test]
fn outer_id_is_checked_before_embedded() {
    let outer = Outer {
        id: "outer".into(),
        inner: Inner { id: "inner".into() },
    };
    assert_eq!(get_id(&outer), Some(Bson::String("outer".into())));

    let wrapper = Wrapper {
        label: "w".into(),
        inner: Some(Inner { id: "inner".into() }),
    };
    assert_eq!(get_id(&wrapper), Some(Bson::String("inner".into())));

    let empty = Wrapper { label: "w".into(), inner: None };
    assert_eq!(get_id(&empty), None);
}

#[test]
fn mapping_ids_and_numeric_ids() {
    let map = Map::new().set("_id", "m1").set("name", "x");
    assert_eq!(get_id(&map), Some(Bson::String("m1".into())));

    let log = HTTPRequestLog { id: 42 };
    assert!(matches!(get_id(&log), Some(Bson::Int64(42)) | Some(Bson::Int32(42))));
}

#[test]
fn indexes_follow_serialized_names_and_groups() {
    let (name, spec) = parse_model_indexes(&AccountUser::default());

    assert_eq!(name, "account_user");
    assert_eq!(spec.len(), 2);

    let compound = spec.get("account_email").unwrap();
    assert_eq!(compound.fields, vec!["accountId".to_string(), "email".to_string()]);
    assert!(compound.unique);

    let single = spec.get("age").unwrap();
    assert_eq!(single.fields, vec!["age".to_string()]);
    assert!(!single.unique);

    assert!(spec.get("sessionToken").is_none());
}

#[test]
fn embedded_indexes_are_merged() {
    let (name, spec) = parse_model_indexes(&Invoice::default());

    assert_eq!(name, "invoice");

    let group = spec.get("audit_time").unwrap();
    assert_eq!(group.fields, vec!["created_by".to_string(), "created_at".to_string()]);
    assert!(!group.unique);
}

#[test]
fn non_structs_have_no_indexes() {
    let (name, spec) = parse_model_indexes(&Map::new().set("a", 1));

    assert_eq!(name, "");
    assert!(spec.is_empty());
}

#[test]
fn entities_round_trip_through_documents() {
    let user = AccountUser {
        id: "u1".into(),
        account_id: "a1".into(),
        email: "ann@example.com".into(),
        age: 31,
        session_token: String::new(),
    };

    let document = to_document(&user).unwrap();
    assert_eq!(document.id(), Some(&Bson::String("u1".into())));
    assert!(document.get_value("sessionToken").is_none());

    let back: AccountUser = to_entity(document).unwrap();
    assert_eq!(back.id, user.id);
    assert_eq!(back.account_id, user.account_id);
    assert_eq!(back.email, user.email);
    assert_eq!(back.age, user.age);
}
