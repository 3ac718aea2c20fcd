use activerecord::{EntityDefinition, Format, Native, Properties, Record};
use activerecord_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "user_roles")]
struct UserRole {
    #[column(id)]
    user_id: i64,
    #[column(id)]
    role_id: i64,
    tags: Vec<String>,
    settings: Option<serde_json::Value>,
    #[column(skip)]
    cached: u32,
}

fn main() {
    assert_eq!(UserRole::PRIMARY_KEY, &["user_id", "role_id"]);
    assert_eq!(
        UserRole::FORMAT_MAP,
        &[("tags", Format::Csv), ("settings", Format::Json)]
    );

    let mut props = Properties::new();
    props.insert("user_id".into(), Native::Int(1));
    props.insert("role_id".into(), Native::Int(2));
    props.insert("tags".into(), Native::List(vec!["a".into(), "b".into()]));
    let role = UserRole::from_properties(&props).unwrap();
    assert_eq!(role.settings, None);
    assert_eq!(role.cached, 0);
    assert!(!role.to_properties().contains_key("cached"));
}
