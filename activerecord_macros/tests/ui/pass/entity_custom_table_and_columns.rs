use activerecord::{EntityDefinition, Format};
use activerecord_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "people", name = "Person", sequence = "people_seq", timestamps, updated = "modified")]
struct Person {
    #[column(id)]
    person_id: i64,
    #[column(name = "email_address")]
    email: String,
    #[column(name = "full_name", format = "alphanumeric")]
    name: String,
    created: chrono::NaiveDateTime,
    modified: chrono::NaiveDateTime,
}

fn main() {
    assert_eq!(Person::TABLE, "people");
    assert_eq!(Person::PRIMARY_KEY, &["person_id"]);
    assert_eq!(Person::PRIMARY_KEY_SEQUENCE, Some("people_seq"));
    assert_eq!(
        Person::FIELD_MAP,
        &[("email_address", "email"), ("full_name", "name")]
    );
    assert_eq!(
        Person::FORMAT_MAP,
        &[
            ("full_name", Format::Alphanumeric),
            ("created", Format::DateTime),
            ("modified", Format::DateTime)
        ]
    );
    assert!(Person::TIMESTAMPS);
    assert_eq!(Person::CREATED_COLUMN, "created");
    assert_eq!(Person::UPDATED_COLUMN, "modified");
}
