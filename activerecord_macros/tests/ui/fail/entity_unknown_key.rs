use activerecord_macros::Entity;

#[derive(Entity)]
#[entity(schema = "main")]
struct Thing {
    id: i64,
}

fn main() {}
