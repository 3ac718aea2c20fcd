use activerecord_macros::Entity;

#[derive(Entity)]
struct NoKey {
    name: String,
}

fn main() {}
