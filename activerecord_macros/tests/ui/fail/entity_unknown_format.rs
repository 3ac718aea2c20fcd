use activerecord_macros::Entity;

#[derive(Entity)]
struct Price {
    id: i64,
    #[column(format = "#.00")]
    amount: f64,
}

fn main() {}
