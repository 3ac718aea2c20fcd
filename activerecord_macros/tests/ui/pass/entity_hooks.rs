use activerecord::{Dialect, EntityDao, EntityDefinition, Native, QueryBuilder, SearchParams};
use activerecord_macros::Entity;

#[derive(Entity, Clone, Debug)]
#[entity(optimize_search_query = "Task::only_open", computed_value = "task_label")]
struct Task {
    id: i64,
    title: String,
    done: bool,
}

impl Task {
    fn only_open(query: QueryBuilder, _params: &SearchParams) -> QueryBuilder {
        query.and_where("done = 0")
    }
}

fn task_label(dao: &EntityDao<Task>, property: &str) -> Option<Native> {
    match property {
        "label" => dao.get("title").ok(),
        _ => None,
    }
}

fn main() {
    let query = Task::optimize_search_query(
        QueryBuilder::new(Dialect::Sqlite).from("tasks", Some("t")),
        &SearchParams::default(),
    );
    assert_eq!(query.to_sql(), "SELECT * FROM tasks t WHERE done = 0");
}
