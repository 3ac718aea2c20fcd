//! Shared fixture schema, seed data, entities and models for integration tests,
//! plus generic checks that run against any fixture backend.

use std::sync::Arc;

use activerecord::{
    DaoFactory, Entity, EntityDao, EntityModel, FixedClock, ModelDefinition,
    ModelFactory, Native, Properties, QueryBuilder, Result, SearchParams,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Instant returned by the fixture clock.
pub const NOW: &str = "2016-01-22 23:01:42";

/// Expose migration SQL via constants for harnesses.
pub mod migrations {
    pub const LIBSQL_SCHEMA_SQL: &str = include_str!("../migrations/libsql/001_schema.sql");
    pub const LIBSQL_SEED_SQL: &str = include_str!("../migrations/libsql/002_seed.sql");
}

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "users", timestamps, optimize_search_query = "User::active_only")]
pub struct User {
    pub id: Option<i64>,
    pub username: String,
    #[column(name = "email")]
    pub mail: Option<String>,
    pub active: bool,
}

impl User {
    /// Searches only see active users.
    fn active_only(query: QueryBuilder, _params: &SearchParams) -> QueryBuilder {
        query.and_where("active = 1")
    }
}

/// Same table, with the id read from a named sequence.
#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "users", name = "User", sequence = "test_seq", timestamps)]
pub struct UserSequence {
    pub id: Option<i64>,
    pub username: String,
    pub email: Option<String>,
}

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(updated = "modified", computed_value = "Document::computed")]
pub struct Document {
    pub id: Option<i64>,
    pub title: String,
    pub tags: Vec<String>,
    pub meta: Option<serde_json::Value>,
    pub published: bool,
    #[column(format = "Y-m-d")]
    pub publish_date: Option<NaiveDate>,
}

impl Document {
    fn computed(dao: &EntityDao<Self>, property: &str) -> Option<Native> {
        match property {
            "tag_count" => match dao.get("tags") {
                Ok(Native::List(tags)) => Some(Native::Int(tags.len() as i64)),
                _ => Some(Native::Int(0)),
            },
            _ => None,
        }
    }
}

/// Relation between users and documents.
#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "user_documents")]
pub struct UserDocument {
    #[column(id)]
    pub user_id: i64,
    #[column(id)]
    pub document_id: i64,
}

/// The seeded user `Foo` can not be deleted.
pub struct UserModel;

impl ModelDefinition for UserModel {
    type Entity = User;
    const NAME: &'static str = "User";

    fn is_deletable(model: &EntityModel<Self>) -> bool {
        !matches!(model.get("username"), Ok(Native::Text(name)) if name == "Foo")
    }
}

/// Published documents are frozen.
pub struct DocumentModel;

impl ModelDefinition for DocumentModel {
    type Entity = Document;
    const NAME: &'static str = "Document";

    fn is_updatable(model: &EntityModel<Self>) -> bool {
        !matches!(model.get("published"), Ok(Native::Bool(true)))
    }

    fn entity_title(model: &EntityModel<Self>) -> Result<String> {
        Ok(model.get("title")?.to_text())
    }
}

pub fn fixed_clock() -> FixedClock {
    FixedClock::parse(NOW).unwrap_or_else(|| FixedClock(chrono::Utc::now().into()))
}

/// A DAO factory over a private in-memory database with the fixture schema and data.
pub async fn libsql_factory() -> Result<DaoFactory> {
    let conn = activerecord::LibsqlConnection::open_in_memory().await?;
    conn.execute_batch(migrations::LIBSQL_SCHEMA_SQL).await?;
    conn.execute_batch(migrations::LIBSQL_SEED_SQL).await?;
    Ok(DaoFactory::new(Arc::new(conn)).with_clock(fixed_clock()))
}

pub fn props<I, K, V>(pairs: I) -> Properties
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Native>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[async_trait]
pub trait FixtureFactory {
    /// A factory connected to a fresh database with the fixture schema and data.
    async fn new_dao_factory(&self) -> Result<DaoFactory>;
}

/// In-memory libsql fixture.
pub struct LibsqlFixture;

#[async_trait]
impl FixtureFactory for LibsqlFixture {
    async fn new_dao_factory(&self) -> Result<DaoFactory> {
        libsql_factory().await
    }
}

/// Insert, find, update and delete through an entity DAO.
pub async fn test_entity_roundtrip<F: FixtureFactory + Sync>(f: &F) -> Result<()> {
    let factory = f.new_dao_factory().await?;

    let mut user = factory.entity::<User>();
    user.set_record(&User {
        id: None,
        username: "Grault".into(),
        mail: Some("grault@example.com".into()),
        active: true,
    })?;
    user.insert().await?;
    let id = user.id()?;
    assert_eq!(user.get("created")?.to_text(), NOW);

    let mut found = factory.entity::<User>();
    found.find(id.clone()).await?;
    assert_eq!(found.get("mail")?, Native::from("grault@example.com"));

    found.set("active", false)?;
    assert!(found.update().await?);
    assert!(!found.update().await?);

    let reloaded = found.reload().await?.to_record()?;
    assert!(!reloaded.active);

    assert_eq!(found.delete().await?, 1);
    assert!(!factory.entity::<User>().exists(id).await?);
    Ok(())
}

/// Paging and totals of a search.
pub async fn test_search_paging<F: FixtureFactory + Sync>(f: &F) -> Result<()> {
    let factory = f.new_dao_factory().await?;
    let users = factory.entity::<User>();

    let page = users
        .search(&SearchParams::new().order(["username"]).count(2).offset(1))
        .await?;
    assert_eq!(page.total_count(), 4);
    assert_eq!(page.len(), 2);
    let names: Vec<String> = page
        .iter()
        .map(|u| u.get("username").map(|n| n.to_text()))
        .collect::<Result<_>>()?;
    assert_eq!(names, ["Foo", "Quux"]);
    Ok(())
}

/// Create, update and delete through a model.
pub async fn test_model_use_cases<F: FixtureFactory + Sync>(f: &F) -> Result<()> {
    let models = ModelFactory::new(f.new_dao_factory().await?);

    let mut model = models.create::<UserModel>();
    model
        .save(&props([("username", "Garply"), ("mail", "garply@example.com")]))
        .await?;
    assert!(model.has_id());
    assert_eq!(model.get("active")?, Native::Bool(true));

    model.update(&props([("active", false)])).await?;
    assert!(!model.record()?.active);

    model.delete().await?;
    assert!(!model.has_id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use activerecord::{EntityDefinition, Format};

    #[test]
    fn entity_metadata_constants() {
        assert_eq!(User::TABLE, "users");
        assert_eq!(User::FIELD_MAP, &[("email", "mail")]);
        assert_eq!(User::FORMAT_MAP, &[("active", Format::Bool)]);
        assert!(User::TIMESTAMPS);
        assert_eq!(UserSequence::PRIMARY_KEY_SEQUENCE, Some("test_seq"));
        assert_eq!(UserSequence::NAME, "User");
        assert_eq!(Document::TABLE, "documents");
        assert_eq!(Document::UPDATED_COLUMN, "modified");
        assert_eq!(UserDocument::PRIMARY_KEY, &["user_id", "document_id"]);
    }

    #[test]
    fn migrations_constants_non_empty() {
        let schema = migrations::LIBSQL_SCHEMA_SQL;
        let seed = migrations::LIBSQL_SEED_SQL;
        assert!(schema.contains("CREATE TABLE users"));
        assert!(schema.contains("CREATE TABLE documents"));
        assert!(seed.contains("foo@bar.com"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generic_helpers_run_with_libsql() -> Result<()> {
        let f = LibsqlFixture;
        test_entity_roundtrip(&f).await?;
        test_search_paging(&f).await?;
        test_model_use_cases(&f).await?;
        Ok(())
    }
}
