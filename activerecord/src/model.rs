//! Use-case layer on top of entity DAOs.
//!
//! A model wraps one [`EntityDao`] and adds permission hooks plus
//! transactional save/update/delete. Define a model type with
//! [`ModelDefinition`] and build instances through a [`ModelFactory`].

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use activerecord_core::{Error, Native, Properties, Result, SqlValue};
use tracing::debug;

use crate::condition::Condition;
use crate::dao::{DaoFactory, FromFactory};
use crate::entity::{EntityDao, EntityDefinition, Id, Record};
use crate::search::{SearchParams, SearchResult};

/// Business rules of a model type.
pub trait ModelDefinition: Send + Sync + Sized + 'static {
    type Entity: EntityDefinition;

    const NAME: &'static str;

    fn is_deletable(_model: &EntityModel<Self>) -> bool {
        true
    }

    fn is_updatable(_model: &EntityModel<Self>) -> bool {
        true
    }

    /// Whether new entities can be created.
    fn is_savable(_model: &EntityModel<Self>) -> bool {
        true
    }

    /// Common name used in lists and titles, `"<Entity> <id>"` by default.
    fn entity_title(model: &EntityModel<Self>) -> Result<String> {
        Ok(format!("{} {}", <Self::Entity as EntityDefinition>::NAME, model.id()?))
    }
}

/// Builds models sharing one [`DaoFactory`].
#[derive(Clone, Debug)]
pub struct ModelFactory {
    daos: DaoFactory,
}

impl ModelFactory {
    pub fn new(daos: DaoFactory) -> Self {
        Self { daos }
    }

    pub fn dao_factory(&self) -> &DaoFactory {
        &self.daos
    }

    pub fn create<M: ModelDefinition>(&self) -> EntityModel<M> {
        self.from_dao(self.dao())
    }

    /// A model around an already loaded DAO.
    pub fn from_dao<M: ModelDefinition>(&self, dao: EntityDao<M::Entity>) -> EntityModel<M> {
        EntityModel {
            factory: self.clone(),
            dao,
            _model: PhantomData,
        }
    }

    pub fn dao<E: EntityDefinition>(&self) -> EntityDao<E> {
        self.daos.entity()
    }
}

impl From<DaoFactory> for ModelFactory {
    fn from(daos: DaoFactory) -> Self {
        Self::new(daos)
    }
}

pub struct EntityModel<M: ModelDefinition> {
    factory: ModelFactory,
    dao: EntityDao<M::Entity>,
    _model: PhantomData<fn() -> M>,
}

impl<M: ModelDefinition> Clone for EntityModel<M> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            dao: self.dao.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: ModelDefinition> fmt::Debug for EntityModel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityModel")
            .field("model", &M::NAME)
            .field("dao", &self.dao)
            .finish()
    }
}

impl<M: ModelDefinition> FromFactory for EntityModel<M> {
    fn from_factory(factory: &DaoFactory) -> Self {
        ModelFactory::new(factory.clone()).create()
    }
}

impl<M: ModelDefinition> EntityModel<M> {
    pub fn model_name(&self) -> &'static str {
        M::NAME
    }

    pub fn factory(&self) -> &ModelFactory {
        &self.factory
    }

    pub fn create_model<N: ModelDefinition>(&self) -> EntityModel<N> {
        self.factory.create()
    }

    pub fn dao(&self) -> &EntityDao<M::Entity> {
        &self.dao
    }

    fn wrap(&self, dao: EntityDao<M::Entity>) -> EntityModel<M> {
        self.factory.from_dao(dao)
    }

    fn reset_dao(&mut self) {
        self.dao = self.factory.dao();
    }

    /// Runs `f` in a transaction of this model's connection.
    pub async fn transactional<R, F, Fut>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Send,
    {
        self.dao.dao().transactional(f).await
    }

    pub async fn find(&mut self, id: impl Into<Id>) -> Result<&mut Self> {
        self.dao.find(id).await?;
        Ok(self)
    }

    pub async fn reload(&mut self) -> Result<&mut Self> {
        self.dao.reload().await?;
        Ok(self)
    }

    pub async fn find_all(&self, conditions: &[Condition]) -> Result<Vec<EntityModel<M>>> {
        let daos = self.dao.find_all(conditions).await?;
        Ok(daos.into_iter().map(|dao| self.wrap(dao)).collect())
    }

    pub async fn search(&self, params: &SearchParams) -> Result<SearchResult<EntityModel<M>>> {
        let result = self.dao.search(params).await?;
        Ok(result.map(|dao| self.wrap(dao)))
    }

    /// Every match, without paging.
    pub async fn search_all<I, S>(
        &self,
        conditions: impl IntoIterator<Item = Condition>,
        order: I,
    ) -> Result<Vec<EntityModel<M>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params = SearchParams::with_conditions(conditions)
            .order(order)
            .count(0)
            .offset(0);
        Ok(self.search(&params).await?.into_results())
    }

    /// The only match; `NotFound` when there are none or several.
    pub async fn search_one(
        &self,
        conditions: impl IntoIterator<Item = Condition>,
    ) -> Result<EntityModel<M>> {
        let params = SearchParams::with_conditions(conditions).count(1).offset(0);
        let result = self.search(&params).await?;
        if result.total_count() != 1 {
            return Err(Error::NotFound(format!(
                "{} matching items found",
                result.total_count()
            )));
        }
        result
            .into_results()
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("0 matching items found".into()))
    }

    pub async fn search_ids(&self, params: &SearchParams) -> Result<SearchResult<SqlValue>> {
        self.dao.search_ids(params).await
    }

    pub fn id(&self) -> Result<Id> {
        self.dao.id()
    }

    pub fn has_id(&self) -> bool {
        self.dao.has_id()
    }

    /// Empty until values are assigned or loaded.
    pub fn values(&self) -> Result<Properties> {
        self.dao.values()
    }

    pub fn get(&self, property: &str) -> Result<Native> {
        self.dao.get(property)
    }

    pub fn record(&self) -> Result<M::Entity>
    where
        M::Entity: Record,
    {
        self.dao.to_record()
    }

    pub fn entity_title(&self) -> Result<String> {
        M::entity_title(self)
    }

    pub fn is_deletable(&self) -> bool {
        M::is_deletable(self)
    }

    pub fn is_updatable(&self) -> bool {
        M::is_updatable(self)
    }

    pub fn is_savable(&self) -> bool {
        M::is_savable(self)
    }

    pub fn table_name(&self) -> &'static str {
        self.dao.table_name()
    }

    pub fn has_timestamp_enabled(&self) -> bool {
        self.dao.has_timestamp_enabled()
    }

    /// Sets `values` on every entity in `ids` within one transaction.
    pub async fn batch_edit<I>(&self, ids: I, values: &Properties) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Id>,
    {
        let ids: Vec<Id> = ids.into_iter().map(Into::into).collect();
        let factory = self.factory.clone();
        debug!(model = M::NAME, count = ids.len(), "batch edit");
        self.transactional(move || async move {
            for id in ids {
                let mut dao = factory.dao::<M::Entity>();
                dao.find(id).await?;
                dao.set_values(values.iter().map(|(k, v)| (k, v.clone())))?;
                dao.update().await?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::Update(format!("Batch edit was not successful: {}", e)))
    }

    /// Deletes the entity and resets the model.
    pub async fn delete(&mut self) -> Result<&mut Self> {
        if !self.has_id() || !self.is_deletable() {
            return Err(Error::Delete("Entity can not be deleted".into()));
        }
        self.force_delete().await
    }

    /// Like [`EntityModel::delete`] without the permission check.
    pub async fn force_delete(&mut self) -> Result<&mut Self> {
        let base = self.dao.dao().clone();
        let dao = &self.dao;
        base.transactional(move || async move { dao.delete().await.map(|_| ()) })
            .await?;
        self.reset_dao();
        Ok(self)
    }

    pub async fn update(&mut self, values: &Properties) -> Result<&mut Self> {
        if !self.has_id() || !self.is_updatable() {
            return Err(Error::Update("Entity can not be updated".into()));
        }
        self.force_update(values).await
    }

    /// Like [`EntityModel::update`] without the permission check.
    pub async fn force_update(&mut self, values: &Properties) -> Result<&mut Self> {
        let base = self.dao.dao().clone();
        let dao = &mut self.dao;
        base.transactional(move || async move {
            dao.set_values(values.iter().map(|(k, v)| (k, v.clone())))?;
            dao.update().await.map(|_| ())
        })
        .await?;
        Ok(self)
    }

    /// Inserts a new entity with `values` and reads it back.
    pub async fn save(&mut self, values: &Properties) -> Result<&mut Self> {
        if !self.is_savable() {
            return Err(Error::Create("New entities can not be created".into()));
        }
        self.force_save(values).await
    }

    /// Like [`EntityModel::save`] without the permission check.
    pub async fn force_save(&mut self, values: &Properties) -> Result<&mut Self> {
        let base = self.dao.dao().clone();
        let dao = &mut self.dao;
        base.transactional(move || async move {
            dao.set_values(values.iter().map(|(k, v)| (k, v.clone())))?;
            dao.insert().await?;
            dao.reload().await.map(|_| ())
        })
        .await?;
        Ok(self)
    }
}
