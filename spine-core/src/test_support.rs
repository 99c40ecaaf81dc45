use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::auth::Grant;
use crate::builder::{BuiltClass, ClassBuilder, Predicate};
use crate::config::Config;
use crate::infrastructure::{AuthSource, Change, Store, StoreError, StoreResult};
use crate::infrastructure_in_memory::InMemoryStore;
use crate::model::{AttributeDescriptor, ClassModel, OperationDescriptor};
use crate::runtime::{Credentials, Spine};
use crate::session::Session;
use crate::types::{EntityKey, PrimaryKey, SemanticType, SlotValues, Value};

pub(crate) fn person(name: &str) -> EntityKey {
    EntityKey::new("person", PrimaryKey::single(name))
}

pub(crate) fn key(id: i64) -> PrimaryKey {
    PrimaryKey::single(id)
}

pub(crate) fn slots<const N: usize>(values: [(&str, Value); N]) -> SlotValues {
    values
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

pub(crate) fn account_model() -> ClassModel {
    ClassModel::new("account")
        .doc("A user account")
        .primary(AttributeDescriptor::new("id", SemanticType::Int))
        .slot(AttributeDescriptor::new("name", SemanticType::String).writable())
        .slot(AttributeDescriptor::new("balance", SemanticType::Int).writable())
        .slot(AttributeDescriptor::new("email", SemanticType::String).writable().optional())
        .slot(AttributeDescriptor::new("created_by", SemanticType::String).optional())
        .operation(
            OperationDescriptor::new("deposit")
                .arg("amount", SemanticType::Int)
                .returns(SemanticType::Int)
                .writes()
                .doc("Adds to the balance and returns the new balance"),
        )
        .operation(OperationDescriptor::new("describe").returns(SemanticType::String))
}

pub(crate) fn account_builder() -> ClassBuilder {
    ClassBuilder::new(account_model())
        .operation("deposit", |tx, entity, args| {
            let amount = args[0].as_int().unwrap_or(0);
            let balance = tx.get(entity, "balance")?.as_int().unwrap_or(0) + amount;
            tx.set(entity, "balance", Value::Int(balance))?;
            Ok(Value::Int(balance))
        })
        .operation("describe", |tx, entity, _| {
            let name = tx.get(entity, "name")?;
            Ok(Value::Str(format!("{} ({})", name.as_str().unwrap_or("?"), entity.key())))
        })
}

/// Stores accounts 1 (alice, 100) and 2 (bob, 50); `admin` is a superuser,
/// `alice` and `bob` hold no grants.
pub(crate) struct Fixture {
    pub spine: Spine,
    pub store: Arc<InMemoryStore>,
    pub accounts: Arc<BuiltClass>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub(crate) fn with_config(config: Config) -> Self {
        let (spine, store) = Spine::in_memory(config);
        seed(&store);
        let accounts = spine.register(account_builder()).unwrap();
        Self {
            spine,
            store,
            accounts,
        }
    }

    pub(crate) fn login(&self, username: &str) -> Arc<Session> {
        self.spine
            .login(&Credentials::new(username, format!("{}-pw", username)))
            .unwrap()
    }

    pub(crate) fn admin(&self) -> Arc<Session> {
        self.login("admin")
    }

    pub(crate) fn stored(&self, id: i64) -> SlotValues {
        self.store.load(self.accounts.model(), &key(id)).unwrap()
    }
}

pub(crate) fn seed(store: &InMemoryStore) {
    let model = account_model();
    store.insert(
        &model,
        key(1),
        slots([("name", "alice".into()), ("balance", Value::Int(100))]),
    );
    store.insert(
        &model,
        key(2),
        slots([("name", "bob".into()), ("balance", Value::Int(50))]),
    );
    for user in ["admin", "alice", "bob"] {
        store.add_account(user, &format!("{}-pw", user), person(user));
    }
    store.set_superuser(person("admin"), true);
}

pub(crate) fn grant(grantee: EntityKey, operations: &[&str], target: crate::auth::GrantTarget) -> Grant {
    Grant::new(grantee, operations.iter().copied(), target)
}

type WriteHook = Box<dyn Fn() + Send + Sync>;

/// Delegates to an in-memory store; `apply` fails while `fail_apply` is set.
/// The write hook runs at the start of every `apply` and `delete`.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_apply: AtomicBool,
    on_write: Mutex<Option<WriteHook>>,
}

impl FlakyStore {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.fail_apply.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn on_write(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_write.lock() = Some(Box::new(hook));
    }

    fn run_hook(&self) {
        if let Some(hook) = self.on_write.lock().as_ref() {
            hook();
        }
    }
}

impl Store for FlakyStore {
    fn load(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<SlotValues> {
        self.inner.load(model, key)
    }

    fn persist(&self, model: &ClassModel, key: &PrimaryKey, dirty: &SlotValues) -> StoreResult<()> {
        self.inner.persist(model, key, dirty)
    }

    fn create(&self, model: &ClassModel, initial: &SlotValues) -> StoreResult<PrimaryKey> {
        self.inner.create(model, initial)
    }

    fn delete(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<()> {
        self.run_hook();
        self.inner.delete(model, key)
    }

    fn search(&self, model: &ClassModel, predicates: &[Predicate]) -> StoreResult<Vec<PrimaryKey>> {
        self.inner.search(model, predicates)
    }

    fn apply(&self, changes: &[Change]) -> StoreResult<()> {
        self.run_hook();
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.apply(changes)
    }
}

impl AuthSource for FlakyStore {
    fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<EntityKey>> {
        self.inner.authenticate(username, password)
    }

    fn is_superuser(&self, principal: &EntityKey) -> StoreResult<bool> {
        self.inner.is_superuser(principal)
    }

    fn grants_for(&self, grantee: &EntityKey) -> StoreResult<Vec<Grant>> {
        self.inner.grants_for(grantee)
    }

    fn union_groups_of(&self, member: &EntityKey) -> StoreResult<Vec<EntityKey>> {
        self.inner.union_groups_of(member)
    }

    fn spreads_of(&self, entity: &EntityKey) -> StoreResult<Vec<String>> {
        self.inner.spreads_of(entity)
    }
}
