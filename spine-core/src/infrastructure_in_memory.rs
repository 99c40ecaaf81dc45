use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::auth::Grant;
use crate::builder::Predicate;
use crate::infrastructure::{hash_password, AuthSource, Change, Store, StoreError, StoreResult};
use crate::model::ClassModel;
use crate::types::{EntityKey, KeyValue, PrimaryKey, SemanticType, SlotValues};

type Rows = BTreeMap<PrimaryKey, SlotValues>;

#[derive(Default)]
struct Tables {
    // class name -> key -> row (key fields inline)
    rows: HashMap<String, Rows>,
    sequences: HashMap<String, i64>,
}

#[derive(Default)]
struct AuthTables {
    // username -> (password digest, principal)
    accounts: HashMap<String, (String, EntityKey)>,
    superusers: HashSet<EntityKey>,
    grants: Vec<Grant>,
    // member -> groups it is a direct union member of
    memberships: HashMap<EntityKey, BTreeSet<EntityKey>>,
    spreads: HashMap<EntityKey, BTreeSet<String>>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    auth: RwLock<AuthTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a row directly, bypassing key allocation.
    pub fn insert(&self, model: &ClassModel, key: PrimaryKey, values: SlotValues) {
        let mut row = values;
        row.extend(model.key_values(&key));
        self.tables
            .write()
            .rows
            .entry(model.name.clone())
            .or_default()
            .insert(key, row);
    }

    /// Number of stored rows of a class.
    pub fn count(&self, class: &str) -> usize {
        self.tables.read().rows.get(class).map_or(0, BTreeMap::len)
    }

    pub fn contains(&self, class: &str, key: &PrimaryKey) -> bool {
        self.tables
            .read()
            .rows
            .get(class)
            .is_some_and(|rows| rows.contains_key(key))
    }

    pub fn add_account(&self, username: &str, password: &str, principal: EntityKey) {
        self.auth.write().accounts.insert(
            username.to_string(),
            (hash_password(username, password), principal),
        );
    }

    pub fn set_superuser(&self, principal: EntityKey, superuser: bool) {
        let mut auth = self.auth.write();
        if superuser {
            auth.superusers.insert(principal);
        } else {
            auth.superusers.remove(&principal);
        }
    }

    pub fn add_grant(&self, grant: Grant) {
        self.auth.write().grants.push(grant);
    }

    /// Removes every grant equal to `grant`. Returns how many were removed.
    pub fn remove_grant(&self, grant: &Grant) -> usize {
        let mut auth = self.auth.write();
        let before = auth.grants.len();
        auth.grants.retain(|g| g != grant);
        before - auth.grants.len()
    }

    pub fn add_membership(&self, member: EntityKey, group: EntityKey) {
        self.auth
            .write()
            .memberships
            .entry(member)
            .or_default()
            .insert(group);
    }

    pub fn add_spread(&self, entity: EntityKey, spread: impl Into<String>) {
        self.auth
            .write()
            .spreads
            .entry(entity)
            .or_default()
            .insert(spread.into());
    }
}

fn not_found(model: &ClassModel, key: &PrimaryKey) -> StoreError {
    StoreError::NotFound {
        entity: EntityKey::new(&model.name, key.clone()),
    }
}

/// Key for a new row: taken from `initial`, or allocated for a single
/// integer key.
pub(crate) fn allocate_key(
    model: &ClassModel,
    initial: &SlotValues,
    next: impl FnOnce() -> StoreResult<i64>,
) -> StoreResult<PrimaryKey> {
    if let Some(key) = model.key_from_values(initial) {
        return Ok(key);
    }
    match model.primary.as_slice() {
        [only] if only.ty == SemanticType::Int && !initial.contains_key(&only.name) => {
            Ok(PrimaryKey::single(KeyValue::Int(next()?)))
        }
        _ => Err(StoreError::KeyAllocation {
            class: model.name.clone(),
            reason: "key fields missing and the key is not a single integer".to_string(),
        }),
    }
}

impl Store for InMemoryStore {
    fn load(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<SlotValues> {
        self.tables
            .read()
            .rows
            .get(&model.name)
            .and_then(|rows| rows.get(key))
            .cloned()
            .ok_or_else(|| not_found(model, key))
    }

    fn persist(&self, model: &ClassModel, key: &PrimaryKey, dirty: &SlotValues) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let row = tables
            .rows
            .get_mut(&model.name)
            .and_then(|rows| rows.get_mut(key))
            .ok_or_else(|| not_found(model, key))?;
        row.extend(dirty.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn create(&self, model: &ClassModel, initial: &SlotValues) -> StoreResult<PrimaryKey> {
        let mut tables = self.tables.write();
        let Tables { rows, sequences } = &mut *tables;
        let rows = rows.entry(model.name.clone()).or_default();
        let key = allocate_key(model, initial, || {
            let seq = sequences.entry(model.name.clone()).or_insert(0);
            let floor = rows
                .keys()
                .filter_map(|k| match k.parts() {
                    [KeyValue::Int(i)] => Some(*i),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            *seq = (*seq).max(floor) + 1;
            Ok(*seq)
        })?;
        if rows.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                entity: EntityKey::new(&model.name, key),
            });
        }
        let mut row = initial.clone();
        row.extend(model.key_values(&key));
        rows.insert(key.clone(), row);
        Ok(key)
    }

    fn delete(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<()> {
        self.tables
            .write()
            .rows
            .get_mut(&model.name)
            .and_then(|rows| rows.remove(key))
            .map(|_| ())
            .ok_or_else(|| not_found(model, key))
    }

    fn search(&self, model: &ClassModel, predicates: &[Predicate]) -> StoreResult<Vec<PrimaryKey>> {
        let tables = self.tables.read();
        let Some(rows) = tables.rows.get(&model.name) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(_, row)| predicates.iter().all(|p| p.matches(row)))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn apply(&self, changes: &[Change]) -> StoreResult<()> {
        let mut tables = self.tables.write();

        // validate everything before touching anything
        for change in changes {
            let (class, key) = match change {
                Change::Update { class, key, .. } | Change::Delete { class, key } => (class, key),
            };
            let exists = tables
                .rows
                .get(class)
                .is_some_and(|rows| rows.contains_key(key));
            if !exists {
                return Err(StoreError::NotFound {
                    entity: EntityKey::new(class, key.clone()),
                });
            }
        }

        for change in changes {
            match change {
                Change::Update { class, key, slots } => {
                    if let Some(row) = tables.rows.get_mut(class).and_then(|rows| rows.get_mut(key)) {
                        row.extend(slots.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                }
                Change::Delete { class, key } => {
                    if let Some(rows) = tables.rows.get_mut(class) {
                        rows.remove(key);
                    }
                }
            }
        }
        Ok(())
    }
}

impl AuthSource for InMemoryStore {
    fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<EntityKey>> {
        let auth = self.auth.read();
        Ok(auth
            .accounts
            .get(username)
            .filter(|(digest, _)| *digest == hash_password(username, password))
            .map(|(_, principal)| principal.clone()))
    }

    fn is_superuser(&self, principal: &EntityKey) -> StoreResult<bool> {
        Ok(self.auth.read().superusers.contains(principal))
    }

    fn grants_for(&self, grantee: &EntityKey) -> StoreResult<Vec<Grant>> {
        Ok(self
            .auth
            .read()
            .grants
            .iter()
            .filter(|g| &g.grantee == grantee)
            .cloned()
            .collect())
    }

    fn union_groups_of(&self, member: &EntityKey) -> StoreResult<Vec<EntityKey>> {
        Ok(self
            .auth
            .read()
            .memberships
            .get(member)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn spreads_of(&self, entity: &EntityKey) -> StoreResult<Vec<String>> {
        Ok(self
            .auth
            .read()
            .spreads
            .get(entity)
            .map(|spreads| spreads.iter().cloned().collect())
            .unwrap_or_default())
    }
}
