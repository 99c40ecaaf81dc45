//! SQLite-backed store and auth source.
//! Entities survive server restarts.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! spine-core = { path = "../spine-core", features = ["sqlite"] }
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::auth::{Grant, GrantTarget};
use crate::builder::Predicate;
use crate::infrastructure::{hash_password, AuthSource, Change, Store, StoreError, StoreResult};
use crate::infrastructure_in_memory::allocate_key;
use crate::model::ClassModel;
use crate::types::{EntityKey, KeyValue, PrimaryKey, SlotValues};

/// A persistent entity store backed by SQLite.
///
/// Keys and slot maps are stored as JSON text. Uses WAL mode for
/// concurrent read performance.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// A private, non-persistent database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                class TEXT NOT NULL,
                key   TEXT NOT NULL,
                slots TEXT NOT NULL,
                PRIMARY KEY (class, key)
            );

            CREATE TABLE IF NOT EXISTS sequences (
                class TEXT PRIMARY KEY,
                last  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                username  TEXT PRIMARY KEY,
                digest    TEXT NOT NULL,
                principal TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS superusers (
                principal TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS grants (
                grantee    TEXT NOT NULL,
                operations TEXT NOT NULL,
                target     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_grants_grantee ON grants(grantee);

            CREATE TABLE IF NOT EXISTS memberships (
                member TEXT NOT NULL,
                grp    TEXT NOT NULL,
                PRIMARY KEY (member, grp)
            );

            CREATE TABLE IF NOT EXISTS spreads (
                entity TEXT NOT NULL,
                spread TEXT NOT NULL,
                PRIMARY KEY (entity, spread)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn add_account(&self, username: &str, password: &str, principal: &EntityKey) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO accounts (username, digest, principal) VALUES (?1, ?2, ?3)",
            params![username, hash_password(username, password), encode(principal)?],
        )?;
        Ok(())
    }

    pub fn set_superuser(&self, principal: &EntityKey, superuser: bool) -> StoreResult<()> {
        let conn = self.conn.lock();
        if superuser {
            conn.execute(
                "INSERT OR IGNORE INTO superusers (principal) VALUES (?1)",
                params![encode(principal)?],
            )?;
        } else {
            conn.execute(
                "DELETE FROM superusers WHERE principal = ?1",
                params![encode(principal)?],
            )?;
        }
        Ok(())
    }

    pub fn add_grant(&self, grant: &Grant) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO grants (grantee, operations, target) VALUES (?1, ?2, ?3)",
            params![
                encode(&grant.grantee)?,
                serde_json::to_string(&grant.operations)?,
                serde_json::to_string(&grant.target)?
            ],
        )?;
        Ok(())
    }

    pub fn add_membership(&self, member: &EntityKey, group: &EntityKey) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO memberships (member, grp) VALUES (?1, ?2)",
            params![encode(member)?, encode(group)?],
        )?;
        Ok(())
    }

    pub fn add_spread(&self, entity: &EntityKey, spread: &str) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO spreads (entity, spread) VALUES (?1, ?2)",
            params![encode(entity)?, spread],
        )?;
        Ok(())
    }

    fn next_sequence(conn: &Connection, class: &str) -> StoreResult<i64> {
        let last: i64 = conn
            .query_row(
                "SELECT last FROM sequences WHERE class = ?1",
                params![class],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let mut next = last + 1;
        // skip keys seeded explicitly
        while row_exists(conn, class, &encode(&PrimaryKey::single(KeyValue::Int(next)))?)? {
            next += 1;
        }
        conn.execute(
            "INSERT OR REPLACE INTO sequences (class, last) VALUES (?1, ?2)",
            params![class, next],
        )?;
        Ok(next)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn row_exists(conn: &Connection, class: &str, key: &str) -> StoreResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM entities WHERE class = ?1 AND key = ?2",
            params![class, key],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn not_found(class: &str, key: &PrimaryKey) -> StoreError {
    StoreError::NotFound {
        entity: EntityKey::new(class, key.clone()),
    }
}

fn merge_slots(conn: &Connection, class: &str, key: &PrimaryKey, dirty: &SlotValues) -> StoreResult<()> {
    let encoded = encode(key)?;
    let current: Option<String> = conn
        .query_row(
            "SELECT slots FROM entities WHERE class = ?1 AND key = ?2",
            params![class, encoded],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Err(not_found(class, key));
    };
    let mut slots: SlotValues = serde_json::from_str(&current)?;
    slots.extend(dirty.iter().map(|(k, v)| (k.clone(), v.clone())));
    conn.execute(
        "UPDATE entities SET slots = ?3 WHERE class = ?1 AND key = ?2",
        params![class, encoded, encode(&slots)?],
    )?;
    Ok(())
}

fn delete_row(conn: &Connection, class: &str, key: &PrimaryKey) -> StoreResult<()> {
    let deleted = conn.execute(
        "DELETE FROM entities WHERE class = ?1 AND key = ?2",
        params![class, encode(key)?],
    )?;
    if deleted == 0 {
        return Err(not_found(class, key));
    }
    Ok(())
}

impl Store for SqliteStore {
    fn load(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<SlotValues> {
        let slots: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT slots FROM entities WHERE class = ?1 AND key = ?2",
                params![model.name, encode(key)?],
                |row| row.get(0),
            )
            .optional()?;
        match slots {
            Some(slots) => Ok(serde_json::from_str(&slots)?),
            None => Err(not_found(&model.name, key)),
        }
    }

    fn persist(&self, model: &ClassModel, key: &PrimaryKey, dirty: &SlotValues) -> StoreResult<()> {
        merge_slots(&self.conn.lock(), &model.name, key, dirty)
    }

    fn create(&self, model: &ClassModel, initial: &SlotValues) -> StoreResult<PrimaryKey> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let key = allocate_key(model, initial, || Self::next_sequence(&tx, &model.name))?;
        let encoded = encode(&key)?;
        if row_exists(&tx, &model.name, &encoded)? {
            return Err(StoreError::AlreadyExists {
                entity: EntityKey::new(&model.name, key),
            });
        }
        let mut slots = initial.clone();
        slots.extend(model.key_values(&key));
        tx.execute(
            "INSERT INTO entities (class, key, slots) VALUES (?1, ?2, ?3)",
            params![model.name, encoded, encode(&slots)?],
        )?;
        tx.commit()?;
        Ok(key)
    }

    fn delete(&self, model: &ClassModel, key: &PrimaryKey) -> StoreResult<()> {
        delete_row(&self.conn.lock(), &model.name, key)
    }

    fn search(&self, model: &ClassModel, predicates: &[Predicate]) -> StoreResult<Vec<PrimaryKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, slots FROM entities WHERE class = ?1")?;
        let rows = stmt.query_map(params![model.name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (key, slots) = row?;
            let slots: SlotValues = serde_json::from_str(&slots)?;
            if predicates.iter().all(|p| p.matches(&slots)) {
                keys.push(serde_json::from_str::<PrimaryKey>(&key)?);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn apply(&self, changes: &[Change]) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        // dropping the transaction on error rolls it back
        let tx = conn.transaction()?;
        for change in changes {
            match change {
                Change::Update { class, key, slots } => merge_slots(&tx, class, key, slots)?,
                Change::Delete { class, key } => delete_row(&tx, class, key)?,
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl AuthSource for SqliteStore {
    fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<EntityKey>> {
        let row: Option<(String, String)> = self
            .conn
            .lock()
            .query_row(
                "SELECT digest, principal FROM accounts WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((digest, principal)) if digest == hash_password(username, password) => {
                Ok(Some(serde_json::from_str(&principal)?))
            }
            _ => Ok(None),
        }
    }

    fn is_superuser(&self, principal: &EntityKey) -> StoreResult<bool> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM superusers WHERE principal = ?1",
                params![encode(principal)?],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn grants_for(&self, grantee: &EntityKey) -> StoreResult<Vec<Grant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT operations, target FROM grants WHERE grantee = ?1")?;
        let rows = stmt.query_map(params![encode(grantee)?], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut grants = Vec::new();
        for row in rows {
            let (operations, target) = row?;
            grants.push(Grant {
                grantee: grantee.clone(),
                operations: serde_json::from_str(&operations)?,
                target: serde_json::from_str::<GrantTarget>(&target)?,
            });
        }
        Ok(grants)
    }

    fn union_groups_of(&self, member: &EntityKey) -> StoreResult<Vec<EntityKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT grp FROM memberships WHERE member = ?1 ORDER BY grp")?;
        let rows = stmt.query_map(params![encode(member)?], |row| row.get::<_, String>(0))?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(serde_json::from_str(&row?)?);
        }
        Ok(groups)
    }

    fn spreads_of(&self, entity: &EntityKey) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT spread FROM spreads WHERE entity = ?1 ORDER BY spread")?;
        let rows = stmt.query_map(params![encode(entity)?], |row| row.get::<_, String>(0))?;
        let spreads = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(spreads)
    }
}
