//! Permission checks consulted before mutating operations.
//!
//! Rules form a fixed chain evaluated in order; the first rule that
//! allows wins and anything no rule allows is denied.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{SpineError, SpineResult};
use crate::infrastructure::AuthSource;
use crate::types::EntityKey;

/// What a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantTarget {
    /// One specific entity
    Entity(EntityKey),
    /// Every entity in the named spread
    Spread(String),
    /// Everything
    Global,
}

/// A stored permission: `grantee` may perform `operations` on `target`.
///
/// Operation names are qualified (`account.set_name`, `account.create`);
/// `*` matches any operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub grantee: EntityKey,
    pub operations: BTreeSet<String>,
    pub target: GrantTarget,
}

impl Grant {
    pub fn new<I, S>(grantee: EntityKey, operations: I, target: GrantTarget) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            grantee,
            operations: operations.into_iter().map(Into::into).collect(),
            target,
        }
    }

    pub fn allows_operation(&self, operation: &str) -> bool {
        self.operations.contains(operation) || self.operations.contains("*")
    }
}

/// The authenticated principal of a session, with its group closure
/// resolved on first use.
#[derive(Debug)]
pub struct Operator {
    principal: EntityKey,
    groups: Mutex<Option<Arc<Vec<EntityKey>>>>,
}

impl Operator {
    pub fn new(principal: EntityKey) -> Self {
        Self {
            principal,
            groups: Mutex::new(None),
        }
    }

    pub fn principal(&self) -> &EntityKey {
        &self.principal
    }

    /// Every group the principal is a direct or transitive union member of.
    pub fn groups(&self, source: &dyn AuthSource) -> SpineResult<Arc<Vec<EntityKey>>> {
        let mut cached = self.groups.lock();
        if let Some(groups) = cached.as_ref() {
            return Ok(groups.clone());
        }
        let groups = Arc::new(resolve_groups(source, &self.principal)?);
        *cached = Some(groups.clone());
        Ok(groups)
    }

    /// Forgets the cached group closure, e.g. after membership changes.
    pub fn refresh(&self) {
        *self.groups.lock() = None;
    }
}

/// Breadth-first walk of union membership edges. Cycles are cut by the
/// visited set.
fn resolve_groups(source: &dyn AuthSource, principal: &EntityKey) -> SpineResult<Vec<EntityKey>> {
    let mut visited: HashSet<EntityKey> = HashSet::new();
    visited.insert(principal.clone());
    let mut queue = VecDeque::from([principal.clone()]);
    let mut groups = Vec::new();

    while let Some(member) = queue.pop_front() {
        for group in source.union_groups_of(&member)? {
            if visited.insert(group.clone()) {
                groups.push(group.clone());
                queue.push_back(group);
            }
        }
    }
    Ok(groups)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Superusers may do anything
    Superuser,
    /// The operator or one of its groups holds a matching grant
    Granted,
}

pub struct Authorizer {
    chain: Vec<Rule>,
}

impl Default for Authorizer {
    fn default() -> Self {
        Self {
            chain: vec![Rule::Superuser, Rule::Granted],
        }
    }
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.chain
    }

    /// Whether `operator` may perform `operation`, optionally on `target`.
    pub fn check_permission(
        &self,
        source: &dyn AuthSource,
        operator: &Operator,
        operation: &str,
        target: Option<&EntityKey>,
    ) -> SpineResult<bool> {
        for rule in &self.chain {
            if self.evaluate(*rule, source, operator, operation, target)? {
                tracing::trace!(operator = %operator.principal(), operation, ?rule, "permission granted");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Like [`check_permission`](Self::check_permission) but fails with
    /// [`SpineError::Authorization`] on denial.
    pub fn require(
        &self,
        source: &dyn AuthSource,
        operator: &Operator,
        operation: &str,
        target: Option<&EntityKey>,
    ) -> SpineResult<()> {
        if self.check_permission(source, operator, operation, target)? {
            return Ok(());
        }
        tracing::debug!(operator = %operator.principal(), operation, "permission denied");
        Err(SpineError::Authorization {
            operator: operator.principal().clone(),
            operation: operation.to_string(),
        })
    }

    fn evaluate(
        &self,
        rule: Rule,
        source: &dyn AuthSource,
        operator: &Operator,
        operation: &str,
        target: Option<&EntityKey>,
    ) -> SpineResult<bool> {
        match rule {
            Rule::Superuser => Ok(source.is_superuser(operator.principal())?),
            Rule::Granted => {
                let groups = operator.groups(source)?;
                // spreads are only fetched once a grant needs them
                let mut spreads: Option<Vec<String>> = None;
                for grantee in std::iter::once(operator.principal()).chain(groups.iter()) {
                    for grant in source.grants_for(grantee)? {
                        if !grant.allows_operation(operation) {
                            continue;
                        }
                        let matched = match (&grant.target, target) {
                            (GrantTarget::Global, _) => true,
                            (GrantTarget::Entity(key), Some(target)) => key == target,
                            (GrantTarget::Spread(spread), Some(target)) => {
                                if spreads.is_none() {
                                    spreads = Some(source.spreads_of(target)?);
                                }
                                spreads.as_ref().is_some_and(|s| s.contains(spread))
                            }
                            (_, None) => false,
                        };
                        if matched {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
        }
    }
}
