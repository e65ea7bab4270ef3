//! Device rule store interface and an in-memory implementation.

use async_trait::async_trait;
use log::{debug, warn};
use sonic_orch_common::{OpKind, StagedOps};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::rule::{EntryStats, MatchKey, RuleDescriptor, TableFamily};
use super::types::{AppId, DeviceId};

/// Errors returned by a rule store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflicting rule already installed: {0}")]
    Conflict(String),

    #[error("Rule not found: {0}")]
    NotFound(String),
}

/// Result type for rule store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The device's match-action rule store.
///
/// The store is the only arbiter of concurrent device mutation. `submit`
/// must apply stages strictly in order and acknowledge a stage before the
/// next one is applied.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Rules owned by `app_id` on `device_id` in the tables of `family`.
    async fn fetch_owned(
        &self,
        app_id: &AppId,
        device_id: &DeviceId,
        family: TableFamily,
    ) -> StoreResult<Vec<RuleDescriptor>>;

    /// Every rule installed on `device_id`, whatever its owner.
    async fn fetch_all(&self, device_id: &DeviceId) -> StoreResult<Vec<RuleDescriptor>>;

    /// Applies a staged plan on `device_id`.
    async fn submit(&self, device_id: &DeviceId, plan: StagedOps<RuleDescriptor>) -> StoreResult<()>;

    /// Removes a single rule of the rule's owner. Removing a rule that is
    /// not installed succeeds.
    async fn remove_one(&self, rule: &RuleDescriptor) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    rules: HashMap<DeviceId, Vec<RuleDescriptor>>,
    submissions: Vec<(DeviceId, StagedOps<RuleDescriptor>)>,
    failing_fetches: HashSet<TableFamily>,
    fail_fetch_all: bool,
    fail_submit: bool,
    failing_removals: Vec<RuleDescriptor>,
}

/// A [`RuleStore`] keeping rules in process memory.
///
/// Each stage is applied atomically: a stage that would leave two live
/// rules with the same table and match fails as a whole and leaves earlier
/// stages in place. Re-adding an identical rule is an upsert. Identical
/// rules of different applications are kept as one copy per owner, and
/// removals only touch the owner's copy.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    state: Mutex<StoreState>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("rule store lock poisoned".to_string()))
    }

    /// Installs rules directly, bypassing conflict checks.
    pub fn install(&self, rules: impl IntoIterator<Item = RuleDescriptor>) -> StoreResult<()> {
        let mut state = self.lock()?;
        for mut rule in rules {
            if rule.stats.is_none() {
                rule.stats = Some(EntryStats::installed_now());
            }
            state.rules.entry(rule.device_id.clone()).or_default().push(rule);
        }
        Ok(())
    }

    /// Snapshot of the rules installed on `device_id`.
    pub fn rules(&self, device_id: &DeviceId) -> StoreResult<Vec<RuleDescriptor>> {
        Ok(self.lock()?.rules.get(device_id).cloned().unwrap_or_default())
    }

    /// Successfully applied plans, in submission order.
    pub fn submissions(&self) -> StoreResult<Vec<(DeviceId, StagedOps<RuleDescriptor>)>> {
        Ok(self.lock()?.submissions.clone())
    }

    pub fn clear_submissions(&self) -> StoreResult<()> {
        self.lock()?.submissions.clear();
        Ok(())
    }

    /// Makes `fetch_owned` fail for `family`.
    pub fn fail_fetch(&self, family: TableFamily) -> StoreResult<()> {
        self.lock()?.failing_fetches.insert(family);
        Ok(())
    }

    pub fn fail_fetch_all(&self, fail: bool) -> StoreResult<()> {
        self.lock()?.fail_fetch_all = fail;
        Ok(())
    }

    pub fn fail_submit(&self, fail: bool) -> StoreResult<()> {
        self.lock()?.fail_submit = fail;
        Ok(())
    }

    /// Makes `remove_one` fail for a rule structurally equal to `rule`.
    pub fn fail_removal_of(&self, rule: RuleDescriptor) -> StoreResult<()> {
        self.lock()?.failing_removals.push(rule);
        Ok(())
    }

    /// Structurally equal and owned by the same application.
    fn same_owned(installed: &RuleDescriptor, rule: &RuleDescriptor) -> bool {
        installed == rule && installed.app_id == rule.app_id
    }

    fn apply_stage(
        installed: &mut Vec<RuleDescriptor>,
        device_id: &DeviceId,
        stage: &sonic_orch_common::Stage<RuleDescriptor>,
    ) -> StoreResult<()> {
        let mut next = installed.clone();
        for op in stage.ops().iter().filter(|op| op.kind == OpKind::Remove) {
            next.retain(|rule| !Self::same_owned(rule, &op.entry));
        }

        let mut live: HashMap<MatchKey, RuleDescriptor> =
            next.iter().map(|rule| (rule.match_key(), rule.clone())).collect();
        for op in stage.ops().iter().filter(|op| op.kind == OpKind::Add) {
            let key = op.entry.match_key();
            match live.get(&key) {
                Some(current) if *current == op.entry => {
                    // Identical rule: one copy per owner.
                    if next.iter().any(|rule| Self::same_owned(rule, &op.entry)) {
                        continue;
                    }
                }
                Some(current) => {
                    return Err(StoreError::Conflict(format!(
                        "{} conflicts with installed {} on {}",
                        op.entry, current, device_id
                    )));
                }
                None => {}
            }
            let mut rule = op.entry.clone();
            rule.device_id = device_id.clone();
            rule.stats = Some(EntryStats::installed_now());
            live.entry(key).or_insert_with(|| rule.clone());
            next.push(rule);
        }

        *installed = next;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn fetch_owned(
        &self,
        app_id: &AppId,
        device_id: &DeviceId,
        family: TableFamily,
    ) -> StoreResult<Vec<RuleDescriptor>> {
        let state = self.lock()?;
        if state.failing_fetches.contains(&family) {
            return Err(StoreError::Unavailable(format!("fetch of {} rules failed", family)));
        }
        Ok(state
            .rules
            .get(device_id)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| &r.app_id == app_id && family.contains(r.table))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_all(&self, device_id: &DeviceId) -> StoreResult<Vec<RuleDescriptor>> {
        let state = self.lock()?;
        if state.fail_fetch_all {
            return Err(StoreError::Unavailable(format!("fetch of {} rules failed", device_id)));
        }
        Ok(state.rules.get(device_id).cloned().unwrap_or_default())
    }

    async fn submit(&self, device_id: &DeviceId, plan: StagedOps<RuleDescriptor>) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.fail_submit {
            return Err(StoreError::Unavailable(format!("submit to {} failed", device_id)));
        }

        let mut installed = state.rules.remove(device_id).unwrap_or_default();
        let mut outcome = Ok(());
        for (index, stage) in plan.stages().iter().enumerate() {
            if let Err(e) = Self::apply_stage(&mut installed, device_id, stage) {
                warn!("{}: stage {} rejected: {}", device_id, index, e);
                outcome = Err(e);
                break;
            }
            debug!("{}: stage {} applied ({} ops)", device_id, index, stage.len());
        }
        state.rules.insert(device_id.clone(), installed);

        if outcome.is_ok() {
            state.submissions.push((device_id.clone(), plan));
        }
        outcome
    }

    async fn remove_one(&self, rule: &RuleDescriptor) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.failing_removals.contains(rule) {
            return Err(StoreError::Unavailable(format!("removal of {} failed", rule)));
        }
        if let Some(rules) = state.rules.get_mut(&rule.device_id) {
            rules.retain(|r| !Self::same_owned(r, rule));
        }
        Ok(())
    }
}
