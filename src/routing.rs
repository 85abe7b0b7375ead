//! Signal routing — the instrument's output path through its track's
//! effects chain.
//!
//! The effective path is always
//! `bank → pre (pan/vol) → chain[0] → … → chain[n-1] → master`,
//! or `bank → master` right after mount.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::backend::AudioBackend;
use crate::error::RoutingError;

// ── Effects Chain ───────────────────────────────────────────

/// Shared, ordered list of effect stages owned by a track.
///
/// Cloning shares the same chain object. Mutating through any clone is
/// visible through all of them and keeps the object's identity, but bumps
/// its revision.
pub struct EffectsChain<S> {
    inner: Rc<ChainInner<S>>,
}

struct ChainInner<S> {
    stages: RefCell<Vec<S>>,
    revision: Cell<u64>,
}

impl<S> EffectsChain<S> {
    pub fn new(stages: Vec<S>) -> Self {
        Self::with_revision(stages, 0)
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_revision(stages: Vec<S>, revision: u64) -> Self {
        EffectsChain {
            inner: Rc::new(ChainInner {
                stages: RefCell::new(stages),
                revision: Cell::new(revision),
            }),
        }
    }

    /// A new chain object replacing this one after a structural change.
    pub fn next_revision(&self, stages: Vec<S>) -> Self {
        Self::with_revision(stages, self.revision() + 1)
    }

    pub fn revision(&self) -> u64 {
        self.inner.revision.get()
    }

    pub fn stages(&self) -> Ref<'_, Vec<S>> {
        self.inner.stages.borrow()
    }

    pub fn len(&self) -> usize {
        self.inner.stages.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if both handles point at the same chain object.
    pub fn same_object(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn push(&self, stage: S) {
        self.inner.stages.borrow_mut().push(stage);
        self.bump();
    }

    pub fn remove(&self, index: usize) -> Option<S> {
        let mut stages = self.inner.stages.borrow_mut();
        if index >= stages.len() {
            return None;
        }
        let stage = stages.remove(index);
        drop(stages);
        self.bump();
        Some(stage)
    }

    pub fn clear(&self) {
        self.inner.stages.borrow_mut().clear();
        self.bump();
    }

    pub fn set_stages(&self, stages: Vec<S>) {
        *self.inner.stages.borrow_mut() = stages;
        self.bump();
    }

    fn bump(&self) {
        self.inner.revision.set(self.revision() + 1);
    }
}

impl<S: Clone> EffectsChain<S> {
    /// Copy of the current stages.
    pub fn snapshot(&self) -> Vec<S> {
        self.inner.stages.borrow().clone()
    }
}

impl<S> Clone for EffectsChain<S> {
    fn clone(&self) -> Self {
        EffectsChain {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S> Default for EffectsChain<S> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<S: fmt::Debug> fmt::Debug for EffectsChain<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectsChain")
            .field("stages", &*self.inner.stages.borrow())
            .field("revision", &self.revision())
            .finish()
    }
}

// ── Change Detection ────────────────────────────────────────

/// How a new effects chain is judged to differ from the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainPolicy {
    /// Rebuild when the chain object changes, whatever its contents.
    /// In-place edits of the same object are not seen.
    #[default]
    Identity,
    /// Rebuild when the container-owned revision number changes.
    Revision,
}

impl ChainPolicy {
    pub fn changed<S>(self, previous: &EffectsChain<S>, current: &EffectsChain<S>) -> bool {
        match self {
            ChainPolicy::Identity => !previous.same_object(current),
            ChainPolicy::Revision => previous.revision() != current.revision(),
        }
    }
}

// ── Route ───────────────────────────────────────────────────

/// One node on the instrument's output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// The pan/volume stage heading the chain.
    Pre,
    /// Effect stage at this index of the applied chain.
    Stage(usize),
    Master,
}

/// The instrument's current output path and the handles behind it.
#[derive(Debug, Clone)]
pub struct Route<S> {
    pre: Option<S>,
    stages: Vec<S>,
}

impl<S> Route<S> {
    /// Straight to master, no pre stage.
    pub fn direct() -> Self {
        Route {
            pre: None,
            stages: Vec::new(),
        }
    }

    pub fn hops(&self) -> Vec<Hop> {
        let mut hops = Vec::with_capacity(self.stages.len() + 2);
        if self.pre.is_some() {
            hops.push(Hop::Pre);
        }
        hops.extend((0..self.stages.len()).map(Hop::Stage));
        hops.push(Hop::Master);
        hops
    }

    pub fn pre_stage(&self) -> Option<&S> {
        self.pre.as_ref()
    }

    pub fn stages(&self) -> &[S] {
        &self.stages
    }

    pub fn is_direct(&self) -> bool {
        self.pre.is_none() && self.stages.is_empty()
    }
}

impl<S: Clone> Route<S> {
    /// Nodes between the bank and master, in order.
    fn path(&self) -> Vec<S> {
        self.pre.iter().chain(self.stages.iter()).cloned().collect()
    }
}

// ── Host Key Cache ──────────────────────────────────────────

/// Maps host-side chain values (e.g. JS arrays) onto [`EffectsChain`]
/// objects so host identity becomes chain identity.
///
/// Keys are compared with `==`, which for JS values is `===`. Only the
/// keys of the last resolved update are remembered.
pub struct ChainCache<K, S> {
    entries: Vec<(K, EffectsChain<S>)>,
}

impl<K: PartialEq + Clone, S> ChainCache<K, S> {
    pub fn new() -> Self {
        ChainCache {
            entries: Vec::new(),
        }
    }

    /// Chains for one update's previous and current keys.
    ///
    /// Equal keys always yield the same chain object; a key seen in the
    /// last update yields the chain it had then. `build` turns an unseen key
    /// into its stages.
    pub fn resolve<E>(
        &mut self,
        previous: &K,
        current: &K,
        mut build: impl FnMut(&K) -> Result<Vec<S>, E>,
    ) -> Result<(EffectsChain<S>, EffectsChain<S>), E> {
        let prev_chain = match self.lookup(previous) {
            Some(chain) => chain,
            None => EffectsChain::new(build(previous)?),
        };
        let cur_chain = if current == previous {
            prev_chain.clone()
        } else {
            match self.lookup(current) {
                Some(chain) => chain,
                None => EffectsChain::new(build(current)?),
            }
        };

        self.entries = vec![
            (previous.clone(), prev_chain.clone()),
            (current.clone(), cur_chain.clone()),
        ];
        Ok((prev_chain, cur_chain))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn lookup(&self, key: &K) -> Option<EffectsChain<S>> {
        self.entries
            .iter()
            .find(|(seen, _)| seen == key)
            .map(|(_, chain)| chain.clone())
    }
}

impl<K: PartialEq + Clone, S> Default for ChainCache<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Router ──────────────────────────────────────────────────

/// Owns the instrument's current route and rebuilds it on request.
pub struct SignalRouter<S> {
    policy: ChainPolicy,
    pan: f64,
    volume: f64,
    route: Route<S>,
    rebuilds: usize,
}

impl<S: Clone> SignalRouter<S> {
    pub fn new(policy: ChainPolicy, pan: f64, volume: f64) -> Self {
        SignalRouter {
            policy,
            pan,
            volume,
            route: Route::direct(),
            rebuilds: 0,
        }
    }

    pub fn policy(&self) -> ChainPolicy {
        self.policy
    }

    pub fn route(&self) -> &Route<S> {
        &self.route
    }

    /// Number of successful rebuilds so far.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    pub fn needs_rebuild(&self, previous: &EffectsChain<S>, current: &EffectsChain<S>) -> bool {
        self.policy.changed(previous, current)
    }

    /// Connect the freshly created bank straight to master.
    pub fn connect_direct<B>(&mut self, backend: &mut B, bank: &B::Bank) -> Result<(), RoutingError>
    where
        B: AudioBackend<Stage = S>,
    {
        let master = backend.master();
        backend.disconnect_all(bank);
        backend.connect_serial(bank, &[], &master)?;
        self.route = Route::direct();
        Ok(())
    }

    /// Rebuild the route through `chain` if the policy says it changed.
    /// Returns whether a rebuild happened.
    pub fn update<B>(
        &mut self,
        backend: &mut B,
        bank: &B::Bank,
        previous: &EffectsChain<S>,
        current: &EffectsChain<S>,
    ) -> Result<bool, RoutingError>
    where
        B: AudioBackend<Stage = S>,
    {
        if !self.needs_rebuild(previous, current) {
            return Ok(false);
        }
        self.rebuild(backend, bank, &current.snapshot())?;
        Ok(true)
    }

    /// Tear down the current route and connect through `stages`.
    ///
    /// On failure the previous route is left (or put back) in place.
    pub fn rebuild<B>(
        &mut self,
        backend: &mut B,
        bank: &B::Bank,
        stages: &[S],
    ) -> Result<(), RoutingError>
    where
        B: AudioBackend<Stage = S>,
    {
        if let Some(index) = stages.iter().position(|s| !backend.validate_stage(s)) {
            return Err(RoutingError::InvalidStage { index });
        }

        let pre = backend.create_pre_stage(self.pan, self.volume)?;
        let master = backend.master();
        let mut path = Vec::with_capacity(stages.len() + 1);
        path.push(pre.clone());
        path.extend_from_slice(stages);

        backend.disconnect_all(bank);
        if let Err(e) = backend.connect_serial(bank, &path, &master) {
            backend.disconnect_all(bank);
            if let Err(restore) = backend.connect_serial(bank, &self.route.path(), &master) {
                warn!("could not restore previous route: {restore}");
            }
            backend.dispose_stage(pre);
            return Err(e);
        }

        debug!("rerouted through {} effect stage(s)", stages.len());
        let old = std::mem::replace(
            &mut self.route,
            Route {
                pre: Some(pre),
                stages: stages.to_vec(),
            },
        );
        if let Some(old_pre) = old.pre {
            backend.dispose_stage(old_pre);
        }
        self.rebuilds += 1;
        Ok(())
    }

    /// Disconnect the bank and free the pre stage.
    pub fn teardown<B>(&mut self, backend: &mut B, bank: &B::Bank)
    where
        B: AudioBackend<Stage = S>,
    {
        backend.disconnect_all(bank);
        if let Some(pre) = std::mem::replace(&mut self.route, Route::direct()).pre {
            backend.dispose_stage(pre);
        }
    }
}
