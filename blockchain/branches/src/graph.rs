// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use blocks::{Height, Tipset, TipsetHash};

use crate::branch::{Branch, HeadChanges, RenameBranch, StorePosition};
use crate::{BranchId, Error, GENESIS_BRANCH, NO_BRANCH};

/// In-memory graph of every known tipset lineage.
///
/// Branches live in an arena keyed by [`BranchId`]; all cross links
/// (`parent`, `forks`, the head and current-chain projections) are ids into
/// that arena. The graph is not internally synchronized: the owner
/// serializes access.
///
/// Mutating operations either succeed and preserve the graph invariants or
/// fail without observable change. The one exception is the cycle guard in
/// [`Branches::set_current_head`], which clears the current-chain
/// projection before reporting the error; the branch table itself stays
/// intact.
#[derive(Debug, Default)]
pub struct Branches {
    all_branches: BTreeMap<BranchId, Branch>,
    heads: BTreeMap<TipsetHash, BranchId>,
    unloaded_roots: BTreeMap<TipsetHash, BranchId>,
    genesis_branch: BranchId,
    /// Branches of the selected chain, keyed by their top height.
    current_chain: BTreeMap<Height, BranchId>,
    current_top_branch: BranchId,
    current_height: Height,
}

impl Branches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.all_branches.is_empty()
    }

    /// Current heads, keyed by their top tipset hash. Unsynced heads are
    /// included.
    pub fn heads(&self) -> &BTreeMap<TipsetHash, BranchId> {
        &self.heads
    }

    /// Iterates over every branch in the graph, in id order.
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.all_branches.values()
    }

    pub fn current_top_branch(&self) -> BranchId {
        self.current_top_branch
    }

    pub fn current_height(&self) -> Height {
        self.current_height
    }

    pub fn get_branch(&self, id: BranchId) -> Result<&Branch, Error> {
        self.all_branches.get(&id).ok_or(Error::BranchNotFound)
    }

    /// Walks parent links from `id` up to the parentless root of its
    /// lineage: the genesis branch or an unloaded root.
    pub fn get_root_branch(&self, mut id: BranchId) -> Result<&Branch, Error> {
        let mut cycle_guard = self.all_branches.len() + 1;
        loop {
            let info = self.get_branch(id)?;
            if info.parent == NO_BRANCH {
                return Ok(info);
            }
            cycle_guard -= 1;
            if cycle_guard == 0 {
                return Err(Error::CycleDetected);
            }
            id = info.parent;
        }
    }

    /// Resolves the branch covering `height` on the currently selected
    /// chain. Heights above the selected one are not covered: they resolve
    /// to [`Error::BranchNotFound`] or [`NO_BRANCH`] depending on
    /// `must_exist`.
    pub fn branch_at_height(&self, height: Height, must_exist: bool) -> Result<BranchId, Error> {
        if self.current_chain.is_empty() {
            return Err(Error::NoCurrentChain);
        }

        if height > self.current_height {
            return if must_exist {
                Err(Error::BranchNotFound)
            } else {
                Ok(NO_BRANCH)
            };
        }

        if let Some(genesis) = self.all_branches.get(&self.genesis_branch) {
            if height <= genesis.top_height {
                return Ok(GENESIS_BRANCH);
            }
        }

        match self.current_chain.range(height..).next() {
            Some((_, &id)) => Ok(id),
            None if must_exist => Err(Error::BranchNotFound),
            None => Ok(NO_BRANCH),
        }
    }

    /// Finds the deepest branch lying on both chains, walking whichever
    /// side starts lower at each step.
    pub fn common_root(&self, mut a: BranchId, mut b: BranchId) -> Result<&Branch, Error> {
        if a == NO_BRANCH || b == NO_BRANCH {
            return Err(Error::NoCommonRoot);
        }

        let mut branch_a = self.get_branch(a)?;
        let mut branch_b = self.get_branch(b)?;

        while a != b {
            if branch_a.bottom_height <= branch_b.bottom_height {
                b = branch_b.parent;
                if b == NO_BRANCH {
                    return Err(Error::NoCommonRoot);
                }
                branch_b = self.get_branch(b)?;
            } else {
                a = branch_a.parent;
                if a == NO_BRANCH {
                    return Err(Error::NoCommonRoot);
                }
                branch_a = self.get_branch(a)?;
            }
        }

        Ok(branch_a)
    }

    /// Collects the branch ids connecting `from` down to `to` through
    /// parent links. The result starts with `from` and ends with `to`.
    pub fn route(&self, from: BranchId, to: BranchId) -> Result<Vec<BranchId>, Error> {
        if from == NO_BRANCH || to == NO_BRANCH {
            return Err(Error::NoRoute);
        }

        let mut route = Vec::new();

        if from == to {
            route.push(from);
            return Ok(route);
        }

        let mut cursor = to;
        let mut route_found = false;
        loop {
            route.push(cursor);
            let info = self.get_branch(cursor)?;
            cursor = info.parent;
            if cursor == from {
                route_found = true;
                break;
            }
            if cursor == NO_BRANCH || cursor == GENESIS_BRANCH {
                break;
            }
        }

        if !route_found {
            return Err(Error::NoRoute);
        }

        route.push(from);
        route.reverse();
        Ok(route)
    }

    /// Selects the active chain: the ancestry of `head_branch`, trimmed at
    /// `height`. Passing [`NO_BRANCH`] clears the selection.
    pub fn set_current_head(&mut self, head_branch: BranchId, height: Height) -> Result<(), Error> {
        if head_branch == NO_BRANCH {
            self.current_chain.clear();
            self.current_top_branch = NO_BRANCH;
            self.current_height = 0;
            return Ok(());
        }

        if self.current_top_branch == head_branch {
            if self.current_height != height {
                let top = self
                    .current_chain
                    .values()
                    .next_back()
                    .and_then(|id| self.all_branches.get(id))
                    .ok_or(Error::NoCurrentChain)?;
                if top.top_height < height || top.bottom_height > height {
                    return Err(Error::HeightMismatch);
                }
                self.current_height = height;
            }
            return Ok(());
        }

        let info = self
            .all_branches
            .get(&head_branch)
            .ok_or(Error::HeadNotFound)?;
        if !info.synced_to_genesis {
            return Err(Error::HeadNotSynced);
        }
        if info.top_height < height || info.bottom_height > height {
            return Err(Error::HeightMismatch);
        }

        self.current_height = height;
        self.current_chain.clear();
        self.current_top_branch = head_branch;

        // guard against a cycle in the graph: index inconsistency
        let mut cycle_guard = self.all_branches.len() + 1;
        self.current_chain.insert(info.top_height, head_branch);

        let mut parent = info.parent;
        while parent != NO_BRANCH {
            cycle_guard -= 1;
            if cycle_guard == 0 {
                self.current_chain.clear();
                return Err(Error::CycleDetected);
            }
            let Some(branch) = self.all_branches.get(&parent) else {
                self.current_chain.clear();
                return Err(Error::BranchNotFound);
            };
            self.current_chain.insert(branch.top_height, branch.id);
            parent = branch.parent;
        }

        Ok(())
    }

    /// Computes where a tipset would be inserted, without mutating the
    /// graph. `parent_branch`/`parent_height` locate the parent tipset when
    /// the host's index already knows it, [`NO_BRANCH`] otherwise.
    pub fn find_store_position(
        &self,
        tipset: &Tipset,
        parent_hash: &TipsetHash,
        parent_branch: BranchId,
        parent_height: Height,
    ) -> Result<StorePosition, Error> {
        let mut pos = StorePosition::default();

        let height = tipset.height();
        let hash = tipset.hash();

        if height == 0 {
            // inserting genesis
            if !self.is_empty() {
                return Err(Error::StoreError);
            }
            pos.assigned_branch = GENESIS_BRANCH;
            return Ok(pos);
        }

        if let Some(&id) = self.unloaded_roots.get(&hash) {
            // the tipset will be linked below a waiting subgraph
            pos.at_bottom_of_branch = id;
            pos.assigned_branch = id;
        }

        let mut next_id = self.new_branch_id();

        if parent_branch != NO_BRANCH {
            if parent_height >= height {
                return Err(Error::HeightMismatch);
            }
            let info = self.get_branch(parent_branch)?;
            if parent_height > info.top_height || parent_height < info.bottom_height {
                return Err(Error::HeightMismatch);
            }

            pos.on_top_of_branch = parent_branch;

            if parent_height != info.top_height {
                // the parent tipset is interior: the branch splits above it
                pos.rename = Some(RenameBranch {
                    old_id: parent_branch,
                    new_id: next_id,
                    above_height: parent_height,
                    split: true,
                });
                next_id += 1;
            } else if info.forks.is_empty() {
                debug_assert_eq!(&info.top, parent_hash);
                pos.assigned_branch = parent_branch;
                if pos.at_bottom_of_branch != NO_BRANCH {
                    // the waiting branch merges into the head by renaming
                    pos.rename = Some(RenameBranch {
                        old_id: pos.at_bottom_of_branch,
                        new_id: parent_branch,
                        above_height: 0,
                        split: false,
                    });
                }
            }
        }

        if pos.assigned_branch == NO_BRANCH {
            pos.assigned_branch = next_id;
        }

        Ok(pos)
    }

    /// Executes the split decided by [`Branches::find_store_position`]: the
    /// branch is shortened to end at `above_height` with `new_top`, and a
    /// fresh branch under the rename's new id carries the detached tail
    /// starting at `new_bottom`.
    pub fn split_branch(
        &mut self,
        new_top: &TipsetHash,
        new_bottom: &TipsetHash,
        new_bottom_height: Height,
        rename: &RenameBranch,
    ) -> Result<(), Error> {
        if !rename.split
            || rename.old_id == NO_BRANCH
            || rename.new_id == NO_BRANCH
            || rename.new_id == rename.old_id
            || self.all_branches.contains_key(&rename.new_id)
        {
            return Err(Error::StoreError);
        }

        let source = self
            .all_branches
            .get(&rename.old_id)
            .ok_or(Error::BranchNotFound)?;
        if source.top_height <= rename.above_height
            || source.bottom_height > rename.above_height
            || new_bottom_height > source.top_height
            || new_bottom_height <= rename.above_height
        {
            return Err(Error::HeightMismatch);
        }

        let mut fork = source.clone();

        let was_head = self.heads.get(&fork.top) == Some(&rename.old_id);
        if was_head {
            self.heads.remove(&fork.top);
        }
        let mut in_current_chain = false;
        if !self.current_chain.is_empty()
            && fork.synced_to_genesis
            && self.current_chain.get(&fork.top_height) == Some(&rename.old_id)
        {
            self.current_chain.remove(&fork.top_height);
            in_current_chain = true;
        }

        fork.id = rename.new_id;
        fork.bottom = new_bottom.clone();
        fork.bottom_height = new_bottom_height;
        fork.parent = rename.old_id;
        // the detached tail inherits the old branch's children
        for id in fork.forks.clone() {
            if let Some(child) = self.all_branches.get_mut(&id) {
                child.parent = fork.id;
            }
        }

        if let Some(shortened) = self.all_branches.get_mut(&rename.old_id) {
            shortened.top = new_top.clone();
            shortened.top_height = rename.above_height;
            shortened.forks.clear();
            shortened.forks.insert(fork.id);
        }

        if was_head {
            self.heads.insert(fork.top.clone(), fork.id);
        }
        if in_current_chain {
            self.current_chain.insert(rename.above_height, rename.old_id);
            self.current_chain.insert(fork.top_height, fork.id);
        }

        self.all_branches.insert(fork.id, fork);
        Ok(())
    }

    /// Stores the genesis tipset into an empty graph.
    pub fn store_genesis(&mut self, genesis_tipset: &Tipset) -> Result<(), Error> {
        if !self.is_empty() {
            return Err(Error::StoreError);
        }
        let pos = StorePosition {
            assigned_branch: GENESIS_BRANCH,
            ..Default::default()
        };
        self.store_tipset(genesis_tipset, &TipsetHash::default(), &pos)?;
        Ok(())
    }

    /// Commits a tipset at the position computed by
    /// [`Branches::find_store_position`] (after any required
    /// [`Branches::split_branch`]). A position that no longer matches the
    /// graph fails with [`Error::StoreError`] before anything is mutated.
    pub fn store_tipset(
        &mut self,
        tipset: &Tipset,
        parent_hash: &TipsetHash,
        pos: &StorePosition,
    ) -> Result<HeadChanges, Error> {
        let mut changes = HeadChanges::default();

        let height = tipset.height();
        let hash = tipset.hash();

        let new_standalone_branch =
            pos.at_bottom_of_branch == NO_BRANCH && pos.on_top_of_branch == NO_BRANCH;
        if new_standalone_branch {
            self.new_branch(&hash, height, parent_hash, pos)?;
            return Ok(changes);
        }

        if height == 0 || parent_hash.is_empty() {
            return Err(Error::StoreError);
        }

        // Validation pass: a stale position fails here, before the first
        // mutation.
        let linking_bottom = pos.at_bottom_of_branch != NO_BRANCH;
        if linking_bottom {
            let id = *self.unloaded_roots.get(&hash).ok_or(Error::StoreError)?;
            if id != pos.at_bottom_of_branch {
                return Err(Error::StoreError);
            }
            let waiting = self.get_branch(id).map_err(|_| Error::StoreError)?;
            if waiting.bottom_height <= height || waiting.parent != NO_BRANCH {
                return Err(Error::StoreError);
            }
        }
        if pos.on_top_of_branch != NO_BRANCH {
            if pos.assigned_branch == pos.on_top_of_branch {
                let head_id = *self.heads.get(parent_hash).ok_or(Error::StoreError)?;
                if head_id != pos.on_top_of_branch {
                    return Err(Error::StoreError);
                }
                let parent = self.get_branch(head_id).map_err(|_| Error::StoreError)?;
                if parent.top_height >= height || !parent.forks.is_empty() {
                    return Err(Error::StoreError);
                }
            } else {
                let parent = self
                    .get_branch(pos.on_top_of_branch)
                    .map_err(|_| Error::StoreError)?;
                if parent.top != *parent_hash
                    || parent.forks.is_empty()
                    || self.heads.contains_key(parent_hash)
                {
                    return Err(Error::StoreError);
                }
                if !linking_bottom && self.all_branches.contains_key(&pos.assigned_branch) {
                    return Err(Error::StoreError);
                }
            }
        }

        let mut linked_to_bottom = NO_BRANCH;

        if linking_bottom {
            // the tipset becomes the new bottom of the waiting branch
            self.unloaded_roots.remove(&hash);
            if let Some(waiting) = self.all_branches.get_mut(&pos.at_bottom_of_branch) {
                waiting.bottom_height = height;
                waiting.bottom = hash.clone();
                waiting.parent_hash = parent_hash.clone();
            }
            linked_to_bottom = pos.at_bottom_of_branch;

            if pos.on_top_of_branch == NO_BRANCH {
                // still waiting, now for this tipset's parent
                self.unloaded_roots
                    .insert(parent_hash.clone(), linked_to_bottom);
                return Ok(changes);
            }
        }

        if pos.assigned_branch == pos.on_top_of_branch {
            // linking without fork
            let parent_id = match self.heads.remove(parent_hash) {
                Some(id) => id,
                None => return Err(Error::StoreError),
            };

            if linked_to_bottom == NO_BRANCH {
                // appending the tipset on top of a head
                let notify = match self.all_branches.get_mut(&parent_id) {
                    Some(parent) => {
                        parent.top_height = height;
                        parent.top = hash.clone();
                        parent.synced_to_genesis
                    }
                    None => return Err(Error::StoreError),
                };
                self.heads.insert(hash.clone(), parent_id);
                if notify {
                    changes.removed.push(parent_hash.clone());
                    changes.added.push(hash.clone());
                }
            } else {
                // merging branches by renaming the waiting branch away
                let notify = self
                    .all_branches
                    .get(&parent_id)
                    .map_or(false, |b| b.synced_to_genesis);
                if notify {
                    changes.removed.push(parent_hash.clone());
                }
                self.merge_branches(linked_to_bottom, parent_id, &mut changes);
            }

            return Ok(changes);
        }

        // fork from the top of a non-head branch
        if linked_to_bottom == NO_BRANCH {
            self.new_branch(&hash, height, parent_hash, pos)?;
            // the fresh branch has a live parent; it is not a waiting root
            self.unloaded_roots.remove(parent_hash);
            linked_to_bottom = pos.assigned_branch;
        }

        let parent_synced = match self.all_branches.get_mut(&pos.on_top_of_branch) {
            Some(parent) => {
                parent.forks.insert(pos.assigned_branch);
                parent.synced_to_genesis
            }
            None => return Err(Error::StoreError),
        };
        if let Some(child) = self.all_branches.get_mut(&linked_to_bottom) {
            child.parent = pos.on_top_of_branch;
        }
        self.update_heads(linked_to_bottom, parent_synced, &mut changes);

        Ok(changes)
    }

    /// Resets the graph to empty.
    pub fn clear(&mut self) {
        self.all_branches.clear();
        self.heads.clear();
        self.unloaded_roots.clear();
        self.genesis_branch = NO_BRANCH;
        self.current_chain.clear();
        self.current_top_branch = NO_BRANCH;
        self.current_height = 0;
    }

    /// Rebuilds the graph from persisted branch rows. Validation failures
    /// leave the graph empty so the host can refuse to start on a corrupt
    /// index. Returns the head changes of the synced subtree.
    pub fn init(&mut self, mut rows: BTreeMap<BranchId, Branch>) -> Result<HeadChanges, Error> {
        self.clear();

        let mut changes = HeadChanges::default();

        if rows.is_empty() {
            return Ok(changes);
        }

        for branch in rows.values_mut() {
            // neither forks nor sync flags are trusted from storage; both
            // are recomputed from the parent edges below
            branch.forks.clear();
            branch.synced_to_genesis = false;
        }

        let mut fork_edges = Vec::new();
        let mut waiting_roots = Vec::new();
        let mut genesis = NO_BRANCH;

        for (&id, branch) in &rows {
            if id != branch.id || id == NO_BRANCH {
                log::error!("cannot load graph: inconsistent branch id {}", id);
                return Err(Error::LoadError);
            }

            if branch.top_height < branch.bottom_height {
                log::error!(
                    "cannot load graph: heights inconsistent ({} and {}) for id {}",
                    branch.top_height,
                    branch.bottom_height,
                    id
                );
                return Err(Error::LoadError);
            }

            if branch.parent != NO_BRANCH {
                if branch.parent == id {
                    log::error!(
                        "cannot load graph: parent and branch id are the same ({})",
                        id
                    );
                    return Err(Error::LoadError);
                }
                let Some(parent) = rows.get(&branch.parent) else {
                    log::error!(
                        "cannot load graph: parent {} not found for branch {}",
                        branch.parent,
                        id
                    );
                    return Err(Error::LoadError);
                };
                if parent.top_height >= branch.bottom_height {
                    log::error!(
                        "cannot load graph: parent height inconsistent ({} and {}) for id {} and parent {}",
                        branch.bottom_height,
                        parent.top_height,
                        id,
                        branch.parent
                    );
                    return Err(Error::LoadError);
                }
                fork_edges.push((branch.parent, id));
            } else if id == GENESIS_BRANCH {
                genesis = id;
            } else if branch.parent_hash.is_empty() {
                log::error!("cannot load graph: expected parent hash for branch id={}", id);
                return Err(Error::ParentExpected);
            } else {
                waiting_roots.push((branch.parent_hash.clone(), id));
            }
        }

        if genesis == NO_BRANCH {
            return Err(Error::NoGenesisBranch);
        }

        for (parent, child) in fork_edges {
            if let Some(p) = rows.get_mut(&parent) {
                p.forks.insert(child);
            }
        }

        self.all_branches = rows;
        self.genesis_branch = genesis;
        for (hash, id) in waiting_roots {
            self.unloaded_roots.insert(hash, id);
        }

        self.update_heads(genesis, true, &mut changes);

        // unsynced heads are tracked too, without emitting events
        let unsynced: Vec<(BranchId, TipsetHash)> = self
            .all_branches
            .values()
            .filter(|b| b.forks.is_empty() && !b.synced_to_genesis)
            .map(|b| (b.id, b.top.clone()))
            .collect();
        for (id, top) in unsynced {
            self.heads.insert(top, id);
        }

        for branch in self.all_branches.values() {
            if branch.forks.len() == 1 {
                // transient state between a split and its paired store,
                // should never have been persisted
                log::warn!(
                    "inconsistent # of forks (1) for branch {}, must be merged",
                    branch.id
                );
            }
        }

        Ok(changes)
    }

    /// Creates a branch holding the single tipset `hash`. A branch with a
    /// non-empty parent hash starts out as a waiting root.
    fn new_branch(
        &mut self,
        hash: &TipsetHash,
        height: Height,
        parent_hash: &TipsetHash,
        pos: &StorePosition,
    ) -> Result<(), Error> {
        if pos.assigned_branch == NO_BRANCH
            || self.all_branches.contains_key(&pos.assigned_branch)
        {
            return Err(Error::StoreError);
        }

        let mut branch = Branch {
            id: pos.assigned_branch,
            top: hash.clone(),
            top_height: height,
            bottom: hash.clone(),
            bottom_height: height,
            parent_hash: parent_hash.clone(),
            ..Default::default()
        };

        if parent_hash.is_empty() {
            // here is genesis
            if pos.assigned_branch != GENESIS_BRANCH || height != 0 {
                return Err(Error::StoreError);
            }
            branch.synced_to_genesis = true;
            self.genesis_branch = branch.id;
        } else {
            if height == 0 {
                return Err(Error::StoreError);
            }
            self.unloaded_roots.insert(parent_hash.clone(), branch.id);
        }

        self.heads.insert(hash.clone(), branch.id);
        self.all_branches.insert(branch.id, branch);
        Ok(())
    }

    /// Absorbs `child_id` into `parent_id`: the parent's top advances to
    /// the child's, the child's forks are inherited and re-parented, and
    /// the child id disappears from the graph.
    fn merge_branches(
        &mut self,
        child_id: BranchId,
        parent_id: BranchId,
        changes: &mut HeadChanges,
    ) {
        let Some(child) = self.all_branches.remove(&child_id) else {
            return;
        };
        let parent_synced = match self.all_branches.get_mut(&parent_id) {
            Some(parent) => {
                parent.top_height = child.top_height;
                parent.top = child.top.clone();
                parent.forks = child.forks.clone();
                parent.synced_to_genesis
            }
            None => return,
        };
        for &fork in &child.forks {
            if let Some(f) = self.all_branches.get_mut(&fork) {
                f.parent = parent_id;
            }
        }
        self.update_heads(parent_id, parent_synced, changes);
    }

    /// Recursive subtree walk: marks every visited branch with `synced` and
    /// registers fork-less branches as heads, emitting `added` entries on
    /// the synced side. Idempotent.
    fn update_heads(&mut self, id: BranchId, synced: bool, changes: &mut HeadChanges) {
        let (top, forks) = {
            let Some(branch) = self.all_branches.get_mut(&id) else {
                return;
            };
            branch.synced_to_genesis = synced;
            (branch.top.clone(), branch.forks.iter().copied().collect::<Vec<_>>())
        };
        if forks.is_empty() {
            self.heads.insert(top.clone(), id);
            if synced {
                changes.added.push(top);
            }
        } else {
            for fork in forks {
                self.update_heads(fork, synced, changes);
            }
        }
    }

    fn new_branch_id(&self) -> BranchId {
        match self.all_branches.keys().next_back() {
            Some(&max) => max + 1,
            None => GENESIS_BRANCH + 1,
        }
    }
}
