// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeSet;

use blocks::{Height, TipsetHash};
use serde::{Deserialize, Serialize};

use crate::BranchId;

/// A contiguous run of tipsets with no fork between them: the atomic unit
/// of the branch graph. Rows of this shape are what the host's index table
/// persists; the `forks` set is rebuilt from parent edges on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    /// Highest tipset in the branch.
    pub top: TipsetHash,
    pub top_height: Height,
    /// Lowest tipset in the branch.
    pub bottom: TipsetHash,
    pub bottom_height: Height,
    /// Branch one below, or [`NO_BRANCH`](crate::NO_BRANCH).
    pub parent: BranchId,
    /// Hash of the tipset one below `bottom`; empty only for the genesis
    /// branch.
    pub parent_hash: TipsetHash,
    /// Whether the parent chain reaches the genesis branch.
    pub synced_to_genesis: bool,
    /// Ids of the branches attached at `top`.
    #[serde(skip)]
    pub forks: BTreeSet<BranchId>,
}

/// Instruction to re-key index rows from one branch id to another, produced
/// by [`Branches::find_store_position`](crate::Branches::find_store_position).
/// With `split` set, the graph itself must be split via
/// [`Branches::split_branch`](crate::Branches::split_branch) before the
/// tipset is stored; otherwise the rename is carried out by the store call
/// merging the branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenameBranch {
    pub old_id: BranchId,
    pub new_id: BranchId,
    pub above_height: Height,
    pub split: bool,
}

/// Where a tipset will land in the graph. Computed without mutating so the
/// host can persist index rows before committing the graph change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePosition {
    pub assigned_branch: BranchId,
    pub at_bottom_of_branch: BranchId,
    pub on_top_of_branch: BranchId,
    pub rename: Option<RenameBranch>,
}

/// Head hashes that stopped and started being heads as the result of one
/// store operation. Only changes on the synced-to-genesis side are emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadChanges {
    pub removed: Vec<TipsetHash>,
    pub added: Vec<TipsetHash>,
}

impl HeadChanges {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}
