// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Branch graph error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Persisted branch table failed validation
    #[error("Cannot load branch graph")]
    LoadError,
    /// Loaded table has no genesis branch
    #[error("No genesis branch in the graph")]
    NoGenesisBranch,
    /// A parentless non-genesis branch carries no parent hash
    #[error("Parent hash expected for a root branch")]
    ParentExpected,
    /// No chain is currently selected
    #[error("No current chain")]
    NoCurrentChain,
    /// Branch id does not resolve
    #[error("Branch not found")]
    BranchNotFound,
    /// Requested head branch does not exist
    #[error("Head not found")]
    HeadNotFound,
    /// Requested head branch is not synced to genesis
    #[error("Head is not synced to genesis")]
    HeadNotSynced,
    /// Parent walk exceeded the branch count
    #[error("Cycle detected in branch graph")]
    CycleDetected,
    /// Tipset cannot be stored at the given position
    #[error("Cannot store tipset")]
    StoreError,
    /// Height lies outside the relevant branch range
    #[error("Height mismatch")]
    HeightMismatch,
    /// The two branches share no ancestor
    #[error("No common root")]
    NoCommonRoot,
    /// No parent path connects the two branches
    #[error("No route between branches")]
    NoRoute,
}
