//! Version history as a DAG of operation batches, with named branches.
//!
//! Every version node holds the operations that turn its parent's document
//! into its own. The root holds nothing and is the empty document. A branch
//! is a named chain of versions from the root to its head; branches fork by
//! copying a chain and join through [`VersionGraph::merge_branch`].
//!
//! Documents are not stored. [`VersionGraph::document_at_version`] replays
//! the chain from the root, O(total operations).
//!
//! Each ordered (source, target) pair remembers where its last merge left
//! off: the source version merged, the target version that received it, and
//! the target's changes the source still lacks, expressed on the source's
//! document. A later merge of the same pair starts from there, so versions
//! already merged are never merged twice.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::conflict::Conflict;
use crate::conflict::ConflictResolver;
use crate::crdt::primitives::UserId;
use crate::error::Error;
use crate::error::Result;
use crate::op::Operation;
use crate::ot::rebase;
use crate::presence::now_ms;

/// The name of the branch every graph starts with.
pub const MAIN: &str = "main";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "v{}", self.0);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub u64);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "b{}", self.0);
    }
}

/// One point in history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionNode {
    pub version_id: VersionId,
    /// Applied in order on top of the parent's document.
    pub operations: Vec<Operation>,
    /// None only for the root.
    pub parent_version_id: Option<VersionId>,
    pub author: UserId,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// The source head, on the node that completed a merge.
    pub merged_from: Option<VersionId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchState {
    Active,
    MergedInto(BranchId),
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: BranchId,
    pub name: String,
    pub head_version_id: VersionId,
    /// Root first, head last.
    pub versions: Vec<VersionId>,
    pub state: BranchState,
}

/// The outcome of [`VersionGraph::merge_branch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeResult {
    /// The target now contains the source's changes.
    Merged {
        head: VersionId,
        /// Versions added to the target, in order.
        appended: Vec<VersionId>,
    },
    /// Nothing changed; resolve these and call
    /// [`VersionGraph::complete_merge`].
    Conflicts(Vec<Conflict>),
}

/// Where the last merge of one branch into another left off.
#[derive(Clone, Debug)]
struct MergeBase {
    /// The source version already merged.
    source_version: VersionId,
    /// The target version that holds it.
    target_version: VersionId,
    /// Turns the document at `source_version` into the one at
    /// `target_version`.
    bridge: Vec<Operation>,
}

/// Versions and branches of one document.
#[derive(Clone, Debug)]
pub struct VersionGraph {
    resolver: ConflictResolver,
    /// Indexed by version id.
    versions: Vec<VersionNode>,
    /// Indexed by branch id.
    branches: Vec<Branch>,
    /// Keyed by (source, target).
    merge_bases: FxHashMap<(BranchId, BranchId), MergeBase>,
}

impl VersionGraph {
    /// A graph holding only the root version and the `main` branch.
    pub fn new(resolver: ConflictResolver) -> VersionGraph {
        let root = VersionNode {
            version_id: VersionId(0),
            operations: Vec::new(),
            parent_version_id: None,
            author: UserId::new(),
            created_at: now_ms(),
            merged_from: None,
        };
        let main = Branch {
            branch_id: BranchId(0),
            name: MAIN.to_string(),
            head_version_id: root.version_id,
            versions: vec![root.version_id],
            state: BranchState::Active,
        };
        return VersionGraph { resolver, versions: vec![root], branches: vec![main], merge_bases: FxHashMap::default() };
    }

    pub fn root(&self) -> VersionId {
        return VersionId(0);
    }

    pub fn main(&self) -> BranchId {
        return BranchId(0);
    }

    pub fn version(&self, id: VersionId) -> Result<&VersionNode> {
        return self.versions.get(id.0 as usize).ok_or(Error::UnknownVersion(id));
    }

    pub fn branch(&self, id: BranchId) -> Result<&Branch> {
        return self.branches.get(id.0 as usize).ok_or(Error::UnknownBranch(id));
    }

    fn branch_mut(&mut self, id: BranchId) -> Result<&mut Branch> {
        return self.branches.get_mut(id.0 as usize).ok_or(Error::UnknownBranch(id));
    }

    pub fn branch_by_name(&self, name: &str) -> Option<&Branch> {
        return self.branches.iter().find(|b| b.name == name);
    }

    pub fn branches(&self) -> &[Branch] {
        return &self.branches;
    }

    pub fn head(&self, branch: BranchId) -> Result<VersionId> {
        return Ok(self.branch(branch)?.head_version_id);
    }

    /// Fails if the branch is unknown or abandoned.
    fn writable(&self, branch: BranchId) -> Result<&Branch> {
        let found = self.branch(branch)?;
        if found.state == BranchState::Abandoned {
            return Err(Error::BranchAbandoned(branch));
        }
        return Ok(found);
    }

    /// Add a node on top of the branch head and advance the head.
    fn commit(
        &mut self,
        branch: BranchId,
        operations: Vec<Operation>,
        author: UserId,
        merged_from: Option<VersionId>,
    ) -> Result<VersionId> {
        let parent = self.writable(branch)?.head_version_id;
        let version_id = VersionId(self.versions.len() as u64);
        self.versions.push(VersionNode {
            version_id,
            operations,
            parent_version_id: Some(parent),
            author,
            created_at: now_ms(),
            merged_from,
        });
        let branch = self.branch_mut(branch)?;
        branch.versions.push(version_id);
        branch.head_version_id = version_id;
        return Ok(version_id);
    }

    /// Record one operation as a new version on `branch`.
    pub fn apply_operation(&mut self, op: Operation, branch: BranchId) -> Result<VersionId> {
        let author = op.author.clone();
        return self.commit(branch, vec![op], author, None);
    }

    /// The chain from the root to `id`, root first.
    fn ancestry(&self, id: VersionId) -> Result<Vec<VersionId>> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            chain.push(id);
            current = self.version(id)?.parent_version_id;
        }
        chain.reverse();
        return Ok(chain);
    }

    /// Start a branch at `from` (default: the head of `main`).
    pub fn create_branch(&mut self, name: &str, from: Option<VersionId>) -> Result<BranchId> {
        if self.branch_by_name(name).is_some() {
            return Err(Error::DuplicateBranch(name.to_string()));
        }
        let from = match from {
            Some(from) => from,
            None => self.head(self.main())?,
        };
        let versions = self.ancestry(from)?;
        let branch_id = BranchId(self.branches.len() as u64);
        self.branches.push(Branch {
            branch_id,
            name: name.to_string(),
            head_version_id: from,
            versions,
            state: BranchState::Active,
        });
        info!(branch = name, %from, "created branch");
        return Ok(branch_id);
    }

    /// The last version both branches share.
    pub fn fork_point(&self, a: BranchId, b: BranchId) -> Result<VersionId> {
        let a = &self.branch(a)?.versions;
        let b = &self.branch(b)?.versions;
        let shared = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
        // Both chains start at the root.
        return Ok(a[shared.max(1) - 1]);
    }

    /// The versions of `branch` after `fork`, in order.
    fn versions_after(&self, branch: BranchId, fork: VersionId) -> Result<Vec<VersionId>> {
        let versions = &self.branch(branch)?.versions;
        let start = versions.iter().position(|v| *v == fork).map_or(0, |i| i + 1);
        return Ok(versions[start..].to_vec());
    }

    fn operations_of(&self, versions: &[VersionId]) -> Result<Vec<Operation>> {
        let mut ops = Vec::new();
        for id in versions {
            ops.extend(self.version(*id)?.operations.iter().cloned());
        }
        return Ok(ops);
    }

    /// The starting point for merging `source` into `target`: the last
    /// merge of the pair, else the fork point.
    fn merge_base(&self, source: BranchId, target: BranchId) -> Result<MergeBase> {
        if let Some(base) = self.merge_bases.get(&(source, target)) {
            return Ok(base.clone());
        }
        let fork = self.fork_point(source, target)?;
        return Ok(MergeBase { source_version: fork, target_version: fork, bridge: Vec::new() });
    }

    fn check_merge(&self, source: BranchId, target: BranchId) -> Result<()> {
        if source == target {
            return Err(Error::SelfMerge(source));
        }
        self.writable(source)?;
        self.writable(target)?;
        return Ok(());
    }

    /// Bring the changes of `source` into `target`.
    ///
    /// Source operations not merged before are checked for conflicts
    /// against the target changes the source has not seen. Any conflict
    /// leaves both branches untouched. Otherwise the target fast-forwards if
    /// it still sits at the source's base, or gets rebased copies of the new
    /// source versions if it does not.
    pub fn merge_branch(&mut self, source: BranchId, target: BranchId) -> Result<MergeResult> {
        self.check_merge(source, target)?;
        let base = self.merge_base(source, target)?;
        let source_versions = self.versions_after(source, base.source_version)?;
        let target_versions = self.versions_after(target, base.target_version)?;
        let source_ops = self.operations_of(&source_versions)?;
        // Target changes the source lacks, on the document at the source base.
        let mut missing = base.bridge;
        missing.extend(self.operations_of(&target_versions)?);

        let conflicts = self.resolver.detect_conflicts_between(&source_ops, &missing);
        if !conflicts.is_empty() {
            warn!(%source, %target, count = conflicts.len(), "merge blocked by conflicts");
            return Ok(MergeResult::Conflicts(conflicts));
        }

        let source_head = self.head(source)?;
        let appended = if self.head(target)? == base.source_version {
            let target_branch = self.branch_mut(target)?;
            target_branch.versions.extend(source_versions.iter().copied());
            target_branch.head_version_id = source_head;
            source_versions
        } else {
            let mut rebased = rebase(&source_ops, &missing)?.into_iter();
            let mut appended = Vec::with_capacity(source_versions.len());
            for (i, id) in source_versions.iter().enumerate() {
                let node = self.version(*id)?;
                let author = node.author.clone();
                let ops: Vec<Operation> = rebased.by_ref().take(node.operations.len()).collect();
                let merged_from = if i + 1 == source_versions.len() { Some(source_head) } else { None };
                appended.push(self.commit(target, ops, author, merged_from)?);
            }
            appended
        };

        let head = self.head(target)?;
        let bridge = rebase(&missing, &source_ops)?;
        self.merge_bases.insert(
            (source, target),
            MergeBase { source_version: source_head, target_version: head, bridge },
        );
        self.branch_mut(source)?.state = BranchState::MergedInto(target);
        info!(%source, %target, %head, appended = appended.len(), "merged branch");
        return Ok(MergeResult::Merged { head, appended });
    }

    /// Finish a conflicted merge with operations the caller chose.
    ///
    /// The operations must apply on top of the target head. They are
    /// committed as a single node that records the source head.
    pub fn complete_merge(
        &mut self,
        source: BranchId,
        target: BranchId,
        resolved: Vec<Operation>,
        author: impl Into<UserId>,
    ) -> Result<VersionId> {
        self.check_merge(source, target)?;
        let author = author.into();
        let source_head = self.head(source)?;
        let head = self.commit(target, resolved, author.clone(), Some(source_head))?;

        // A hand-picked resolution has no transform back to the source, so
        // later merges of the pair see it as one wholesale rewrite.
        let from = self.document_at_version(source_head)?;
        let to = self.document_at_version(head)?;
        let bridge = replacement(&from, &to, &author);
        self.merge_bases.insert(
            (source, target),
            MergeBase { source_version: source_head, target_version: head, bridge },
        );
        self.branch_mut(source)?.state = BranchState::MergedInto(target);
        info!(%source, %target, %head, "completed merge");
        return Ok(head);
    }

    /// Stop all further writes and merges on a branch. It stays queryable.
    pub fn abandon_branch(&mut self, branch: BranchId) -> Result<()> {
        let found = self.branch_mut(branch)?;
        found.state = BranchState::Abandoned;
        info!(branch = %found.name, "abandoned branch");
        return Ok(());
    }

    /// Replay the document as of `id`.
    pub fn document_at_version(&self, id: VersionId) -> Result<String> {
        let mut text = String::new();
        for version in self.ancestry(id)? {
            for op in &self.version(version)?.operations {
                op.apply_to(&mut text)?;
            }
        }
        return Ok(text);
    }

    /// The versions of a branch, root first.
    pub fn get_history(&self, branch: BranchId) -> Result<Vec<&VersionNode>> {
        let mut history = Vec::new();
        for id in &self.branch(branch)?.versions {
            history.push(self.version(*id)?);
        }
        return Ok(history);
    }
}

/// Operations that turn `from` into `to` in one sweep.
fn replacement(from: &str, to: &str, author: &UserId) -> Vec<Operation> {
    if from == to {
        return Vec::new();
    }
    let mut ops = Vec::new();
    let len = from.chars().count();
    if len > 0 {
        ops.push(Operation::delete(0, len, author.clone()));
    }
    if !to.is_empty() {
        ops.push(Operation::insert(0, to, author.clone()));
    }
    return ops;
}
