//! The dependency solver.
//!
//! Given a set of root requirements and two oracles (known versions of a
//! name, dependencies of a concrete package), choose exactly one version per
//! required name such that every requirement's interval contains the chosen
//! version. Requirements are processed in the order they are discovered
//! (breadth-first from the roots); candidate versions are tried newest
//! first; conflicts backtrack to the most recent open choice.

use crate::{Dependency, PackageError, PkgId, Result, VersionInterval};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Resolve `roots` into a concrete package set.
///
/// `versions_of` must return every known version of a name (any order);
/// `deps_of` returns the dependencies declared by a concrete package.
pub fn solve<V, D>(roots: &[Dependency], versions_of: V, deps_of: D) -> Result<Vec<PkgId>>
where
    V: Fn(&str) -> Result<Vec<PkgId>>,
    D: Fn(&PkgId) -> Result<Vec<Dependency>>,
{
    let queue: VecDeque<Dependency> = roots.iter().cloned().collect();
    step(&versions_of, &deps_of, queue, Vec::new(), HashMap::new())
}

fn solve_failure(name: &str, intervals: Vec<VersionInterval>) -> PackageError {
    PackageError::SolveFailure {
        name: name.to_string(),
        intervals,
    }
}

fn step<V, D>(
    versions_of: &V,
    deps_of: &D,
    mut queue: VecDeque<Dependency>,
    chosen: Vec<PkgId>,
    mut constraints: HashMap<String, VersionInterval>,
) -> Result<Vec<PkgId>>
where
    V: Fn(&str) -> Result<Vec<PkgId>>,
    D: Fn(&PkgId) -> Result<Vec<Dependency>>,
{
    let dep = match queue.pop_front() {
        Some(dep) => dep,
        None => return Ok(chosen),
    };
    let name = dep.name.as_str().to_string();

    let combined = match constraints.get(&name) {
        Some(prev) => prev.intersect(&dep.interval).ok_or_else(|| {
            solve_failure(&name, vec![prev.clone(), dep.interval.clone()])
        })?,
        None => dep.interval.clone(),
    };
    constraints.insert(name.clone(), combined.clone());

    // A version already picked for this name must satisfy the narrowed
    // interval, or this whole branch is dead.
    if let Some(existing) = chosen.iter().find(|p| p.name.as_str() == name) {
        if combined.contains(&existing.version) {
            return step(versions_of, deps_of, queue, chosen, constraints);
        }
        return Err(solve_failure(&name, vec![combined]));
    }

    let mut candidates = versions_of(&name)?;
    candidates.sort_by(|a, b| b.version.cmp(&a.version));
    candidates.dedup_by(|a, b| a.version == b.version);
    candidates.retain(|c| combined.contains(&c.version));

    if candidates.is_empty() {
        return Err(solve_failure(&name, vec![combined]));
    }

    for candidate in candidates {
        trace!("trying {candidate}");
        let mut next_queue = queue.clone();
        for dep in deps_of(&candidate)? {
            next_queue.push_back(dep);
        }
        let mut next_chosen = chosen.clone();
        next_chosen.push(candidate);
        match step(
            versions_of,
            deps_of,
            next_queue,
            next_chosen,
            constraints.clone(),
        ) {
            Ok(solution) => return Ok(solution),
            Err(PackageError::SolveFailure { .. }) => continue,
            Err(other) => return Err(other),
        }
    }

    Err(solve_failure(&name, vec![combined]))
}
