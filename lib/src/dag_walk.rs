// Copyright 2021 The Strata Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! General-purpose algorithms over the commit parent DAG.

use std::collections::{HashMap, HashSet};

use crate::backend::CommitId;

/// Verdict of the evaluator for a visited commit: whether the commit belongs
/// to the result, and whether the walk descends into its parents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evaluation {
    IncludeAndContinue,
    IncludeAndPrune,
    ExcludeAndContinue,
    ExcludeAndPrune,
}

impl Evaluation {
    pub fn includes(self) -> bool {
        matches!(
            self,
            Evaluation::IncludeAndContinue | Evaluation::IncludeAndPrune
        )
    }

    pub fn continues(self) -> bool {
        matches!(
            self,
            Evaluation::IncludeAndContinue | Evaluation::ExcludeAndContinue
        )
    }
}

/// Walks the parent DAG from `start`, asking `evaluate_fn` about every
/// commit reached, and returns the included commits ordered
/// ancestors-before-descendants.
///
/// Both replication directions rely on that order: when a commit is written
/// to the destination, the projections of all of its parents are already
/// present.
///
/// Each commit is evaluated at most once. A null `start` produces an empty
/// result; a parent unknown to `parents_fn` (empty parent list) is a root.
/// The first error from either oracle aborts the walk.
pub fn gather_commits_ok<E>(
    start: &CommitId,
    mut evaluate_fn: impl FnMut(&CommitId) -> Result<Evaluation, E>,
    mut parents_fn: impl FnMut(&CommitId) -> Result<Vec<CommitId>, E>,
) -> Result<Vec<CommitId>, E> {
    if start.is_null() {
        return Ok(vec![]);
    }
    let mut stack: Vec<(CommitId, bool)> = vec![(start.clone(), false)];
    let mut evaluations: HashMap<CommitId, Evaluation> = HashMap::new();
    let mut visiting: HashSet<CommitId> = HashSet::new();
    let mut emitted: HashSet<CommitId> = HashSet::new();
    let mut result = vec![];
    while let Some((commit, parents_visited)) = stack.pop() {
        if emitted.contains(&commit) {
            continue;
        }
        if !parents_visited {
            assert!(visiting.insert(commit.clone()), "commit graph has cycle");
            let evaluation = evaluate_fn(&commit)?;
            let parents = if evaluation.continues() {
                parents_fn(&commit)?
            } else {
                vec![]
            };
            evaluations.insert(commit.clone(), evaluation);
            stack.reserve(parents.len() + 1);
            stack.push((commit, true));
            for parent in parents {
                stack.push((parent, false));
            }
        } else {
            visiting.remove(&commit);
            let included = evaluations[&commit].includes();
            emitted.insert(commit.clone());
            if included {
                result.push(commit);
            }
        }
    }
    Ok(result)
}

/// Finds the closest common ancestor of the two commit sets, alternating one
/// generation at a time between them.
pub fn closest_common_ancestor_ok<E>(
    set1: Vec<CommitId>,
    set2: Vec<CommitId>,
    mut parents_fn: impl FnMut(&CommitId) -> Result<Vec<CommitId>, E>,
) -> Result<Option<CommitId>, E> {
    let mut visited1 = HashSet::new();
    let mut visited2 = HashSet::new();

    let mut work1 = set1;
    let mut work2 = set2;
    while !work1.is_empty() || !work2.is_empty() {
        let mut new_work1 = vec![];
        for commit in work1 {
            if visited2.contains(&commit) {
                return Ok(Some(commit));
            }
            if visited1.insert(commit.clone()) {
                for parent in parents_fn(&commit)? {
                    new_work1.push(parent);
                }
            }
        }
        work1 = new_work1;

        let mut new_work2 = vec![];
        for commit in work2 {
            if visited1.contains(&commit) {
                return Ok(Some(commit));
            }
            if visited2.insert(commit.clone()) {
                for parent in parents_fn(&commit)? {
                    new_work2.push(parent);
                }
            }
        }
        work2 = new_work2;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::convert::Infallible;

    use maplit::hashmap;

    use super::*;

    fn id(name: &str) -> CommitId {
        CommitId::from_bytes(name.as_bytes())
    }

    fn parents_fn(
        neighbors: &HashMap<CommitId, Vec<CommitId>>,
    ) -> impl FnMut(&CommitId) -> Result<Vec<CommitId>, Infallible> + '_ {
        // Unknown commits are roots
        |commit| Ok(neighbors.get(commit).cloned().unwrap_or_default())
    }

    fn include_all(_: &CommitId) -> Result<Evaluation, Infallible> {
        Ok(Evaluation::IncludeAndContinue)
    }

    #[test]
    fn test_gather_linear() {
        // This graph:
        //  o C
        //  o B
        //  o A
        let neighbors = hashmap! {
            id("A") => vec![],
            id("B") => vec![id("A")],
            id("C") => vec![id("B")],
        };

        let commits = gather_commits_ok(&id("C"), include_all, parents_fn(&neighbors)).unwrap();
        assert_eq!(commits, vec![id("A"), id("B"), id("C")]);
    }

    #[test]
    fn test_gather_merge_ancestors_first() {
        // This graph:
        //  o F
        //  |\
        //  o | E
        //  | o D
        //  | o C
        //  | o B
        //  |/
        //  o A
        let neighbors = hashmap! {
            id("A") => vec![],
            id("B") => vec![id("A")],
            id("C") => vec![id("B")],
            id("D") => vec![id("C")],
            id("E") => vec![id("A")],
            id("F") => vec![id("E"), id("D")],
        };

        let commits = gather_commits_ok(&id("F"), include_all, parents_fn(&neighbors)).unwrap();
        assert_eq!(commits.len(), 6);
        for (child, parents) in &neighbors {
            let child_pos = commits.iter().position(|c| c == child).unwrap();
            for parent in parents {
                let parent_pos = commits.iter().position(|c| c == parent).unwrap();
                assert!(parent_pos < child_pos, "{parent:?} must precede {child:?}");
            }
        }
        assert_eq!(commits.last(), Some(&id("F")));
    }

    #[test]
    fn test_gather_exclude_and_prune() {
        // Pruning at B hides both B and its ancestors.
        let neighbors = hashmap! {
            id("A") => vec![],
            id("B") => vec![id("A")],
            id("C") => vec![id("B")],
        };

        let commits = gather_commits_ok(
            &id("C"),
            |commit| {
                if *commit == id("B") {
                    Ok::<_, Infallible>(Evaluation::ExcludeAndPrune)
                } else {
                    Ok(Evaluation::IncludeAndContinue)
                }
            },
            parents_fn(&neighbors),
        )
        .unwrap();
        assert_eq!(commits, vec![id("C")]);
    }

    #[test]
    fn test_gather_exclude_and_continue() {
        let neighbors = hashmap! {
            id("A") => vec![],
            id("B") => vec![id("A")],
            id("C") => vec![id("B")],
        };

        let commits = gather_commits_ok(
            &id("C"),
            |commit| {
                if *commit == id("B") {
                    Ok::<_, Infallible>(Evaluation::ExcludeAndContinue)
                } else {
                    Ok(Evaluation::IncludeAndContinue)
                }
            },
            parents_fn(&neighbors),
        )
        .unwrap();
        assert_eq!(commits, vec![id("A"), id("C")]);
    }

    #[test]
    fn test_gather_include_and_prune() {
        let neighbors = hashmap! {
            id("A") => vec![],
            id("B") => vec![id("A")],
            id("C") => vec![id("B")],
        };

        let commits = gather_commits_ok(
            &id("C"),
            |commit| {
                if *commit == id("B") {
                    Ok::<_, Infallible>(Evaluation::IncludeAndPrune)
                } else {
                    Ok(Evaluation::IncludeAndContinue)
                }
            },
            parents_fn(&neighbors),
        )
        .unwrap();
        assert_eq!(commits, vec![id("B"), id("C")]);
    }

    #[test]
    fn test_gather_null_start() {
        let neighbors = hashmap! {};
        let commits =
            gather_commits_ok(&CommitId::null(), include_all, parents_fn(&neighbors)).unwrap();
        assert_eq!(commits, vec![]);
    }

    #[test]
    fn test_gather_error_aborts() {
        let neighbors = hashmap! {
            id("A") => vec![],
            id("B") => vec![id("A")],
        };

        let result = gather_commits_ok(
            &id("B"),
            |commit| {
                if *commit == id("A") {
                    Err("boom")
                } else {
                    Ok(Evaluation::IncludeAndContinue)
                }
            },
            |commit| Ok(neighbors[commit].clone()),
        );
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn test_closest_common_ancestor() {
        // This graph:
        //  o E
        //  | o D
        //  o | C
        //  |/
        //  o B
        //  o A
        let neighbors = hashmap! {
            id("A") => vec![],
            id("B") => vec![id("A")],
            id("C") => vec![id("B")],
            id("D") => vec![id("B")],
            id("E") => vec![id("C")],
        };

        let common =
            closest_common_ancestor_ok(vec![id("E")], vec![id("D")], parents_fn(&neighbors))
                .unwrap();
        assert_eq!(common, Some(id("B")));

        // One set is an ancestor of the other
        let common =
            closest_common_ancestor_ok(vec![id("E")], vec![id("C")], parents_fn(&neighbors))
                .unwrap();
        assert_eq!(common, Some(id("C")));

        // Unrelated histories have no common ancestor
        let unrelated = hashmap! {
            id("A") => vec![],
            id("B") => vec![],
        };
        let common =
            closest_common_ancestor_ok(vec![id("A")], vec![id("B")], parents_fn(&unrelated))
                .unwrap();
        assert_eq!(common, None);
    }
}
