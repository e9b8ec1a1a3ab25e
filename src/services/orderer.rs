//! Dependency ordering of migrations.
//!
//! Migrations form a forest through their parent uid. A deployable sequence
//! lists every parent before its children; ties keep the input order. Parent
//! links are resolved across the whole project, so a filtered listing still
//! respects ancestors it does not show.

use std::collections::{BTreeSet, HashMap, HashSet};

/// Migration dependency data is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderingError {
    #[error("dependency cycle between migrations: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("migration {child} depends on unknown migration {parent}")]
    OrphanParent { child: String, parent: String },
}

/// Anything that takes part in a parent chain.
pub trait Dependent {
    fn uid(&self) -> &str;
    fn parent_uid(&self) -> Option<&str>;
}

/// Parent uid of every migration of a project, keyed by uid.
pub type ParentMap = HashMap<String, Option<String>>;

/// Parent map of `all`, the complete migration set of a project.
pub fn parent_map<T: Dependent>(all: &[T]) -> ParentMap {
    all.iter()
        .map(|m| (m.uid().to_string(), m.parent_uid().map(str::to_string)))
        .collect()
}

/// Order `items` so that parents come first.
///
/// Ancestry is resolved through `project`, so a migration whose parent is
/// not in `items` still comes after the nearest ancestor that is. A parent
/// missing from `project` is an orphan error.
pub fn sort<T: Dependent>(items: Vec<T>, project: &ParentMap) -> Result<Vec<T>, OrderingError> {
    let index_of: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.uid(), i))
        .collect();

    let mut parent_of: Vec<Option<usize>> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        parent_of.push(nearest_listed_ancestor(i, item, &index_of, project)?);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    let mut ready = BTreeSet::new();
    for (i, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => {
                ready.insert(i);
            }
        }
    }

    let mut order = Vec::with_capacity(items.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        ready.extend(children[i].iter().copied());
    }

    if order.len() < items.len() {
        return Err(OrderingError::Cycle(cycle_members(&items, &parent_of, &order)));
    }

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Walk up from `item` through unlisted migrations to the first ancestor in
/// `items`.
fn nearest_listed_ancestor<T: Dependent>(
    index: usize,
    item: &T,
    index_of: &HashMap<&str, usize>,
    project: &ParentMap,
) -> Result<Option<usize>, OrderingError> {
    let mut child = item.uid();
    let mut next = item.parent_uid();
    let mut walked: Vec<&str> = Vec::new();

    while let Some(parent) = next {
        if let Some(&i) = index_of.get(parent) {
            if i == index {
                walked.push(item.uid());
                return Err(OrderingError::Cycle(sorted_uids(&walked)));
            }
            return Ok(Some(i));
        }

        if let Some(start) = walked.iter().position(|uid| *uid == parent) {
            return Err(OrderingError::Cycle(sorted_uids(&walked[start..])));
        }

        let Some(grandparent) = project.get(parent) else {
            return Err(OrderingError::OrphanParent {
                child: child.to_string(),
                parent: parent.to_string(),
            });
        };

        walked.push(parent);
        child = parent;
        next = grandparent.as_deref();
    }

    Ok(None)
}

/// Check that `uid` may take `parent` without orphaning or closing a loop.
pub fn check_parent(uid: &str, parent: &str, project: &ParentMap) -> Result<(), OrderingError> {
    if parent == uid {
        return Err(OrderingError::Cycle(vec![uid.to_string()]));
    }
    if !project.contains_key(parent) {
        return Err(OrderingError::OrphanParent {
            child: uid.to_string(),
            parent: parent.to_string(),
        });
    }

    let mut chain = vec![uid];
    let mut next = Some(parent);
    while let Some(current) = next {
        if current == uid {
            return Err(OrderingError::Cycle(sorted_uids(&chain)));
        }
        // An existing loop that does not pass through `uid` is left to `sort`.
        if chain.contains(&current) {
            break;
        }
        chain.push(current);
        next = project.get(current).and_then(|p| p.as_deref());
    }

    Ok(())
}

fn sorted_uids(uids: &[&str]) -> Vec<String> {
    let set: BTreeSet<&str> = uids.iter().copied().collect();
    set.into_iter().map(str::to_string).collect()
}

/// Uids of the items stuck in a cycle, sorted for stable error messages.
fn cycle_members<T: Dependent>(
    items: &[T],
    parent_of: &[Option<usize>],
    placed: &[usize],
) -> Vec<String> {
    let placed: HashSet<usize> = placed.iter().copied().collect();
    let mut members = BTreeSet::new();

    // Every unplaced item leads to a cycle through its parents; the
    // cycle itself is where the walk revisits a node.
    for start in (0..items.len()).filter(|i| !placed.contains(i)) {
        let mut seen = HashSet::new();
        let mut current = start;
        while seen.insert(current) {
            match parent_of[current] {
                Some(p) => current = p,
                None => break,
            }
        }
        let entry = current;
        let mut node = entry;
        loop {
            members.insert(items[node].uid().to_string());
            match parent_of[node] {
                Some(p) if p != entry => node = p,
                _ => break,
            }
        }
    }

    members.into_iter().collect()
}
