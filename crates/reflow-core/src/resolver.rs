//! Path resolution: symbolic references to stable component addresses
//!
//! Path grammar: `segment ('.' segment)*`, `segment = name ('[' int ']')*`,
//! indices 1-based, an optional leading `$`. The first segment is searched
//! lexically outward from the referencing component, then in the
//! document-wide namespace. Later segments name descendants; a final segment
//! that names no descendant is a state-variable property.

use crate::store::SlotIdx;
use crate::{ComponentIdx, Engine, Error, Result, SlotKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// One dotted segment of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    /// 1-based indices, applied left to right
    pub indices: Vec<usize>,
}

/// A parsed reference path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<Segment>,
}

impl Path {
    /// Parse a path such as `$o[1].value`
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPath {
            path: text.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = text.trim();
        let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(invalid("empty path"));
        }
        let mut segments = Vec::new();
        for part in body.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if name.is_empty() {
                return Err(invalid("empty segment name"));
            }
            if !name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid("segment names may only contain letters, digits, _ and -"));
            }
            let mut indices = Vec::new();
            while !rest.is_empty() {
                let close = match (rest.strip_prefix('['), rest.find(']')) {
                    (Some(_), Some(close)) => close,
                    _ => return Err(invalid("unbalanced index brackets")),
                };
                let index: usize = rest[1..close]
                    .trim()
                    .parse()
                    .map_err(|_| invalid("indices must be positive integers"))?;
                if index == 0 {
                    return Err(invalid("indices start at 1"));
                }
                indices.push(index);
                rest = &rest[close + 1..];
            }
            segments.push(Segment {
                name: name.to_string(),
                indices,
            });
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment.name)?;
            for index in &segment.indices {
                write!(f, "[{}]", index)?;
            }
        }
        Ok(())
    }
}

/// Where a path leads
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub component: ComponentIdx,
    /// Trailing state-variable property, if the path ends in one
    pub variable: Option<SlotKey>,
}

#[derive(Debug, Clone)]
struct MemoEntry {
    resolved: ResolvedPath,
    /// Composites whose replacements the resolution depended on
    through: Vec<ComponentIdx>,
}

/// Global namespace and memoized resolutions
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolverState {
    global: IndexMap<String, ComponentIdx>,
    memo: HashMap<(ComponentIdx, String), MemoEntry>,
}

impl ResolverState {
    /// Claim a document-wide name; false if it is taken
    pub(crate) fn register_global(&mut self, name: &str, idx: ComponentIdx) -> bool {
        if self.global.contains_key(name) {
            return false;
        }
        self.global.insert(name.to_string(), idx);
        true
    }

    pub(crate) fn global(&self, name: &str) -> Option<ComponentIdx> {
        self.global.get(name).copied()
    }

    /// Forget resolutions that passed through a re-expanded composite
    pub(crate) fn evict_through(&mut self, composite: ComponentIdx) {
        self.memo.retain(|_, e| !e.through.contains(&composite));
    }

    /// Forget resolutions that start at, end at, or pass through a
    /// destroyed component
    pub(crate) fn evict_component(&mut self, idx: ComponentIdx) {
        self.memo.retain(|(origin, _), e| {
            *origin != idx && e.resolved.component != idx && !e.through.contains(&idx)
        });
    }

    pub(crate) fn clear_memo(&mut self) {
        self.memo.clear();
    }

    #[cfg(test)]
    pub(crate) fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

impl Engine {
    /// Resolve a path relative to `origin`
    ///
    /// `Ok(None)` means nothing matched; malformed paths are errors.
    /// Composites on the way are expanded.
    pub fn resolve(&mut self, origin: ComponentIdx, path: &str) -> Result<Option<ResolvedPath>> {
        self.check_component(origin)?;
        self.resolve_tracked(origin, path, &mut Vec::new())
    }

    /// Resolve, recording the expansion slots read into `reads`
    pub(crate) fn resolve_tracked(
        &mut self,
        origin: ComponentIdx,
        text: &str,
        reads: &mut Vec<SlotIdx>,
    ) -> Result<Option<ResolvedPath>> {
        let key = (origin, text.to_string());
        if let Some(entry) = self.resolver.memo.get(&key).cloned() {
            // Re-read the expansions so the reader keeps its edges; a changed
            // expansion evicts the entry.
            for &c in &entry.through {
                self.read_expansion(c, reads);
            }
            if self.resolver.memo.contains_key(&key) && self.arena.contains(entry.resolved.component)
            {
                return Ok(Some(entry.resolved));
            }
        }

        let path = Path::parse(text)?;
        let mut through = Vec::new();
        let resolved = self.walk(origin, &path, &mut through, reads);
        if let Some(resolved) = &resolved {
            let mut seen = HashSet::new();
            through.retain(|c| seen.insert(*c));
            self.resolver.memo.insert(
                key,
                MemoEntry {
                    resolved: resolved.clone(),
                    through,
                },
            );
        }
        Ok(resolved)
    }

    fn walk(
        &mut self,
        origin: ComponentIdx,
        path: &Path,
        through: &mut Vec<ComponentIdx>,
        reads: &mut Vec<SlotIdx>,
    ) -> Option<ResolvedPath> {
        let (first, rest) = path.segments.split_first()?;
        let found = self.lookup_name(origin, &first.name, through, reads)?;
        let mut current = self.apply_indices(found, &first.indices, through, reads)?;
        let mut variable = None;
        for (i, segment) in rest.iter().enumerate() {
            let is_last = i + 1 == rest.len();
            match self.find_descendant(current, &segment.name, through, reads) {
                Some(found) => {
                    current = self.apply_indices(found, &segment.indices, through, reads)?;
                }
                None if is_last && segment.indices.len() <= 1 => {
                    variable = Some(SlotKey {
                        name: segment.name.clone(),
                        index: segment.indices.first().map(|i| i - 1),
                    });
                }
                None => return None,
            }
        }
        Some(ResolvedPath {
            component: current,
            variable,
        })
    }

    /// Components visible as members of a scope: a composite's replacements,
    /// otherwise the structural children
    fn scope_members(
        &mut self,
        scope: ComponentIdx,
        through: &mut Vec<ComponentIdx>,
        reads: &mut Vec<SlotIdx>,
    ) -> Vec<ComponentIdx> {
        if self.is_composite(scope) {
            through.push(scope);
            self.read_expansion(scope, reads)
        } else {
            self.arena
                .get(scope)
                .map(|c| c.children.clone())
                .unwrap_or_default()
        }
    }

    fn has_name(&self, idx: ComponentIdx, name: &str) -> bool {
        self.arena
            .get(idx)
            .map_or(false, |c| c.name.as_deref() == Some(name))
    }

    /// Lexical search outward from `origin`, then the global namespace
    fn lookup_name(
        &mut self,
        origin: ComponentIdx,
        name: &str,
        through: &mut Vec<ComponentIdx>,
        reads: &mut Vec<SlotIdx>,
    ) -> Option<ComponentIdx> {
        let mut via = origin;
        loop {
            if self.has_name(via, name) {
                return Some(via);
            }
            let Some(parent) = self.arena.get(via).and_then(|c| c.parent) else {
                break;
            };
            let members = self.scope_members(parent, through, reads);
            let upto = members
                .iter()
                .position(|&m| m == via)
                .unwrap_or(members.len());
            if let Some(&found) = members[..upto].iter().rev().find(|&&m| self.has_name(m, name)) {
                return Some(found);
            }
            via = parent;
        }
        self.find(name)
    }

    /// Breadth-first search below `root`, templates excluded
    fn find_descendant(
        &mut self,
        root: ComponentIdx,
        name: &str,
        through: &mut Vec<ComponentIdx>,
        reads: &mut Vec<SlotIdx>,
    ) -> Option<ComponentIdx> {
        let mut queue: VecDeque<ComponentIdx> = self.scope_members(root, through, reads).into();
        let mut seen = HashSet::from([root]);
        while let Some(c) = queue.pop_front() {
            if !seen.insert(c) {
                continue;
            }
            if self.has_name(c, name) {
                return Some(c);
            }
            queue.extend(self.scope_members(c, through, reads));
        }
        None
    }

    /// Apply 1-based indices: replacements of a composite, effective
    /// children otherwise
    fn apply_indices(
        &mut self,
        mut current: ComponentIdx,
        indices: &[usize],
        through: &mut Vec<ComponentIdx>,
        reads: &mut Vec<SlotIdx>,
    ) -> Option<ComponentIdx> {
        for &index in indices {
            let members = if self.is_composite(current) {
                through.push(current);
                self.read_expansion(current, reads)
            } else {
                self.effective_children(current, reads, through)
            };
            current = *members.get(index.checked_sub(1)?)?;
        }
        Some(current)
    }
}
