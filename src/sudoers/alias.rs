use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::ast::{Alias, AliasKind, Member};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasError {
    Duplicate(String),
    Cyclic(String),
    Unknown(String),
}

impl fmt::Display for AliasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasError::Duplicate(name) => write!(f, "multiple occurrences of '{name}'"),
            AliasError::Cyclic(name) => write!(f, "recursive alias: '{name}'"),
            AliasError::Unknown(name) => write!(f, "undefined alias: '{name}'"),
        }
    }
}

struct Entry {
    alias: Alias,
    uses: AtomicUsize,
}

/// All the aliases of a policy, indexed by kind and name.
///
/// Once loaded the table is only ever shared immutably; resolving an alias bumps an atomic
/// use counter, so that unused aliases can be reported afterwards.
#[derive(Default)]
pub struct AliasTable {
    entries: Vec<Entry>,
    index: HashMap<(AliasKind, String), usize>,
}

impl AliasTable {
    pub fn define(&mut self, alias: Alias) -> Result<(), AliasError> {
        let key = (alias.kind, alias.name.clone());
        if self.index.contains_key(&key) {
            return Err(AliasError::Duplicate(alias.name));
        }

        self.index.insert(key, self.entries.len());
        self.entries.push(Entry {
            alias,
            uses: AtomicUsize::new(0),
        });

        Ok(())
    }

    fn position(&self, name: &str, kind: AliasKind) -> Option<usize> {
        self.index.get(&(kind, name.to_string())).copied()
    }

    pub fn contains(&self, name: &str, kind: AliasKind) -> bool {
        self.position(name, kind).is_some()
    }

    pub fn resolve(&self, name: &str, kind: AliasKind) -> Option<&Alias> {
        let entry = &self.entries[self.position(name, kind)?];
        entry.uses.fetch_add(1, Ordering::Relaxed);

        Some(&entry.alias)
    }

    /// The members of an alias with all nested alias references replaced by their members;
    /// a negated reference turns into the negated members of the referenced alias.
    pub fn expand_members(&self, name: &str, kind: AliasKind) -> Result<Vec<Member>, AliasError> {
        let mut visiting = Vec::new();
        let mut result = Vec::new();
        self.expand_into(name, kind, false, &mut visiting, &mut result)?;

        Ok(result)
    }

    fn expand_into(
        &self,
        name: &str,
        kind: AliasKind,
        negated: bool,
        visiting: &mut Vec<String>,
        result: &mut Vec<Member>,
    ) -> Result<(), AliasError> {
        if visiting.iter().any(|seen| seen == name) {
            return Err(AliasError::Cyclic(name.to_string()));
        }
        let alias = self
            .resolve(name, kind)
            .ok_or_else(|| AliasError::Unknown(name.to_string()))?;

        visiting.push(name.to_string());
        for member in &alias.members {
            let (negated, inner) = strip_negations(member, negated);
            match inner {
                Member::Alias(nested) => self.expand_into(nested, kind, negated, visiting, result)?,
                member if negated => result.push(member.clone().negate()),
                member => result.push(member.clone()),
            }
        }
        visiting.pop();

        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.entries.iter().map(|entry| &entry.alias)
    }

    /// Aliases that were never resolved.
    pub fn unused(&self) -> impl Iterator<Item = &Alias> {
        self.entries
            .iter()
            .filter(|entry| entry.uses.load(Ordering::Relaxed) == 0)
            .map(|entry| &entry.alias)
    }

    /// Detect references to undefined aliases and cycles. Aliases can be defined in any order
    /// and may refer to each other, so this is a topological walk over the table.
    pub(super) fn sanitize(&self) -> Vec<(&Alias, AliasError)> {
        struct Visitor<'a> {
            seen: HashSet<usize>,
            done: HashSet<usize>,
            table: &'a AliasTable,
            diagnostics: Vec<(&'a Alias, AliasError)>,
        }

        impl Visitor<'_> {
            fn visit(&mut self, pos: usize) {
                let table = self.table;
                let alias = &table.entries[pos].alias;
                if self.seen.insert(pos) {
                    for member in &alias.members {
                        let (_, Member::Alias(name)) = strip_negations(member, false) else {
                            continue;
                        };
                        let Some(dependency) = table.position(name, alias.kind) else {
                            self.diagnostics
                                .push((alias, AliasError::Unknown(name.to_string())));
                            continue;
                        };
                        self.visit(dependency);
                    }
                    self.done.insert(pos);
                } else if !self.done.contains(&pos) {
                    self.diagnostics
                        .push((alias, AliasError::Cyclic(alias.name.clone())));
                }
            }
        }

        let mut visitor = Visitor {
            seen: HashSet::new(),
            done: HashSet::new(),
            table: self,
            diagnostics: Vec::new(),
        };
        for pos in 0..self.entries.len() {
            visitor.visit(pos);
        }

        visitor.diagnostics
    }
}

/// Peel off any number of `!`; an even number cancels out.
pub(super) fn strip_negations(member: &Member, mut negated: bool) -> (bool, &Member) {
    let mut member = member;
    while let Member::Negated(inner) = member {
        negated = !negated;
        member = inner;
    }

    (negated, member)
}
