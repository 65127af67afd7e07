//! Variable-reference table and scope/variable rendering
//! (`spec.md` §4.5 "Scopes and variables").
//!
//! Grounded in `examples/original_source/src/debugger/valueprint.h` and
//! `manageddebugger.h`'s variables handling: references are opaque,
//! monotonically increasing integers scoped to the current stop and
//! invalidated wholesale on resume, matching the `FrameId` arena pattern in
//! [`crate::ids`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{DebuggerError, Result};
use crate::model::ValueKind;

/// What a reference, once expanded, yields children for.
#[derive(Debug, Clone)]
pub enum VariablesFilter {
    Named,
    Indexed,
    Both,
}

/// A single rendered variable or scope entry.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: String,
    /// The class that declares this member, used to disambiguate a name
    /// shadowed between a derived class and one of its bases.
    pub declaring_type: Option<String>,
    /// `Some` when this entry itself has children, i.e. is expandable.
    pub variables_reference: Option<u64>,
    pub named_count: u32,
    pub indexed_count: u32,
}

/// What a reference expands to: either a flat list already known, or a
/// deferred expansion the runtime produces lazily.
enum Expansion {
    Resolved(Vec<Variable>),
}

struct ReferenceEntry {
    kind: ValueKind,
    expansion: Expansion,
}

/// Opaque handle table for scopes/objects being inspected, reset on every
/// resume (`spec.md` §3 invariants).
#[derive(Default)]
pub struct VariableTable {
    next: AtomicU64,
    entries: Mutex<HashMap<u64, ReferenceEntry>>,
}

impl VariableTable {
    pub fn new() -> Self {
        VariableTable {
            next: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Registers `children` under a fresh reference and returns it.
    pub fn register(&self, kind: ValueKind, children: Vec<Variable>) -> u64 {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(
            id,
            ReferenceEntry {
                kind,
                expansion: Expansion::Resolved(children),
            },
        );
        id
    }

    /// Registers a class instance's members, appending a synthetic "Static
    /// members" child that expands to `statics` when the type has any
    /// (`spec.md` §4.5 "Variables"). Returns the reference for the instance.
    pub fn register_class(&self, mut instance_children: Vec<Variable>, statics: Vec<Variable>) -> u64 {
        if !statics.is_empty() {
            let statics_ref = self.register(ValueKind::Class, statics);
            instance_children.push(Variable {
                name: "Static members".to_string(),
                value: String::new(),
                type_name: String::new(),
                declaring_type: None,
                variables_reference: Some(statics_ref),
                named_count: 0,
                indexed_count: 0,
            });
        }
        self.register(ValueKind::Class, instance_children)
    }

    /// Returns the children of `reference`, applying `filter` and fixing up
    /// name collisions among inherited members by suffixing the declaring
    /// type (`spec.md` §4.5 "Inherited member disambiguation").
    pub fn get_variables(
        &self,
        reference: u64,
        filter: VariablesFilter,
        start: Option<u32>,
        count: Option<u32>,
    ) -> Result<Vec<Variable>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .get(&reference)
            .ok_or_else(|| DebuggerError::invalid_argument(format!("unknown variables reference {reference}")))?;

        let Expansion::Resolved(children) = &entry.expansion;
        let mut items = dedupe_inherited_names(children);

        items = match filter {
            VariablesFilter::Named => items
                .into_iter()
                .filter(|v| v.indexed_count == 0 && v.named_count == 0)
                .collect(),
            VariablesFilter::Indexed => items
                .into_iter()
                .filter(|v| v.indexed_count > 0)
                .collect(),
            VariablesFilter::Both => items,
        };

        let start = start.unwrap_or(0) as usize;
        let items = if let Some(count) = count {
            items.into_iter().skip(start).take(count as usize).collect()
        } else {
            items.into_iter().skip(start).collect()
        };
        Ok(items)
    }

    pub fn kind_of(&self, reference: u64) -> Option<ValueKind> {
        self.entries.lock().unwrap().get(&reference).map(|e| e.kind)
    }
}

impl Default for ReferenceEntry {
    fn default() -> Self {
        ReferenceEntry {
            kind: ValueKind::Variable,
            expansion: Expansion::Resolved(Vec::new()),
        }
    }
}

/// Shadowed names between a derived class and its base are disambiguated by
/// appending ` (<DeclaringType>)` to the later occurrence, matching the
/// netcoredbg rendering of hidden/overridden fields.
fn dedupe_inherited_names(children: &[Variable]) -> Vec<Variable> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    for child in children {
        *seen.entry(child.name.clone()).or_insert(0) += 1;
    }

    let mut emitted: HashMap<String, u32> = HashMap::new();
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        let total = seen[&child.name];
        let ordinal = emitted.entry(child.name.clone()).or_insert(0);
        *ordinal += 1;
        if total > 1 && *ordinal > 1 {
            let mut renamed = child.clone();
            let suffix = child.declaring_type.as_deref().unwrap_or("unknown");
            renamed.name = format!("{} ({suffix})", child.name);
            out.push(renamed);
        } else {
            out.push(child.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable {
            name: name.to_string(),
            value: "0".to_string(),
            type_name: "int".to_string(),
            declaring_type: None,
            variables_reference: None,
            named_count: 0,
            indexed_count: 0,
        }
    }

    fn var_in(name: &str, declaring_type: &str) -> Variable {
        Variable {
            declaring_type: Some(declaring_type.to_string()),
            ..var(name)
        }
    }

    #[test]
    fn clear_invalidates_all_references() {
        let table = VariableTable::new();
        let id = table.register(ValueKind::Scope, vec![var("x")]);
        assert!(table.get_variables(id, VariablesFilter::Both, None, None).is_ok());
        table.clear();
        assert!(table.get_variables(id, VariablesFilter::Both, None, None).is_err());
    }

    #[test]
    fn duplicate_inherited_names_are_disambiguated_by_declaring_type() {
        let table = VariableTable::new();
        let id = table.register(
            ValueKind::Class,
            vec![var_in("value", "Derived"), var_in("value", "Base")],
        );
        let vars = table.get_variables(id, VariablesFilter::Both, None, None).unwrap();
        assert_eq!(vars[0].name, "value");
        assert_eq!(vars[1].name, "value (Base)");
    }

    #[test]
    fn static_members_synthetic_child_expands_to_statics() {
        let table = VariableTable::new();
        let id = table.register_class(vec![var("instanceField")], vec![var("staticField")]);
        let vars = table.get_variables(id, VariablesFilter::Both, None, None).unwrap();
        assert_eq!(vars.len(), 2);
        let statics_entry = vars.iter().find(|v| v.name == "Static members").unwrap();
        let statics_ref = statics_entry.variables_reference.unwrap();
        let statics = table.get_variables(statics_ref, VariablesFilter::Both, None, None).unwrap();
        assert_eq!(statics[0].name, "staticField");
    }

    #[test]
    fn register_class_without_statics_adds_no_synthetic_child() {
        let table = VariableTable::new();
        let id = table.register_class(vec![var("instanceField")], vec![]);
        let vars = table.get_variables(id, VariablesFilter::Both, None, None).unwrap();
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn pagination_respects_start_and_count() {
        let table = VariableTable::new();
        let id = table.register(ValueKind::Scope, vec![var("a"), var("b"), var("c")]);
        let vars = table
            .get_variables(id, VariablesFilter::Both, Some(1), Some(1))
            .unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "b");
    }
}
