//! Exception breakpoint storage (`spec.md` §4.5 "Exception-breakpoint
//! storage operations", §GLOSSARY, §8 invariant 8/9).
//!
//! Grounded in `examples/original_source/src/debugger/exceptionbreakpointstorage.cpp`:
//! the `"*"` (global catch) name is special-cased so that inserting a new
//! `"*"` silently deletes whichever id previously owned it, and the
//! `USER_UNHANDLED` filter only matches names that do not start with
//! `System.` (`spec.md` §9 open question: this is the "System." prefix
//! heuristic, preserved as-is per the open question's instruction not to
//! guess a replacement).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionBreakCategory {
    Clr,
    Mda,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionFilter {
    Throw,
    UserUnhandled,
    ThrowUserUnhandled,
    Unhandled,
}

/// Disjunction of the three independent conditions a filter can request.
/// `ThrowUserUnhandled` is shorthand for setting both `throw` and
/// `user_unhandled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExceptionFlags {
    pub throw: bool,
    pub user_unhandled: bool,
    pub unhandled: bool,
}

impl ExceptionFlags {
    pub fn from_filter(filter: ExceptionFilter) -> Self {
        match filter {
            ExceptionFilter::Throw => ExceptionFlags {
                throw: true,
                ..Default::default()
            },
            ExceptionFilter::UserUnhandled => ExceptionFlags {
                user_unhandled: true,
                ..Default::default()
            },
            ExceptionFilter::ThrowUserUnhandled => ExceptionFlags {
                throw: true,
                user_unhandled: true,
                ..Default::default()
            },
            ExceptionFilter::Unhandled => ExceptionFlags {
                unhandled: true,
                ..Default::default()
            },
        }
    }

    pub fn union(self, other: Self) -> Self {
        ExceptionFlags {
            throw: self.throw || other.throw,
            user_unhandled: self.user_unhandled || other.user_unhandled,
            unhandled: self.unhandled || other.unhandled,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExceptionBreakMode {
    pub category: ExceptionBreakCategory,
    pub flags: ExceptionFlags,
}

/// Runtime exception callback kinds. First-chance events are always
/// ignored (`spec.md` §4.5 "Exception match").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionEventType {
    FirstChance,
    UserFirstChance,
    CatchHandlerFound,
    Unhandled,
}

#[derive(Default)]
pub struct ExceptionBreakpointStorage {
    /// id -> name, so `Delete(id)` can find which name's multimap to prune.
    table: HashMap<u32, String>,
    /// name -> ordered list of (id, mode) sharing that name.
    by_name: HashMap<String, Vec<(u32, ExceptionBreakMode)>>,
    current_asterisk_id: Option<u32>,
}

impl ExceptionBreakpointStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new exception breakpoint. Returns the id of a previous
    /// `"*"` entry that was silently removed, if any (`spec.md` §8
    /// invariant 8).
    pub fn insert(&mut self, id: u32, mode: ExceptionBreakMode, name: &str) -> Option<u32> {
        let mut displaced = None;
        if name == "*" {
            if let Some(prev) = self.current_asterisk_id {
                self.delete(prev);
                displaced = Some(prev);
            }
            self.current_asterisk_id = Some(id);
        }
        self.by_name
            .entry(name.to_string())
            .or_default()
            .push((id, mode));
        self.table.insert(id, name.to_string());
        displaced
    }

    pub fn delete(&mut self, id: u32) -> bool {
        let Some(name) = self.table.remove(&id) else {
            return false;
        };
        if name == "*" && self.current_asterisk_id == Some(id) {
            self.current_asterisk_id = None;
        }
        if let Some(entries) = self.by_name.get_mut(&name) {
            entries.retain(|(eid, _)| *eid != id);
            if entries.is_empty() {
                self.by_name.remove(&name);
            }
        }
        true
    }

    /// Disjunction of all flags bound to `name`, restricted by category
    /// when a later entry's category does not match the first entry's
    /// (`spec.md` §4.5 "GetExceptionBreakMode").
    pub fn get_exception_break_mode(&self, name: &str) -> Option<ExceptionBreakMode> {
        let entries = self.by_name.get(name)?;
        let mut iter = entries.iter();
        let (_, first) = iter.next()?;
        let mut out = *first;
        for (_, mode) in iter {
            if out.category == ExceptionBreakCategory::Any || out.category == mode.category {
                out.flags = out.flags.union(mode.flags);
            }
        }
        Some(out)
    }

    /// `spec.md` §4.5 "Exception match".
    pub fn matches(
        &self,
        event: ExceptionEventType,
        exception_name: &str,
        category: ExceptionBreakCategory,
    ) -> bool {
        if matches!(
            event,
            ExceptionEventType::FirstChance | ExceptionEventType::UserFirstChance
        ) {
            return false;
        }

        let star = self.get_exception_break_mode("*");
        let specific = self.get_exception_break_mode(exception_name);
        let (mut combined_category, mut flags, mut have_any) =
            (ExceptionBreakCategory::Any, ExceptionFlags::default(), false);

        if let Some(s) = star {
            combined_category = s.category;
            flags = flags.union(s.flags);
            have_any = true;
        }
        if let Some(s) = specific {
            if !have_any {
                combined_category = s.category;
            }
            flags = flags.union(s.flags);
            have_any = true;
        }
        if !have_any {
            return false;
        }
        if !(category == ExceptionBreakCategory::Any || category == combined_category) {
            return false;
        }

        match event {
            ExceptionEventType::CatchHandlerFound => {
                if flags.user_unhandled && !exception_name.starts_with("System.") {
                    return true;
                }
                flags.throw
            }
            ExceptionEventType::Unhandled => flags.unhandled,
            ExceptionEventType::FirstChance | ExceptionEventType::UserFirstChance => false,
        }
    }

    /// Enumerates entries ordered by id ascending; `f` may stop iteration
    /// early by returning `false` (`spec.md` §4.5 "Enumeration").
    pub fn enumerate<F: FnMut(u32, &str, &ExceptionBreakMode) -> bool>(&self, mut f: F) {
        let mut ids: Vec<u32> = self.table.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let name = &self.table[&id];
            if let Some(entries) = self.by_name.get(name) {
                if let Some((_, mode)) = entries.iter().find(|(eid, _)| *eid == id) {
                    if !f(id, name, mode) {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(filter: ExceptionFilter, category: ExceptionBreakCategory) -> ExceptionBreakMode {
        ExceptionBreakMode {
            category,
            flags: ExceptionFlags::from_filter(filter),
        }
    }

    #[test]
    fn asterisk_insert_silently_displaces_previous() {
        let mut store = ExceptionBreakpointStorage::new();
        store.insert(1, mode(ExceptionFilter::Throw, ExceptionBreakCategory::Any), "*");
        let displaced = store.insert(
            2,
            mode(ExceptionFilter::Unhandled, ExceptionBreakCategory::Any),
            "*",
        );
        assert_eq!(displaced, Some(1));

        let mut seen = Vec::new();
        store.enumerate(|id, name, _| {
            seen.push((id, name.to_string()));
            true
        });
        assert_eq!(seen, vec![(2, "*".to_string())]);
    }

    #[test]
    fn user_unhandled_excludes_system_prefix_unless_throw_also_set() {
        let mut store = ExceptionBreakpointStorage::new();
        store.insert(
            1,
            mode(ExceptionFilter::UserUnhandled, ExceptionBreakCategory::Any),
            "*",
        );

        assert!(store.matches(
            ExceptionEventType::CatchHandlerFound,
            "MyApp.CustomException",
            ExceptionBreakCategory::Any
        ));
        assert!(!store.matches(
            ExceptionEventType::CatchHandlerFound,
            "System.InvalidOperationException",
            ExceptionBreakCategory::Any
        ));

        store.insert(
            2,
            mode(ExceptionFilter::Throw, ExceptionBreakCategory::Any),
            "System.InvalidOperationException",
        );
        assert!(store.matches(
            ExceptionEventType::CatchHandlerFound,
            "System.InvalidOperationException",
            ExceptionBreakCategory::Any
        ));
    }

    #[test]
    fn first_chance_events_are_always_ignored() {
        let mut store = ExceptionBreakpointStorage::new();
        store.insert(1, mode(ExceptionFilter::Throw, ExceptionBreakCategory::Any), "*");
        assert!(!store.matches(
            ExceptionEventType::FirstChance,
            "Anything",
            ExceptionBreakCategory::Any
        ));
    }

    #[test]
    fn unhandled_requires_unhandled_flag() {
        let mut store = ExceptionBreakpointStorage::new();
        store.insert(1, mode(ExceptionFilter::Throw, ExceptionBreakCategory::Any), "*");
        assert!(!store.matches(
            ExceptionEventType::Unhandled,
            "Anything",
            ExceptionBreakCategory::Any
        ));
        store.insert(2, mode(ExceptionFilter::Unhandled, ExceptionBreakCategory::Any), "*");
        assert!(store.matches(
            ExceptionEventType::Unhandled,
            "Anything",
            ExceptionBreakCategory::Any
        ));
    }

    #[test]
    fn delete_by_id_removes_from_name_multimap() {
        let mut store = ExceptionBreakpointStorage::new();
        store.insert(1, mode(ExceptionFilter::Throw, ExceptionBreakCategory::Any), "E1");
        assert!(store.delete(1));
        assert!(!store.delete(1));
        assert!(store.get_exception_break_mode("E1").is_none());
    }
}
