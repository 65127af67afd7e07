//! Breakpoint engine: source, function and exception breakpoints
//! (`spec.md` §4.5).
//!
//! Grounded in `examples/jcn363-AI_IDE`'s `rust-ai-ide-debugger` breakpoint
//! manager for the overall shape (id table behind a counter, resolve-on-
//! module-load), and in `examples/original_source/src/debugger/breakpoints.h`
//! for the exact replace and dedup semantics: setting breakpoints for a file
//! replaces the previous set for that file only, matching by line and
//! preserving ids across calls; several logical breakpoints resolving to the
//! same `(module, line)` share a single native installation, and the
//! smallest id among them is the one reported as hit.

pub mod exceptions;

pub use exceptions::{
    ExceptionBreakCategory, ExceptionBreakMode, ExceptionBreakpointStorage, ExceptionEventType,
    ExceptionFilter, ExceptionFlags,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use log::{debug, info, warn};

use crate::error::Result;
use crate::model::{Module, RenderedBreakpoint, Source};
use crate::runtime::{NativeBreakpointHandle, ResolvedLocation, RuntimeApi};

#[derive(Debug, Clone)]
pub struct SourceBreakpointSpec {
    pub line: u32,
    pub condition: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FunctionBreakpointSpec {
    pub module: Option<String>,
    pub name: String,
    pub params: String,
    pub condition: Option<String>,
}

struct ManagedSourceBreakpoint {
    id: u32,
    path: String,
    requested_line: u32,
    condition: Option<String>,
    hit_count: u64,
    resolved: Option<ResolvedLocation>,
}

/// All logical breakpoints that resolved to the same `(module, line)` share
/// one native installation.
#[derive(Default)]
struct LineGroup {
    native: Option<NativeBreakpointHandle>,
    members: Vec<u32>,
}

struct ManagedFunctionBreakpoint {
    id: u32,
    module_filter: Option<String>,
    name: String,
    params: String,
    condition: Option<String>,
    hit_count: u64,
    bindings: Vec<(ResolvedLocation, NativeBreakpointHandle)>,
}

/// Central owner of source, function and exception breakpoint state, plus
/// the entry-point breakpoint used by `stopAtEntry`.
pub struct BreakpointEngine {
    next_id: AtomicU32,
    source_breakpoints: Mutex<HashMap<u32, ManagedSourceBreakpoint>>,
    file_order: Mutex<HashMap<String, Vec<u32>>>,
    line_groups: Mutex<HashMap<(String, u32), LineGroup>>,
    function_breakpoints: Mutex<HashMap<u32, ManagedFunctionBreakpoint>>,
    function_order: Mutex<Vec<u32>>,
    exceptions: Mutex<ExceptionBreakpointStorage>,
    modules: Mutex<Vec<Module>>,
    entry_breakpoint: Mutex<Option<NativeBreakpointHandle>>,
}

impl Default for BreakpointEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointEngine {
    pub fn new() -> Self {
        BreakpointEngine {
            next_id: AtomicU32::new(1),
            source_breakpoints: Mutex::new(HashMap::new()),
            file_order: Mutex::new(HashMap::new()),
            line_groups: Mutex::new(HashMap::new()),
            function_breakpoints: Mutex::new(HashMap::new()),
            function_order: Mutex::new(Vec::new()),
            exceptions: Mutex::new(ExceptionBreakpointStorage::new()),
            modules: Mutex::new(Vec::new()),
            entry_breakpoint: Mutex::new(None),
        }
    }

    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Replaces the full set of source breakpoints for `path`
    /// (`spec.md` §4.5 "Set source breakpoints"). Ids are preserved across
    /// calls for entries matching by line; unmatched leftovers are torn
    /// down.
    pub fn set_source_breakpoints(
        &self,
        path: &str,
        specs: &[SourceBreakpointSpec],
        runtime: &dyn RuntimeApi,
    ) -> Vec<RenderedBreakpoint> {
        let mut bps = self.source_breakpoints.lock().unwrap();
        let mut file_order = self.file_order.lock().unwrap();
        let mut line_groups = self.line_groups.lock().unwrap();

        let prev_ids = file_order.remove(path).unwrap_or_default();
        let mut prev_by_line: HashMap<u32, VecDeque<u32>> = HashMap::new();
        for id in &prev_ids {
            if let Some(bp) = bps.get(id) {
                prev_by_line.entry(bp.requested_line).or_default().push_back(*id);
            }
        }

        let mut new_ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let reused = prev_by_line
                .get_mut(&spec.line)
                .and_then(|queue| queue.pop_front());
            let id = match reused {
                Some(id) => {
                    if let Some(bp) = bps.get_mut(&id) {
                        bp.condition = spec.condition.clone();
                    }
                    id
                }
                None => self.alloc_id(),
            };
            bps.entry(id).or_insert_with(|| ManagedSourceBreakpoint {
                id,
                path: path.to_string(),
                requested_line: spec.line,
                condition: spec.condition.clone(),
                hit_count: 0,
                resolved: None,
            });
            new_ids.push(id);
        }

        let reused_ids: HashSet<u32> = new_ids.iter().copied().collect();
        for leftover in prev_by_line.into_values().flatten() {
            if !reused_ids.contains(&leftover) {
                self.deactivate_source_bp(leftover, &mut bps, &mut line_groups, runtime);
            }
        }

        let modules = self.modules.lock().unwrap().clone();
        for &id in &new_ids {
            self.try_resolve_source_bp(id, &modules, &mut bps, &mut line_groups, runtime);
        }

        file_order.insert(path.to_string(), new_ids.clone());
        new_ids
            .iter()
            .map(|id| Self::render_source_bp(*id, &bps))
            .collect()
    }

    fn deactivate_source_bp(
        &self,
        id: u32,
        bps: &mut HashMap<u32, ManagedSourceBreakpoint>,
        line_groups: &mut HashMap<(String, u32), LineGroup>,
        runtime: &dyn RuntimeApi,
    ) {
        if let Some(bp) = bps.remove(&id) {
            if let Some(loc) = &bp.resolved {
                let key = (bp.path.clone(), loc.linenum);
                if let Some(group) = line_groups.get_mut(&key) {
                    group.members.retain(|m| *m != id);
                    if group.members.is_empty() {
                        if let Some(handle) = group.native.take() {
                            if let Err(e) = runtime.remove_native_breakpoint(handle) {
                                warn!("failed to remove native breakpoint: {e}");
                            }
                        }
                        line_groups.remove(&key);
                    }
                }
            }
        }
    }

    fn try_resolve_source_bp(
        &self,
        id: u32,
        modules: &[Module],
        bps: &mut HashMap<u32, ManagedSourceBreakpoint>,
        line_groups: &mut HashMap<(String, u32), LineGroup>,
        runtime: &dyn RuntimeApi,
    ) -> bool {
        let Some(bp) = bps.get(&id) else { return false };
        if bp.resolved.is_some() {
            return false;
        }
        let path = bp.path.clone();
        let requested_line = bp.requested_line;

        let loc = modules
            .iter()
            .find_map(|m| runtime.resolve_line(m, &path, requested_line));
        let Some(loc) = loc else { return false };

        let key = (path.clone(), loc.linenum);
        let group = line_groups.entry(key.clone()).or_default();
        if group.native.is_none() {
            match runtime.set_native_breakpoint(&loc) {
                Ok(handle) => group.native = Some(handle),
                Err(e) => {
                    warn!("failed to install native breakpoint at {}:{}: {e}", path, loc.linenum);
                    return false;
                }
            }
        }
        group.members.push(id);
        info!("resolved source breakpoint {id} to {}:{}", path, loc.linenum);
        bps.get_mut(&id).unwrap().resolved = Some(loc);
        true
    }

    /// Re-attempts resolution of every unresolved source and function
    /// breakpoint against the newly loaded module, plus the entry-point
    /// breakpoint. Returns the ids whose rendering changed, for
    /// `BreakpointChanged` events (`spec.md` §4.5 "Module-load
    /// resolution").
    pub fn on_module_loaded(
        &self,
        module: Module,
        stop_at_entry: bool,
        runtime: &dyn RuntimeApi,
    ) -> (Vec<RenderedBreakpoint>, Vec<u32>) {
        let single = std::slice::from_ref(&module);
        let mut bps = self.source_breakpoints.lock().unwrap();
        let mut line_groups = self.line_groups.lock().unwrap();
        let mut changed = Vec::new();

        let ids: Vec<u32> = bps.keys().copied().collect();
        for id in ids {
            if self.try_resolve_source_bp(id, single, &mut bps, &mut line_groups, runtime) {
                changed.push(Self::render_source_bp(id, &bps));
            }
        }
        drop(bps);
        drop(line_groups);

        let changed_fn_ids = self.resolve_function_breakpoints(single, runtime);

        if stop_at_entry {
            if let Some(loc) = runtime.entry_point(&module) {
                match runtime.set_native_breakpoint(&loc) {
                    Ok(handle) => *self.entry_breakpoint.lock().unwrap() = Some(handle),
                    Err(e) => warn!("failed to install entry breakpoint: {e}"),
                }
            }
        }

        self.modules.lock().unwrap().push(module);
        (changed, changed_fn_ids)
    }

    fn render_source_bp(id: u32, bps: &HashMap<u32, ManagedSourceBreakpoint>) -> RenderedBreakpoint {
        let bp = &bps[&id];
        match &bp.resolved {
            Some(loc) => RenderedBreakpoint {
                id,
                verified: true,
                message: None,
                source: Source::from_path(&bp.path),
                line: Some(loc.linenum),
                hit_count: bp.hit_count,
                condition: bp.condition.clone(),
                module: None,
                funcname: None,
                params: None,
            },
            None => RenderedBreakpoint::unresolved(
                id,
                Source::from_path(&bp.path).unwrap_or(Source {
                    name: bp.path.clone(),
                    path: bp.path.clone(),
                }),
                bp.requested_line,
                bp.condition.clone(),
            ),
        }
    }

    /// Called on every native breakpoint hit. Resolves the owning logical
    /// id (smallest among those sharing the native installation), checks
    /// its condition and bumps its hit count. Returns `None` when the
    /// breakpoint should not actually stop the process (condition false).
    pub fn on_source_breakpoint_hit(
        &self,
        native: NativeBreakpointHandle,
        condition_holds: impl Fn(&str) -> bool,
    ) -> Option<RenderedBreakpoint> {
        let mut bps = self.source_breakpoints.lock().unwrap();
        let line_groups = self.line_groups.lock().unwrap();
        let group = line_groups.values().find(|g| g.native == Some(native))?;
        let id = *group.members.iter().min()?;
        let bp = bps.get_mut(&id)?;
        if let Some(cond) = &bp.condition {
            if !condition_holds(cond) {
                debug!("breakpoint {id} condition false, not stopping");
                return None;
            }
        }
        bp.hit_count += 1;
        drop(line_groups);
        Some(Self::render_source_bp(id, &bps))
    }

    /// Replaces the full set of function breakpoints
    /// (`spec.md` §4.5 "Set function breakpoints").
    pub fn set_function_breakpoints(
        &self,
        specs: &[FunctionBreakpointSpec],
        runtime: &dyn RuntimeApi,
    ) -> Vec<RenderedBreakpoint> {
        let mut fns = self.function_breakpoints.lock().unwrap();
        let mut order = self.function_order.lock().unwrap();

        let prev_ids = std::mem::take(&mut *order);
        let mut prev_by_sig: HashMap<(Option<String>, String, String), VecDeque<u32>> =
            HashMap::new();
        for id in &prev_ids {
            if let Some(fb) = fns.get(id) {
                prev_by_sig
                    .entry((fb.module_filter.clone(), fb.name.clone(), fb.params.clone()))
                    .or_default()
                    .push_back(*id);
            }
        }

        let mut new_ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let sig = (spec.module.clone(), spec.name.clone(), spec.params.clone());
            let reused = prev_by_sig.get_mut(&sig).and_then(|q| q.pop_front());
            let id = match reused {
                Some(id) => {
                    if let Some(fb) = fns.get_mut(&id) {
                        fb.condition = spec.condition.clone();
                    }
                    id
                }
                None => self.alloc_id(),
            };
            fns.entry(id).or_insert_with(|| ManagedFunctionBreakpoint {
                id,
                module_filter: spec.module.clone(),
                name: spec.name.clone(),
                params: spec.params.clone(),
                condition: spec.condition.clone(),
                hit_count: 0,
                bindings: Vec::new(),
            });
            new_ids.push(id);
        }

        let reused_ids: HashSet<u32> = new_ids.iter().copied().collect();
        for leftover in prev_by_sig.into_values().flatten() {
            if !reused_ids.contains(&leftover) {
                if let Some(fb) = fns.remove(&leftover) {
                    for (_, handle) in fb.bindings {
                        let _ = runtime.remove_native_breakpoint(handle);
                    }
                }
            }
        }

        *order = new_ids.clone();
        drop(fns);
        drop(order);

        let modules = self.modules.lock().unwrap().clone();
        self.resolve_function_breakpoints(&modules, runtime);

        let fns = self.function_breakpoints.lock().unwrap();
        new_ids.iter().map(|id| Self::render_function_bp(*id, &fns)).collect()
    }

    fn resolve_function_breakpoints(&self, modules: &[Module], runtime: &dyn RuntimeApi) -> Vec<u32> {
        let mut fns = self.function_breakpoints.lock().unwrap();
        let mut changed = Vec::new();
        for fb in fns.values_mut() {
            for module in modules {
                if let Some(filter) = &fb.module_filter {
                    if filter != &module.name {
                        continue;
                    }
                }
                for loc in runtime.resolve_function(module, &fb.name, &fb.params) {
                    if fb.bindings.iter().any(|(l, _)| l.fullname == loc.fullname && l.il_offset == loc.il_offset) {
                        continue;
                    }
                    match runtime.set_native_breakpoint(&loc) {
                        Ok(handle) => {
                            fb.bindings.push((loc, handle));
                            changed.push(fb.id);
                        }
                        Err(e) => warn!("failed to install function breakpoint {}: {e}", fb.name),
                    }
                }
            }
        }
        changed
    }

    fn render_function_bp(id: u32, fns: &HashMap<u32, ManagedFunctionBreakpoint>) -> RenderedBreakpoint {
        let fb = &fns[&id];
        RenderedBreakpoint {
            id,
            verified: !fb.bindings.is_empty(),
            message: if fb.bindings.is_empty() {
                Some("The breakpoint will not currently be hit. No symbols have been loaded for this document.".to_string())
            } else {
                None
            },
            source: None,
            line: None,
            hit_count: fb.hit_count,
            condition: fb.condition.clone(),
            module: fb.module_filter.clone(),
            funcname: Some(fb.name.clone()),
            params: Some(fb.params.clone()),
        }
    }

    pub fn on_function_breakpoint_hit(
        &self,
        native: NativeBreakpointHandle,
        condition_holds: impl Fn(&str) -> bool,
    ) -> Option<RenderedBreakpoint> {
        let mut fns = self.function_breakpoints.lock().unwrap();
        let id = fns
            .values()
            .find(|fb| fb.bindings.iter().any(|(_, h)| *h == native))?
            .id;
        let fb = fns.get_mut(&id)?;
        if let Some(cond) = &fb.condition {
            if !condition_holds(cond) {
                return None;
            }
        }
        fb.hit_count += 1;
        Some(Self::render_function_bp(id, &fns))
    }

    pub fn exceptions(&self) -> std::sync::MutexGuard<'_, ExceptionBreakpointStorage> {
        self.exceptions.lock().unwrap()
    }

    pub fn insert_exception_breakpoint(
        &self,
        mode: ExceptionBreakMode,
        name: &str,
    ) -> (u32, Option<u32>) {
        let id = self.alloc_id();
        let displaced = self.exceptions.lock().unwrap().insert(id, mode, name);
        (id, displaced)
    }

    pub fn delete_exception_breakpoint(&self, id: u32) -> bool {
        self.exceptions.lock().unwrap().delete(id)
    }

    /// Result<()> kept for symmetry with the other breakpoint kinds even
    /// though removal can't presently fail.
    pub fn delete_source_breakpoint(&self, id: u32, runtime: &dyn RuntimeApi) -> Result<()> {
        let mut bps = self.source_breakpoints.lock().unwrap();
        let mut line_groups = self.line_groups.lock().unwrap();
        self.deactivate_source_bp(id, &mut bps, &mut line_groups, runtime);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolStatus;
    use crate::runtime::mock::MockRuntime;
    use std::path::PathBuf;

    fn module(id: &str) -> Module {
        Module {
            id: id.to_string(),
            name: format!("{id}.dll"),
            path: PathBuf::from(format!("/bin/{id}.dll")),
            symbol_status: SymbolStatus::Loaded,
            base_address: 0x1000,
            size: 0x2000,
        }
    }

    fn loc(line: u32) -> ResolvedLocation {
        ResolvedLocation {
            mod_address: 0x1000,
            method_token: 1,
            il_offset: 0,
            fullname: "/src/main.cs".to_string(),
            linenum: line,
        }
    }

    #[test]
    fn duplicate_lines_share_one_native_breakpoint() {
        let engine = BreakpointEngine::new();
        let runtime = MockRuntime::new();
        let m = module("m1");
        runtime.add_line(&m.id, "/src/main.cs", 10, loc(10));
        engine.on_module_loaded(m, false, &runtime);

        let rendered = engine.set_source_breakpoints(
            "/src/main.cs",
            &[
                SourceBreakpointSpec { line: 10, condition: None },
                SourceBreakpointSpec { line: 10, condition: None },
            ],
            &runtime,
        );
        assert_eq!(rendered.len(), 2);
        assert!(rendered.iter().all(|b| b.verified));
        assert_ne!(rendered[0].id, rendered[1].id);
        assert_eq!(runtime.active_breakpoint_count(), 1);
    }

    #[test]
    fn re_setting_preserves_ids_by_line_and_removes_unused_native_bp() {
        let engine = BreakpointEngine::new();
        let runtime = MockRuntime::new();
        let m = module("m1");
        runtime.add_line(&m.id, "/src/main.cs", 10, loc(10));
        runtime.add_line(&m.id, "/src/main.cs", 20, loc(20));
        engine.on_module_loaded(m, false, &runtime);

        let first = engine.set_source_breakpoints(
            "/src/main.cs",
            &[SourceBreakpointSpec { line: 10, condition: None }],
            &runtime,
        );
        let first_id = first[0].id;

        let second = engine.set_source_breakpoints(
            "/src/main.cs",
            &[
                SourceBreakpointSpec { line: 10, condition: None },
                SourceBreakpointSpec { line: 20, condition: None },
            ],
            &runtime,
        );
        assert_eq!(second[0].id, first_id);
        assert_eq!(runtime.active_breakpoint_count(), 2);

        let third = engine.set_source_breakpoints(
            "/src/main.cs",
            &[SourceBreakpointSpec { line: 20, condition: None }],
            &runtime,
        );
        assert_eq!(third.len(), 1);
        assert_eq!(runtime.active_breakpoint_count(), 1);
    }

    #[test]
    fn unresolved_breakpoint_resolves_on_module_load() {
        let engine = BreakpointEngine::new();
        let runtime = MockRuntime::new();

        let rendered = engine.set_source_breakpoints(
            "/src/main.cs",
            &[SourceBreakpointSpec { line: 10, condition: None }],
            &runtime,
        );
        assert!(!rendered[0].verified);

        let m = module("m1");
        runtime.add_line(&m.id, "/src/main.cs", 10, loc(10));
        let (changed, _) = engine.on_module_loaded(m, false, &runtime);
        assert_eq!(changed.len(), 1);
        assert!(changed[0].verified);
    }

    #[test]
    fn hit_reports_smallest_shadowed_id() {
        let engine = BreakpointEngine::new();
        let runtime = MockRuntime::new();
        let m = module("m1");
        runtime.add_line(&m.id, "/src/main.cs", 10, loc(10));
        engine.on_module_loaded(m, false, &runtime);

        engine.set_source_breakpoints(
            "/src/main.cs",
            &[
                SourceBreakpointSpec { line: 10, condition: None },
                SourceBreakpointSpec { line: 10, condition: None },
            ],
            &runtime,
        );
        let handle = runtime.active_breakpoint_count();
        assert_eq!(handle, 1);

        let native = NativeBreakpointHandle(1);
        let hit = engine.on_source_breakpoint_hit(native, |_| true);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().hit_count, 1);
    }
}
