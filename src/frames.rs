//! Stack frame walking (`spec.md` §4.5 "Stack trace").
//!
//! Grounded in `examples/original_source/src/debugger/frames.cpp`: only
//! managed and "named internal" native frames are surfaced; anonymous
//! native frames are skipped entirely rather than rendered as placeholder
//! entries.

use crate::error::Result;
use crate::ids::{FrameId, FrameIdTable, FrameLevel, ThreadId};
use crate::model::{FrameKind, Module, Source, StackFrame};
use crate::runtime::{NativeFrameInfo, RuntimeApi};

pub struct FrameWalker {
    ids: FrameIdTable,
}

impl Default for FrameWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameWalker {
    pub fn new() -> Self {
        FrameWalker {
            ids: FrameIdTable::new(),
        }
    }

    /// Invalidates every `FrameId` handed out so far. Called whenever the
    /// process resumes (`spec.md` §3 invariants).
    pub fn invalidate(&self) {
        self.ids.clear();
    }

    pub fn resolve(&self, id: FrameId) -> Option<(ThreadId, FrameLevel)> {
        self.ids.resolve(id)
    }

    /// Walks `thread`'s call stack in the `[low, high)` window and renders
    /// it to the wire shape, skipping frames the runtime reports as
    /// anonymous native frames (`kind == Native` with no function name).
    pub fn stack_trace(
        &self,
        thread: ThreadId,
        low: u32,
        high: u32,
        modules: &[Module],
        runtime: &dyn RuntimeApi,
    ) -> Result<Vec<StackFrame>> {
        let native_frames = runtime.walk_frames(thread, low, high)?;
        let mut frames = Vec::with_capacity(native_frames.len());

        for (level, info) in native_frames.into_iter().enumerate() {
            if info.kind == FrameKind::Native && info.function_name.is_empty() {
                continue;
            }
            let level = FrameLevel::new(low + level as u32);
            let id = self.ids.allocate(thread, level);
            frames.push(render_frame(id, &info, modules));
        }
        Ok(frames)
    }
}

fn render_frame(id: FrameId, info: &NativeFrameInfo, modules: &[Module]) -> StackFrame {
    let module_name = info
        .module_id
        .as_ref()
        .and_then(|mid| modules.iter().find(|m| &m.id == mid))
        .map(|m| m.name.clone());

    let name = match info.kind {
        FrameKind::ClrManaged | FrameKind::ClrInternal => info.function_name.clone(),
        FrameKind::ClrNative => format!("[Native Frame] {}", info.function_name),
        FrameKind::Native | FrameKind::Unknown => {
            if let Some(m) = &module_name {
                format!("{}!{}", m, info.function_name)
            } else {
                info.function_name.clone()
            }
        }
    };

    StackFrame {
        id: Some(id),
        name,
        source: info.fullname.as_ref().and_then(Source::from_path),
        line: info.line,
        column: info.column,
        end_line: None,
        end_column: None,
        module_id: info.module_id.clone(),
        clr_addr: info.clr_addr,
        native_addr: info.native_addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolStatus;
    use crate::runtime::mock::MockRuntime;
    use std::path::PathBuf;

    #[test]
    fn frame_ids_are_stable_within_a_stop_and_cleared_on_resume() {
        let walker = FrameWalker::new();
        let runtime = MockRuntime::new();
        let modules: Vec<Module> = Vec::new();
        let thread = ThreadId::new(1);

        let a = walker.ids.allocate(thread, FrameLevel::new(0));
        let b = walker.stack_trace(thread, 0, 10, &modules, &runtime).unwrap();
        assert!(b.is_empty());
        assert!(walker.resolve(a).is_some());

        walker.invalidate();
        assert!(walker.resolve(a).is_none());
    }

    #[test]
    fn managed_frame_name_is_bare_function_name() {
        let info = NativeFrameInfo {
            kind: FrameKind::ClrManaged,
            function_name: "MyApp.Program.Main".to_string(),
            fullname: Some("/src/Program.cs".to_string()),
            line: 12,
            column: 4,
            module_id: None,
            clr_addr: Some(0x10),
            native_addr: None,
        };
        let walker = FrameWalker::new();
        let frame_id = walker.ids.allocate(ThreadId::new(1), FrameLevel::new(0));
        let frame = render_frame(frame_id, &info, &[]);
        assert_eq!(frame.name, "MyApp.Program.Main");
        assert_eq!(frame.source.unwrap().name, "Program.cs");
    }

    #[test]
    fn native_frame_is_qualified_with_module_name() {
        let module = Module {
            id: "mod1".to_string(),
            name: "libfoo.so".to_string(),
            path: PathBuf::from("/lib/libfoo.so"),
            symbol_status: SymbolStatus::NotFound,
            base_address: 0,
            size: 0,
        };
        let info = NativeFrameInfo {
            kind: FrameKind::Native,
            function_name: "do_work".to_string(),
            fullname: None,
            line: 0,
            column: 0,
            module_id: Some("mod1".to_string()),
            clr_addr: None,
            native_addr: Some(0x7f00),
        };
        let walker = FrameWalker::new();
        let frame_id = walker.ids.allocate(ThreadId::new(1), FrameLevel::new(0));
        let frame = render_frame(frame_id, &info, std::slice::from_ref(&module));
        assert_eq!(frame.name, "libfoo.so!do_work");
    }
}
