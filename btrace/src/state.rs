//! Per-process registry of loaded modules, dispatching `pc_to_symbol` and `pc_to_fileline`.
//!
//! Mirrors the spec's lock-free state registry: two singly-linked lists (symbol shards and
//! DWARF modules), prepended by writers using compare-and-swap, traversed by readers using
//! acquire loads. Shards are immutable once published. All data retained in a shard is copied
//! out of the backing [`btrace_common::ByteView`] at load time, so the registry itself never
//! borrows from a module's mapped bytes and outlives any single parse call.

use std::fmt;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use btrace_common::ByteView;

use crate::base::{DebugSession, Function};
use crate::object::{Object, ObjectDebugSession, ObjectError};
use crate::resolve::{self, DebugFileHints, FsByteSource, ResolvedDebugFile, SearchPaths};
use crate::sort::shell_sort_by_key;

/// Classifies a reported condition without halting the pipeline, per §7's six error kinds.
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// Open/read/fstat failure.
    Io(String),
    /// Magic mismatch, truncation, or out-of-range offset; the affected unit/module is skipped.
    Format(String),
    /// CRC-32 or UUID mismatch on a debug-file candidate; the next fallback is tried.
    Consistency(String),
    /// A decompression error; the module loses its debug info but symbols (if any) survive.
    Decompression(String),
    /// An allocation failure in a context that cannot use the general heap.
    Resource(String),
    /// No debug info is present; informational, not an error.
    Missing(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Io(msg) => write!(f, "io: {msg}"),
            Diagnostic::Format(msg) => write!(f, "format: {msg}"),
            Diagnostic::Consistency(msg) => write!(f, "consistency: {msg}"),
            Diagnostic::Decompression(msg) => write!(f, "decompression: {msg}"),
            Diagnostic::Resource(msg) => write!(f, "resource: {msg}"),
            Diagnostic::Missing(msg) => write!(f, "missing: {msg}"),
        }
    }
}

/// Configuration passed to [`create_state`], replacing environment-variable configuration with
/// an explicit builder-style struct, per §2a.
#[derive(Clone)]
pub struct StateConfig {
    /// Whether the state may be queried concurrently from multiple threads.
    pub threaded: bool,
    /// Whether this state may be queried from a signal handler.
    ///
    /// When set, [`State::load_module`] is refused: all modules must have been loaded and
    /// indexed during ordinary (non-signal) initialization, since that indexing allocates.
    pub in_signal_handler: bool,
    /// Invoked for every reportable condition that does not halt the pipeline.
    pub error_callback: Arc<dyn Fn(&Diagnostic) + Send + Sync>,
    /// Overrides the default `/usr/lib/debug` search root for the debug-file resolver.
    pub debug_dirs: Option<Vec<PathBuf>>,
}

impl fmt::Debug for StateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateConfig")
            .field("threaded", &self.threaded)
            .field("in_signal_handler", &self.in_signal_handler)
            .field("debug_dirs", &self.debug_dirs)
            .finish()
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            threaded: false,
            in_signal_handler: false,
            error_callback: Arc::new(|_| {}),
            debug_dirs: None,
        }
    }
}

/// Errors that can occur while loading a module into a [`State`].
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// [`State::load_module`] was called on a state created with `in_signal_handler: true`.
    #[error("cannot load a module into a signal-handler-safe state after creation")]
    NotAllowedInSignalHandler,

    /// The file could not be opened or read.
    #[error("failed to open module")]
    Io(#[from] io::Error),

    /// The container could not be parsed.
    #[error("failed to parse object container")]
    Object(#[from] ObjectError),
}

/// A lock-free, append-only (by prepend) singly-linked list node.
struct Node<T> {
    data: T,
    next: AtomicPtr<Node<T>>,
}

/// A lock-free singly-linked list: writers prepend via CAS, readers traverse via acquire-loads.
///
/// `PhantomData<T>` narrows the auto-derived `Send`/`Sync` to hold only when `T` itself does;
/// `AtomicPtr` alone would grant them unconditionally regardless of `T`.
struct List<T> {
    head: AtomicPtr<Node<T>>,
    _marker: PhantomData<T>,
}

impl<T> List<T> {
    fn new() -> Self {
        List {
            head: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// Prepends `data`. When `threaded` is true, inserts via a compare-and-swap retry loop;
    /// otherwise publishes with a plain store, matching the spec's "CAS when threaded, plain
    /// pointer assignment otherwise".
    fn push(&self, data: T, threaded: bool) {
        let node = Box::into_raw(Box::new(Node {
            data,
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        if !threaded {
            let head = self.head.load(Ordering::Relaxed);
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            self.head.store(node, Ordering::Release);
            return;
        }

        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            if self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head.load(Ordering::Acquire),
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let mut boxed = unsafe { Box::from_raw(current) };
            current = *boxed.next.get_mut();
        }
    }
}

struct Iter<'a, T> {
    current: *mut Node<T>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_null() {
            return None;
        }

        let node = unsafe { &*self.current };
        self.current = node.next.load(Ordering::Acquire);
        Some(&node.data)
    }
}

/// An immutable, address-sorted symbol: `(address, size, name)`, copied out of the module's
/// retained string table or string arena so the shard owns its data independent of the view.
#[derive(Debug, Clone)]
pub struct OwnedSymbol {
    /// Start address, relative to the module's load address.
    pub address: u64,
    /// Size in bytes, or `0` if unknown.
    pub size: u64,
    /// Demangled-or-raw symbol name.
    pub name: String,
}

/// An immutable, address-sorted sequence of symbols for one loaded module.
pub struct SymbolShard {
    symbols: Vec<OwnedSymbol>,
}

impl SymbolShard {
    fn build(symbol_map: &crate::base::SymbolMap<'_>) -> Self {
        let mut symbols: Vec<OwnedSymbol> = symbol_map
            .iter()
            .map(|symbol| OwnedSymbol {
                address: symbol.address,
                size: symbol.size,
                name: symbol.name().unwrap_or("<unknown>").to_owned(),
            })
            .collect();
        shell_sort_by_key(&mut symbols, |s| s.address);
        SymbolShard { symbols }
    }

    /// Binary-searches for the symbol covering `pc`, per §4.7's `[address, address+size)` rule.
    fn lookup(&self, pc: u64) -> Option<&OwnedSymbol> {
        let idx = match self.symbols.binary_search_by_key(&pc, |s| s.address) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };

        let symbol = &self.symbols[idx];
        if symbol.size == 0 || pc < symbol.address + symbol.size {
            Some(symbol)
        } else {
            None
        }
    }
}

/// One row of a function's line-number program, retained so `line_at` can binary search it.
#[derive(Debug, Clone)]
struct LineRow {
    /// Relative instruction address at which this row's file/line become active.
    address: u64,
    file: String,
    line: u64,
}

/// An owned, recursively-resolved function record: name, enclosing file/line, and inlinees.
///
/// Built once from a borrowed [`Function`] at module-load time so the registry owns its data
/// independent of the originating `DebugSession`'s lifetime.
#[derive(Debug, Clone)]
pub struct OwnedFunction {
    /// Start address, relative to the module's load address.
    pub address: u64,
    /// Total code size, including inlined children.
    pub size: u64,
    /// Function name.
    pub name: String,
    /// Source file active at `address` (the function's own declaration site).
    pub file: String,
    /// Source line active at `address`.
    pub line: u64,
    /// This function's own line-number program rows, address-sorted, excluding inlinees' rows.
    lines: Vec<LineRow>,
    /// Inlined call sites within this function's body.
    pub inlinees: Vec<OwnedFunction>,
}

impl OwnedFunction {
    fn from_function(function: &Function<'_>) -> Self {
        let mut lines: Vec<LineRow> = function
            .lines
            .iter()
            .map(|line| LineRow {
                address: line.address,
                file: line.file.path_str(),
                line: line.line,
            })
            .collect();
        shell_sort_by_key(&mut lines, |row| row.address);

        let (file, line) = lines
            .first()
            .map(|row| (row.file.clone(), row.line))
            .unwrap_or_default();

        OwnedFunction {
            address: function.address,
            size: function.size,
            name: function.name.to_string(),
            file,
            line,
            lines,
            inlinees: function
                .inlinees
                .iter()
                .map(OwnedFunction::from_function)
                .collect(),
        }
    }

    fn end_address(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    fn contains(&self, pc: u64) -> bool {
        pc >= self.address && pc < self.end_address()
    }

    /// Finds the line record covering `pc` among this function's direct lines (not inlinees),
    /// returning the greatest row with `address <= pc`, per §4.6's lookup algorithm step 2.
    ///
    /// Falls back to the function's declared entry file/line if `pc` precedes every retained
    /// row (e.g. a function with no line-number program at all).
    fn line_at(&self, pc: u64) -> (String, u64) {
        let idx = match self.lines.binary_search_by_key(&pc, |row| row.address) {
            Ok(idx) => idx,
            Err(0) => return (self.file.clone(), self.line),
            Err(idx) => idx - 1,
        };

        let row = &self.lines[idx];
        (row.file.clone(), row.line)
    }
}

/// One resolved frame in a `pc_full` inline chain.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Function name for this frame.
    pub function: String,
    /// Source file at this frame's current position.
    pub file: String,
    /// Source line at this frame's current position.
    pub line: u64,
}

/// An immutable DWARF module: the functions it defines, indexed by load-relative address.
pub struct DwarfModule {
    base_address: u64,
    functions: Vec<OwnedFunction>,
}

impl DwarfModule {
    fn build(session: &mut ObjectDebugSession<'_>, base_address: u64) -> Self {
        let mut functions: Vec<OwnedFunction> = session
            .functions()
            .filter_map(|result| result.ok())
            .map(|f| OwnedFunction::from_function(&f))
            .collect();
        shell_sort_by_key(&mut functions, |f| f.address);
        DwarfModule {
            base_address,
            functions,
        }
    }

    /// Binary-searches the top-level function table, then walks the inline tree innermost-first.
    ///
    /// Per the concrete scenario in §8 (S6), callbacks are delivered innermost frame first: the
    /// inlined callee, then its caller, and so on up to the enclosing non-inlined subprogram.
    fn lookup(&self, pc: u64) -> Option<Vec<Frame>> {
        if pc < self.base_address {
            return None;
        }
        let rel_pc = pc - self.base_address;

        let idx = match self.functions.binary_search_by_key(&rel_pc, |f| f.address) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };

        let function = &self.functions[idx];
        if !function.contains(rel_pc) {
            return None;
        }

        let mut chain = Vec::new();
        Self::walk(function, rel_pc, &mut chain);
        chain.reverse();
        Some(chain)
    }

    /// Descends into the innermost inlinee containing `pc`, pushing frames innermost-first as
    /// the recursion unwinds (the caller reverses the result to get outermost-last delivery).
    fn walk(function: &OwnedFunction, pc: u64, chain: &mut Vec<Frame>) {
        let inlinee = function.inlinees.iter().find(|f| f.contains(pc));

        if let Some(inlinee) = inlinee {
            Self::walk(inlinee, pc, chain);
            let (file, line) = function.line_at(pc);
            chain.push(Frame {
                function: function.name.clone(),
                file,
                line,
            });
        } else {
            let (file, line) = function.line_at(pc);
            chain.push(Frame {
                function: function.name.clone(),
                file,
                line,
            });
        }
    }
}

/// The process-wide registry of loaded modules.
///
/// Created once via [`create_state`] and never torn down explicitly; modules are published
/// lock-free and, once published, never mutated.
pub struct State {
    config: StateConfig,
    symbols: List<SymbolShard>,
    dwarf: List<DwarfModule>,
}

/// Creates a new, empty [`State`]. No modules are loaded yet; call [`State::load_module`] for
/// each object the caller wants resolvable.
pub fn create_state(config: StateConfig) -> State {
    State {
        config,
        symbols: List::new(),
        dwarf: List::new(),
    }
}

impl State {
    /// Parses `path` and publishes its symbol shard and (if present) DWARF module.
    ///
    /// All indexing (symbol sort, function/inline-tree construction) happens here, eagerly,
    /// before publication — matching §5's requirement that a signal-handler-safe state never
    /// triggers allocation on the query path.
    pub fn load_module(&self, path: &Path) -> Result<(), StateError> {
        if self.config.in_signal_handler {
            return Err(StateError::NotAllowedInSignalHandler);
        }

        let view = ByteView::open(path)?;
        let data = view.as_slice();
        let object = Object::parse(data)?;

        let base_address = object.load_address();
        let symbol_map = object.symbol_map();
        if !symbol_map.is_empty() {
            self.symbols
                .push(SymbolShard::build(&symbol_map), self.config.threaded);
        }

        if object.has_debug_info() {
            match object.debug_session() {
                Ok(mut session) => {
                    let module = DwarfModule::build(&mut session, base_address);
                    self.dwarf.push(module, self.config.threaded);
                }
                Err(_) => {
                    (self.config.error_callback)(&Diagnostic::Format(format!(
                        "failed to build debug session for {}",
                        path.display()
                    )));
                }
            }
            return Ok(());
        }

        match self.resolve_separate_debug_file(path, &object) {
            Some(debug_view) => {
                let debug_object = match Object::parse(debug_view.as_slice()) {
                    Ok(object) => object,
                    Err(_) => {
                        (self.config.error_callback)(&Diagnostic::Format(format!(
                            "resolved debug file for {} did not parse",
                            path.display()
                        )));
                        return Ok(());
                    }
                };

                match debug_object.debug_session() {
                    Ok(mut session) => {
                        let module = DwarfModule::build(&mut session, base_address);
                        self.dwarf.push(module, self.config.threaded);
                    }
                    Err(_) => (self.config.error_callback)(&Diagnostic::Missing(format!(
                        "resolved debug file for {} carries no debug info",
                        path.display()
                    ))),
                }
            }
            None => (self.config.error_callback)(&Diagnostic::Missing(format!(
                "no debug info found for {}",
                path.display()
            ))),
        }

        Ok(())
    }

    /// Follows build-id / `.gnu_debuglink` / `.gnu_debugaltlink` / MiniDebugInfo / dSYM to a
    /// separate debug file for `primary`, per §4.5.
    ///
    /// Returns the resolved file's bytes as an owned [`ByteView`] so the caller can re-parse it
    /// with the container reader; `None` if no candidate resolved. For Mach-O, the dSYM
    /// candidate's `LC_UUID` is verified against the primary's before being accepted (invariant
    /// 8); a mismatch is reported through the error callback and treated as if nothing resolved.
    fn resolve_separate_debug_file(&self, primary: &Path, object: &Object<'_>) -> Option<ByteView<'static>> {
        let hints = match object {
            Object::Elf(elf) => DebugFileHints {
                build_id: object.code_id().map(|id| id.to_string()),
                debuglink: elf
                    .debug_link()
                    .ok()
                    .flatten()
                    .map(|link| (link.filename().to_string_lossy().into_owned(), link.crc())),
                debugaltlink: elf.debug_altlink(),
                debugdata: elf.debug_data(),
            },
            Object::Pe(pe) => DebugFileHints {
                build_id: None,
                debuglink: pe.debug_link(),
                debugaltlink: pe.debug_altlink(),
                debugdata: None,
            },
            // dSYM resolution is purely path-based (primary.dsym_parent()); no hints to gather.
            Object::MachO(_) => DebugFileHints::default(),
        };

        let search = SearchPaths {
            debug_roots: self
                .config
                .debug_dirs
                .clone()
                .unwrap_or_else(|| SearchPaths::default().debug_roots),
        };

        let source = FsByteSource;
        match resolve::resolve_debug_file(&source, primary, &hints, &search) {
            Ok(ResolvedDebugFile::Path(path)) => {
                let view = ByteView::open(&path).ok()?;

                if matches!(object, Object::MachO(_)) {
                    let uuid_matches = Object::parse(view.as_slice())
                        .map(|candidate| candidate.code_id() == object.code_id())
                        .unwrap_or(false);

                    if !uuid_matches {
                        (self.config.error_callback)(&Diagnostic::Consistency(format!(
                            "dSYM UUID mismatch for {}",
                            path.display()
                        )));
                        return None;
                    }
                }

                Some(view)
            }
            Ok(ResolvedDebugFile::InMemory(data)) => Some(ByteView::from_vec(data)),
            Err(err) => {
                tracing::debug!(error = %err, path = %primary.display(), "debug file resolution failed");
                None
            }
        }
    }

    /// Looks up `pc` against every loaded DWARF module, invoking `frame_callback` once per
    /// frame in the inline chain (innermost first). Returns `true` iff at least one frame was
    /// delivered.
    pub fn pc_full<F>(&self, pc: u64, mut frame_callback: F) -> bool
    where
        F: FnMut(u64, &str, u64, &str),
    {
        for module in self.dwarf.iter() {
            if let Some(chain) = module.lookup(pc) {
                for frame in &chain {
                    frame_callback(pc, &frame.file, frame.line, &frame.function);
                }
                return !chain.is_empty();
            }
        }
        false
    }

    /// Looks up `pc` against every loaded symbol shard. DWARF modules are not consulted here;
    /// callers wanting "stripped but has symbols" behavior call this directly, since `pc_full`
    /// does not fall back to symbol lookup on a DWARF miss (it reports no frame instead).
    pub fn pc_symbol<F>(&self, pc: u64, mut symbol_callback: F) -> bool
    where
        F: FnMut(u64, &str, u64, u64),
    {
        for shard in self.symbols.iter() {
            if let Some(symbol) = shard.lookup(pc) {
                symbol_callback(pc, &symbol.name, symbol.address, symbol.size);
                return true;
            }
        }
        false
    }

    /// Convenience composition of [`State::pc_full`] and [`State::pc_symbol`], writing a
    /// human-readable trace to `writer`.
    pub fn pc_print(&self, pc: u64, writer: &mut dyn Write) -> io::Result<()> {
        let mut wrote_frame = false;
        self.pc_full(pc, |pc, file, line, function| {
            wrote_frame = true;
            let _ = writeln!(writer, "{pc:#x}: {function} at {file}:{line}");
        });

        if !wrote_frame {
            let mut wrote_symbol = false;
            self.pc_symbol(pc, |pc, name, addr, _size| {
                wrote_symbol = true;
                let _ = writeln!(writer, "{pc:#x}: {name} (+{:#x})", pc.saturating_sub(addr));
            });
            if !wrote_symbol {
                writeln!(writer, "{pc:#x}: <unknown>")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_function(address: u64, size: u64, name: &str, inlinees: Vec<OwnedFunction>) -> OwnedFunction {
        OwnedFunction {
            address,
            size,
            name: name.to_owned(),
            file: format!("{name}.c"),
            line: 1,
            lines: vec![LineRow {
                address,
                file: format!("{name}.c"),
                line: 1,
            }],
            inlinees,
        }
    }

    #[test]
    fn test_list_push_and_iter_preserves_lifo_order() {
        let list: List<i32> = List::new();
        list.push(1, false);
        list.push(2, false);
        list.push(3, false);

        let collected: Vec<i32> = list.iter().copied().collect();
        assert_eq!(collected, vec![3, 2, 1]);
    }

    #[test]
    fn test_list_push_threaded() {
        let list: List<i32> = List::new();
        list.push(1, true);
        list.push(2, true);

        let collected: Vec<i32> = list.iter().copied().collect();
        assert_eq!(collected, vec![2, 1]);
    }

    #[test]
    fn test_symbol_shard_lookup() {
        let symbols = vec![
            OwnedSymbol { address: 0x100, size: 0x10, name: "foo".into() },
            OwnedSymbol { address: 0x200, size: 0x10, name: "bar".into() },
        ];
        let shard = SymbolShard { symbols };

        assert_eq!(shard.lookup(0x108).unwrap().name, "foo");
        assert_eq!(shard.lookup(0x205).unwrap().name, "bar");
        assert!(shard.lookup(0x50).is_none());
        assert!(shard.lookup(0x120).is_none());
    }

    #[test]
    fn test_dwarf_module_lookup_non_inlined() {
        let functions = vec![make_function(0x400, 0x20, "outer", vec![])];
        let module = DwarfModule { base_address: 0x1000, functions };

        let chain = module.lookup(0x1000 + 0x405).expect("pc should resolve");
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].function, "outer");
    }

    #[test]
    fn test_dwarf_module_lookup_inline_chain_innermost_first() {
        let inner = make_function(0x410, 0x8, "inner", vec![]);
        let outer = make_function(0x400, 0x20, "outer", vec![inner]);
        let module = DwarfModule { base_address: 0, functions: vec![outer] };

        let chain = module.lookup(0x412).expect("pc inside inlinee should resolve");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].function, "inner");
        assert_eq!(chain[1].function, "outer");
    }

    #[test]
    fn test_owned_function_line_at_picks_greatest_row_not_exceeding_pc() {
        let function = OwnedFunction {
            address: 0x400,
            size: 0x40,
            name: "outer".into(),
            file: "outer.c".into(),
            line: 5,
            lines: vec![
                LineRow { address: 0x400, file: "outer.c".into(), line: 5 },
                LineRow { address: 0x410, file: "outer.c".into(), line: 7 },
                LineRow { address: 0x420, file: "outer.c".into(), line: 9 },
            ],
            inlinees: vec![],
        };

        assert_eq!(function.line_at(0x400), ("outer.c".to_string(), 5));
        assert_eq!(function.line_at(0x415), ("outer.c".to_string(), 7));
        assert_eq!(function.line_at(0x42f), ("outer.c".to_string(), 9));
    }

    #[test]
    fn test_owned_function_line_at_before_first_row_falls_back_to_entry() {
        let function = OwnedFunction {
            address: 0x400,
            size: 0x10,
            name: "outer".into(),
            file: "outer.c".into(),
            line: 5,
            lines: vec![LineRow { address: 0x405, file: "outer.c".into(), line: 6 }],
            inlinees: vec![],
        };

        assert_eq!(function.line_at(0x401), ("outer.c".to_string(), 5));
    }

    /// Matches §8 scenario S6: a binary with `outer` inlining `inner` at line 7, PC inside the
    /// inlined body at line 12 — callbacks deliver inner (inner.c:12), then outer (outer.c:7).
    #[test]
    fn test_dwarf_module_lookup_inline_chain_reports_per_pc_lines() {
        let inner = OwnedFunction {
            address: 0x410,
            size: 0x8,
            name: "inner".into(),
            file: "inner.c".into(),
            line: 3,
            lines: vec![LineRow { address: 0x410, file: "inner.c".into(), line: 12 }],
            inlinees: vec![],
        };
        let outer = OwnedFunction {
            address: 0x400,
            size: 0x20,
            name: "outer".into(),
            file: "outer.c".into(),
            line: 5,
            lines: vec![
                LineRow { address: 0x400, file: "outer.c".into(), line: 5 },
                LineRow { address: 0x408, file: "outer.c".into(), line: 7 },
                LineRow { address: 0x418, file: "outer.c".into(), line: 9 },
            ],
            inlinees: vec![inner],
        };
        let module = DwarfModule { base_address: 0, functions: vec![outer] };

        let chain = module.lookup(0x412).expect("pc inside inlinee should resolve");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].function, "inner");
        assert_eq!(chain[0].file, "inner.c");
        assert_eq!(chain[0].line, 12);
        assert_eq!(chain[1].function, "outer");
        assert_eq!(chain[1].file, "outer.c");
        assert_eq!(chain[1].line, 7);
    }

    #[test]
    fn test_dwarf_module_lookup_miss() {
        let functions = vec![make_function(0x400, 0x20, "outer", vec![])];
        let module = DwarfModule { base_address: 0, functions };

        assert!(module.lookup(0x1000).is_none());
    }

    #[test]
    fn test_state_load_module_rejects_signal_handler_mode() {
        let config = StateConfig {
            in_signal_handler: true,
            ..StateConfig::default()
        };
        let state = create_state(config);

        let err = state
            .load_module(Path::new("/nonexistent/does/not/matter"))
            .unwrap_err();
        assert!(matches!(err, StateError::NotAllowedInSignalHandler));
    }

    #[test]
    fn test_pc_full_and_pc_symbol_empty_state() {
        let state = create_state(StateConfig::default());
        assert!(!state.pc_full(0x1234, |_, _, _, _| {}));
        assert!(!state.pc_symbol(0x1234, |_, _, _, _| {}));
    }

    #[test]
    fn test_pc_print_unknown_pc() {
        let state = create_state(StateConfig::default());
        let mut buf = Vec::new();
        state.pc_print(0x1234, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "0x1234: <unknown>\n");
    }
}
