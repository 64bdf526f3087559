//! Index-addressed heap with a mark/sweep collector.
//!
//! Cells and environment frames live in slot vectors and are addressed by
//! `u32` indices. Nothing is reclaimed until [`ArenaHeap::collect`] runs;
//! the roots are the global frame plus every cell registered in the
//! protection table. Host code must hold cells only through protected
//! handles: an unprotected index may be reused after the next collection.
//!
//! Collection takes the collector gate exclusively. Host threads that
//! produce a cell and then protect it do so through [`ArenaHeap::pinned`],
//! which holds the gate shared for the whole operation, so a collection on
//! another thread can never observe the gap between the two steps.

use std::collections::HashMap;
use std::fmt;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{Datum, Heap, Symbol};
use crate::blackbox::Blackbox;

/// Allocations after which [`ArenaHeap::should_collect`] reports true
pub const DEFAULT_GC_THRESHOLD: usize = 10_000;

/// Index of a cell in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef(u32);

/// Index of an environment frame in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvRef(u32);

type Cell = Datum<CellRef, EnvRef>;

#[derive(Debug, Default)]
struct Frame {
    bindings: HashMap<Symbol, CellRef>,
    parent: Option<EnvRef>,
}

/// Counters reported by [`ArenaHeap::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live: usize,
    pub total_allocations: u64,
    pub collections: u64,
    /// Foreign (blackbox) cells reclaimed by the collector
    pub foreign_freed: u64,
}

#[derive(Debug, Default)]
struct Arena {
    cells: Vec<Option<Cell>>,
    free_cells: Vec<u32>,
    frames: Vec<Option<Frame>>,
    free_frames: Vec<u32>,
    since_collection: usize,
    stats: HeapStats,
}

impl Arena {
    fn cell(&self, cell: CellRef) -> &Cell {
        match self.cells.get(cell.0 as usize) {
            Some(Some(cell)) => cell,
            // A dangling index means a cell was used without being protected
            _ => panic!("arena cell {} used after it was reclaimed", cell.0),
        }
    }

    fn frame(&self, env: EnvRef) -> &Frame {
        match self.frames.get(env.0 as usize) {
            Some(Some(frame)) => frame,
            _ => panic!("arena frame {} used after it was reclaimed", env.0),
        }
    }

    fn frame_mut(&mut self, env: EnvRef) -> &mut Frame {
        match self.frames.get_mut(env.0 as usize) {
            Some(Some(frame)) => frame,
            _ => panic!("arena frame {} used after it was reclaimed", env.0),
        }
    }

    fn alloc_cell(&mut self, datum: Cell) -> CellRef {
        self.since_collection += 1;
        self.stats.total_allocations += 1;
        self.stats.live += 1;
        match self.free_cells.pop() {
            Some(index) => {
                self.cells[index as usize] = Some(datum);
                CellRef(index)
            }
            None => {
                let index = u32::try_from(self.cells.len())
                    .unwrap_or_else(|_| panic!("arena exhausted its cell index space"));
                self.cells.push(Some(datum));
                CellRef(index)
            }
        }
    }

    fn alloc_frame(&mut self, frame: Frame) -> EnvRef {
        match self.free_frames.pop() {
            Some(index) => {
                self.frames[index as usize] = Some(frame);
                EnvRef(index)
            }
            None => {
                let index = u32::try_from(self.frames.len())
                    .unwrap_or_else(|_| panic!("arena exhausted its frame index space"));
                self.frames.push(Some(frame));
                EnvRef(index)
            }
        }
    }
}

/// Permanently rooted cells for the common constants
#[derive(Debug, Clone, Copy)]
struct Constants {
    nil: CellRef,
    unspecified: CellRef,
    true_value: CellRef,
    false_value: CellRef,
}

pub struct ArenaHeap {
    arena: Mutex<Arena>,
    /// Protection counts; a cell with a positive count is a collector root
    roots: Mutex<HashMap<CellRef, usize>>,
    gate: RwLock<()>,
    global: EnvRef,
    constants: Constants,
    threshold: usize,
}

impl fmt::Debug for ArenaHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaHeap")
            .field("stats", &self.stats())
            .field("roots", &self.roots.lock().len())
            .finish()
    }
}

impl Default for ArenaHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaHeap {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_GC_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        let mut arena = Arena::default();
        let global = arena.alloc_frame(Frame::default());
        let constants = Constants {
            nil: arena.alloc_cell(Datum::Nil),
            unspecified: arena.alloc_cell(Datum::Unspecified),
            true_value: arena.alloc_cell(Datum::Bool(true)),
            false_value: arena.alloc_cell(Datum::Bool(false)),
        };
        arena.since_collection = 0;
        ArenaHeap {
            arena: Mutex::new(arena),
            roots: Mutex::new(HashMap::new()),
            gate: RwLock::new(()),
            global,
            constants,
            threshold,
        }
    }

    /// Register `cell` as a root; protections nest
    pub fn protect(&self, cell: CellRef) {
        *self.roots.lock().entry(cell).or_insert(0) += 1;
    }

    /// Undo one [`protect`](Self::protect)
    pub fn unprotect(&self, cell: CellRef) {
        let mut roots = self.roots.lock();
        match roots.get_mut(&cell) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                roots.remove(&cell);
            }
            None => debug!(cell = cell.0, "unprotect of a cell that was not protected"),
        }
    }

    pub fn protection_count(&self, cell: CellRef) -> usize {
        self.roots.lock().get(&cell).copied().unwrap_or(0)
    }

    /// Produce a cell and protect it with no collection in between
    pub fn pinned(&self, produce: impl FnOnce(&Self) -> CellRef) -> CellRef {
        let _gate = self.gate.read_recursive();
        let cell = produce(self);
        self.protect(cell);
        cell
    }

    /// Allocate a protected cell
    pub fn alloc_pinned(&self, datum: Cell) -> CellRef {
        self.pinned(|heap| heap.alloc(datum))
    }

    /// Whether `cell` currently addresses a live slot
    pub fn is_live(&self, cell: CellRef) -> bool {
        matches!(self.arena.lock().cells.get(cell.0 as usize), Some(Some(_)))
    }

    pub fn stats(&self) -> HeapStats {
        self.arena.lock().stats
    }

    /// Enough allocations happened since the last collection to warrant one
    pub fn should_collect(&self) -> bool {
        self.arena.lock().since_collection >= self.threshold
    }

    /// Mark from the roots and sweep everything unreachable.
    ///
    /// Must only be called when no unprotected cell is held anywhere, i.e.
    /// outside of evaluation. Foreign payloads of reclaimed cells are
    /// dropped after every lock has been released.
    pub fn collect(&self) -> usize {
        let _gate = self.gate.write();
        let roots: Vec<CellRef> = self.roots.lock().keys().copied().collect();
        let released: Vec<Blackbox>;
        let reclaimed;
        {
            let mut arena = self.arena.lock();
            let (live_cells, live_frames) = self.mark(&arena, roots);
            let Arena {
                cells,
                free_cells,
                frames,
                free_frames,
                ..
            } = &mut *arena;
            let mut foreign = Vec::new();
            let mut count = 0;
            for (index, slot) in cells.iter_mut().enumerate() {
                if slot.is_some() && !live_cells[index] {
                    if let Some(Datum::Foreign(blackbox)) = slot.take() {
                        foreign.push(blackbox);
                    }
                    free_cells.push(index as u32);
                    count += 1;
                }
            }
            for (index, slot) in frames.iter_mut().enumerate() {
                if slot.is_some() && !live_frames[index] {
                    *slot = None;
                    free_frames.push(index as u32);
                }
            }

            arena.since_collection = 0;
            arena.stats.collections += 1;
            arena.stats.live -= count;
            arena.stats.foreign_freed += foreign.len() as u64;
            reclaimed = count;
            released = foreign;
        }
        debug!(
            reclaimed,
            foreign = released.len(),
            "arena collection finished"
        );
        drop(released);
        reclaimed
    }

    fn mark(&self, arena: &Arena, roots: Vec<CellRef>) -> (Vec<bool>, Vec<bool>) {
        let mut live_cells = vec![false; arena.cells.len()];
        let mut live_frames = vec![false; arena.frames.len()];
        let constants = self.constants;
        let mut cells = roots;
        cells.extend([
            constants.nil,
            constants.unspecified,
            constants.true_value,
            constants.false_value,
        ]);
        let mut frames = vec![self.global];

        while !cells.is_empty() || !frames.is_empty() {
            while let Some(cell) = cells.pop() {
                let index = cell.0 as usize;
                if live_cells[index] {
                    continue;
                }
                live_cells[index] = true;
                match arena.cell(cell) {
                    Datum::Pair(car, cdr) => cells.extend([*car, *cdr]),
                    Datum::Closure(lambda) => {
                        cells.push(lambda.body);
                        frames.push(lambda.env);
                    }
                    _ => {}
                }
            }
            while let Some(env) = frames.pop() {
                let index = env.0 as usize;
                if live_frames[index] {
                    continue;
                }
                live_frames[index] = true;
                let frame = arena.frame(env);
                cells.extend(frame.bindings.values().copied());
                frames.extend(frame.parent);
            }
        }
        (live_cells, live_frames)
    }
}

impl Heap for ArenaHeap {
    type Ref = CellRef;
    type Env = EnvRef;

    fn alloc(&self, datum: Cell) -> CellRef {
        match datum {
            Datum::Nil => self.constants.nil,
            Datum::Unspecified => self.constants.unspecified,
            Datum::Bool(true) => self.constants.true_value,
            Datum::Bool(false) => self.constants.false_value,
            datum => self.arena.lock().alloc_cell(datum),
        }
    }

    fn view(&self, cell: &CellRef) -> Cell {
        self.arena.lock().cell(*cell).clone()
    }

    fn set_car(&self, pair: &CellRef, value: CellRef) -> bool {
        let mut arena = self.arena.lock();
        match arena.cells.get_mut(pair.0 as usize) {
            Some(Some(Datum::Pair(car, _))) => {
                *car = value;
                true
            }
            _ => false,
        }
    }

    fn set_cdr(&self, pair: &CellRef, value: CellRef) -> bool {
        let mut arena = self.arena.lock();
        match arena.cells.get_mut(pair.0 as usize) {
            Some(Some(Datum::Pair(_, cdr))) => {
                *cdr = value;
                true
            }
            _ => false,
        }
    }

    fn identical(&self, a: &CellRef, b: &CellRef) -> bool {
        a == b
    }

    fn global_env(&self) -> EnvRef {
        self.global
    }

    fn extend_env(&self, parent: &EnvRef, bindings: Vec<(Symbol, CellRef)>) -> EnvRef {
        self.arena.lock().alloc_frame(Frame {
            bindings: bindings.into_iter().collect(),
            parent: Some(*parent),
        })
    }

    fn define(&self, env: &EnvRef, name: Symbol, value: CellRef) {
        self.arena.lock().frame_mut(*env).bindings.insert(name, value);
    }

    fn lookup(&self, env: &EnvRef, name: &str) -> Option<CellRef> {
        let arena = self.arena.lock();
        let mut frame = Some(*env);
        while let Some(current) = frame {
            let current = arena.frame(current);
            if let Some(value) = current.bindings.get(name) {
                return Some(*value);
            }
            frame = current.parent;
        }
        None
    }

    fn assign(&self, env: &EnvRef, name: &str, value: CellRef) -> bool {
        let mut arena = self.arena.lock();
        let mut frame = Some(*env);
        while let Some(current) = frame {
            let current = arena.frame_mut(current);
            if let Some(slot) = current.bindings.get_mut(name) {
                *slot = value;
                return true;
            }
            frame = current.parent;
        }
        false
    }
}
