//! Fan-in: many sources, one of which is forwarded downstream.
//!
//! Each source connected with [`Selector::add_source`] gets its own branch
//! with a priority and an auto-select flag. Exactly one branch is selected
//! at a time; by default that is the *null branch*, which has the lowest
//! possible priority and forwards nothing.
//!
//! - Only the selected branch reaches the downstream sink. Other branches
//!   accept and discard everything so their producers never stall.
//! - An auto-select branch that goes from idle to active takes over the
//!   selection if its priority is higher than the selected branch's.
//! - [`select()`](Selector::select) overrides priorities.
//! - An auto-selected branch releases the selection when its flush
//!   completes; the highest-priority active auto-select branch, if any, takes
//!   over.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::contract::{BranchId, ConnectError, Input, Output, Producer, Sink, SinkRef, Source};
use crate::event_loop::EventLoop;

/// Priority of the null branch.
pub const NULL_BRANCH_PRIO: i32 = i32::MIN;

/// Activity of a selector branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchState {
    Idle,
    Active,
    Flushing,
}

/// Sink-side adapter the upstream source of a branch writes into.
struct SelectorPort {
    input: Input,
    selector: Weak<RefCell<Selector>>,
    id: BranchId,
}

impl Sink for SelectorPort {
    fn write(&mut self, samples: &[f32]) -> usize {
        if !self.input.accepting() {
            return 0;
        }
        match self.selector.upgrade() {
            Some(selector) => selector.borrow_mut().branch_write(self.id, samples),
            None => samples.len(),
        }
    }

    fn flush(&mut self) {
        if !self.input.begin_flush() {
            return;
        }
        let done = self
            .selector
            .upgrade()
            .is_none_or(|selector| selector.borrow_mut().branch_flush(self.id));
        if done {
            self.input.all_flushed();
        }
    }

    fn input(&mut self) -> &mut Input {
        &mut self.input
    }
}

struct Branch {
    id: BranchId,
    port: Rc<RefCell<SelectorPort>>,
    source: Weak<RefCell<dyn Producer>>,
    prio: i32,
    auto_select: bool,
    state: BranchState,
}

/// Fan-in node.
pub struct Selector {
    me: Weak<RefCell<Selector>>,
    output: Output,
    branches: Vec<Branch>,
    selected: Option<BranchId>,
    next_id: u32,
}

impl Selector {
    /// Creates a selector with only the null branch.
    pub fn new(events: &EventLoop) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let owner: Weak<RefCell<dyn Source>> = me.clone();
            RefCell::new(Self {
                me: me.clone(),
                output: Output::new(events, owner),
                branches: Vec::new(),
                selected: None,
                next_id: 0,
            })
        })
    }

    /// Connects `source` through a new branch with priority 0 and
    /// auto-select disabled.
    pub fn add_source<P: Producer + 'static>(
        &mut self,
        source: &Rc<RefCell<P>>,
    ) -> Result<BranchId, ConnectError> {
        let id = BranchId(self.next_id);
        let port = Rc::new(RefCell::new(SelectorPort {
            input: Input::new(),
            selector: self.me.clone(),
            id,
        }));
        source
            .borrow_mut()
            .output()
            .register(SinkRef::borrowed(&port))?;
        self.next_id += 1;
        let producer: Rc<RefCell<dyn Producer>> = source.clone();
        self.branches.push(Branch {
            id,
            port,
            source: Rc::downgrade(&producer),
            prio: 0,
            auto_select: false,
            state: BranchState::Idle,
        });
        #[cfg(feature = "tracing")]
        tracing::debug!(branch = id.index(), "selector branch added");
        Ok(id)
    }

    /// Disconnects a branch's source. A selected branch hands the selection
    /// back to the null branch first.
    pub fn remove_source(&mut self, id: BranchId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        if self.selected == Some(id) {
            self.select_branch(None);
        }
        let branch = self.branches.remove(index);
        if let Some(source) = branch.source.upgrade()
            && let Ok(mut source) = source.try_borrow_mut()
        {
            source.output().unregister();
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(branch = id.index(), "selector branch removed");
        true
    }

    /// Sets the priority used for auto-selection.
    pub fn set_selection_prio(&mut self, id: BranchId, prio: i32) {
        if let Some(branch) = self.branch_mut(id) {
            branch.prio = prio;
        }
    }

    /// Enables auto-selection for a branch with priority `prio`.
    pub fn enable_auto_select(&mut self, id: BranchId, prio: i32) {
        if let Some(branch) = self.branch_mut(id) {
            branch.prio = prio;
            branch.auto_select = true;
        }
    }

    /// Disables auto-selection. A selected branch is deselected.
    pub fn disable_auto_select(&mut self, id: BranchId) {
        if let Some(branch) = self.branch_mut(id) {
            branch.auto_select = false;
            if self.selected == Some(id) {
                self.select_branch(None);
            }
        }
    }

    /// Returns true if the branch exists and auto-selects.
    pub fn auto_select_enabled(&self, id: BranchId) -> bool {
        self.branches.iter().any(|b| b.id == id && b.auto_select)
    }

    /// Selects a branch, or the null branch for `None`.
    pub fn select(&mut self, id: Option<BranchId>) {
        if id.is_some_and(|id| self.index_of(id).is_none()) {
            return;
        }
        self.select_branch(id);
    }

    /// The selected branch; `None` means the null branch.
    pub fn selected(&self) -> Option<BranchId> {
        self.selected
    }

    /// Number of branches, not counting the null branch.
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Returns true if any branch has unflushed audio.
    pub fn is_active(&self) -> bool {
        self.branches.iter().any(|b| b.state != BranchState::Idle)
    }

    fn index_of(&self, id: BranchId) -> Option<usize> {
        self.branches.iter().position(|b| b.id == id)
    }

    fn branch_mut(&mut self, id: BranchId) -> Option<&mut Branch> {
        self.branches.iter_mut().find(|b| b.id == id)
    }

    fn selected_prio(&self) -> i32 {
        self.selected
            .and_then(|id| self.branches.iter().find(|b| b.id == id))
            .map_or(NULL_BRANCH_PRIO, |b| b.prio)
    }

    /// Switches the selection. Must not touch the port of `next`, which may
    /// be mid-call.
    fn select_branch(&mut self, next: Option<BranchId>) {
        if next == self.selected {
            return;
        }
        let prev = std::mem::replace(&mut self.selected, next);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            from = prev.map(BranchId::index),
            to = next.map(BranchId::index),
            "selector switched"
        );
        let Some(prev) = prev.and_then(|id| self.branches.iter_mut().find(|b| b.id == id)) else {
            return;
        };
        // The deselected branch now discards, so it never waits on downstream.
        match prev.state {
            BranchState::Flushing => {
                prev.state = BranchState::Idle;
                prev.port.borrow_mut().input.all_flushed();
            }
            BranchState::Active => prev.port.borrow_mut().input.resume(),
            BranchState::Idle => {}
        }
    }

    fn branch_write(&mut self, id: BranchId, samples: &[f32]) -> usize {
        let selected_prio = self.selected_prio();
        let Some(branch) = self.branch_mut(id) else {
            return samples.len();
        };
        let mut take_over = false;
        if branch.state == BranchState::Idle {
            branch.state = BranchState::Active;
            take_over = branch.auto_select && branch.prio > selected_prio;
        }
        if take_over {
            self.select_branch(Some(id));
        }
        if self.selected == Some(id) {
            self.output.write(samples)
        } else {
            samples.len()
        }
    }

    /// Returns true if the port should complete the flush itself.
    fn branch_flush(&mut self, id: BranchId) -> bool {
        let selected = self.selected == Some(id);
        let Some(branch) = self.branch_mut(id) else {
            return true;
        };
        if selected {
            branch.state = BranchState::Flushing;
            self.output.flush();
            false
        } else {
            branch.state = BranchState::Idle;
            true
        }
    }

    /// Highest-priority active auto-select branch that would beat the null
    /// branch.
    fn auto_select_candidate(&self) -> Option<BranchId> {
        self.branches
            .iter()
            .filter(|b| b.auto_select && b.state == BranchState::Active && b.prio > NULL_BRANCH_PRIO)
            .max_by_key(|b| b.prio)
            .map(|b| b.id)
    }
}

impl Source for Selector {
    fn resume(&mut self) {
        if let Some(branch) = self.selected.and_then(|id| self.branches.iter().find(|b| b.id == id)) {
            branch.port.borrow_mut().input.resume();
        }
    }

    fn all_flushed(&mut self) {
        self.output.flush_completed();
        let mut release = false;
        for branch in &mut self.branches {
            if branch.state == BranchState::Flushing {
                branch.state = BranchState::Idle;
                branch.port.borrow_mut().input.all_flushed();
                release |= branch.auto_select && self.selected == Some(branch.id);
            }
        }
        if release {
            self.select_branch(None);
            if let Some(next) = self.auto_select_candidate() {
                self.select_branch(Some(next));
            }
        }
    }
}

impl Producer for Selector {
    fn output(&mut self) -> &mut Output {
        &mut self.output
    }
}
