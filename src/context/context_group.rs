//! Context groups: the ownership domain of GPU resources.

use crate::resource::{FreeResources, GpuObject, ResourceArena};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Identifier of a rendering context (one per viewport surface).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    /// The raw identifier.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A set of contexts sharing one GPU object namespace.
///
/// The group tracks its live contexts, which of them is current, and every
/// GPU object registered through [`TrackedResource::attach`]. Destroying the
/// last live context tears the group down: all registered handles are
/// invalidated and the teardown hook (destroying the device) runs.
///
/// [`TrackedResource::attach`]: crate::resource::TrackedResource::attach
pub struct ContextGroup<R: FreeResources = GpuObject> {
    contexts: RefCell<Vec<ContextId>>,
    next_id: Cell<u32>,
    current: Cell<Option<ContextId>>,
    remembered: Cell<Option<ContextId>>,
    torn_down: Cell<bool>,
    arena: RefCell<ResourceArena<R>>,
    on_teardown: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl<R: FreeResources> ContextGroup<R> {
    /// Creates an empty group.
    pub fn new() -> Rc<Self> {
        Rc::new(ContextGroup {
            contexts: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            current: Cell::new(None),
            remembered: Cell::new(None),
            torn_down: Cell::new(false),
            arena: RefCell::new(ResourceArena::new()),
            on_teardown: RefCell::new(None),
        })
    }

    /// Sets the hook invoked once when the last context is destroyed.
    pub fn set_teardown_hook(&self, hook: impl FnOnce() + 'static) {
        *self.on_teardown.borrow_mut() = Some(Box::new(hook));
    }

    /// Registers a new context with the group.
    pub fn create_context(&self) -> ContextId {
        let id = ContextId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.contexts.borrow_mut().push(id);
        if self.remembered.get().is_none() {
            self.remembered.set(Some(id));
        }
        id
    }

    /// Makes a context of this group current.
    pub fn make_current(&self, context: ContextId) {
        debug_assert!(self.owns(context), "context {context:?} is not part of this group");
        self.current.set(Some(context));
        self.remembered.set(Some(context));
    }

    /// Releases the current context.
    pub fn done_current(&self) {
        self.current.set(None);
    }

    pub(crate) fn restore_current(&self, previous: Option<ContextId>) {
        self.current.set(previous);
    }

    /// The context currently bound, if it belongs to this group.
    #[inline]
    pub fn current_context(&self) -> Option<ContextId> {
        self.current.get()
    }

    /// Returns `true` if the context is a live member of this group.
    pub fn owns(&self, context: ContextId) -> bool {
        self.contexts.borrow().contains(&context)
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.borrow().len()
    }

    /// A live context suitable for temporarily freeing resources. Prefers the
    /// context that was last made current.
    pub fn any_live_context(&self) -> Option<ContextId> {
        let contexts = self.contexts.borrow();
        match self.remembered.get() {
            Some(c) if contexts.contains(&c) => Some(c),
            _ => contexts.first().copied(),
        }
    }

    /// Returns `true` once the last context has been destroyed.
    #[inline]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// Number of GPU objects still registered with the group.
    pub fn resource_count(&self) -> usize {
        self.arena.borrow().len()
    }

    pub(crate) fn arena(&self) -> &RefCell<ResourceArena<R>> {
        &self.arena
    }

    /// Removes a context. Destroying the last context tears the group down.
    pub fn destroy_context(&self, context: ContextId) {
        self.contexts.borrow_mut().retain(|c| *c != context);
        if self.current.get() == Some(context) {
            self.current.set(None);
        }
        if self.remembered.get() == Some(context) {
            self.remembered.set(self.contexts.borrow().first().copied());
        }
        if self.contexts.borrow().is_empty() && !self.torn_down.get() {
            self.teardown();
        }
    }

    fn teardown(&self) {
        self.torn_down.set(true);
        let detached = self.arena.borrow_mut().invalidate_all();
        if !detached.is_empty() {
            log::debug!(
                "context group torn down, detaching {} GPU objects",
                detached.len()
            );
        }
        // The driver releases these together with the device.
        drop(detached);
        let hook = self.on_teardown.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::shared_resource::tests::MockResource;

    #[test]
    fn contexts_are_tracked() {
        let group = ContextGroup::<MockResource>::new();
        let a = group.create_context();
        let b = group.create_context();
        assert_ne!(a, b);
        assert_eq!(group.context_count(), 2);

        group.make_current(b);
        group.destroy_context(b);
        assert_eq!(group.current_context(), None);
        assert_eq!(group.any_live_context(), Some(a));
        assert!(!group.is_torn_down());
    }

    #[test]
    fn last_context_runs_teardown_hook_once() {
        let group = ContextGroup::<MockResource>::new();
        let ran = Rc::new(Cell::new(0));
        let counter = ran.clone();
        group.set_teardown_hook(move || counter.set(counter.get() + 1));

        let a = group.create_context();
        group.destroy_context(a);
        group.destroy_context(a);
        assert_eq!(ran.get(), 1);
        assert!(group.is_torn_down());
    }
}
