//! Lifetime tracking of GPU objects registered with a context group.
//!
//! Every buffer and texture is registered with the [`ContextGroup`] that was
//! current when it was created. The group keeps the objects in a
//! [`ResourceArena`] indexed by generation-checked [`ResourceHandle`]s. A
//! [`TrackedResource`] is the owner-side half: it frees the object through the
//! group when it is destroyed, and silently becomes a no-op once the group has
//! been torn down.

use crate::context::ContextGroup;
use std::rc::{Rc, Weak};

/// A GPU object that knows how to release itself.
pub trait FreeResources {
    /// Releases the underlying GPU object. Called with a context of the
    /// owning group current.
    fn free_resources(self);
}

/// The GPU objects tracked by a device session.
#[derive(Debug)]
pub enum GpuObject {
    Buffer(wgpu::Buffer),
    Texture(wgpu::Texture),
}

impl FreeResources for GpuObject {
    fn free_resources(self) {
        match self {
            GpuObject::Buffer(buffer) => buffer.destroy(),
            GpuObject::Texture(texture) => texture.destroy(),
        }
    }
}

/// Generation-checked index into a [`ResourceArena`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    index: u32,
    generation: u32,
}

struct Slot<R> {
    generation: u32,
    entry: Option<R>,
}

/// Slot storage for tracked resources.
///
/// Removing an entry bumps the slot generation, so a handle can never reach a
/// different resource that later reuses its slot.
pub struct ResourceArena<R> {
    slots: Vec<Slot<R>>,
    free: Vec<u32>,
    live: usize,
}

impl<R> Default for ResourceArena<R> {
    fn default() -> Self {
        ResourceArena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<R> ResourceArena<R> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if the arena holds no live entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores a resource and returns its handle.
    pub fn insert(&mut self, resource: R) -> ResourceHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(resource);
            ResourceHandle {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                entry: Some(resource),
            });
            ResourceHandle {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    /// Returns `true` if the handle still refers to a live entry.
    pub fn contains(&self, handle: ResourceHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|s| s.generation == handle.generation && s.entry.is_some())
    }

    /// Takes the resource out of the arena. Stale handles yield `None`.
    pub fn remove(&mut self, handle: ResourceHandle) -> Option<R> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let resource = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(resource)
    }

    /// Invalidates every handle and returns the resources that were still live.
    pub fn invalidate_all(&mut self) -> Vec<R> {
        let mut drained = Vec::with_capacity(self.live);
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(resource) = slot.entry.take() {
                drained.push(resource);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
        }
        self.live = 0;
        drained
    }
}

/// Owner-side handle of a GPU object registered with a context group.
///
/// Dropping a tracked resource destroys it.
pub struct TrackedResource<R: FreeResources = GpuObject> {
    group: Weak<ContextGroup<R>>,
    handle: Option<ResourceHandle>,
}

impl<R: FreeResources> TrackedResource<R> {
    /// Registers a freshly created GPU object with a context group.
    pub fn attach(group: &Rc<ContextGroup<R>>, resource: R) -> Self {
        debug_assert!(!group.is_torn_down(), "GPU resource created on a dead group");
        let handle = group.arena().borrow_mut().insert(resource);
        TrackedResource {
            group: Rc::downgrade(group),
            handle: Some(handle),
        }
    }

    /// The arena handle, or `None` once destroyed.
    #[inline]
    pub fn handle(&self) -> Option<ResourceHandle> {
        self.handle
    }

    /// Returns `true` if the object is still registered with a live group.
    pub fn is_attached(&self) -> bool {
        match (self.group.upgrade(), self.handle) {
            (Some(group), Some(handle)) => {
                !group.is_torn_down() && group.arena().borrow().contains(handle)
            }
            _ => false,
        }
    }

    /// Frees the GPU object on a context of its owning group.
    ///
    /// If no context of the group is current, one of its live contexts is made
    /// current for the duration of the call and the previous state restored.
    /// A group that was already torn down, or has no live context left, means
    /// the driver released the object together with the group: nothing is
    /// done and this counts as success.
    pub fn destroy(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let Some(group) = self.group.upgrade() else {
            return;
        };
        if group.is_torn_down() {
            return;
        }
        let Some(resource) = group.arena().borrow_mut().remove(handle) else {
            return;
        };

        let previous = group.current_context();
        if previous.is_some() {
            resource.free_resources();
            return;
        }

        match group.any_live_context() {
            Some(context) => {
                group.make_current(context);
                resource.free_resources();
                group.restore_current(previous);
            }
            None => {
                log::debug!("leaking GPU object of a context group without live contexts");
                drop(resource);
            }
        }
    }
}

impl<R: FreeResources> Drop for TrackedResource<R> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records which resources were freed and which context was current.
    #[derive(Clone, Default)]
    pub struct FreeLog(pub Rc<RefCell<Vec<(u32, Option<crate::context::ContextId>)>>>);

    pub struct MockResource {
        pub id: u32,
        pub log: FreeLog,
        pub group: Weak<ContextGroup<MockResource>>,
    }

    impl FreeResources for MockResource {
        fn free_resources(self) {
            let current = self.group.upgrade().and_then(|g| g.current_context());
            self.log.0.borrow_mut().push((self.id, current));
        }
    }

    fn mock(group: &Rc<ContextGroup<MockResource>>, id: u32, log: &FreeLog) -> MockResource {
        MockResource {
            id,
            log: log.clone(),
            group: Rc::downgrade(group),
        }
    }

    #[test]
    fn arena_rejects_stale_handles() {
        let mut arena = ResourceArena::new();
        let a = arena.insert(1);
        assert_eq!(arena.remove(a), Some(1));
        let b = arena.insert(2);
        assert!(!arena.contains(a));
        assert!(arena.contains(b));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn invalidate_all_drains_live_entries() {
        let mut arena = ResourceArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        arena.remove(a);
        let drained = arena.invalidate_all();
        assert_eq!(drained, vec!["b"]);
        assert!(!arena.contains(b));
        assert!(arena.is_empty());
    }

    #[test]
    fn destroy_frees_once() {
        let group = ContextGroup::<MockResource>::new();
        let ctx = group.create_context();
        group.make_current(ctx);
        let log = FreeLog::default();

        let mut res = TrackedResource::attach(&group, mock(&group, 7, &log));
        assert!(res.is_attached());
        res.destroy();
        res.destroy();
        drop(res);
        assert_eq!(*log.0.borrow(), vec![(7, Some(ctx))]);
    }

    #[test]
    fn destroy_borrows_a_live_context_and_restores() {
        let group = ContextGroup::<MockResource>::new();
        let ctx = group.create_context();
        group.make_current(ctx);
        let log = FreeLog::default();
        let res = TrackedResource::attach(&group, mock(&group, 1, &log));

        group.done_current();
        drop(res);
        assert_eq!(*log.0.borrow(), vec![(1, Some(ctx))]);
        assert_eq!(group.current_context(), None);
    }

    #[test]
    fn teardown_detaches_resources() {
        let group = ContextGroup::<MockResource>::new();
        let ctx = group.create_context();
        group.make_current(ctx);
        let log = FreeLog::default();
        let mut res = TrackedResource::attach(&group, mock(&group, 3, &log));

        group.destroy_context(ctx);
        assert!(group.is_torn_down());
        assert!(!res.is_attached());
        res.destroy();
        assert!(log.0.borrow().is_empty());
    }

    #[test]
    fn destroy_after_group_dropped_is_noop() {
        let log = FreeLog::default();
        let res = {
            let group = ContextGroup::<MockResource>::new();
            let ctx = group.create_context();
            group.make_current(ctx);
            TrackedResource::attach(&group, mock(&group, 9, &log))
        };
        drop(res);
        assert!(log.0.borrow().is_empty());
    }
}
