//! Type-erased scratch workspaces.
//!
//! Terms and cells are shared across elements and hold no per-call mutable
//! state; all working storage during an assembly sweep lives in per-thread
//! workspaces accessed through [`with_thread_local_workspace`].
use std::any::Any;
use std::cell::RefCell;
use std::thread::LocalKey;

/// A workspace holding type-erased scratch objects.
///
/// Optimized for the common case of the same type being requested many times
/// in a row: the most recently used entry is kept at the end of the storage.
#[derive(Debug, Default)]
pub struct Workspace {
    entries: Vec<Box<dyn Any>>,
}

impl Workspace {
    pub fn get_or_insert_with<W, F>(&mut self, create: F) -> &mut W
    where
        W: 'static,
        F: FnOnce() -> W,
    {
        let index = match self.entries.iter().rposition(|entry| entry.is::<W>()) {
            Some(index) => index,
            None => {
                self.entries.push(Box::new(create()));
                self.entries.len() - 1
            }
        };
        let last = self.entries.len() - 1;
        self.entries.swap(index, last);
        self.entries[last]
            .downcast_mut()
            .expect("entry at `last` has type W by construction")
    }

    pub fn get_or_default<W>(&mut self) -> &mut W
    where
        W: 'static + Default,
    {
        self.get_or_insert_with(Default::default)
    }
}

/// Defines a thread-local [`Workspace`] for use with
/// [`with_thread_local_workspace`].
#[macro_export]
macro_rules! define_thread_local_workspace {
    ($name:ident) => {
        thread_local! {
            static $name: ::std::cell::RefCell<$crate::workspace::Workspace> =
                ::std::cell::RefCell::new(Default::default());
        }
    };
}

/// Runs the closure with the given thread-local workspace's instance of `W`,
/// default-constructing it on first access from this thread.
pub fn with_thread_local_workspace<W, O>(
    workspace: &'static LocalKey<RefCell<Workspace>>,
    f: impl FnOnce(&mut W) -> O,
) -> O
where
    W: 'static + Default,
{
    workspace.with(|ws| f(ws.borrow_mut().get_or_default()))
}
