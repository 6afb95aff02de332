//! Reentrant creation detection.

use std::cell::RefCell;

use crate::contextual::ContextualId;
use crate::error::{DiError, DiResult};

// Thread-local creation stack: (scope context id, contextual) pairs being created
thread_local! {
    static CREATION_TLS: RefCell<Vec<(u64, ContextualId)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a contextual as being created in one scope context on this thread.
///
/// Entering the same pair again before the guard drops means the contextual's
/// `create` asked its own context for itself; waiting on the get-or-create
/// cell would deadlock, so the cycle is reported instead.
pub(crate) struct CreationGuard {
    context: u64,
}

impl CreationGuard {
    pub(crate) fn enter(context: u64, contextual: &ContextualId) -> DiResult<Self> {
        CREATION_TLS.with(|tls| {
            let mut stack = tls.borrow_mut();
            if let Some(start) = stack
                .iter()
                .position(|(c, id)| *c == context && id == contextual)
            {
                let mut path: Vec<String> = stack[start..].iter().map(|(_, id)| id.to_string()).collect();
                path.push(contextual.to_string());
                return Err(DiError::Circular { path });
            }
            stack.push((context, contextual.clone()));
            Ok(Self { context })
        })
    }
}

impl Drop for CreationGuard {
    fn drop(&mut self) {
        CREATION_TLS.with(|tls| {
            if let Some((context, _)) = tls.borrow_mut().pop() {
                debug_assert_eq!(context, self.context);
            }
        });
    }
}
