use std::cell::RefCell;

thread_local! {
    static LOG_CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Scope guard that prefixes log lines with a `[Module]` tag while alive.
///
/// [`keel_macros::keel_export`] injects one of these into every exported
/// public method, so FFI entry points are tagged automatically. Nested scopes
/// restore the previous tag on drop.
pub struct LogContext {
    previous: Option<String>,
}

impl LogContext {
    /// Activates a `[module]` logging prefix until the guard is dropped.
    #[must_use]
    pub fn new(module: &str) -> Self {
        let previous = LOG_CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            let prev = ctx.clone();
            *ctx = Some(format!("[{module}]"));
            prev
        });

        Self { previous }
    }
}

impl Drop for LogContext {
    fn drop(&mut self) {
        LOG_CONTEXT.with(|ctx| {
            (*ctx.borrow_mut()).clone_from(&self.previous);
        });
    }
}

/// Returns the currently active logging prefix, if any.
#[must_use]
pub fn get_context() -> Option<String> {
    LOG_CONTEXT.with(|ctx| ctx.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_scoped_and_nested() {
        assert_eq!(get_context(), None);
        {
            let _outer = LogContext::new("Outer");
            assert_eq!(get_context().as_deref(), Some("[Outer]"));
            {
                let _inner = LogContext::new("Inner");
                assert_eq!(get_context().as_deref(), Some("[Inner]"));
            }
            assert_eq!(get_context().as_deref(), Some("[Outer]"));
        }
        assert_eq!(get_context(), None);
    }
}
