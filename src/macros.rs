//! Internal helper macros.

/// Locks a `Mutex`, recovering the guard if another thread panicked while
/// holding it.
///
/// ```rust, ignore
///  let mut protector = lock!(self.protector);
///  protector.protect(module, function, &options, ctx)?;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}
