//! Module-level entry point.
//!
//! The [`ObfuscationEngine`] builds the pass pipeline from a
//! [`ProtectionConfig`], runs it over a module with a fresh
//! [`CompilerContext`] and returns what happened as an
//! [`ObfuscationResult`].

use std::time::Duration;

use tracing::info;

use crate::{
    compiler::{CompilerContext, EventLog, PassScheduler, ProtectionStats},
    ir::Module,
    obfuscation::{
        config::ProtectionConfig,
        passes::{StackStringPass, StringEncryptionPass},
    },
    Result,
};

/// Result of protecting a module.
#[derive(Debug, Clone)]
pub struct ObfuscationResult {
    /// All events from the run.
    pub events: EventLog,
    /// Number of distinct functions that were changed.
    pub functions_changed: usize,
    /// Number of guards registered at the end of the run.
    pub guards: usize,
    /// Total processing time.
    pub total_time: Duration,
}

impl ObfuscationResult {
    /// Computes statistics derived from the event log.
    #[must_use]
    pub fn stats(&self) -> ProtectionStats {
        ProtectionStats::from_log(&self.events).with_time(self.total_time)
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        self.stats().to_string()
    }

    /// Returns `true` if any function failed to be processed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.events.errors().next().is_some()
    }
}

/// Runs the configured protection passes over whole modules.
///
/// The stack pass runs first so a function that opts into both variants has
/// its directly used data rebuilt on the stack, leaving the rest to the
/// at-rest pass.
///
/// # Example
///
/// ```rust
/// use ircloak::ir::{Constant, Global, IrType, ModuleBuilder, Value};
/// use ircloak::obfuscation::{ObfuscationEngine, ProtectionConfig};
///
/// let mut mb = ModuleBuilder::new("demo");
/// let s = mb.global(Global::new(".str", Constant::c_string("Hello")));
/// mb.function("main", vec![], IrType::I8, |fb| {
///     let v = fb.ins().load(IrType::I8, Value::global(s))?;
///     fb.ins().ret(Some(v))?;
///     Ok(())
/// })?;
/// let mut module = mb.finish();
///
/// let engine = ObfuscationEngine::new(ProtectionConfig::default().with_seed(7));
/// let result = engine.process_module(&mut module)?;
/// assert_eq!(result.functions_changed, 1);
/// assert!(module.global_by_name(".str").is_none());
/// # Ok::<(), ircloak::Error>(())
/// ```
pub struct ObfuscationEngine {
    config: ProtectionConfig,
}

impl Default for ObfuscationEngine {
    fn default() -> Self {
        Self::new(ProtectionConfig::default())
    }
}

impl ObfuscationEngine {
    /// Creates an engine with the given configuration.
    #[must_use]
    pub fn new(config: ProtectionConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    fn scheduler(&self) -> PassScheduler {
        let mut scheduler = PassScheduler::new();
        scheduler.add(Box::new(StackStringPass::new(self.config.clone())));
        scheduler.add(Box::new(StringEncryptionPass::new(self.config.clone())));
        scheduler
    }

    /// Protects every function of `module`.
    ///
    /// Functions whose configuration is invalid are left untouched and
    /// reported as error events; the rest of the module is still processed.
    ///
    /// # Errors
    ///
    /// Returns an error only if a pass fails to initialize or finalize.
    pub fn process_module(&self, module: &mut Module) -> Result<ObfuscationResult> {
        let ctx = CompilerContext::new();
        let mut scheduler = self.scheduler();
        let changes = scheduler.run(module, &ctx)?;

        let result = ObfuscationResult {
            functions_changed: ctx.processed_functions.len(),
            guards: ctx.guard_count(),
            total_time: ctx.elapsed(),
            events: ctx.events,
        };
        info!(
            module = module.name(),
            changes,
            summary = %result.summary(),
            "module protected"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::EventKind,
        ir::{Constant, Global, IrType, ModuleBuilder, Value},
    };

    fn two_functions() -> Module {
        let mut mb = ModuleBuilder::new("m");
        let a = mb.global(Global::new(".str", Constant::c_string("alpha")));
        let b = mb.global(Global::new(".str", Constant::c_string("beta")));
        for (name, g, annotation) in [("f", a, None), ("g", b, Some("strcry_prob=0"))] {
            mb.function(name, vec![], IrType::I8, |fb| {
                if let Some(annotation) = annotation {
                    fb.annotate(annotation);
                }
                let v = fb.ins().load(IrType::I8, Value::global(g))?;
                fb.ins().ret(Some(v))?;
                Ok(())
            })
            .unwrap();
        }
        mb.finish()
    }

    #[test]
    fn test_error_in_one_function_does_not_stop_others() {
        let mut module = two_functions();
        let engine = ObfuscationEngine::new(ProtectionConfig::default().with_seed(11));
        let result = engine.process_module(&mut module).unwrap();

        assert_eq!(result.functions_changed, 1);
        assert_eq!(result.guards, 1);
        assert!(result.has_errors());
        assert_eq!(result.stats().globals_encrypted, 1);
        assert_eq!(result.events.count_kind(EventKind::PassStarted), 2);
    }

    #[test]
    fn test_disabled_config_changes_nothing() {
        let mut module = two_functions();
        let before = module.to_string();
        let engine = ObfuscationEngine::new(ProtectionConfig::default().with_string_encryption(false));
        let result = engine.process_module(&mut module).unwrap();

        assert_eq!(result.functions_changed, 0);
        assert_eq!(result.summary(), "no transformations");
        assert_eq!(module.to_string(), before);
    }
}
