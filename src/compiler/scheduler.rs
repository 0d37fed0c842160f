//! Pass scheduler for running protection passes over a module.
//!
//! Protection passes are not iterated to a fixpoint: each pass visits every
//! function with a body exactly once, in module order, on the calling thread.
//! A failure in one function is recorded and never stops the others.

use tracing::{debug, warn};

use crate::{
    compiler::{context::CompilerContext, events::EventKind, pass::IrPass},
    ir::Module,
    Result,
};

/// Runs a list of passes in registration order.
#[derive(Default)]
pub struct PassScheduler {
    passes: Vec<Box<dyn IrPass>>,
}

impl PassScheduler {
    /// Creates a scheduler with no passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pass to the pipeline.
    pub fn add(&mut self, pass: Box<dyn IrPass>) {
        self.passes.push(pass);
    }

    /// Number of registered passes.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Names of the registered passes, in execution order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass over every function of `module`.
    ///
    /// Per-function errors are turned into [`EventKind::Error`] events.
    ///
    /// # Returns
    ///
    /// The number of (pass, function) runs that changed the module.
    ///
    /// # Errors
    ///
    /// Returns an error only if a pass fails to initialize or finalize.
    pub fn run(&mut self, module: &mut Module, ctx: &CompilerContext) -> Result<usize> {
        let mut changes = 0;

        for pass in &mut self.passes {
            pass.initialize(ctx)?;
            let name = pass.name();
            ctx.events
                .record(EventKind::PassStarted)
                .pass(name)
                .message(format!("{name}: {}", pass.description()));

            for function in module.function_ids() {
                let has_body = module
                    .function(function)
                    .is_some_and(|f| !f.is_declaration());
                if !has_body || !pass.should_run(function, module, ctx) {
                    continue;
                }

                match pass.run_on_function(module, function, ctx) {
                    Ok(true) => {
                        changes += 1;
                        ctx.mark_processed(function);
                    }
                    Ok(false) => {}
                    Err(error) => {
                        warn!(pass = name, %function, %error, "function left unprotected");
                        ctx.events
                            .record(EventKind::Error)
                            .function(function)
                            .pass(name)
                            .message(error.to_string());
                    }
                }
            }

            ctx.events.record(EventKind::PassCompleted).pass(name);
            debug!(pass = name, "pass completed");
            pass.finalize(ctx)?;
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{FunctionId, IrType, ModuleBuilder},
        Error,
    };

    struct TestPass {
        name: &'static str,
        fail_on: Option<&'static str>,
    }

    impl IrPass for TestPass {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run_on_function(
            &self,
            module: &mut Module,
            function: FunctionId,
            ctx: &CompilerContext,
        ) -> Result<bool> {
            let fname = module.try_function(function)?.name().to_string();
            if self.fail_on == Some(fname.as_str()) {
                return Err(Error::InvalidProbability(0));
            }
            ctx.events
                .record(EventKind::GuardCreated)
                .function(function)
                .message("test");
            Ok(true)
        }
    }

    fn module() -> Module {
        let mut mb = ModuleBuilder::new("m");
        for name in ["a", "b", "c"] {
            mb.function(name, vec![], IrType::Void, |fb| {
                fb.ins().ret(None)?;
                Ok(())
            })
            .unwrap();
        }
        mb.add_function(crate::ir::Function::new("decl", vec![], IrType::Void));
        mb.finish()
    }

    #[test]
    fn test_errors_do_not_stop_other_functions() {
        let mut module = module();
        let ctx = CompilerContext::new();
        let mut scheduler = PassScheduler::new();
        scheduler.add(Box::new(TestPass {
            name: "test",
            fail_on: Some("b"),
        }));

        let changes = scheduler.run(&mut module, &ctx).unwrap();
        assert_eq!(changes, 2);
        assert_eq!(ctx.events.count_kind(EventKind::GuardCreated), 2);
        assert_eq!(ctx.events.errors().count(), 1);
        assert!(ctx.is_processed(FunctionId::new(0)));
        assert!(!ctx.is_processed(FunctionId::new(1)));
        // Declarations are skipped.
        assert!(!ctx.is_processed(FunctionId::new(3)));
    }

    #[test]
    fn test_pass_names() {
        let mut scheduler = PassScheduler::new();
        scheduler.add(Box::new(TestPass {
            name: "pass1",
            fail_on: None,
        }));
        scheduler.add(Box::new(TestPass {
            name: "pass2",
            fail_on: None,
        }));
        assert_eq!(scheduler.pass_count(), 2);
        assert_eq!(scheduler.pass_names(), vec!["pass1", "pass2"]);
    }
}
