//! The pass trait implemented by every module transformation.

use crate::{
    compiler::context::CompilerContext,
    ir::{FunctionId, Module},
    Result,
};

/// A transformation that runs once per function.
///
/// All passes must be thread-safe (`Send + Sync`) so a configured pipeline can
/// be shared. Passes receive exclusive access to the module for the duration
/// of one function and shared access to the [`CompilerContext`], which is
/// where anything that must outlive the function is stored.
pub trait IrPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Should this pass run on a specific function?
    ///
    /// Called before `run_on_function`. Declarations are never offered.
    fn should_run(&self, _function: FunctionId, _module: &Module, _ctx: &CompilerContext) -> bool {
        true
    }

    /// Run the pass on a single function.
    ///
    /// Returns `true` if the module was changed. Events should be recorded
    /// directly to `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the function could not be processed. The
    /// scheduler records the error and continues with the next function.
    fn run_on_function(
        &self,
        module: &mut Module,
        function: FunctionId,
        ctx: &CompilerContext,
    ) -> Result<bool>;

    /// Called once before the pass runs over the module.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn initialize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the pass ran over every function.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn finalize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
