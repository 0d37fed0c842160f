//! The two protection passes.
//!
//! | Pass | Variant | Default |
//! |------|---------|---------|
//! | [`StackStringPass`] | rebuilds raw globals on the stack at every entry | off |
//! | [`StringEncryptionPass`] | encrypted blob, decrypted once under a guard | on |
//!
//! Both resolve the options of each function from the [`ProtectionConfig`]
//! and its annotations, then hand the function to a [`ConstantProtector`].

use std::sync::Mutex;

use crate::{
    compiler::{CompilerContext, IrPass},
    ir::{FunctionId, Module},
    obfuscation::{
        config::{FunctionOptions, ProtectionConfig, Variant},
        keys::RngKeySource,
        protect::ConstantProtector,
    },
    Result,
};

/// Added to the configured seed for the stack pass, so the two passes draw
/// different streams from one seed.
const STACK_SEED_OFFSET: u64 = 0x5354_4143_4b53_5452;

fn run_variant(
    config: &ProtectionConfig,
    protector: &Mutex<ConstantProtector<RngKeySource>>,
    variant: Variant,
    module: &mut Module,
    function: FunctionId,
    ctx: &CompilerContext,
) -> Result<bool> {
    let Some(options) = FunctionOptions::resolve(config, module.try_function(function)?, variant)?
    else {
        return Ok(false);
    };

    let outcome = lock!(protector).protect(module, function, &options, ctx)?;
    Ok(outcome.is_changed())
}

/// Replaces raw constant data by encrypted blobs decrypted once per function.
pub struct StringEncryptionPass {
    config: ProtectionConfig,
    protector: Mutex<ConstantProtector<RngKeySource>>,
}

impl StringEncryptionPass {
    /// Creates the pass, seeding its key source from `config.seed`.
    #[must_use]
    pub fn new(config: ProtectionConfig) -> Self {
        let keys = RngKeySource::new(config.seed);
        Self {
            config,
            protector: Mutex::new(ConstantProtector::new(keys)),
        }
    }
}

impl IrPass for StringEncryptionPass {
    fn name(&self) -> &'static str {
        "string-encryption"
    }

    fn description(&self) -> &'static str {
        "Encrypts constant data at rest and decrypts it once on first entry"
    }

    fn should_run(&self, function: FunctionId, module: &Module, _ctx: &CompilerContext) -> bool {
        module
            .function(function)
            .is_some_and(|f| self.config.is_enabled_for(f, Variant::AtRest))
    }

    fn run_on_function(
        &self,
        module: &mut Module,
        function: FunctionId,
        ctx: &CompilerContext,
    ) -> Result<bool> {
        run_variant(
            &self.config,
            &self.protector,
            Variant::AtRest,
            module,
            function,
            ctx,
        )
    }
}

/// Replaces raw constant data by stack buffers rebuilt on every entry.
pub struct StackStringPass {
    config: ProtectionConfig,
    protector: Mutex<ConstantProtector<RngKeySource>>,
}

impl StackStringPass {
    /// Creates the pass, seeding its key source from `config.seed`.
    #[must_use]
    pub fn new(config: ProtectionConfig) -> Self {
        let keys = RngKeySource::new(config.seed.map(|s| s.wrapping_add(STACK_SEED_OFFSET)));
        Self {
            config,
            protector: Mutex::new(ConstantProtector::new(keys)),
        }
    }
}

impl IrPass for StackStringPass {
    fn name(&self) -> &'static str {
        "stack-strings"
    }

    fn description(&self) -> &'static str {
        "Rebuilds constant data in stack buffers on every entry"
    }

    fn should_run(&self, function: FunctionId, module: &Module, _ctx: &CompilerContext) -> bool {
        module
            .function(function)
            .is_some_and(|f| self.config.is_enabled_for(f, Variant::Stack))
    }

    fn run_on_function(
        &self,
        module: &mut Module,
        function: FunctionId,
        ctx: &CompilerContext,
    ) -> Result<bool> {
        run_variant(
            &self.config,
            &self.protector,
            Variant::Stack,
            module,
            function,
            ctx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::EventKind,
        ir::{Constant, Global, IrType, ModuleBuilder, Value},
    };

    fn fixture(annotations: &[&str]) -> (Module, FunctionId) {
        let mut mb = ModuleBuilder::new("m");
        let raw = mb.global(Global::new(".str", Constant::c_string("abc")));
        let f = mb
            .function("f", vec![], IrType::I8, |fb| {
                for annotation in annotations {
                    fb.annotate(*annotation);
                }
                let v = fb.ins().load(IrType::I8, Value::global(raw))?;
                fb.ins().ret(Some(v))?;
                Ok(())
            })
            .unwrap();
        (mb.finish(), f)
    }

    #[test]
    fn test_opt_out_skips_function() {
        let (module, f) = fixture(&["nostrenc"]);
        let pass = StringEncryptionPass::new(ProtectionConfig::default());
        assert!(!pass.should_run(f, &module, &CompilerContext::new()));
    }

    #[test]
    fn test_stack_opt_in() {
        let (mut module, f) = fixture(&["sstring"]);
        let ctx = CompilerContext::new();
        let pass = StackStringPass::new(ProtectionConfig::default().with_seed(1));
        assert!(pass.should_run(f, &module, &ctx));
        assert!(pass.run_on_function(&mut module, f, &ctx).unwrap());
        assert_eq!(ctx.events.count_kind(EventKind::GlobalMaterialized), 1);
    }

    #[test]
    fn test_bad_probability_annotation() {
        let (mut module, f) = fixture(&["strcry_prob=lots"]);
        let ctx = CompilerContext::new();
        let pass = StringEncryptionPass::new(ProtectionConfig::default());
        let error = pass.run_on_function(&mut module, f, &ctx).unwrap_err();
        assert!(error.is_configuration());
        assert!(module.global_by_name(".str").is_some());
    }
}
