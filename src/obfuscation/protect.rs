//! Per-function protection entry point.
//!
//! [`ConstantProtector::protect`] runs the whole pipeline on one function:
//!
//! ```text
//! Closure::build ─► encode raw globals ─► rewrite wrappers ─┬─► at rest: guard + decryption block
//!                                                           └─► stack:   materialize on entry
//!                                          ─► rewrite uses (one batch) ─► erase dead originals
//! ```
//!
//! A global that cannot be protected is skipped and the rest of the function
//! proceeds. Running the protector again on its own output changes nothing,
//! since everything it creates is flagged as an artifact.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::{
    compiler::{CompilerContext, EventKind},
    ir::{Constant, FunctionId, Global, GlobalFlags, GlobalId, GlobalUse, IntWidth, Module},
    obfuscation::{
        classify::{Classifier, Shape},
        closure::Closure,
        config::{FunctionOptions, Variant},
        encoder::{encodable, encode},
        keys::KeySource,
        ptrauth::{self, PtrauthFix},
        record::{ProtectionRecord, ShadowRecipe},
        rewrite::{erase_dead, rewrite_uses, Replacement},
        stack::{materialize, StackItem},
        synth::{create_guard, insert_decryption_block},
    },
    Result,
};

/// Symbol name of encrypted blobs.
pub const BLOB_NAME: &str = "EncryptedString";

/// Symbol name of shadow buffers.
pub const SHADOW_NAME: &str = "DecryptSpace";

/// Symbol name of rewritten wrappers.
pub const WRAPPER_NAME: &str = "DecryptSpaceObjC";

/// What protecting one function did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionOutcome {
    /// The variant that ran.
    pub variant: Variant,
    /// Raw globals replaced at rest.
    pub records: Vec<ProtectionRecord>,
    /// Raw globals rebuilt on the stack.
    pub materialized: Vec<GlobalId>,
    /// Rewritten wrappers, as (old, new).
    pub wrappers: Vec<(GlobalId, GlobalId)>,
    /// Shadow buffers of other functions decrypted here as well.
    pub redecrypted: Vec<GlobalId>,
    /// Globals erased after rewriting.
    pub removed: Vec<GlobalId>,
    /// Guard created for this run.
    pub guard: Option<GlobalId>,
}

impl ProtectionOutcome {
    fn new(variant: Variant) -> Self {
        Self {
            variant,
            records: Vec::new(),
            materialized: Vec::new(),
            wrappers: Vec::new(),
            redecrypted: Vec::new(),
            removed: Vec::new(),
            guard: None,
        }
    }

    /// Returns `true` if the module was modified.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        !self.records.is_empty() || !self.materialized.is_empty() || !self.redecrypted.is_empty()
    }

    /// Record of an original global, if it was replaced at rest.
    #[must_use]
    pub fn record_for(&self, original: GlobalId) -> Option<&ProtectionRecord> {
        self.records.iter().find(|r| r.original == original)
    }
}

/// Protects the constant data of functions.
#[derive(Debug)]
pub struct ConstantProtector<K> {
    keys: K,
}

impl<K: KeySource> ConstantProtector<K> {
    /// Creates a protector drawing its randomness from `keys`.
    pub fn new(keys: K) -> Self {
        Self { keys }
    }

    /// Returns the key source.
    pub fn keys_mut(&mut self) -> &mut K {
        &mut self.keys
    }

    /// Protects the globals `function` depends on.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown function or if the function body
    /// cannot be rewritten. Individual globals that cannot be protected are
    /// skipped, never reported as errors.
    pub fn protect(
        &mut self,
        module: &mut Module,
        function: FunctionId,
        options: &FunctionOptions,
        ctx: &CompilerContext,
    ) -> Result<ProtectionOutcome> {
        let closure = {
            let classifier = Classifier::new(
                module,
                function,
                options.permissive_sharing,
                &options.wrapper_type_name,
            );
            Closure::build(module, function, &classifier)?
        };
        debug!(
            %function,
            globals = closure.len(),
            variant = %options.variant,
            "closure built"
        );
        for (id, reason) in closure.ineligible() {
            debug!(global = %id, %reason, "global not eligible");
        }

        let outcome = match options.variant {
            Variant::AtRest => self.protect_at_rest(module, function, options, &closure, ctx)?,
            Variant::Stack => self.protect_on_stack(module, function, &closure, ctx)?,
        };

        if outcome.is_changed() {
            info!(
                function = module.try_function(function)?.name(),
                variant = %options.variant,
                encrypted = outcome.records.len(),
                materialized = outcome.materialized.len(),
                wrappers = outcome.wrappers.len(),
                removed = outcome.removed.len(),
                "function protected"
            );
        }
        Ok(outcome)
    }

    fn protect_at_rest(
        &mut self,
        module: &mut Module,
        function: FunctionId,
        options: &FunctionOptions,
        closure: &Closure,
        ctx: &CompilerContext,
    ) -> Result<ProtectionOutcome> {
        let mut outcome = ProtectionOutcome::new(Variant::AtRest);
        let mut map: BTreeMap<GlobalId, Replacement> = BTreeMap::new();

        // Raw sequences: encode and create blob + shadow buffer.
        for (id, width) in closure.raw_globals() {
            let Some(record) = self.encrypt_raw(module, function, id, width, options.probability)?
            else {
                continue;
            };
            ctx.register_recipe(record.shadow, record.recipe.clone());
            map.insert(id, Replacement::Global(record.shadow));

            let encrypted = record.recipe.len() - record.recipe.unencrypted.len();
            ctx.events
                .record(EventKind::GlobalEncrypted)
                .function(function)
                .global(module.try_global(id)?.name.clone())
                .message(format!(
                    "{encrypted}/{} {} elements encrypted",
                    record.recipe.len(),
                    width
                ));
            outcome.records.push(record);
        }
        for (id, shape) in closure.eligible() {
            if shape == Shape::Raw(None) {
                skip(ctx, module, function, id, "unsupported element width");
            }
        }

        // Wrappers, strictly after their raw data.
        let mut fixes: Vec<PtrauthFix> = Vec::new();
        for (wrapper, data) in closure.wrappers() {
            let Some(Replacement::Global(shadow)) = map.get(&data).cloned() else {
                skip(ctx, module, function, wrapper, "wrapped data was not protected");
                continue;
            };
            let new_wrapper = rewrite_wrapper(module, wrapper, data, shadow)?;
            if module.target().ptrauth {
                if let Some(fix) = ptrauth::clone_record(module, wrapper, new_wrapper)? {
                    ctx.events
                        .record(EventKind::PointerAuthFixed)
                        .function(function)
                        .global(module.try_global(fix.old_record)?.name.clone());
                    fixes.push(fix);
                }
            }
            map.insert(wrapper, Replacement::Global(new_wrapper));
            ctx.events
                .record(EventKind::WrapperRewritten)
                .function(function)
                .global(module.try_global(wrapper)?.name.clone());
            outcome.wrappers.push((wrapper, new_wrapper));
        }

        // Buffers made for other functions that this one reaches as well.
        let mut foreign: Vec<(GlobalId, ShadowRecipe)> = Vec::new();
        for id in closure.globals() {
            if map.contains_key(id) {
                continue;
            }
            if let Some(recipe) = ctx.recipe(*id) {
                if !recipe.users.contains(&function) && ctx.add_recipe_user(*id, function) {
                    foreign.push((*id, recipe));
                }
            }
        }
        outcome.redecrypted = foreign.iter().map(|(id, _)| *id).collect();

        if !outcome.is_changed() {
            return Ok(outcome);
        }

        let guard = create_guard(module);
        if let Some(previous) = ctx.set_guard(function, guard) {
            debug!(%function, %previous, "guard replaced");
        }
        ctx.events
            .record(EventKind::GuardCreated)
            .function(function)
            .global(module.try_global(guard)?.name.clone());
        outcome.guard = Some(guard);

        for record in &outcome.records {
            if let Some(blob) = record.recipe.blob {
                module.append_compiler_used(blob);
            }
        }

        let buffers: Vec<(GlobalId, &ShadowRecipe)> = outcome
            .records
            .iter()
            .map(|r| (r.shadow, &r.recipe))
            .chain(foreign.iter().map(|(id, r)| (*id, r)))
            .collect();
        insert_decryption_block(module.try_function_mut(function)?, guard, &buffers)?;
        ctx.events
            .record(EventKind::DecryptionBlockInserted)
            .function(function)
            .message(format!("{} buffers", buffers.len()));

        rewrite_uses(module, function, &closure.holders(), &map)?;
        for fix in &fixes {
            ptrauth::detach_record(module, fix);
        }

        let candidates: Vec<GlobalId> = outcome
            .wrappers
            .iter()
            .map(|(old, _)| *old)
            .chain(fixes.iter().map(|f| f.old_record))
            .chain(outcome.records.iter().map(|r| r.original))
            .collect();
        outcome.removed = self.cleanup(module, function, &candidates, ctx)?;

        Ok(outcome)
    }

    fn protect_on_stack(
        &mut self,
        module: &mut Module,
        function: FunctionId,
        closure: &Closure,
        ctx: &CompilerContext,
    ) -> Result<ProtectionOutcome> {
        let mut outcome = ProtectionOutcome::new(Variant::Stack);

        let mut items = Vec::new();
        for (id, width) in closure.raw_globals() {
            if let Some(why) = stack_rejection(module, function, closure, id)? {
                skip(ctx, module, function, id, why);
                continue;
            }
            let Some((_, elements)) = module
                .try_global(id)?
                .initializer
                .as_ref()
                .and_then(encodable)
            else {
                continue;
            };
            items.push(StackItem {
                original: id,
                width,
                elements: elements.to_vec(),
            });
        }
        if items.is_empty() {
            return Ok(outcome);
        }

        let (_, buffers) = materialize(module.try_function_mut(function)?, &items, &mut self.keys)?;
        let map: BTreeMap<GlobalId, Replacement> = buffers
            .into_iter()
            .map(|(id, local)| (id, Replacement::Local(local)))
            .collect();
        rewrite_uses(module, function, &BTreeSet::new(), &map)?;

        for item in &items {
            ctx.events
                .record(EventKind::GlobalMaterialized)
                .function(function)
                .global(module.try_global(item.original)?.name.clone())
                .message(format!("{} {} elements", item.elements.len(), item.width));
        }
        outcome.materialized = items.iter().map(|i| i.original).collect();

        let candidates: Vec<GlobalId> = items.iter().map(|i| i.original).collect();
        outcome.removed = self.cleanup(module, function, &candidates, ctx)?;
        Ok(outcome)
    }

    /// Encodes one raw global and creates its blob and shadow buffer.
    ///
    /// Returns `None` for all-zero or unsupported initializers.
    fn encrypt_raw(
        &mut self,
        module: &mut Module,
        function: FunctionId,
        id: GlobalId,
        width: IntWidth,
        probability: u32,
    ) -> Result<Option<ProtectionRecord>> {
        let original = module.try_global(id)?;
        let Some((_, elements)) = original.initializer.as_ref().and_then(encodable) else {
            return Ok(None);
        };
        let elements = elements.to_vec();
        let linkage = original.linkage;
        let thread_local = original.thread_local;

        let encoded = encode(&elements, width, probability, &mut self.keys);

        let artifact = |name: &str, init: Constant| {
            let mut global = Global::new(name, init)
                .with_linkage(linkage)
                .with_constant(false)
                .with_flags(GlobalFlags::ARTIFACT);
            global.thread_local = thread_local;
            global
        };

        let blob = if encoded.is_plaintext() {
            None
        } else {
            let ciphertext = Constant::data(width.bits(), encoded.compact_ciphertext());
            Some(module.add_global(artifact(BLOB_NAME, ciphertext)))
        };
        let shadow = module.add_global(artifact(
            SHADOW_NAME,
            Constant::data(width.bits(), encoded.dummy.clone()),
        ));

        Ok(Some(ProtectionRecord {
            original: id,
            shadow,
            recipe: ShadowRecipe {
                blob,
                width,
                keys: encoded.keys,
                unencrypted: encoded.unencrypted,
                users: BTreeSet::from([function]),
            },
        }))
    }

    fn cleanup(
        &self,
        module: &mut Module,
        function: FunctionId,
        candidates: &[GlobalId],
        ctx: &CompilerContext,
    ) -> Result<Vec<GlobalId>> {
        let removed = erase_dead(module, candidates)?;
        for (_, global) in &removed {
            ctx.events
                .record(EventKind::GlobalRemoved)
                .function(function)
                .global(global.name.clone());
        }
        Ok(removed.into_iter().map(|(id, _)| id).collect())
    }
}

/// Creates a copy of `wrapper` whose data field points at `shadow`.
fn rewrite_wrapper(
    module: &mut Module,
    wrapper: GlobalId,
    data: GlobalId,
    shadow: GlobalId,
) -> Result<GlobalId> {
    let old = module.try_global(wrapper)?;
    let init = old
        .initializer
        .as_ref()
        .and_then(|init| init.replace_globals(&|g| (g == data).then_some(shadow)))
        .ok_or_else(|| invalid_ir!("wrapper {} does not reference {}", wrapper, data))?;

    let mut global = Global::new(WRAPPER_NAME, init)
        .with_linkage(old.linkage)
        .with_constant(false)
        .with_flags(GlobalFlags::ARTIFACT);
    global.value_type = old.value_type.clone();
    global.thread_local = old.thread_local;
    Ok(module.add_global(global))
}

/// Why `id` cannot be moved onto the stack of `function`, if it cannot.
///
/// A stack buffer is a local value, so every use has to be an address
/// operand of an instruction in `function` itself.
fn stack_rejection(
    module: &Module,
    function: FunctionId,
    closure: &Closure,
    id: GlobalId,
) -> Result<Option<&'static str>> {
    if !closure.is_direct(id) {
        return Ok(Some("reached only through another global"));
    }
    for used in module.global_users(id) {
        match used {
            GlobalUse::Initializer(_) => return Ok(Some("referenced from another global")),
            GlobalUse::CompilerUsed => return Ok(Some("listed in compiler_used")),
            GlobalUse::Instruction { function: f, .. } if f != function => {
                return Ok(Some("used by another function"))
            }
            GlobalUse::Instruction { inst, .. } => {
                let inst = module
                    .try_function(function)?
                    .inst(inst)
                    .ok_or_else(|| invalid_ir!("instruction {} not in {}", inst, function))?;
                let nested = inst.operands().into_iter().any(|op| {
                    op.as_global() != Some(id) && op.as_const().is_some_and(|c| c.references(id))
                });
                if nested {
                    return Ok(Some("used inside an aggregate operand"));
                }
            }
        }
    }
    Ok(None)
}

fn skip(ctx: &CompilerContext, module: &Module, function: FunctionId, id: GlobalId, why: &str) {
    let name = module.global(id).map(|g| g.name.clone()).unwrap_or_default();
    debug!(global = %name, reason = why, "global skipped");
    ctx.events
        .record(EventKind::GlobalSkipped)
        .function(function)
        .global(name)
        .message(why);
}
