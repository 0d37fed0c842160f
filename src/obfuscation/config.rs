//! Configuration for the protection passes.
//!
//! [`ProtectionConfig`] is the module-wide configuration. Functions can
//! override it through annotation strings, which [`FunctionOptions::resolve`]
//! folds into the effective options for one function.

use strum::{Display, IntoStaticStr};

use crate::{ir::Function, Error, Result};

/// Default named struct recognised as a tagged string wrapper.
pub const DEFAULT_WRAPPER_TYPE: &str = "struct.__NSConstantString_tag";

/// Annotation key overriding the element probability of one function.
pub const PROBABILITY_ANNOTATION: &str = "strcry_prob";

/// Module-wide configuration of the protection passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionConfig {
    /// Run the at-rest variant on every function not annotated `nostrenc`
    /// (default: true).
    pub enable_string_encryption: bool,

    /// Run the stack variant on every function not annotated `nosstring`
    /// (default: false).
    pub enable_stack_strings: bool,

    /// Percentage of elements that are encrypted (default: 100).
    ///
    /// Must satisfy `0 < p <= 100`.
    pub element_probability: u32,

    /// Protect globals used by more than one function (default: false).
    pub permissive_sharing: bool,

    /// Named struct recognised as a tagged string wrapper.
    pub wrapper_type_name: String,

    /// Fixed RNG seed for reproducible output. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            enable_string_encryption: true,
            enable_stack_strings: false,
            element_probability: 100,
            permissive_sharing: false,
            wrapper_type_name: DEFAULT_WRAPPER_TYPE.to_string(),
            seed: None,
        }
    }
}

impl ProtectionConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the at-rest variant.
    #[must_use]
    pub fn with_string_encryption(mut self, enable: bool) -> Self {
        self.enable_string_encryption = enable;
        self
    }

    /// Enables or disables the stack variant.
    #[must_use]
    pub fn with_stack_strings(mut self, enable: bool) -> Self {
        self.enable_stack_strings = enable;
        self
    }

    /// Sets the element probability. Validated when a function is resolved.
    #[must_use]
    pub fn with_element_probability(mut self, probability: u32) -> Self {
        self.element_probability = probability;
        self
    }

    /// Allows protecting globals shared between functions.
    #[must_use]
    pub fn with_permissive_sharing(mut self, enable: bool) -> Self {
        self.permissive_sharing = enable;
        self
    }

    /// Sets the named struct recognised as a tagged wrapper.
    #[must_use]
    pub fn with_wrapper_type(mut self, name: impl Into<String>) -> Self {
        self.wrapper_type_name = name.into();
        self
    }

    /// Fixes the RNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks the configuration for values no function could run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProbability`] for an out-of-range probability.
    pub fn validate(&self) -> Result<()> {
        validate_probability(self.element_probability).map(|_| ())
    }

    /// Returns `true` if `variant` runs on `function` under this configuration.
    ///
    /// An explicit opt-out annotation wins over an opt-in, which wins over the
    /// module-wide switch.
    #[must_use]
    pub fn is_enabled_for(&self, function: &Function, variant: Variant) -> bool {
        if function.has_annotation(variant.opt_out()) {
            return false;
        }
        if function.has_annotation(variant.opt_in()) {
            return true;
        }
        match variant {
            Variant::AtRest => self.enable_string_encryption,
            Variant::Stack => self.enable_stack_strings,
        }
    }
}

/// Checks an element probability.
///
/// # Errors
///
/// Returns [`Error::InvalidProbability`] unless `0 < probability <= 100`.
pub fn validate_probability(probability: u32) -> Result<u32> {
    if probability == 0 || probability > 100 {
        return Err(Error::InvalidProbability(probability));
    }
    Ok(probability)
}

/// The two ways a raw global can be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum Variant {
    /// Encrypted blob decrypted once into a shadow buffer under a guard.
    #[strum(serialize = "at-rest")]
    AtRest,
    /// Function-local buffer rebuilt on every entry.
    #[strum(serialize = "stack")]
    Stack,
}

impl Variant {
    /// Annotation forcing the variant on.
    #[must_use]
    pub const fn opt_in(self) -> &'static str {
        match self {
            Self::AtRest => "strenc",
            Self::Stack => "sstring",
        }
    }

    /// Annotation forcing the variant off.
    #[must_use]
    pub const fn opt_out(self) -> &'static str {
        match self {
            Self::AtRest => "nostrenc",
            Self::Stack => "nosstring",
        }
    }
}

/// Effective options for protecting one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionOptions {
    /// Replacement strategy.
    pub variant: Variant,
    /// Percentage of elements encrypted, in `0..=100`.
    pub probability: u32,
    /// Protect globals shared with other functions.
    pub permissive_sharing: bool,
    /// Named struct recognised as a tagged wrapper.
    pub wrapper_type_name: String,
}

impl FunctionOptions {
    /// Options with every element encrypted and conservative sharing.
    #[must_use]
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            probability: 100,
            permissive_sharing: false,
            wrapper_type_name: DEFAULT_WRAPPER_TYPE.to_string(),
        }
    }

    /// Sets the element probability without validation.
    ///
    /// `0` leaves every element in plaintext, which is useful for tests but
    /// rejected by [`FunctionOptions::resolve`].
    #[must_use]
    pub fn with_probability(mut self, probability: u32) -> Self {
        self.probability = probability;
        self
    }

    /// Sets the sharing mode.
    #[must_use]
    pub fn with_permissive_sharing(mut self, enable: bool) -> Self {
        self.permissive_sharing = enable;
        self
    }

    /// Resolves the options of `function` for `variant`.
    ///
    /// Returns `Ok(None)` if the variant is disabled for the function. The
    /// stack variant always uses conservative sharing and ignores the
    /// probability, since every element is rebuilt at runtime anyway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAnnotation`] for a `strcry_prob` value that is
    /// not an integer and [`Error::InvalidProbability`] for an out-of-range
    /// effective probability.
    pub fn resolve(
        config: &ProtectionConfig,
        function: &Function,
        variant: Variant,
    ) -> Result<Option<Self>> {
        if !config.is_enabled_for(function, variant) {
            return Ok(None);
        }

        let options = Self {
            variant,
            probability: 100,
            permissive_sharing: false,
            wrapper_type_name: config.wrapper_type_name.clone(),
        };
        if variant == Variant::Stack {
            return Ok(Some(options));
        }

        let probability = match function.annotation_value(PROBABILITY_ANNOTATION) {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                Error::InvalidAnnotation(format!("{PROBABILITY_ANNOTATION}={raw}"))
            })?,
            None => config.element_probability,
        };

        Ok(Some(Self {
            probability: validate_probability(probability)?,
            permissive_sharing: config.permissive_sharing,
            ..options
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrType;

    fn function(annotations: &[&str]) -> Function {
        let mut f = Function::new("f", vec![], IrType::Void);
        for a in annotations {
            f.annotate(*a);
        }
        f
    }

    #[test]
    fn test_validate_probability() {
        assert!(validate_probability(0).is_err());
        assert!(validate_probability(101).is_err());
        assert_eq!(validate_probability(1).unwrap(), 1);
        assert_eq!(validate_probability(100).unwrap(), 100);
        assert!(ProtectionConfig::new()
            .with_element_probability(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_annotations_override_switches() {
        let config = ProtectionConfig::new();
        assert!(config.is_enabled_for(&function(&[]), Variant::AtRest));
        assert!(!config.is_enabled_for(&function(&["nostrenc"]), Variant::AtRest));
        assert!(!config.is_enabled_for(&function(&[]), Variant::Stack));
        assert!(config.is_enabled_for(&function(&["sstring"]), Variant::Stack));
        assert!(!config.is_enabled_for(&function(&["sstring", "nosstring"]), Variant::Stack));
    }

    #[test]
    fn test_resolve_probability_annotation() {
        let config = ProtectionConfig::new().with_permissive_sharing(true);

        let options = FunctionOptions::resolve(&config, &function(&["strcry_prob=40"]), Variant::AtRest)
            .unwrap()
            .unwrap();
        assert_eq!(options.probability, 40);
        assert!(options.permissive_sharing);

        let err = FunctionOptions::resolve(&config, &function(&["strcry_prob=0"]), Variant::AtRest)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProbability(0)));

        let err = FunctionOptions::resolve(&config, &function(&["strcry_prob=lots"]), Variant::AtRest)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAnnotation(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_resolve_stack_is_conservative() {
        let config = ProtectionConfig::new()
            .with_stack_strings(true)
            .with_permissive_sharing(true)
            .with_element_probability(500);
        let options = FunctionOptions::resolve(&config, &function(&[]), Variant::Stack)
            .unwrap()
            .unwrap();
        assert!(!options.permissive_sharing);
        assert_eq!(options.probability, 100);

        assert!(FunctionOptions::resolve(&config, &function(&["nosstring"]), Variant::Stack)
            .unwrap()
            .is_none());
    }
}
