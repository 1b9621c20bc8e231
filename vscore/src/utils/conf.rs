//! Context configuration and search parameters.
//!
//! Both structures can be deserialized from TOML and updated field by field through
//! their kebab-case names, e.g. `set("restart-factor", "2.0")`.

use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::utils::error::{VsError, VsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ContextMode {
    /// A single check; no assertion after it and no push/pop.
    OneShot,
    /// Assertions may follow a check, no push/pop.
    MultiChecks,
    #[default]
    PushPop,
    /// Push/pop, and an interrupted check is rolled back.
    Interactive,
}

impl ContextMode {
    pub fn supports_push_pop(self) -> bool {
        matches!(self, ContextMode::PushPop | ContextMode::Interactive)
    }

    pub fn supports_multiple_checks(self) -> bool {
        self != ContextMode::OneShot
    }
}

bitflags! {
    /// Simplifications applied to asserted formulas.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub struct ContextOptions: u32 {
        /// Eliminate `x = t` by substituting `t` for `x`.
        const VAR_ELIM = 1 << 0;
        /// Solve bitvector equalities for a summand.
        const BVARITH_ELIM = 1 << 1;
        /// Split conjunctions and merge nested disjunctions.
        const FLATTEN = 1 << 2;
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "kebab-case")]
enum OptionName {
    VarElim,
    BvarithElim,
    Flatten,
}

impl ContextOptions {
    /// Option flag from its public name.
    pub fn from_option_name(name: &str) -> VsResult<ContextOptions> {
        let name = OptionName::from_str(name).map_err(|_| VsError::UnknownParameter(name.to_owned()))?;
        Ok(match name {
            OptionName::VarElim => ContextOptions::VAR_ELIM,
            OptionName::BvarithElim => ContextOptions::BVARITH_ELIM,
            OptionName::Flatten => ContextOptions::FLATTEN,
        })
    }
}

fn parse_bool(name: &str, value: &str) -> VsResult<bool> {
    match value {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(VsError::InvalidParameterValue {
            name: name.to_owned(),
            value: value.to_owned(),
        }),
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> VsResult<T> {
    value.parse().map_err(|_| VsError::InvalidParameterValue {
        name: name.to_owned(),
        value: value.to_owned(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContextConfig {
    pub mode: ContextMode,
    pub var_elim: bool,
    pub bvarith_elim: bool,
    pub flatten: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            mode: ContextMode::default(),
            var_elim: true,
            bvarith_elim: true,
            flatten: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "kebab-case")]
enum ConfigName {
    Mode,
    VarElim,
    BvarithElim,
    Flatten,
}

impl ContextConfig {
    pub fn from_toml_str(s: &str) -> VsResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn options(&self) -> ContextOptions {
        let mut options = ContextOptions::empty();
        options.set(ContextOptions::VAR_ELIM, self.var_elim);
        options.set(ContextOptions::BVARITH_ELIM, self.bvarith_elim);
        options.set(ContextOptions::FLATTEN, self.flatten);
        options
    }

    pub fn set(&mut self, name: &str, value: &str) -> VsResult<()> {
        let key = ConfigName::from_str(name).map_err(|_| VsError::UnknownParameter(name.to_owned()))?;
        match key {
            ConfigName::Mode => self.mode = parse_value(name, value)?,
            ConfigName::VarElim => self.var_elim = parse_bool(name, value)?,
            ConfigName::BvarithElim => self.bvarith_elim = parse_bool(name, value)?,
            ConfigName::Flatten => self.flatten = parse_bool(name, value)?,
        }
        Ok(())
    }
}

/// Parameters of one `check` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SearchParams {
    /// Conflicts before the first restart.
    pub restart_threshold: u32,
    /// Growth factor of the restart threshold.
    pub restart_factor: f64,
    /// Decay factor applied to variable activities after each conflict.
    pub var_decay: f64,
    /// Instances generated by one final check of the quantifier solver.
    pub max_instances: u32,
    /// Instances generated during one check before giving up with `Unknown`.
    pub max_total_instances: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            restart_threshold: 50,
            restart_factor: 1.5,
            var_decay: 0.95,
            max_instances: 1000,
            max_total_instances: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "kebab-case")]
enum ParamName {
    RestartThreshold,
    RestartFactor,
    VarDecay,
    MaxInstances,
    MaxTotalInstances,
}

impl SearchParams {
    pub fn from_toml_str(s: &str) -> VsResult<Self> {
        let params: SearchParams = toml::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> VsResult<()> {
        let invalid = |name: &str, value: String| {
            Err(VsError::InvalidParameterValue {
                name: name.to_owned(),
                value,
            })
        };
        if self.restart_threshold == 0 {
            return invalid("restart-threshold", self.restart_threshold.to_string());
        }
        if !(self.restart_factor >= 1.0) {
            return invalid("restart-factor", self.restart_factor.to_string());
        }
        if !(self.var_decay > 0.0 && self.var_decay <= 1.0) {
            return invalid("var-decay", self.var_decay.to_string());
        }
        if self.max_instances == 0 {
            return invalid("max-instances", self.max_instances.to_string());
        }
        if self.max_total_instances == 0 {
            return invalid("max-total-instances", self.max_total_instances.to_string());
        }
        Ok(())
    }

    /// Update one parameter; the record is unchanged when the value is rejected.
    pub fn set(&mut self, name: &str, value: &str) -> VsResult<()> {
        let key = ParamName::from_str(name).map_err(|_| VsError::UnknownParameter(name.to_owned()))?;
        let mut updated = self.clone();
        match key {
            ParamName::RestartThreshold => updated.restart_threshold = parse_value(name, value)?,
            ParamName::RestartFactor => updated.restart_factor = parse_value(name, value)?,
            ParamName::VarDecay => updated.var_decay = parse_value(name, value)?,
            ParamName::MaxInstances => updated.max_instances = parse_value(name, value)?,
            ParamName::MaxTotalInstances => updated.max_total_instances = parse_value(name, value)?,
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_by_name() {
        assert_eq!(ContextOptions::from_option_name("var-elim").unwrap(), ContextOptions::VAR_ELIM);
        assert_eq!(ContextOptions::from_option_name("flatten").unwrap(), ContextOptions::FLATTEN);
        assert!(matches!(
            ContextOptions::from_option_name("arith-elim"),
            Err(VsError::UnknownParameter(_))
        ));
    }

    #[test]
    fn config_from_toml() {
        let config = ContextConfig::from_toml_str(
            r#"
            mode = "interactive"
            flatten = false
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, ContextMode::Interactive);
        assert!(!config.options().contains(ContextOptions::FLATTEN));
        assert!(config.options().contains(ContextOptions::VAR_ELIM));
        assert!(ContextConfig::from_toml_str("mode = 3").is_err());
    }

    #[test]
    fn config_set_by_name() {
        let mut config = ContextConfig::default();
        config.set("mode", "one-shot").unwrap();
        assert_eq!(config.mode, ContextMode::OneShot);
        assert!(!config.mode.supports_multiple_checks());
        config.set("var-elim", "off").unwrap();
        assert!(!config.var_elim);
        assert!(config.set("var-elim", "maybe").is_err());
    }

    #[test]
    fn params_are_validated() {
        let mut params = SearchParams::default();
        params.set("max-instances", "10").unwrap();
        assert_eq!(params.max_instances, 10);
        assert!(matches!(
            params.set("max-instances", "0"),
            Err(VsError::InvalidParameterValue { .. })
        ));
        assert_eq!(params.max_instances, 10);
        assert!(matches!(params.set("nope", "1"), Err(VsError::UnknownParameter(_))));

        let params = SearchParams::from_toml_str("restart-factor = 2.0").unwrap();
        assert_eq!(params.restart_factor, 2.0);
        assert_eq!(params.restart_threshold, 50);
        assert!(SearchParams::from_toml_str("var-decay = 1.5").is_err());
    }
}
