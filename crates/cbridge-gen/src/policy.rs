//! Project-level policy for generated modules.
//!
//! Unmappable symbols and raw enumerations are always legal output; a policy
//! can turn either into a hard failure so a binding cannot silently grow an
//! unsafe surface.

use serde::{Deserialize, Serialize};

use crate::classify::{Classification, Representation};
use crate::emit::GeneratedModule;
use crate::error::{GenError, Result};

/// The `[policy]` section of a binding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Policy {
    /// Whether selected symbols may land in the unsafe surface.
    #[serde(default = "allow")]
    pub allow_unmapped: bool,
    /// Whether enumerations may stay raw integers.
    #[serde(default = "allow")]
    pub allow_raw_enums: bool,
}

fn allow() -> bool {
    true
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_unmapped: true,
            allow_raw_enums: true,
        }
    }
}

impl Policy {
    /// Every violation of the policy, in module order.
    pub fn violations(&self, module: &GeneratedModule, classification: &Classification) -> Vec<String> {
        let mut violations = Vec::new();
        if !self.allow_unmapped {
            violations.extend(
                module
                    .unmappable()
                    .iter()
                    .map(|u| format!("{} `{}` is unmappable: {}", u.kind, u.symbol, u.reason)),
            );
        }
        if !self.allow_raw_enums {
            violations.extend(
                classification
                    .mappings()
                    .iter()
                    .filter(|m| m.representation == Representation::Raw)
                    .map(|m| format!("enumeration `{}` is raw ({})", m.source, m.origin)),
            );
        }
        violations
    }

    /// Check a generated module against the policy.
    pub fn check(&self, module: &GeneratedModule, classification: &Classification) -> Result<()> {
        let violations = self.violations(module, classification);
        if violations.is_empty() {
            return Ok(());
        }
        for v in &violations {
            tracing::error!(violation = %v, "policy violation");
        }
        Err(GenError::PolicyViolation { violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::emit::{emit, EmitOptions};
    use crate::ownership::{HandleTable, OwnershipRules};
    use crate::select::{select, SelectionRule};
    use cbridge_catalog::{Catalog, HeaderOptions, SymbolKind};

    const HEADER: &str = r#"
typedef enum { LEVEL_LOW, LEVEL_HIGH } Level;
int lib_set_level(Level level);
int lib_log(const char *fmt, ...);
"#;

    fn check(policy: &Policy, functions: &str) -> Result<()> {
        let cat = Catalog::parse_str("lib.h", HEADER, &HeaderOptions::new()).unwrap();
        let rules = vec![
            SelectionRule::new(SymbolKind::Type, "*").unwrap(),
            SelectionRule::new(SymbolKind::Function, functions).unwrap(),
        ];
        let sel = select(&cat, &rules);
        let classification = classify(&cat, &sel, &[], None).unwrap();
        let ownership = OwnershipRules::default();
        let handles = HandleTable::build(&cat, &sel, &ownership, &[]).unwrap();
        let options = EmitOptions {
            library: "lib".into(),
            ..Default::default()
        };
        let module = emit(&cat, &sel, &classification, &handles, &ownership, &options).unwrap();
        policy.check(&module, &classification)
    }

    #[test]
    fn default_policy_allows_everything() {
        assert!(check(&Policy::default(), "lib_").is_ok());
    }

    #[test]
    fn deny_unmapped() {
        let policy = Policy {
            allow_unmapped: false,
            ..Default::default()
        };
        let err = check(&policy, "lib_").unwrap_err();
        let GenError::PolicyViolation { violations } = &err else {
            panic!("expected a policy violation, got {err}");
        };
        assert!(violations.iter().any(|v| v.contains("`lib_log` is unmappable: variadic")));
    }

    #[test]
    fn deny_raw_enums() {
        let policy = Policy {
            allow_raw_enums: false,
            ..Default::default()
        };
        let err = check(&policy, "lib_set").unwrap_err();
        assert!(err.to_string().contains("enumeration `Level` is raw (no directive)"));
    }

    #[test]
    fn policy_from_toml() {
        let policy: Policy = toml::from_str("allow-raw-enums = false").unwrap();
        assert!(policy.allow_unmapped);
        assert!(!policy.allow_raw_enums);
    }
}
