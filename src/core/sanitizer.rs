//! Static security scan of formula text
//!
//! The sanitizer never rewrites a detected threat away; it normalizes the
//! leading `=` and reports. Callers decide whether warnings are fatal, see
//! [`SanitizedFormula::enforce`].

use crate::error::{GuardError, GuardResult};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Formulas longer than this (in characters) draw a length warning
pub const MAX_FORMULA_LENGTH: usize = 8000;

/// Parenthesis depth / imbalance above this draws a nesting warning
pub const MAX_FORMULA_NESTING: usize = 64;

/// What kind of risk a warning describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCategory {
    NetworkAccess,
    Phishing,
    ExternalExecution,
    ExternalReference,
    DangerousCombination,
    Length,
    Nesting,
}

/// One finding of a sanitize pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub category: WarningCategory,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A row of the threat table: a case-insensitive pattern and the warning it raises
#[derive(Debug, Clone, Copy)]
pub struct ThreatSignature {
    pub category: WarningCategory,
    pub pattern: &'static str,
    pub message: &'static str,
}

/// Built-in threat table
pub const THREAT_SIGNATURES: &[ThreatSignature] = &[
    ThreatSignature {
        category: WarningCategory::NetworkAccess,
        pattern: r"\bWEBSERVICE\s*\(",
        message: "WEBSERVICE function (network access)",
    },
    ThreatSignature {
        category: WarningCategory::Phishing,
        pattern: r"\bHYPERLINK\s*\(",
        message: "HYPERLINK function (potential phishing)",
    },
    ThreatSignature {
        category: WarningCategory::ExternalExecution,
        pattern: r"\bCALL\s*\(",
        message: "CALL function (external DLL execution)",
    },
    ThreatSignature {
        category: WarningCategory::ExternalExecution,
        pattern: r"\bREGISTER\.ID\s*\(",
        message: "REGISTER.ID function (external DLL registration)",
    },
    ThreatSignature {
        category: WarningCategory::ExternalExecution,
        pattern: r"\w+\|'[^']*'!",
        message: "DDE command invocation (external program execution)",
    },
    ThreatSignature {
        category: WarningCategory::ExternalReference,
        pattern: r"\[[\w\s]+\.xl",
        message: "External workbook reference",
    },
    ThreatSignature {
        category: WarningCategory::DangerousCombination,
        pattern: r"\bINDIRECT\s*\(.*HYPERLINK",
        message: "INDIRECT+HYPERLINK combination (security risk)",
    },
];

/// Result of a sanitize pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedFormula {
    /// Formula text, always starting with `=`
    pub formula: String,
    pub warnings: Vec<Warning>,
}

impl SanitizedFormula {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Warning messages in detection order
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.message.clone()).collect()
    }

    /// Apply the write policy: any warning is fatal unless dangerous
    /// operations are explicitly allowed.
    pub fn enforce(self, allow_dangerous: bool) -> GuardResult<Self> {
        if !self.warnings.is_empty() && !allow_dangerous {
            return Err(GuardError::SecurityRejected {
                warnings: self.warning_messages(),
            });
        }
        Ok(self)
    }
}

/// Pattern scanner over a table of threat signatures
pub struct FormulaSanitizer {
    signatures: Vec<(Regex, ThreatSignature)>,
}

impl Default for FormulaSanitizer {
    fn default() -> Self {
        let mut sanitizer = Self {
            signatures: Vec::with_capacity(THREAT_SIGNATURES.len()),
        };
        for signature in THREAT_SIGNATURES {
            // Built-in patterns are covered by test_builtin_signatures_compile
            let _ = sanitizer.add_signature(*signature);
        }
        sanitizer
    }
}

impl FormulaSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scanner with no signatures; length and nesting checks still apply
    pub fn empty() -> Self {
        Self {
            signatures: Vec::new(),
        }
    }

    /// Add a row to the threat table
    pub fn add_signature(&mut self, signature: ThreatSignature) -> GuardResult<()> {
        let regex = Regex::new(&format!("(?i){}", signature.pattern)).map_err(|e| {
            GuardError::Formula(format!(
                "Invalid threat pattern '{}': {}",
                signature.pattern, e
            ))
        })?;
        self.signatures.push((regex, signature));
        Ok(())
    }

    pub fn with_signature(mut self, signature: ThreatSignature) -> GuardResult<Self> {
        self.add_signature(signature)?;
        Ok(self)
    }

    /// Normalize `formula` and report every threat, length and nesting anomaly
    pub fn sanitize(&self, formula: &str) -> SanitizedFormula {
        let formula = if formula.starts_with('=') {
            formula.to_string()
        } else {
            format!("={}", formula)
        };

        let mut warnings: Vec<Warning> = self
            .signatures
            .iter()
            .filter(|(regex, _)| regex.is_match(&formula))
            .map(|(_, sig)| Warning {
                category: sig.category,
                message: sig.message.to_string(),
            })
            .collect();

        let length = formula.chars().count();
        if length > MAX_FORMULA_LENGTH {
            warnings.push(Warning {
                category: WarningCategory::Length,
                message: format!("Formula exceeds recommended length ({} chars)", length),
            });
        }

        let nesting = ParenStats::measure(&formula);
        if let Some(depth) = nesting.suspicious_depth() {
            warnings.push(Warning {
                category: WarningCategory::Nesting,
                message: format!("Formula nesting depth suspicious ({})", depth),
            });
        }

        SanitizedFormula { formula, warnings }
    }
}

/// Parenthesis statistics outside string literals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParenStats {
    /// Deepest running depth reached
    max_depth: usize,
    /// `(` count minus `)` count
    net: i64,
}

impl ParenStats {
    fn measure(formula: &str) -> Self {
        let mut in_string = false;
        let mut depth: i64 = 0;
        let mut max_depth: i64 = 0;
        for c in formula.chars() {
            match c {
                // "" inside a literal toggles twice, which leaves us inside it
                '"' => in_string = !in_string,
                '(' if !in_string => {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                }
                ')' if !in_string => depth -= 1,
                _ => {}
            }
        }
        Self {
            max_depth: max_depth as usize,
            net: depth,
        }
    }

    /// The offending figure when either the real depth or the net imbalance is too large
    fn suspicious_depth(&self) -> Option<i64> {
        if self.max_depth > MAX_FORMULA_NESTING {
            Some(self.max_depth as i64)
        } else if self.net.unsigned_abs() as usize > MAX_FORMULA_NESTING {
            Some(self.net)
        } else {
            None
        }
    }
}

fn shared() -> &'static FormulaSanitizer {
    static SANITIZER: OnceLock<FormulaSanitizer> = OnceLock::new();
    SANITIZER.get_or_init(FormulaSanitizer::default)
}

/// Sanitize with the built-in threat table.
///
/// Returns the normalized formula and its warnings. With `allow_dangerous`
/// false the caller is expected to reject any warning; use
/// [`sanitize_checked`] to get that policy applied.
pub fn sanitize(formula: &str, allow_dangerous: bool) -> SanitizedFormula {
    let result = shared().sanitize(formula);
    if !result.warnings.is_empty() {
        tracing::debug!(
            formula = %result.formula,
            allow_dangerous,
            warnings = result.warnings.len(),
            "formula raised security warnings"
        );
    }
    result
}

/// Sanitize and apply the write policy in one step
pub fn sanitize_checked(formula: &str, allow_dangerous: bool) -> GuardResult<SanitizedFormula> {
    sanitize(formula, allow_dangerous).enforce(allow_dangerous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_signatures_compile() {
        let sanitizer = FormulaSanitizer::default();
        assert_eq!(sanitizer.signatures.len(), THREAT_SIGNATURES.len());
    }

    #[test]
    fn test_prepends_equals() {
        let result = sanitize("SUM(A1:A10)", false);
        assert_eq!(result.formula, "=SUM(A1:A10)");
        assert!(result.is_clean());

        let kept = sanitize("=A1+B1", false);
        assert_eq!(kept.formula, "=A1+B1");
    }

    #[test]
    fn test_webservice_is_network_access() {
        let result = sanitize("=WEBSERVICE(\"http://x\")", false);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].category, WarningCategory::NetworkAccess);
        assert!(result.warnings[0].message.contains("network access"));
    }

    #[test]
    fn test_case_insensitive_matching() {
        let result = sanitize("=hyperlink(\"http://evil\", \"click\")", false);
        assert_eq!(result.warnings[0].category, WarningCategory::Phishing);
    }

    #[test]
    fn test_combination_reports_both_rows() {
        let result = sanitize("=INDIRECT(A1)&HYPERLINK(B1)", false);
        let categories: Vec<WarningCategory> =
            result.warnings.iter().map(|w| w.category).collect();
        assert_eq!(
            categories,
            vec![WarningCategory::Phishing, WarningCategory::DangerousCombination]
        );
    }

    #[test]
    fn test_external_workbook_and_dde() {
        let external = sanitize("=[Budget 2024.xlsx]Sheet1!A1", false);
        assert_eq!(
            external.warnings[0].category,
            WarningCategory::ExternalReference
        );

        let dde = sanitize("=cmd|'/c calc'!A0", false);
        assert_eq!(dde.warnings[0].category, WarningCategory::ExternalExecution);
    }

    #[test]
    fn test_call_needs_word_boundary() {
        assert!(sanitize("=CALL(\"user32\")", false)
            .warnings
            .iter()
            .any(|w| w.category == WarningCategory::ExternalExecution));
        assert!(sanitize("=MYRECALL(1)", false).is_clean());
    }

    #[test]
    fn test_length_warning_is_not_fatal_to_scan() {
        let long = format!("={}", "1+".repeat(4100)) + "1";
        let result = sanitize(&long, true);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].category, WarningCategory::Length);
        assert_eq!(result.formula, long);
    }

    #[test]
    fn test_nesting_by_net_imbalance() {
        let formula = format!("={}1", "(".repeat(65));
        let result = sanitize(&formula, false);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message == "Formula nesting depth suspicious (65)"));
    }

    #[test]
    fn test_nesting_by_true_depth() {
        // Balanced, so the net count alone would miss it
        let formula = format!("={}1{}", "(".repeat(70), ")".repeat(70));
        let result = sanitize(&formula, false);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].category, WarningCategory::Nesting);
        assert!(result.warnings[0].message.contains("(70)"));
    }

    #[test]
    fn test_parens_inside_strings_ignored() {
        let formula = format!("=LEN(\"{}\")", "(".repeat(100));
        assert!(sanitize(&formula, false).is_clean());
    }

    #[test]
    fn test_enforce_policy() {
        let rejected = sanitize_checked("=WEBSERVICE(\"http://x\")", false);
        match rejected {
            Err(GuardError::SecurityRejected { warnings }) => {
                assert_eq!(warnings, vec!["WEBSERVICE function (network access)"]);
            }
            other => panic!("expected SecurityRejected, got {:?}", other),
        }

        let allowed = sanitize_checked("=WEBSERVICE(\"http://x\")", true).unwrap();
        assert_eq!(allowed.warnings.len(), 1);
    }

    #[test]
    fn test_custom_signature_row() {
        let sanitizer = FormulaSanitizer::empty()
            .with_signature(ThreatSignature {
                category: WarningCategory::NetworkAccess,
                pattern: r"\bFILTERXML\s*\(",
                message: "FILTERXML function (network payload parsing)",
            })
            .unwrap();
        assert!(sanitizer.sanitize("=WEBSERVICE(A1)").is_clean());
        assert_eq!(sanitizer.sanitize("=filterxml(A1,\"//x\")").warnings.len(), 1);
    }

    #[test]
    fn test_invalid_custom_pattern_is_error() {
        let result = FormulaSanitizer::empty().add_signature(ThreatSignature {
            category: WarningCategory::Phishing,
            pattern: r"(unclosed",
            message: "broken",
        });
        assert!(matches!(result, Err(GuardError::Formula(_))));
    }
}
