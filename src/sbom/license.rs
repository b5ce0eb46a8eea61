//! License expressions as they appear in generated documents.
//!
//! Installed databases carry whatever the packager wrote. Only strings the
//! `spdx` crate accepts as strict SPDX expressions are emitted as
//! expressions; anything else is reported as `NOASSERTION` (SPDX) or as a
//! named license (CycloneDX).

/// SPDX placeholder for unknown values.
pub const NOASSERTION: &str = "NOASSERTION";

/// Whether `expr` is a strict SPDX license expression.
#[must_use]
pub fn is_valid_expression(expr: &str) -> bool {
    let expr = expr.trim();
    if expr.is_empty() || expr.contains(NOASSERTION) || expr.contains("NONE") {
        return false;
    }
    spdx::Expression::parse_mode(expr, spdx::ParseMode::STRICT).is_ok()
}

/// The SPDX `licenseDeclared` value for a raw license string.
#[must_use]
pub fn declared_license(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(expr) if is_valid_expression(expr) => expr.to_string(),
        _ => NOASSERTION.to_string(),
    }
}
