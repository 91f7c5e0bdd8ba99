//! Attribute value normalization.
//!
//! Raw attribute values arrive as strings in provider units. They are scaled
//! to display units (亿 for revenue and profit, 万 for money flow) and rounded
//! to two decimals. Missing or garbage input reads as `0.0`.

/// Attributes reported in yuan, displayed in 亿 (1e8).
const HUNDRED_MILLION_SCALED: &[&str] = &["营业收入", "净利润"];

/// Attributes reported in yuan, displayed in 万 (1e4).
const TEN_THOUSAND_SCALED: &[&str] = &["大单净额", "陆股通净流入"];

/// Divisor applied to `attribute` before rounding.
pub fn scale_for(attribute: &str) -> f64 {
    if HUNDRED_MILLION_SCALED.contains(&attribute) {
        1e8
    } else if TEN_THOUSAND_SCALED.contains(&attribute) {
        1e4
    } else {
        1.0
    }
}

/// Normalize a raw attribute value to its display number.
pub fn normalize(attribute: &str, raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "None" || trimmed.eq_ignore_ascii_case("nan") {
        return 0.0;
    }
    match trimmed.parse::<f64>() {
        Ok(value) => normalize_number(attribute, value),
        Err(_) => 0.0,
    }
}

/// Normalize an already-parsed number.
pub fn normalize_number(attribute: &str, value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    round2(value / scale_for(attribute))
}

/// Round half away from zero to two decimals.
fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    // avoid "-0.0" in JSON output
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
