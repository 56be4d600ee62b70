use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::models::TokenVector;

/// Sentinel model id emitted by the assistant for synthesized turns; costs
/// nothing regardless of token counts.
pub const SYNTHETIC_MODEL: &str = "<synthetic>";

/// Canonical pricing category a model identifier resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelCategory {
    Opus,
    Sonnet,
    Haiku,
}

/// Per-category rates in US dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    /// Price per million input (prompt) tokens.
    pub input: f64,
    /// Price per million output (completion) tokens.
    pub output: f64,
    /// Price per million cache-creation tokens.
    pub cache_creation: f64,
    /// Price per million cache-read tokens.
    pub cache_read: f64,
}

impl ModelRates {
    /// Rates with cache pricing derived from the input rate: cache creation
    /// at 1.25x input, cache read at 0.1x input.
    fn with_default_cache(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            cache_creation: input * 1.25,
            cache_read: input * 0.1,
        }
    }

    fn new(input: f64, output: f64, cache_creation: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_creation,
            cache_read,
        }
    }
}

/// Normalize a raw model identifier for table lookup.
///
/// Lowercases, trims, then strips a trailing `-YYYYMMDD` release date and a
/// trailing `-N-M` version suffix:
///
/// ```
/// use scope_core::pricing::normalize_model;
///
/// assert_eq!(normalize_model("claude-3-5-sonnet-20241022"), "claude-3-5-sonnet");
/// assert_eq!(normalize_model(" Claude-Opus-4-20250514 "), "claude-opus-4");
/// assert_eq!(normalize_model("claude-sonnet-4-5"), "claude-sonnet");
/// ```
pub fn normalize_model(raw: &str) -> String {
    let mut name = raw.trim().to_lowercase();

    if let Some(stripped) = strip_numeric_suffix(&name, 8) {
        name = stripped.to_string();
    }
    if let Some(stripped) = strip_version_suffix(&name) {
        name = stripped.to_string();
    }
    name
}

/// Strip a trailing `-<digits>` segment of exactly `digits` digits.
fn strip_numeric_suffix(s: &str, digits: usize) -> Option<&str> {
    let (head, tail) = s.rsplit_once('-')?;
    if tail.len() == digits && tail.bytes().all(|b| b.is_ascii_digit()) {
        Some(head)
    } else {
        None
    }
}

/// Strip a trailing `-N-M` version suffix where both segments are all digits.
fn strip_version_suffix(s: &str) -> Option<&str> {
    let (head, minor) = s.rsplit_once('-')?;
    if minor.is_empty() || !minor.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (head, major) = head.rsplit_once('-')?;
    if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(head)
}

/// Immutable map from model identifier to per-million rates.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<ModelCategory, ModelRates>,
    known: HashMap<&'static str, ModelCategory>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            ModelCategory::Opus,
            ModelRates::with_default_cache(15.0, 75.0),
        );
        rates.insert(
            ModelCategory::Sonnet,
            ModelRates::with_default_cache(3.0, 15.0),
        );
        // Haiku cache rates are published explicitly and do not follow the
        // 1.25x / 0.1x derivation.
        rates.insert(ModelCategory::Haiku, ModelRates::new(0.25, 1.25, 0.30, 0.03));

        let known: HashMap<&'static str, ModelCategory> = [
            ("claude-3-opus", ModelCategory::Opus),
            ("claude-3-sonnet", ModelCategory::Sonnet),
            ("claude-3-5-sonnet", ModelCategory::Sonnet),
            ("claude-3-7-sonnet", ModelCategory::Sonnet),
            ("claude-3-haiku", ModelCategory::Haiku),
            ("claude-3-5-haiku", ModelCategory::Haiku),
            ("claude-opus-4", ModelCategory::Opus),
            ("claude-sonnet-4", ModelCategory::Sonnet),
            ("claude-haiku-4", ModelCategory::Haiku),
            ("claude-opus", ModelCategory::Opus),
            ("claude-sonnet", ModelCategory::Sonnet),
            ("claude-haiku", ModelCategory::Haiku),
        ]
        .into_iter()
        .collect();

        Self { rates, known }
    }
}

impl PricingTable {
    /// Resolve a raw model identifier to a category.
    ///
    /// Lookup order: normalized name in the known-identifier table, then
    /// substring inference (`opus` / `haiku` / `sonnet`). Returns `None` when
    /// nothing matches; the caller decides between sonnet fallback and
    /// [`EngineError::UnknownModel`].
    pub fn category_for(&self, model: &str) -> Option<ModelCategory> {
        let normalized = normalize_model(model);
        if let Some(&cat) = self.known.get(normalized.as_str()) {
            return Some(cat);
        }
        if normalized.contains("opus") {
            return Some(ModelCategory::Opus);
        }
        if normalized.contains("haiku") {
            return Some(ModelCategory::Haiku);
        }
        if normalized.contains("sonnet") {
            return Some(ModelCategory::Sonnet);
        }
        None
    }

    /// Rates for a category. Every category has an entry.
    pub fn rates(&self, category: ModelCategory) -> ModelRates {
        self.rates[&category]
    }
}

/// Memoization key: the model string plus all four token counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CostKey {
    model: String,
    input: u64,
    output: u64,
    cache_creation: u64,
    cache_read: u64,
}

/// Computes USD cost from token counts at micro-precision, memoizing results
/// per `(model, token-vector)` tuple.
pub struct CostCalculator {
    table: PricingTable,
    /// When `true`, a model that resolves to no category fails the call
    /// instead of falling back to sonnet rates.
    strict: bool,
    memo: HashMap<CostKey, f64>,
}

impl CostCalculator {
    pub fn new(table: PricingTable, strict: bool) -> Self {
        Self {
            table,
            strict,
            memo: HashMap::new(),
        }
    }

    /// Cost in USD for one call of `model` with the given token counts,
    /// rounded half-away-from-zero to six decimal places.
    pub fn cost(&mut self, model: &str, tokens: &TokenVector) -> Result<f64> {
        if model == SYNTHETIC_MODEL {
            return Ok(0.0);
        }

        let key = CostKey {
            model: model.to_string(),
            input: tokens.input,
            output: tokens.output,
            cache_creation: tokens.cache_creation,
            cache_read: tokens.cache_read,
        };
        if let Some(&cached) = self.memo.get(&key) {
            return Ok(cached);
        }

        let category = match self.table.category_for(model) {
            Some(cat) => cat,
            None if self.strict => return Err(EngineError::UnknownModel(model.to_string())),
            None => ModelCategory::Sonnet,
        };
        let rates = self.table.rates(category);

        const PER_M: f64 = 1_000_000.0;
        let cost = (tokens.input as f64 / PER_M) * rates.input
            + (tokens.output as f64 / PER_M) * rates.output
            + (tokens.cache_creation as f64 / PER_M) * rates.cache_creation
            + (tokens.cache_read as f64 / PER_M) * rates.cache_read;

        // Micro-precision: f64::round is half-away-from-zero.
        let rounded = (cost * 1_000_000.0).round() / 1_000_000.0;

        self.memo.insert(key, rounded);
        Ok(rounded)
    }

    /// Number of memoized cost entries. Exposed for tests.
    #[cfg(test)]
    fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(input: u64, output: u64, cc: u64, cr: u64) -> TokenVector {
        TokenVector {
            input,
            output,
            cache_creation: cc,
            cache_read: cr,
        }
    }

    fn calc() -> CostCalculator {
        CostCalculator::new(PricingTable::default(), false)
    }

    // ── normalize_model ──────────────────────────────────────────────────────

    #[test]
    fn test_normalize_strips_date_suffix() {
        assert_eq!(
            normalize_model("claude-3-5-sonnet-20241022"),
            "claude-3-5-sonnet"
        );
        assert_eq!(normalize_model("claude-3-opus-20240229"), "claude-3-opus");
    }

    #[test]
    fn test_normalize_strips_date_then_version() {
        // Date comes off first, then the remaining -N-M version pair.
        assert_eq!(normalize_model("claude-opus-4-1-20250805"), "claude-opus");
        assert_eq!(normalize_model("claude-sonnet-4-5"), "claude-sonnet");
    }

    #[test]
    fn test_normalize_lowercases_and_trims() {
        assert_eq!(normalize_model("  Claude-3-OPUS  "), "claude-3-opus");
    }

    #[test]
    fn test_normalize_leaves_plain_names_alone() {
        assert_eq!(normalize_model("claude-3-5-sonnet"), "claude-3-5-sonnet");
        assert_eq!(normalize_model("gpt-4"), "gpt-4");
    }

    #[test]
    fn test_normalize_keeps_single_trailing_number() {
        // A single -N segment is neither a date nor an -N-M version pair.
        assert_eq!(normalize_model("claude-sonnet-4"), "claude-sonnet-4");
    }

    // ── category resolution ──────────────────────────────────────────────────

    #[test]
    fn test_category_known_identifiers() {
        let table = PricingTable::default();
        assert_eq!(
            table.category_for("claude-3-opus-20240229"),
            Some(ModelCategory::Opus)
        );
        assert_eq!(
            table.category_for("claude-sonnet-4-20250514"),
            Some(ModelCategory::Sonnet)
        );
        assert_eq!(
            table.category_for("claude-3-5-haiku-20241022"),
            Some(ModelCategory::Haiku)
        );
    }

    #[test]
    fn test_category_substring_inference() {
        let table = PricingTable::default();
        assert_eq!(
            table.category_for("experimental-opus-preview"),
            Some(ModelCategory::Opus)
        );
        assert_eq!(
            table.category_for("some-haiku-variant"),
            Some(ModelCategory::Haiku)
        );
        assert_eq!(
            table.category_for("future-sonnet-thing"),
            Some(ModelCategory::Sonnet)
        );
    }

    #[test]
    fn test_category_unknown_is_none() {
        let table = PricingTable::default();
        assert_eq!(table.category_for("gpt-4"), None);
        assert_eq!(table.category_for("unknown"), None);
    }

    // ── cost computation ─────────────────────────────────────────────────────

    #[test]
    fn test_sonnet_cost_with_cache() {
        // (1000*3 + 500*15 + 200*3.75 + 100*0.30) / 1e6 = 0.011280
        let mut c = calc();
        let cost = c.cost("claude-3-5-sonnet", &tv(1_000, 500, 200, 100)).unwrap();
        assert_eq!(cost, 0.011280);
    }

    #[test]
    fn test_opus_cost_with_cache() {
        // (2000*15 + 1000*75 + 500*18.75 + 200*1.50) / 1e6 = 0.114675
        let mut c = calc();
        let cost = c.cost("claude-3-opus", &tv(2_000, 1_000, 500, 200)).unwrap();
        assert_eq!(cost, 0.114675);
    }

    #[test]
    fn test_haiku_published_cache_rates() {
        let mut c = calc();
        // 1M cache-creation at 0.30 plus 1M cache-read at 0.03.
        let cost = c
            .cost("claude-3-haiku", &tv(0, 0, 1_000_000, 1_000_000))
            .unwrap();
        assert!((cost - 0.33).abs() < 1e-9, "haiku cache cost = {cost}");
    }

    #[test]
    fn test_synthetic_model_is_free() {
        let mut c = calc();
        let cost = c.cost(SYNTHETIC_MODEL, &tv(1_000_000, 1_000_000, 0, 0)).unwrap();
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_zero_tokens_zero_cost() {
        let mut c = calc();
        assert_eq!(c.cost("claude-3-5-sonnet", &tv(0, 0, 0, 0)).unwrap(), 0.0);
    }

    #[test]
    fn test_unknown_model_non_strict_uses_sonnet() {
        let mut c = calc();
        let unknown = c.cost("gpt-9000", &tv(1_000_000, 1_000_000, 0, 0)).unwrap();
        let sonnet = c
            .cost("claude-3-5-sonnet", &tv(1_000_000, 1_000_000, 0, 0))
            .unwrap();
        assert_eq!(unknown, sonnet);
    }

    #[test]
    fn test_unknown_model_strict_fails() {
        let mut c = CostCalculator::new(PricingTable::default(), true);
        let err = c.cost("gpt-9000", &tv(100, 100, 0, 0)).unwrap_err();
        assert!(matches!(err, EngineError::UnknownModel(m) if m == "gpt-9000"));
    }

    #[test]
    fn test_strict_still_accepts_inferable_models() {
        let mut c = CostCalculator::new(PricingTable::default(), true);
        assert!(c.cost("weird-opus-build", &tv(100, 100, 0, 0)).is_ok());
    }

    #[test]
    fn test_cost_is_memoized() {
        let mut c = calc();
        let a = c.cost("claude-3-5-sonnet", &tv(500_000, 200_000, 0, 0)).unwrap();
        let b = c.cost("claude-3-5-sonnet", &tv(500_000, 200_000, 0, 0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(c.memo_len(), 1);
    }

    #[test]
    fn test_micro_precision_rounding() {
        let mut c = calc();
        // 1 input token at sonnet rates: 3 / 1e6 = 0.000003.
        assert_eq!(c.cost("claude-3-5-sonnet", &tv(1, 0, 0, 0)).unwrap(), 0.000003);
    }

    #[test]
    fn test_cost_linearity() {
        let mut c = calc();
        let v1 = tv(12_345, 6_789, 1_011, 1_213);
        let v2 = tv(98_765, 43_210, 555, 666);
        let lhs = c.cost("claude-3-opus", &(v1 + v2)).unwrap();
        let rhs = c.cost("claude-3-opus", &v1).unwrap() + c.cost("claude-3-opus", &v2).unwrap();
        // Equal up to one ulp at six-decimal precision.
        assert!((lhs - rhs).abs() <= 1.5e-6, "lhs={lhs} rhs={rhs}");
    }
}
