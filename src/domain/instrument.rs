//! Instrument specifications, tick rounding and alias canonicalisation.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};

use super::error::DomainError;
use super::id::Instrument;

/// Trading parameters for one canonical instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSpec {
    instrument: Instrument,
    tick_size: Decimal,
    target_points: Decimal,
    max_stop_points: Decimal,
}

impl InstrumentSpec {
    /// Create a validated spec.
    pub fn try_new(
        symbol: &str,
        tick_size: Decimal,
        target_points: Decimal,
        max_stop_points: Decimal,
    ) -> Result<Self, DomainError> {
        if tick_size <= Decimal::ZERO {
            return Err(DomainError::NonPositiveTickSize { tick_size });
        }
        if target_points <= Decimal::ZERO {
            return Err(DomainError::NonPositiveTarget {
                points: target_points,
            });
        }
        Ok(Self {
            instrument: Instrument::new(symbol.trim().to_ascii_uppercase()),
            tick_size,
            target_points,
            max_stop_points,
        })
    }

    #[must_use]
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    #[must_use]
    pub const fn tick_size(&self) -> Decimal {
        self.tick_size
    }

    #[must_use]
    pub const fn target_points(&self) -> Decimal {
        self.target_points
    }

    /// Cap on the stop distance; zero means "range size only".
    #[must_use]
    pub const fn max_stop_points(&self) -> Decimal {
        self.max_stop_points
    }

    /// Round a price to the nearest tick.
    #[must_use]
    pub fn round(&self, price: Decimal) -> Decimal {
        round_to_tick(price, self.tick_size)
    }
}

/// Round `price` to the nearest multiple of `tick`, midpoints away from zero.
#[must_use]
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    let ticks = (price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (ticks * tick).normalize()
}

/// Known instruments plus the alias table that maps feed symbols onto them.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    specs: HashMap<Instrument, InstrumentSpec>,
    aliases: HashMap<String, Instrument>,
}

impl InstrumentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec and the aliases that resolve to it.
    pub fn register(&mut self, spec: InstrumentSpec, aliases: &[String]) {
        let canonical = spec.instrument().clone();
        for alias in aliases {
            self.aliases
                .insert(alias.trim().to_ascii_uppercase(), canonical.clone());
        }
        self.aliases
            .insert(canonical.as_str().to_string(), canonical.clone());
        self.specs.insert(canonical, spec);
    }

    /// Map a raw feed or timetable symbol to its canonical instrument.
    ///
    /// Contract suffixes (`"MES 03-25"`) are dropped before the alias lookup.
    /// Unknown symbols are returned upper-cased so they still compare stably.
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> Instrument {
        let root = raw
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        self.aliases
            .get(&root)
            .cloned()
            .unwrap_or_else(|| Instrument::new(root))
    }

    #[must_use]
    pub fn spec(&self, instrument: &Instrument) -> Option<&InstrumentSpec> {
        self.specs.get(instrument)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn registry() -> InstrumentRegistry {
        let mut registry = InstrumentRegistry::new();
        registry.register(
            InstrumentSpec::try_new("ES", dec!(0.25), dec!(4), dec!(12)).unwrap(),
            &["MES".to_string()],
        );
        registry
    }

    #[test]
    fn micro_alias_collapses_to_canonical() {
        let registry = registry();
        assert_eq!(registry.canonicalize("MES"), Instrument::from("ES"));
        assert_eq!(registry.canonicalize("mes 03-25"), Instrument::from("ES"));
        assert_eq!(registry.canonicalize("ES"), Instrument::from("ES"));
    }

    #[test]
    fn unknown_symbol_is_uppercased() {
        assert_eq!(registry().canonicalize("cl"), Instrument::from("CL"));
    }

    #[test]
    fn rounds_to_nearest_tick() {
        assert_eq!(round_to_tick(dec!(100.30), dec!(0.25)), dec!(100.25));
        assert_eq!(round_to_tick(dec!(100.125), dec!(0.25)), dec!(100.25));
        assert_eq!(round_to_tick(dec!(100.10), dec!(0.25)), dec!(100));
    }

    #[test]
    fn rejects_zero_tick() {
        assert!(InstrumentSpec::try_new("ES", dec!(0), dec!(4), dec!(12)).is_err());
    }
}
