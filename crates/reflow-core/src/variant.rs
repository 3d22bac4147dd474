//! Variant/seed generation
//!
//! Every random choice in a document goes through the [`VariantGenerator`].
//! When the product of the static sample spaces found at load fits under the
//! variant cap, variant indices are mapped through a seeded permutation onto
//! distinct combinations, so the first `T` indices give `T` different
//! documents. Otherwise, and for any space not seen at load, draws are
//! hashed from the seed, the effective index and the component's
//! disambiguator.

use crate::hash::{hash_str_with_seed, mix};
use crate::{
    Diagnostic, DiagnosticKind, Diagnostics, EngineConfig, Error, Result, VariantControl,
    VariantRng,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The set of outcomes one component can draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleSpace {
    pub pool: usize,
    pub count: usize,
    pub with_replacement: bool,
}

impl SampleSpace {
    pub fn new(pool: usize, count: usize, with_replacement: bool) -> Self {
        Self {
            pool,
            count,
            with_replacement,
        }
    }

    /// Whether the space can produce picks at all
    pub fn is_valid(&self) -> bool {
        self.with_replacement || self.count <= self.pool
    }

    /// Number of ordered outcomes, if it fits in a u64
    ///
    /// `pool^count` with replacement, `pool! / (pool - count)!` without.
    pub fn size(&self) -> Option<u64> {
        if !self.is_valid() {
            return Some(0);
        }
        let mut size: u64 = 1;
        for k in 0..self.count {
            let factor = if self.with_replacement {
                self.pool
            } else {
                self.pool - k
            };
            size = size.checked_mul(factor as u64)?;
        }
        Some(size)
    }

    /// Map an outcome number in `[0, size)` to its picks
    ///
    /// Mixed radix: base `pool` per pick with replacement, a Lehmer code over
    /// the remaining items without. Distinct outcome numbers give distinct
    /// pick sequences.
    pub fn decode(&self, mut outcome: u64) -> Vec<usize> {
        let mut picks = Vec::with_capacity(self.count);
        if self.pool == 0 {
            return picks;
        }
        if self.with_replacement {
            for _ in 0..self.count {
                picks.push((outcome % self.pool as u64) as usize);
                outcome /= self.pool as u64;
            }
            return picks;
        }
        let mut remaining: Vec<usize> = (0..self.pool).collect();
        for _ in 0..self.count.min(self.pool) {
            let radix = remaining.len() as u64;
            let digit = (outcome % radix) as usize;
            outcome /= radix;
            picks.push(remaining.remove(digit));
        }
        picks
    }
}

/// A sample space found while discovering the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Registered {
    space: SampleSpace,
    size: u64,
    digit: u64,
}

/// Per-engine variant state, immutable after construction
#[derive(Debug, Clone)]
pub struct VariantGenerator {
    requested_index: u64,
    effective_index: u64,
    num_variants: u64,
    unique: bool,
    derived_seed: u64,
    names: Vec<String>,
    registered: IndexMap<String, Registered>,
}

impl VariantGenerator {
    /// Build the generator for one variant
    ///
    /// `spaces` are the static spaces found at load, keyed by disambiguator,
    /// in document order. Inconsistent variant control is reported into
    /// `diagnostics` and repaired.
    pub fn new(
        config: &EngineConfig,
        control: Option<&VariantControl>,
        spaces: Vec<(String, SampleSpace)>,
        requested_index: u64,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        if requested_index == 0 {
            return Err(Error::InvalidVariantIndex(requested_index));
        }
        let default_control = VariantControl::default();
        let control = control.unwrap_or(&default_control);
        let seed = control.seed.unwrap_or(config.document_seed());
        let cap = config.max_variants();

        let mut sized = Vec::with_capacity(spaces.len());
        let mut total: Option<u64> = Some(1);
        for (disambiguator, space) in spaces {
            match space.size() {
                Some(0) => continue,
                Some(size) => {
                    total = total.and_then(|t| t.checked_mul(size));
                    sized.push((disambiguator, space, size));
                }
                None => total = None,
            }
        }

        let wants_unique = control.unique_variants.unwrap_or(config.unique_variants());
        let unique = wants_unique && total.map_or(false, |t| t <= cap);
        let limit = if unique { total.unwrap_or(cap) } else { cap };

        let mut num_variants = match control.num_variants {
            Some(0) => {
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::InvalidVariantSpec,
                    "number of variants must be at least 1",
                    None,
                ));
                1
            }
            Some(n) if n > limit => {
                let message = if unique {
                    format!("requested {} unique variants but only {} exist", n, limit)
                } else {
                    format!("requested {} variants, capped at {}", n, limit)
                };
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::InvalidVariantSpec,
                    message,
                    None,
                ));
                limit
            }
            Some(n) => n,
            None if !control.variant_names.is_empty() => {
                (control.variant_names.len() as u64).min(limit)
            }
            None => limit,
        };
        num_variants = num_variants.max(1);

        let mut names = control.variant_names.clone();
        if !names.is_empty() && names.len() as u64 != num_variants {
            diagnostics.push(Diagnostic::error(
                DiagnosticKind::InvalidVariantSpec,
                format!(
                    "{} variant names given for {} variants",
                    names.len(),
                    num_variants
                ),
                None,
            ));
        }
        names.truncate(num_variants as usize);
        for name in default_variant_names(num_variants as usize) {
            if names.len() as u64 >= num_variants {
                break;
            }
            if !names.contains(&name) {
                names.push(name);
            }
        }
        while (names.len() as u64) < num_variants {
            names.push(format!("variant{}", names.len() + 1));
        }

        let effective_index = (requested_index - 1) % num_variants + 1;
        let derived_seed = mix(seed, effective_index, 0);

        let mut registered = IndexMap::new();
        if unique {
            let combination = permute(effective_index - 1, total.unwrap_or(1), seed);
            let mut rest = combination;
            for (disambiguator, space, size) in sized {
                let digit = rest % size;
                rest /= size;
                registered.insert(disambiguator, Registered { space, size, digit });
            }
        }

        tracing::info!(
            requested_index,
            effective_index,
            num_variants,
            unique,
            "variant selected"
        );

        Ok(Self {
            requested_index,
            effective_index,
            num_variants,
            unique,
            derived_seed,
            names,
            registered,
        })
    }

    /// Index of `[0, space_size)` for one component
    pub fn sample(&self, disambiguator: &str, space_size: u64) -> u64 {
        if space_size == 0 {
            return 0;
        }
        if let Some(r) = self.registered.get(disambiguator) {
            if r.size == space_size {
                return r.digit;
            }
        }
        self.rng_for(disambiguator, space_size, 0).below(space_size)
    }

    /// Picks for one component
    ///
    /// Registered components whose space is unchanged use their enumerated
    /// digit; everything else draws from a hashed stream.
    pub fn pick(&self, disambiguator: &str, space: &SampleSpace) -> Vec<usize> {
        if let Some(r) = self.registered.get(disambiguator) {
            if r.space == *space {
                return space.decode(r.digit);
            }
        }
        let salt = mix(space.count as u64, space.with_replacement as u64, 1);
        match space.size() {
            Some(size) if size > 0 => {
                let outcome = self.rng_for(disambiguator, size, salt).below(size);
                space.decode(outcome)
            }
            _ => self.rng_for(disambiguator, space.pool as u64, salt).pick_indices(
                space.pool,
                space.count,
                space.with_replacement,
            ),
        }
    }

    fn rng_for(&self, disambiguator: &str, size: u64, salt: u64) -> VariantRng {
        let h = hash_str_with_seed(disambiguator, self.derived_seed);
        VariantRng::new(mix(self.derived_seed, h, size ^ salt))
    }

    pub fn requested_index(&self) -> u64 {
        self.requested_index
    }

    /// Requested index folded into `[1, num_variants]`
    pub fn effective_index(&self) -> u64 {
        self.effective_index
    }

    pub fn num_variants(&self) -> u64 {
        self.num_variants
    }

    /// Whether variants are enumerated without repetition
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn variant_name(&self) -> &str {
        self.names
            .get((self.effective_index - 1) as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn all_possible_variants(&self) -> &[String] {
        &self.names
    }
}

/// Seeded bijection on `[0, total)`
///
/// Affine map `x -> (a*x + b) mod total` with `a` coprime to `total`.
fn permute(x: u64, total: u64, seed: u64) -> u64 {
    if total <= 1 {
        return 0;
    }
    let mut a = mix(seed, total, 2) % total;
    if a == 0 {
        a = 1;
    }
    while gcd(a, total) != 1 {
        a = a % total + 1;
    }
    let b = mix(seed, total, 3) % total;
    ((a as u128 * x as u128 + b as u128) % total as u128) as u64
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// `a, b, ..., z, aa, ab, ...`
pub fn default_variant_names(count: usize) -> Vec<String> {
    (0..count).map(letters).collect()
}

fn letters(mut n: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn generator(spaces: Vec<(&str, SampleSpace)>, index: u64) -> VariantGenerator {
        let spaces = spaces
            .into_iter()
            .map(|(d, s)| (d.to_string(), s))
            .collect();
        VariantGenerator::new(
            &EngineConfig::default(),
            None,
            spaces,
            index,
            &mut Diagnostics::new(),
        )
        .expect("generator")
    }

    #[test]
    fn test_space_size() {
        assert_eq!(SampleSpace::new(6, 1, false).size(), Some(6));
        assert_eq!(SampleSpace::new(6, 2, false).size(), Some(30));
        assert_eq!(SampleSpace::new(6, 2, true).size(), Some(36));
        assert_eq!(SampleSpace::new(3, 4, false).size(), Some(0));
        assert_eq!(SampleSpace::new(1000, 10, true).size(), None);
    }

    #[test]
    fn test_decode_is_bijective() {
        for space in [SampleSpace::new(5, 3, false), SampleSpace::new(3, 3, true)] {
            let size = space.size().unwrap_or(0);
            let outcomes: HashSet<Vec<usize>> = (0..size).map(|i| space.decode(i)).collect();
            assert_eq!(outcomes.len() as u64, size);
            for picks in &outcomes {
                assert!(picks.iter().all(|&p| p < space.pool));
                if !space.with_replacement {
                    let distinct: HashSet<_> = picks.iter().collect();
                    assert_eq!(distinct.len(), picks.len());
                }
            }
        }
    }

    #[test]
    fn test_permute_is_bijective() {
        for total in [1u64, 2, 6, 12, 97] {
            let images: HashSet<u64> = (0..total).map(|x| permute(x, total, 99)).collect();
            assert_eq!(images.len() as u64, total);
        }
    }

    #[test]
    fn test_unique_enumeration() {
        let space = SampleSpace::new(6, 1, false);
        let picks: HashSet<Vec<usize>> = (1..=6)
            .map(|i| generator(vec![("s", space)], i).pick("s", &space))
            .collect();
        assert_eq!(picks.len(), 6);
        let first = generator(vec![("s", space)], 1).pick("s", &space);
        assert_eq!(generator(vec![("s", space)], 7).pick("s", &space), first);
    }

    #[test]
    fn test_index_zero_rejected() {
        let result = VariantGenerator::new(
            &EngineConfig::default(),
            None,
            Vec::new(),
            0,
            &mut Diagnostics::new(),
        );
        assert_eq!(result.err(), Some(Error::InvalidVariantIndex(0)));
    }

    #[test]
    fn test_large_space_uses_cap_and_hashing() {
        let space = SampleSpace::new(1000, 1, false);
        let g = generator(vec![("big", space)], 150);
        assert!(!g.is_unique());
        assert_eq!(g.num_variants(), 100);
        assert_eq!(g.effective_index(), 50);
        let again = generator(vec![("big", space)], 50);
        assert_eq!(g.pick("big", &space), again.pick("big", &space));
    }

    #[test]
    fn test_unregistered_draw_is_stable() {
        let g = generator(Vec::new(), 3);
        let a = g.sample("late/0", 10);
        assert_eq!(a, g.sample("late/0", 10));
        assert!(a < 10);
    }

    #[test]
    fn test_names_and_mismatch() {
        assert_eq!(default_variant_names(3), vec!["a", "b", "c"]);
        assert_eq!(letters(26), "aa");
        assert_eq!(letters(27), "ab");

        let control = VariantControl {
            num_variants: Some(3),
            variant_names: vec!["x".into(), "y".into()],
            ..Default::default()
        };
        let mut diags = Diagnostics::new();
        let g = VariantGenerator::new(
            &EngineConfig::default(),
            Some(&control),
            vec![("s".into(), SampleSpace::new(6, 1, false))],
            3,
            &mut diags,
        )
        .expect("generator");
        assert_eq!(g.num_variants(), 3);
        assert_eq!(g.all_possible_variants().len(), 3);
        assert_eq!(g.variant_name(), "a");
        assert_eq!(diags.of_kind(DiagnosticKind::InvalidVariantSpec).count(), 1);
    }

    #[test]
    fn test_unique_count_larger_than_space() {
        let control = VariantControl {
            num_variants: Some(10),
            ..Default::default()
        };
        let mut diags = Diagnostics::new();
        let g = VariantGenerator::new(
            &EngineConfig::default(),
            Some(&control),
            vec![("s".into(), SampleSpace::new(4, 1, false))],
            1,
            &mut diags,
        )
        .expect("generator");
        assert_eq!(g.num_variants(), 4);
        assert!(diags.has_errors());
    }
}
