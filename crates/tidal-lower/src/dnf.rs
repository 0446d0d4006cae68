/*! Sum-of-products form for drive enable conditions.
 *
 * Desequentialization must decide whether an enable reduces to one clock-edge
 * conjunction. Enables arrive as And/Or/Not/Mux graphs after temporal code
 * motion, so they are normalized into cubes over opaque atoms and simplified
 * until the structure is visible.
 */

use indexmap::IndexSet;
use std::collections::BTreeMap;
use tidal_core::Value;

/// Index into an [`AtomTable`].
pub type AtomId = usize;

/// Interns the leaf values of a condition. The table size is the number of
/// analyzed sub-conditions, which the primitive budget bounds.
#[derive(Debug, Default)]
pub struct AtomTable {
    atoms: IndexSet<Value>,
}

impl AtomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: Value) -> AtomId {
        self.atoms.insert_full(value).0
    }

    pub fn get(&self, id: AtomId) -> &Value {
        &self.atoms[id]
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

/// A conjunction of literals; `true` polarity is the positive literal. An
/// empty cube is the constant true.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cube {
    literals: BTreeMap<AtomId, bool>,
}

impl Cube {
    pub fn top() -> Self {
        Self {
            literals: BTreeMap::new(),
        }
    }

    pub fn literal(atom: AtomId, positive: bool) -> Self {
        let mut literals = BTreeMap::new();
        literals.insert(atom, positive);
        Self { literals }
    }

    pub fn literals(&self) -> impl Iterator<Item = (AtomId, bool)> + '_ {
        self.literals.iter().map(|(&a, &p)| (a, p))
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn polarity(&self, atom: AtomId) -> Option<bool> {
        self.literals.get(&atom).copied()
    }

    /// Conjoin two cubes; None if they contain complementary literals.
    fn merge(&self, other: &Cube) -> Option<Cube> {
        let mut literals = self.literals.clone();
        for (&atom, &pol) in &other.literals {
            match literals.insert(atom, pol) {
                Some(existing) if existing != pol => return None,
                _ => {}
            }
        }
        Some(Cube { literals })
    }

    /// True if every literal of `self` also appears in `other`.
    fn subsumes(&self, other: &Cube) -> bool {
        self.literals
            .iter()
            .all(|(atom, pol)| other.literals.get(atom) == Some(pol))
    }

    /// If the cubes differ in exactly one complemented literal, return the
    /// consensus cube with that literal dropped.
    fn complementary_merge(&self, other: &Cube) -> Option<Cube> {
        if self.literals.len() != other.literals.len() {
            return None;
        }
        let mut differing = None;
        for (atom, pol) in &self.literals {
            match other.literals.get(atom) {
                Some(other_pol) if other_pol == pol => {}
                Some(_) => {
                    if differing.is_some() {
                        return None;
                    }
                    differing = Some(*atom);
                }
                None => return None,
            }
        }
        differing.map(|atom| {
            let mut literals = self.literals.clone();
            literals.remove(&atom);
            Cube { literals }
        })
    }
}

/// Disjunction of cubes. No cubes is the constant false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnf {
    pub cubes: Vec<Cube>,
}

/// Normalization gave up: the cube set outgrew the budget-derived cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeLimitExceeded;

impl Dnf {
    pub const MAX_CUBES: usize = 64;

    pub fn false_() -> Self {
        Self { cubes: Vec::new() }
    }

    pub fn true_() -> Self {
        Self {
            cubes: vec![Cube::top()],
        }
    }

    pub fn literal(atom: AtomId, positive: bool) -> Self {
        Self {
            cubes: vec![Cube::literal(atom, positive)],
        }
    }

    pub fn is_false(&self) -> bool {
        self.cubes.is_empty()
    }

    pub fn is_true(&self) -> bool {
        self.cubes.iter().any(|c| c.is_empty())
    }

    pub fn or(mut self, other: Dnf) -> Result<Dnf, CubeLimitExceeded> {
        self.cubes.extend(other.cubes);
        if self.cubes.len() > Self::MAX_CUBES {
            return Err(CubeLimitExceeded);
        }
        Ok(self)
    }

    pub fn and(self, other: Dnf) -> Result<Dnf, CubeLimitExceeded> {
        let mut cubes = Vec::new();
        for left in &self.cubes {
            for right in &other.cubes {
                if let Some(merged) = left.merge(right) {
                    cubes.push(merged);
                    if cubes.len() > Self::MAX_CUBES {
                        return Err(CubeLimitExceeded);
                    }
                }
            }
        }
        Ok(Dnf { cubes })
    }

    /// Remove duplicate and subsumed cubes, then apply consensus merging of
    /// complementary cube pairs to fixpoint: `a∧x ∨ a∧¬x` becomes `a`.
    pub fn simplify(&mut self) {
        loop {
            self.cubes.sort();
            self.cubes.dedup();

            let mut removed = vec![false; self.cubes.len()];
            for i in 0..self.cubes.len() {
                for j in 0..self.cubes.len() {
                    if i != j && !removed[i] && !removed[j] && self.cubes[i].subsumes(&self.cubes[j])
                    {
                        removed[j] = true;
                    }
                }
            }
            let mut cubes: Vec<Cube> = self
                .cubes
                .iter()
                .zip(&removed)
                .filter(|(_, &r)| !r)
                .map(|(c, _)| c.clone())
                .collect();

            let mut merged_any = false;
            'outer: for i in 0..cubes.len() {
                for j in (i + 1)..cubes.len() {
                    if let Some(consensus) = cubes[i].complementary_merge(&cubes[j]) {
                        cubes.remove(j);
                        cubes.remove(i);
                        cubes.push(consensus);
                        merged_any = true;
                        break 'outer;
                    }
                }
            }

            self.cubes = cubes;
            if !merged_any {
                break;
            }
        }
    }

    /// Specialize under the assumption that every literal of `assumption`
    /// holds: conflicting cubes drop out, agreeing literals are erased.
    pub fn assume(&mut self, assumption: &Cube) {
        self.cubes.retain(|cube| {
            assumption
                .literals()
                .all(|(atom, pol)| cube.polarity(atom) != Some(!pol))
        });
        for cube in &mut self.cubes {
            for (atom, _) in assumption.literals() {
                cube.literals.remove(&atom);
            }
        }
        self.simplify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complementary_cubes_collapse() {
        // e∧s ∨ e∧¬s  →  e
        let e = 0;
        let s = 1;
        let mut dnf = Dnf::literal(e, true)
            .and(Dnf::literal(s, true))
            .unwrap()
            .or(Dnf::literal(e, true).and(Dnf::literal(s, false)).unwrap())
            .unwrap();
        dnf.simplify();
        assert_eq!(dnf.cubes.len(), 1);
        assert_eq!(dnf.cubes[0], Cube::literal(e, true));
    }

    #[test]
    fn contradiction_is_false() {
        let x = 0;
        let dnf = Dnf::literal(x, true).and(Dnf::literal(x, false)).unwrap();
        assert!(dnf.is_false());
    }

    #[test]
    fn subsumed_cube_is_absorbed() {
        // e ∨ e∧s  →  e
        let e = 0;
        let s = 1;
        let mut dnf = Dnf::literal(e, true)
            .or(Dnf::literal(e, true).and(Dnf::literal(s, true)).unwrap())
            .unwrap();
        dnf.simplify();
        assert_eq!(dnf.cubes.len(), 1);
        assert_eq!(dnf.cubes[0], Cube::literal(e, true));
    }

    #[test]
    fn assumption_strips_known_literals() {
        // (new∧¬old∧s) assuming new∧¬old  →  s
        let new = 0;
        let old = 1;
        let s = 2;
        let mut dnf = Dnf::literal(new, true)
            .and(Dnf::literal(old, false))
            .unwrap()
            .and(Dnf::literal(s, true))
            .unwrap();
        let assumption = Cube::literal(new, true).merge(&Cube::literal(old, false)).unwrap();
        dnf.assume(&assumption);
        assert_eq!(dnf.cubes.len(), 1);
        assert_eq!(dnf.cubes[0], Cube::literal(s, true));
    }
}
