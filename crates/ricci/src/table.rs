//! Declaration table.
//!
//! The table holds every tensor and scalar known to a parse context,
//!     together with its symmetry class and its current component values.
//! It also tracks the order in which names were introduced or last updated;
//!     this order is the symbol list returned to callers.

use crate::ast::Height;
use algebra::Expr;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Sign picked up when moving a component index to its canonical position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
    /// The component vanishes identically, e.g. the diagonal of an antisymmetric tensor.
    Zero,
}

impl Sign {
    fn flip(self) -> Sign {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
            Sign::Zero => Sign::Zero,
        }
    }

    pub fn apply(self, expr: Expr) -> Expr {
        match self {
            Sign::Plus => expr,
            Sign::Minus => expr.neg(),
            Sign::Zero => Expr::zero(),
        }
    }
}

/// Symmetry class of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Symmetry {
    #[default]
    None,
    /// Symmetric under exchange of two slots; the first slot is the smaller one.
    Symmetric(usize, usize),
    /// Antisymmetric under exchange of two slots; the first slot is the smaller one.
    Antisymmetric(usize, usize),
    /// Several pair symmetries at once, as in `sym01_sym23`.
    Chain(Vec<Symmetry>),
    /// Totally antisymmetric Levi-Civita symbol.
    Permutation,
    /// Kronecker delta.
    Kronecker,
    /// Metric tensor.
    Metric,
    /// Constant scalar.
    Const,
}

impl Symmetry {
    /// Parses a symmetry modifier like `nosym`, `sym01`, `anti12` or `sym01_anti23`.
    ///
    /// Returns `None` if the modifier is not a symmetry modifier.
    pub fn from_modifier(modifier: &str) -> Option<Symmetry> {
        match modifier {
            "nosym" => return Some(Symmetry::None),
            "permutation" => return Some(Symmetry::Permutation),
            "kronecker" => return Some(Symmetry::Kronecker),
            "metric" => return Some(Symmetry::Metric),
            "const" => return Some(Symmetry::Const),
            _ => {}
        }
        let mut pairs = vec![];
        for part in modifier.split('_') {
            let (anti, digits) = if let Some(digits) = part.strip_prefix("sym") {
                (false, digits)
            } else if let Some(digits) = part.strip_prefix("anti") {
                (true, digits)
            } else {
                return None;
            };
            let slots: Vec<usize> = digits
                .chars()
                .map(|c| c.to_digit(10).map(|d| d as usize))
                .collect::<Option<_>>()?;
            let [i, j] = slots[..] else {
                return None;
            };
            if i == j {
                return None;
            }
            let (i, j) = (i.min(j), i.max(j));
            pairs.push(if anti {
                Symmetry::Antisymmetric(i, j)
            } else {
                Symmetry::Symmetric(i, j)
            });
        }
        Some(if pairs.len() == 1 {
            pairs.swap_remove(0)
        } else {
            Symmetry::Chain(pairs)
        })
    }

    /// The pair symmetries as `(i, j, antisymmetric)` triples.
    pub fn pairs(&self) -> Vec<(usize, usize, bool)> {
        match self {
            Symmetry::Symmetric(i, j) => vec![(*i, *j, false)],
            Symmetry::Antisymmetric(i, j) => vec![(*i, *j, true)],
            Symmetry::Chain(parts) => parts.iter().flat_map(Symmetry::pairs).collect(),
            Symmetry::Metric | Symmetry::Kronecker => vec![(0, 1, false)],
            Symmetry::None | Symmetry::Permutation | Symmetry::Const => vec![],
        }
    }

    /// Builds a symmetry out of pair symmetries.
    pub fn from_pairs(pairs: &[(usize, usize, bool)]) -> Symmetry {
        let mut parts: Vec<Symmetry> = pairs
            .iter()
            .map(|&(i, j, anti)| {
                if anti {
                    Symmetry::Antisymmetric(i, j)
                } else {
                    Symmetry::Symmetric(i, j)
                }
            })
            .collect();
        match parts.len() {
            0 => Symmetry::None,
            1 => parts.swap_remove(0),
            _ => Symmetry::Chain(parts),
        }
    }

    /// Largest slot mentioned by the symmetry, if any.
    pub fn max_slot(&self) -> Option<usize> {
        self.pairs().into_iter().map(|(_, j, _)| j).max()
    }

    /// Moves a component index to its canonical position in place.
    ///
    /// The canonical position is the one with non-decreasing values on every symmetric pair.
    pub fn canonicalize(&self, index: &mut [usize]) -> Sign {
        if *self == Symmetry::Permutation {
            return sort_with_parity(index);
        }
        let pairs = self.pairs();
        let mut sign = Sign::Plus;
        loop {
            let mut changed = false;
            for &(i, j, anti) in &pairs {
                if j >= index.len() {
                    continue;
                }
                if anti && index[i] == index[j] {
                    return Sign::Zero;
                }
                if index[i] > index[j] {
                    index.swap(i, j);
                    if anti {
                        sign = sign.flip();
                    }
                    changed = true;
                }
            }
            if !changed {
                return sign;
            }
        }
    }
}

fn sort_with_parity(index: &mut [usize]) -> Sign {
    let mut sign = Sign::Plus;
    for i in 1..index.len() {
        let mut j = i;
        while j > 0 && index[j - 1] > index[j] {
            index.swap(j - 1, j);
            sign = sign.flip();
            j -= 1;
        }
    }
    if index.windows(2).any(|w| w[0] == w[1]) {
        return Sign::Zero;
    }
    sign
}

/// Largest number of components a single tensor may have.
pub const MAX_COMPONENTS: usize = 1 << 20;

/// Number of components of a tensor, or `None` if it would exceed [`MAX_COMPONENTS`].
pub fn component_count(rank: usize, dimension: usize) -> Option<usize> {
    u32::try_from(rank)
        .ok()
        .and_then(|rank| dimension.checked_pow(rank))
        .filter(|&count| count <= MAX_COMPONENTS)
}

/// All component indices of a tensor with the given rank and dimension, in row-major order.
pub fn all_components(rank: usize, dimension: usize) -> impl Iterator<Item = Vec<usize>> {
    let total = dimension.pow(rank as u32);
    (0..total).map(move |mut n| {
        let mut index = vec![0; rank];
        for slot in (0..rank).rev() {
            index[slot] = n % dimension;
            n /= dimension;
        }
        index
    })
}

/// The canonical component indices of a tensor, in row-major order.
///
/// Components that vanish by symmetry are not included,
///     so a symmetric rank 2 tensor in dimension `n` has `n(n+1)/2` distinct components
///     and an antisymmetric one has `n(n-1)/2`.
pub fn distinct_components(rank: usize, dimension: usize, symmetry: &Symmetry) -> Vec<Vec<usize>> {
    all_components(rank, dimension)
        .filter(|index| {
            let mut canonical = index.clone();
            let sign = symmetry.canonicalize(&mut canonical);
            sign != Sign::Zero && canonical == *index
        })
        .collect()
}

/// Policy for naming the scalar symbol of a tensor component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComponentNaming {
    /// Digits are concatenated (`gUU01`) unless some index can exceed 9,
    ///     in which case they are joined with underscores (`gUU1_10`).
    #[default]
    Auto,
    /// Digits are always joined with underscores (`gUU0_1`).
    Separated,
}

/// The name of the scalar symbol for a component of a tensor.
pub fn component_name(
    tensor: &str,
    index: &[usize],
    dimension: usize,
    naming: ComponentNaming,
) -> String {
    let digits: Vec<String> = index.iter().map(usize::to_string).collect();
    let separator = match naming {
        ComponentNaming::Auto if dimension <= 10 => "",
        _ => "_",
    };
    format!["{tensor}{}", digits.join(separator)]
}

/// Component values of a tensor, stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    rank: usize,
    dimension: usize,
    components: Vec<Expr>,
}

impl TensorValue {
    pub fn zeros(rank: usize, dimension: usize) -> TensorValue {
        TensorValue {
            rank,
            dimension,
            components: vec![Expr::zero(); dimension.pow(rank as u32)],
        }
    }

    pub fn scalar(expr: Expr) -> TensorValue {
        TensorValue {
            rank: 0,
            dimension: 0,
            components: vec![expr],
        }
    }

    /// A tensor whose canonical components are fresh symbols named after the tensor.
    ///
    /// Non-canonical components are the signed canonical symbols
    ///     and components that vanish by symmetry are zero.
    pub fn symbolic(
        name: &str,
        rank: usize,
        dimension: usize,
        symmetry: &Symmetry,
        naming: ComponentNaming,
    ) -> TensorValue {
        if rank == 0 {
            return TensorValue::scalar(Expr::symbol(name));
        }
        let mut value = TensorValue::zeros(rank, dimension);
        for index in all_components(rank, dimension) {
            let mut canonical = index.clone();
            let sign = symmetry.canonicalize(&mut canonical);
            let symbol = Expr::symbol(&component_name(name, &canonical, dimension, naming));
            value.set(&index, sign.apply(symbol));
        }
        value
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn offset(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.rank {
            return None;
        }
        let mut offset = 0;
        for &i in index {
            if i >= self.dimension {
                return None;
            }
            offset = offset * self.dimension + i;
        }
        Some(offset)
    }

    pub fn get(&self, index: &[usize]) -> Option<&Expr> {
        self.offset(index).map(|offset| &self.components[offset])
    }

    /// Sets a component; out of range indices are ignored.
    pub fn set(&mut self, index: &[usize], expr: Expr) {
        if let Some(offset) = self.offset(index) {
            self.components[offset] = expr;
        }
    }

    /// Iterates over `(index, value)` pairs in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<usize>, &Expr)> {
        all_components(self.rank, self.dimension).zip(self.components.iter())
    }

    /// Applies a function to every component.
    pub fn map<F: FnMut(&Expr) -> Expr>(&self, f: F) -> TensorValue {
        TensorValue {
            rank: self.rank,
            dimension: self.dimension,
            components: self.components.iter().map(f).collect(),
        }
    }

    /// Overwrites every non-canonical component with the signed canonical one.
    pub fn fill_aliases(&mut self, symmetry: &Symmetry) {
        for index in all_components(self.rank, self.dimension) {
            let mut canonical = index.clone();
            let sign = symmetry.canonicalize(&mut canonical);
            if sign == Sign::Zero {
                self.set(&index, Expr::zero());
            } else if canonical != index {
                if let Some(value) = self.get(&canonical).cloned() {
                    self.set(&index, sign.apply(value));
                }
            }
        }
    }

    fn write_nested(&self, f: &mut fmt::Formatter<'_>, level: usize, offset: usize) -> fmt::Result {
        if level == self.rank {
            return write!(f, "{}", self.components[offset]);
        }
        let stride = self.dimension.pow((self.rank - level - 1) as u32);
        write!(f, "[")?;
        for i in 0..self.dimension {
            if i > 0 {
                write!(f, ", ")?;
            }
            self.write_nested(f, level + 1, offset + i * stride)?;
        }
        write!(f, "]")
    }
}

/// Nested-bracket rendering: `[[gUU00, gUU01], [gUU01, gUU11]]`.
impl fmt::Display for TensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_nested(f, 0, 0)
    }
}

/// How a table entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Declared with a directive or auto-registered as a scalar.
    Declared,
    /// Computed from an equation or derived from a metric.
    Computed,
    /// The partial derivative tensor of another entry.
    PartialDerivative,
    /// The covariant derivative tensor of another entry in some connection namespace.
    CovariantDerivative(crate::ast::Diacritic),
}

/// An entry in the declaration table.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDecl {
    pub name: String,
    /// Name without the trailing index heights, e.g. `g` for `gDD`.
    pub base: String,
    pub heights: Vec<Height>,
    pub dimension: usize,
    pub symmetry: Symmetry,
    pub value: TensorValue,
    pub origin: Origin,
    /// Changes whenever the value changes.
    pub(crate) id: u64,
    /// The id of whatever this entry was computed from, for cache invalidation.
    pub(crate) source: Option<u64>,
}

impl TensorDecl {
    pub fn new(
        name: impl Into<String>,
        base: impl Into<String>,
        heights: Vec<Height>,
        dimension: usize,
        symmetry: Symmetry,
        value: TensorValue,
        origin: Origin,
    ) -> TensorDecl {
        TensorDecl {
            name: name.into(),
            base: base.into(),
            heights,
            dimension,
            symmetry,
            value,
            origin,
            id: 0,
            source: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.heights.len()
    }

    pub(crate) fn with_source(mut self, source: u64) -> TensorDecl {
        self.source = Some(source);
        self
    }
}

/// The declaration table of a parse context.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: HashMap<String, TensorDecl>,
    order: Vec<String>,
    /// Component symbol name to the owning tensor and canonical component index.
    components: HashMap<String, (String, Vec<usize>)>,
    next_id: u64,
}

impl Table {
    pub fn get(&self, name: &str) -> Option<&TensorDecl> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names in dependency order.
    ///
    /// A name comes after every name whose component symbols its value refers to.
    /// Otherwise names are in the order they were introduced or last updated.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Whether some tensor of positive rank has this base name.
    pub fn is_tensor_base(&self, base: &str) -> bool {
        self.entries
            .values()
            .any(|decl| decl.rank() > 0 && decl.base == base)
    }

    /// The tensor and component index that a component symbol belongs to.
    pub fn component_owner(&self, symbol: &str) -> Option<(&TensorDecl, &[usize])> {
        let (owner, index) = self.components.get(symbol)?;
        Some((self.entries.get(owner)?, index))
    }

    /// Inserts or replaces an entry and moves it to the end of the order.
    ///
    /// Returns the id assigned to the entry.
    pub fn insert(&mut self, mut decl: TensorDecl, naming: ComponentNaming) -> u64 {
        self.next_id += 1;
        decl.id = self.next_id;
        let name = decl.name.clone();
        self.components.retain(|_, (owner, _)| *owner != name);
        if decl.rank() == 0 {
            self.components.insert(name.clone(), (name.clone(), vec![]));
        } else if matches!(decl.origin, Origin::Declared | Origin::PartialDerivative) {
            for index in distinct_components(decl.rank(), decl.dimension, &decl.symmetry) {
                let symbol = component_name(&name, &index, decl.dimension, naming);
                self.components.insert(symbol, (name.clone(), index));
            }
        }
        self.entries.insert(name.clone(), decl);
        self.touch(&name);
        self.next_id
    }

    /// Replaces the value of an entry and moves it to the end of the order.
    pub fn set_value(&mut self, name: &str, value: TensorValue) -> Option<u64> {
        self.next_id += 1;
        let id = self.next_id;
        let decl = self.entries.get_mut(name)?;
        decl.value = value;
        decl.id = id;
        self.touch(name);
        Some(id)
    }

    pub fn set_symmetry(&mut self, name: &str, symmetry: Symmetry) {
        if let Some(decl) = self.entries.get_mut(name) {
            decl.symmetry = symmetry;
        }
    }

    /// Moves a name to the end of the order, followed by every entry that depends on it.
    pub fn touch(&mut self, name: &str) {
        let mut moved = vec![name.to_string()];
        loop {
            let owned: HashSet<&str> = self
                .components
                .iter()
                .filter(|(_, (owner, _))| moved.contains(owner))
                .map(|(symbol, _)| symbol.as_str())
                .collect();
            if owned.is_empty() {
                break;
            }
            let dependents: Vec<String> = self
                .order
                .iter()
                .filter(|n| !moved.contains(*n))
                .filter(|n| {
                    self.entries.get(n.as_str()).is_some_and(|decl| {
                        decl.value.iter().any(|(_, expr)| {
                            expr.symbols()
                                .iter()
                                .any(|symbol| owned.contains(symbol.name()))
                        })
                    })
                })
                .cloned()
                .collect();
            if dependents.is_empty() {
                break;
            }
            moved.extend(dependents);
        }
        let (dependents, mut kept): (Vec<String>, Vec<String>) = std::mem::take(&mut self.order)
            .into_iter()
            .filter(|n| n != name)
            .partition(|n| moved.contains(n));
        kept.push(name.to_string());
        kept.extend(dependents);
        self.order = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! count_tests {
        ( $( ($name: ident, $rank: expr, $dimension: expr, $symmetry: expr, $want: expr), )+ ) => {
            $(
            #[test]
            fn $name() {
                assert_eq!(distinct_components($rank, $dimension, &$symmetry).len(), $want);
            }
            )+
        };
    }

    count_tests!(
        (nosym_rank_2, 2, 4, Symmetry::None, 16),
        (nosym_rank_3, 3, 3, Symmetry::None, 27),
        (sym_rank_2, 2, 4, Symmetry::Symmetric(0, 1), 10),
        (anti_rank_2, 2, 4, Symmetry::Antisymmetric(0, 1), 6),
        (metric, 2, 3, Symmetry::Metric, 6),
        (sym_last_two, 3, 3, Symmetry::Symmetric(1, 2), 18),
        (
            riemann_like,
            4,
            3,
            Symmetry::Chain(vec![Symmetry::Antisymmetric(0, 1), Symmetry::Antisymmetric(2, 3)]),
            9
        ),
        (
            fully_symmetric,
            3,
            3,
            Symmetry::Chain(vec![Symmetry::Symmetric(0, 1), Symmetry::Symmetric(1, 2)]),
            10
        ),
        (levi_civita, 3, 3, Symmetry::Permutation, 1),
        (scalar, 0, 3, Symmetry::Const, 1),
    );

    macro_rules! modifier_tests {
        ( $( ($name: ident, $modifier: expr, $want: expr), )+ ) => {
            $(
            #[test]
            fn $name() {
                assert_eq!(Symmetry::from_modifier($modifier), $want);
            }
            )+
        };
    }

    modifier_tests!(
        (modifier_nosym, "nosym", Some(Symmetry::None)),
        (modifier_sym, "sym01", Some(Symmetry::Symmetric(0, 1))),
        (modifier_reversed, "anti21", Some(Symmetry::Antisymmetric(1, 2))),
        (
            modifier_chain,
            "sym01_anti23",
            Some(Symmetry::Chain(vec![
                Symmetry::Symmetric(0, 1),
                Symmetry::Antisymmetric(2, 3)
            ]))
        ),
        (modifier_same_slot, "sym11", None),
        (modifier_unknown, "diagonal", None),
        (modifier_too_many_digits, "sym012", None),
    );

    #[test]
    fn canonicalize_antisymmetric() {
        let symmetry = Symmetry::Antisymmetric(0, 1);
        let mut index = [2, 1];
        assert_eq!(symmetry.canonicalize(&mut index), Sign::Minus);
        assert_eq!(index, [1, 2]);
        let mut index = [1, 1];
        assert_eq!(symmetry.canonicalize(&mut index), Sign::Zero);
    }

    #[test]
    fn canonicalize_permutation() {
        let mut index = [2, 0, 1];
        assert_eq!(Symmetry::Permutation.canonicalize(&mut index), Sign::Plus);
        let mut index = [1, 0, 2];
        assert_eq!(Symmetry::Permutation.canonicalize(&mut index), Sign::Minus);
        let mut index = [1, 0, 1];
        assert_eq!(Symmetry::Permutation.canonicalize(&mut index), Sign::Zero);
    }

    #[test]
    fn symbolic_metric_display() {
        let value = TensorValue::symbolic("gUU", 2, 2, &Symmetry::Metric, ComponentNaming::Auto);
        assert_eq!(value.to_string(), "[[gUU00, gUU01], [gUU01, gUU11]]");
    }

    #[test]
    fn symbolic_antisymmetric_display() {
        let value = TensorValue::symbolic(
            "FUU",
            2,
            3,
            &Symmetry::Antisymmetric(0, 1),
            ComponentNaming::Auto,
        );
        assert_eq!(
            value.to_string(),
            "[[0, FUU01, FUU02], [-FUU01, 0, FUU12], [-FUU02, -FUU12, 0]]"
        );
    }

    #[test]
    fn component_names() {
        assert_eq!(component_name("gUU", &[0, 1], 4, ComponentNaming::Auto), "gUU01");
        assert_eq!(component_name("gUU", &[1, 10], 11, ComponentNaming::Auto), "gUU1_10");
        assert_eq!(component_name("vU", &[3], 4, ComponentNaming::Separated), "vU3");
        assert_eq!(component_name("gUU", &[0, 1], 4, ComponentNaming::Separated), "gUU0_1");
    }

    #[test]
    fn fill_aliases_copies_canonical_values() {
        let mut value = TensorValue::zeros(2, 2);
        value.set(&[0, 1], Expr::symbol("x"));
        value.fill_aliases(&Symmetry::Antisymmetric(0, 1));
        assert_eq!(value.to_string(), "[[0, x], [-x, 0]]");
    }

    #[test]
    fn table_order_moves_updated_names_to_end() {
        let mut table = Table::default();
        for name in ["a", "b"] {
            table.insert(
                TensorDecl::new(
                    name,
                    name,
                    vec![],
                    3,
                    Symmetry::None,
                    TensorValue::scalar(Expr::symbol(name)),
                    Origin::Declared,
                ),
                ComponentNaming::Auto,
            );
        }
        table.set_value("a", TensorValue::scalar(Expr::one()));
        assert_eq!(table.order(), ["b".to_string(), "a".to_string()]);
    }

    fn define_scalar(table: &mut Table, name: &str, value: Expr) {
        table.insert(
            TensorDecl::new(
                name,
                name,
                vec![],
                3,
                Symmetry::None,
                TensorValue::scalar(value),
                Origin::Declared,
            ),
            ComponentNaming::Auto,
        );
    }

    #[test]
    fn table_order_keeps_dependents_after_updated_names() {
        let mut table = Table::default();
        define_scalar(&mut table, "a", Expr::symbol("a"));
        define_scalar(&mut table, "b", Expr::mul([Expr::integer(2), Expr::symbol("a")]));
        define_scalar(&mut table, "c", Expr::symbol("b"));
        define_scalar(&mut table, "d", Expr::symbol("d"));
        table.set_value("a", TensorValue::scalar(Expr::symbol("a")));
        assert_eq!(table.order(), ["d", "a", "b", "c"]);
    }

    #[test]
    fn component_symbols_are_registered() {
        let mut table = Table::default();
        table.insert(
            TensorDecl::new(
                "gDD",
                "g",
                vec![Height::Lower, Height::Lower],
                3,
                Symmetry::Metric,
                TensorValue::symbolic("gDD", 2, 3, &Symmetry::Metric, ComponentNaming::Auto),
                Origin::Declared,
            ),
            ComponentNaming::Auto,
        );
        let (owner, index) = table.component_owner("gDD12").unwrap();
        assert_eq!(owner.name, "gDD");
        assert_eq!(index, [1, 2]);
        assert!(table.component_owner("gDD21").is_none());
        assert!(table.is_tensor_base("g"));
    }
}
