//! The parse context: declarations, metrics and coordinates that persist across documents.

use crate::ast::{Diacritic, Height, TensorRef};
use crate::connection::Metric;
use crate::covdrv;
use crate::directive;
use crate::error::{Error, ErrorKind, Warning};
use crate::index::{self, Dimensions};
use crate::lower::Evaluator;
use crate::parse;
use crate::suggest;
use crate::table::{
    all_components, component_count, ComponentNaming, Origin, Symmetry, Table, TensorDecl,
    TensorValue, MAX_COMPONENTS,
};
use algebra::Expr;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

/// Configuration of a parse context.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Dimension used when neither a declaration, the coordinates nor a `% dim` directive fixes one.
    pub default_dimension: usize,
    /// Whether re-declaring an existing name with `def` produces a warning.
    pub warn_on_override: bool,
    pub component_naming: ComponentNaming,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_dimension: 3,
            warn_on_override: true,
            component_naming: ComponentNaming::Auto,
        }
    }
}

/// The state shared by all documents parsed in one session.
#[derive(Debug, Clone, Default)]
pub struct Context {
    config: Config,
    table: Table,
    metrics: HashMap<Diacritic, Metric>,
    coordinates: Vec<String>,
    dimension: Option<usize>,
    warnings: Vec<Warning>,
}

impl Context {
    pub fn new(config: Config) -> Context {
        Context {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    pub fn coordinates(&self) -> &[String] {
        &self.coordinates
    }

    /// Parses a document and returns the names defined so far, in order of last update.
    ///
    /// On error the context keeps every declaration made before the failing statement.
    pub fn parse(&mut self, source: &str) -> Result<Vec<String>, Error> {
        directive::run(self, source).map_err(|err| err.with_source(source))?;
        Ok(self.table.order().to_vec())
    }

    /// Parses a single expression with no free indices and returns its value.
    pub fn parse_expr(&mut self, source: &str) -> Result<Expr, Error> {
        self.expression(source)
            .map_err(|err| err.with_source(source))
    }

    fn expression(&mut self, source: &str) -> Result<Expr, Error> {
        let node = parse::parse_expression(source, 0..source.len(), &self.table)?;
        let mut reserved = node.index_names();
        let node = covdrv::expand(self, node, &mut reserved)?;
        let resolved = index::resolve(node, &*self)?;
        if !resolved.free.is_empty() {
            return Err(Error::new(
                ErrorKind::IllFormedEquation {
                    lhs: vec![],
                    rhs: index::describe(&resolved.free),
                },
                0..source.len(),
            ));
        }
        Evaluator::new(self, vec![]).eval(&resolved.node)
    }

    /// The value of a name.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.table.get(name).map(Value::from_decl)
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Converts the context into a document holding every name and its value.
    pub fn into_document(self) -> Document {
        let values = self
            .table
            .order()
            .iter()
            .filter_map(|name| Some((name.clone(), self.get(name)?)))
            .collect();
        Document {
            symbols: self.table.order().to_vec(),
            values,
            warnings: self.warnings,
        }
    }

    pub(crate) fn metric(&self, diacritic: Diacritic) -> Option<&Metric> {
        self.metrics.get(&diacritic)
    }

    pub(crate) fn set_metric(&mut self, diacritic: Diacritic, metric: Metric) {
        self.metrics.insert(diacritic, metric);
    }

    pub(crate) fn set_coordinates(&mut self, coordinates: Vec<String>) {
        for coordinate in &coordinates {
            if !self.table.contains(coordinate) {
                self.register_scalar(coordinate);
            }
        }
        self.coordinates = coordinates;
    }

    pub(crate) fn set_dimension(&mut self, dimension: usize) {
        self.dimension = Some(dimension);
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        if self.config.warn_on_override {
            tracing::warn!(span = ?warning.span(), "{}", warning.message());
            self.warnings.push(warning);
        }
    }

    pub(crate) fn undeclared(&self, name: &str, span: Range<usize>) -> Error {
        Error::new(
            ErrorKind::UndeclaredSymbol {
                name: name.to_string(),
                suggestions: suggest::close_names(self.table.names(), name),
            },
            span,
        )
    }

    fn register_scalar(&mut self, name: &str) {
        tracing::trace!(scalar = name, "registering scalar");
        let decl = TensorDecl::new(
            name,
            name,
            vec![],
            self.default_dimension(),
            Symmetry::None,
            TensorValue::scalar(Expr::symbol(name)),
            Origin::Declared,
        );
        self.table.insert(decl, self.config.component_naming);
    }

    /// The value of a scalar name, registering it as a free scalar if it is new.
    pub(crate) fn scalar(&mut self, name: &str) -> Expr {
        if name == "pi" {
            return Expr::symbol(name);
        }
        match self.table.get(name) {
            Some(decl) if decl.rank() == 0 => {
                return decl.value.get(&[]).cloned().unwrap_or_else(Expr::zero)
            }
            Some(_) => {}
            None => self.register_scalar(name),
        }
        Expr::symbol(name)
    }

    /// The value of one component of a tensor reference.
    ///
    /// A tensor that is not in the table may still be obtained from a declared tensor
    ///     with the same base and rank by raising or lowering indices with the metric.
    pub(crate) fn component(&mut self, tensor: &TensorRef, index: &[usize]) -> Result<Expr, Error> {
        if let Some(decl) = self.table.get(&tensor.name) {
            if decl.rank() == index.len() {
                return decl.value.get(index).cloned().ok_or_else(|| {
                    Error::malformed(
                        format![
                            "component index out of range for `{}` of dimension {}",
                            decl.name, decl.dimension
                        ],
                        tensor.span.clone(),
                    )
                });
            }
        }
        match self.raised_or_lowered(tensor, index)? {
            Some(expr) => Ok(expr),
            None => Err(self.undeclared(&tensor.name, tensor.span.clone())),
        }
    }

    /// A declared tensor that differs from the reference only in index heights.
    fn sibling(&self, tensor: &TensorRef) -> Option<&TensorDecl> {
        if !tensor.has_conventional_name() || tensor.rank() == 0 {
            return None;
        }
        self.table
            .order()
            .iter()
            .filter_map(|name| self.table.get(name))
            .find(|decl| {
                decl.base == tensor.base && decl.rank() == tensor.rank() && decl.name != tensor.name
            })
    }

    fn raised_or_lowered(
        &self,
        tensor: &TensorRef,
        index: &[usize],
    ) -> Result<Option<Expr>, Error> {
        let Some(sibling) = self.sibling(tensor) else {
            return Ok(None);
        };
        let Some(metric) = self.metrics.get(&Diacritic::None) else {
            return Ok(None);
        };
        let upper = self.table.get(&format!["{}UU", metric.base]);
        let lower = self.table.get(&format!["{}DD", metric.base]);
        let (Some(upper), Some(lower)) = (upper, lower) else {
            return Ok(None);
        };
        let n = sibling.dimension;
        if index.iter().any(|&i| i >= n) {
            return Err(Error::malformed(
                format![
                    "component index out of range for `{}` of dimension {n}",
                    tensor.name
                ],
                tensor.span.clone(),
            ));
        }
        let mismatched: Vec<usize> = (0..tensor.rank())
            .filter(|&slot| sibling.heights[slot] != tensor.indices[slot].height)
            .collect();
        let mut terms = vec![];
        for summed in all_components(mismatched.len(), n) {
            let mut sibling_index = index.to_vec();
            let mut factors = Vec::with_capacity(mismatched.len() + 1);
            for (&slot, &a) in mismatched.iter().zip(&summed) {
                sibling_index[slot] = a;
                let metric = match tensor.indices[slot].height {
                    Height::Upper => upper,
                    Height::Lower => lower,
                };
                factors.push(metric.value.get(&[index[slot], a]).cloned().unwrap_or_else(Expr::zero));
            }
            factors.push(
                sibling
                    .value
                    .get(&sibling_index)
                    .cloned()
                    .unwrap_or_else(Expr::zero),
            );
            terms.push(Expr::mul(factors));
        }
        Ok(Some(Expr::add(terms)))
    }

    /// Differentiates an expression with respect to the `k`th coordinate.
    ///
    /// Component symbols of declared tensors differentiate to components of a derivative
    ///     tensor, which is created the first time it is needed.
    pub(crate) fn differentiate(
        &mut self,
        expr: &Expr,
        k: usize,
        dimension: usize,
        span: &Range<usize>,
    ) -> Result<Expr, Error> {
        algebra::try_diff(expr, &mut |symbol: &algebra::Symbol| {
            self.symbol_derivative(symbol.name(), k, dimension, span)
        })
    }

    fn symbol_derivative(
        &mut self,
        name: &str,
        k: usize,
        dimension: usize,
        span: &Range<usize>,
    ) -> Result<Expr, Error> {
        if let Some(i) = self.coordinates.iter().position(|c| c == name) {
            return Ok(if i == k { Expr::one() } else { Expr::zero() });
        }
        if name == "pi" {
            return Ok(Expr::zero());
        }
        if self.table.component_owner(name).is_none() {
            self.register_scalar(name);
        }
        let Some((owner, component)) = self.table.component_owner(name) else {
            return Ok(Expr::zero());
        };
        if owner.symmetry == Symmetry::Const {
            return Ok(Expr::zero());
        }
        let (owner, mut component) = (owner.clone(), component.to_vec());
        let rank = owner.rank();
        let derivative_dimension = if rank == 0 { dimension } else { owner.dimension };
        if k >= derivative_dimension {
            return Err(Error::new(
                ErrorKind::DimensionMismatch {
                    index: owner.name.clone(),
                    first: derivative_dimension,
                    second: dimension,
                },
                span.clone(),
            ));
        }
        let name = match owner.origin {
            Origin::PartialDerivative => format!["{}D", owner.name],
            _ => format!["{}_dD", owner.name],
        };
        let stale = match self.table.get(&name) {
            Some(existing) => existing.dimension != derivative_dimension,
            None => true,
        };
        if stale {
            if component_count(rank + 1, derivative_dimension).is_none() {
                return Err(Error::malformed(
                    format!["the derivative `{name}` would have more than {MAX_COMPONENTS} components"],
                    span.clone(),
                ));
            }
            let mut pairs = owner.symmetry.pairs();
            if owner.origin == Origin::PartialDerivative && rank > 0 {
                pairs.push((rank - 1, rank, false));
            }
            let symmetry = Symmetry::from_pairs(&pairs);
            let mut heights = owner.heights.clone();
            heights.push(Height::Lower);
            let naming = self.config.component_naming;
            let value =
                TensorValue::symbolic(&name, rank + 1, derivative_dimension, &symmetry, naming);
            tracing::trace!(tensor = %name, "creating partial derivative tensor");
            self.table.insert(
                TensorDecl::new(
                    name.clone(),
                    name.clone(),
                    heights,
                    derivative_dimension,
                    symmetry,
                    value,
                    Origin::PartialDerivative,
                ),
                naming,
            );
        }
        component.push(k);
        Ok(self
            .table
            .get(&name)
            .and_then(|decl| decl.value.get(&component))
            .cloned()
            .unwrap_or_else(Expr::zero))
    }

    pub(crate) fn default_dimension(&self) -> usize {
        self.dimension.unwrap_or(self.config.default_dimension)
    }
}

impl Dimensions for Context {
    fn tensor_dimension(&self, tensor: &TensorRef) -> Option<usize> {
        match self.table.get(&tensor.name) {
            Some(decl) if decl.rank() == tensor.rank() && decl.rank() > 0 => Some(decl.dimension),
            _ => self.sibling(tensor).map(|decl| decl.dimension),
        }
    }

    fn coordinate_dimension(&self) -> Option<usize> {
        if self.coordinates.is_empty() {
            None
        } else {
            Some(self.coordinates.len())
        }
    }

    fn default_dimension(&self) -> usize {
        Context::default_dimension(self)
    }
}

/// The value of a name in a context.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Expr),
    Tensor(TensorValue),
}

impl Value {
    fn from_decl(decl: &TensorDecl) -> Value {
        match decl.value.get(&[]) {
            Some(expr) if decl.rank() == 0 => Value::Scalar(expr.clone()),
            _ => Value::Tensor(decl.value.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(expr) => write!(f, "{expr}"),
            Value::Tensor(value) => write!(f, "{value}"),
        }
    }
}

/// The result of compiling a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    symbols: Vec<String>,
    values: HashMap<String, Value>,
    warnings: Vec<Warning>,
}

impl Document {
    /// Every defined name, in order of last update.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Names and values in order of last update.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.symbols
            .iter()
            .filter_map(|name| Some((name.as_str(), self.values.get(name)?)))
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(source: &str) -> Context {
        let mut ctx = Context::default();
        ctx.parse(source).unwrap();
        ctx
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.default_dimension, 3);
        assert!(config.warn_on_override);
    }

    #[test]
    fn parse_returns_names_in_dependency_order() {
        let mut ctx = Context::default();
        let names = ctx
            .parse(
                r"
                % def vU (2), uU (2);
                w^i = v^i;
                % redef vU (2)
                ",
            )
            .unwrap();
        assert_eq!(names, ["uU", "vU", "wU"]);
        let names = ctx.parse("% redef uU (2)").unwrap();
        assert_eq!(names, ["vU", "wU", "uU"]);
    }

    #[test]
    fn coordinates_differentiate_to_kronecker() {
        let mut ctx = parsed("% coord [x, y]");
        let expr = Expr::mul([Expr::symbol("x"), Expr::symbol("y")]);
        assert_eq!(ctx.differentiate(&expr, 0, 2, &(0..0)).unwrap().to_string(), "y");
        assert_eq!(ctx.differentiate(&expr, 1, 2, &(0..0)).unwrap().to_string(), "x");
    }

    #[test]
    fn component_symbols_differentiate_to_derivative_tensor() {
        let mut ctx = parsed("% def sym01 hDD (2)");
        let got = ctx
            .differentiate(&Expr::symbol("hDD01"), 1, 2, &(0..0))
            .unwrap();
        assert_eq!(got.to_string(), "hDD_dD011");
        let derivative = ctx.table().get("hDD_dD").unwrap();
        assert_eq!(derivative.symmetry, Symmetry::Symmetric(0, 1));
        assert_eq!(derivative.origin, Origin::PartialDerivative);
    }

    #[test]
    fn second_derivatives_are_symmetric() {
        let mut ctx = parsed("% def vU (2)");
        let first = ctx
            .differentiate(&Expr::symbol("vU0"), 1, 2, &(0..0))
            .unwrap();
        let second = ctx.differentiate(&first, 0, 2, &(0..0)).unwrap();
        assert_eq!(second.to_string(), "vU_dDD001");
        assert_eq!(
            ctx.table().get("vU_dDD").unwrap().symmetry,
            Symmetry::Symmetric(1, 2)
        );
    }

    #[test]
    fn constants_differentiate_to_zero() {
        let mut ctx = parsed("% def const k");
        let got = ctx.differentiate(&Expr::symbol("k"), 0, 3, &(0..0)).unwrap();
        assert_eq!(got, Expr::zero());
    }

    #[test]
    fn derivative_index_out_of_range() {
        let mut ctx = parsed("% def vU (2)");
        let err = ctx
            .differentiate(&Expr::symbol("vU0"), 2, 3, &(0..0))
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DimensionMismatch { .. }));
    }

    #[test]
    fn undeclared_tensor_has_suggestions() {
        let mut ctx = parsed("% def vU (2)");
        let err = ctx.parse("w^i = u^i").unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::UndeclaredSymbol {
                name: "uU".into(),
                suggestions: vec!["vU".into()],
            }
        );
    }

    #[test]
    fn lowered_sibling_uses_metric() {
        let ctx = parsed(
            r"
            % def metric gDD (2), vU (2);
            w_i = v_i
            ",
        );
        assert_eq!(
            ctx.get("wD").unwrap().to_string(),
            "[gDD00*vU0 + gDD01*vU1, gDD01*vU0 + gDD11*vU1]"
        );
    }

    #[test]
    fn parse_expr_of_contraction() {
        let mut ctx = parsed("% def vU (2), wD (2)");
        assert_eq!(
            ctx.parse_expr("v^i w_i").unwrap().to_string(),
            "vU0*wD0 + vU1*wD1"
        );
    }

    #[test]
    fn parse_expr_rejects_free_indices() {
        let mut ctx = parsed("% def vU (2)");
        let err = ctx.parse_expr("v^i").unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::IllFormedEquation {
                lhs: vec![],
                rhs: vec!["^i".into()]
            }
        );
    }

    #[test]
    fn document_keeps_order_and_values() {
        let document = parsed(
            r"
            % def vU (2);
            w^i = 2 v^i
            ",
        )
        .into_document();
        assert_eq!(document.symbols(), ["vU", "wU"]);
        assert_eq!(document.get("wU").unwrap().to_string(), "[2*vU0, 2*vU1]");
        assert_eq!(document.iter().count(), 2);
    }
}
